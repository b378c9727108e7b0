//! Cache Manager: TTL-keyed store with selective invalidation
//!
//! Keys are `(class, query-fingerprint)`; values are shaped response
//! payloads. Entries expire lazily on read plus a periodic sweep. Writes
//! coordinate through a monotonic logical clock: a read that overlaps an
//! in-flight write for the same class bypasses the cache, and invalidation
//! applies at write completion, so a write that began before a read but
//! completed after cannot leave a stale entry visible.

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::query::EntityType;

// ============================================================================
// CLASSES AND TTLS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheClass {
    Tasks,
    Projects,
    Tags,
    Folders,
    Reviews,
    Analytics,
}

impl CacheClass {
    pub fn from_entity(entity: EntityType) -> CacheClass {
        match entity {
            EntityType::Tasks => CacheClass::Tasks,
            EntityType::Projects => CacheClass::Projects,
            EntityType::Tags => CacheClass::Tags,
            EntityType::Folders => CacheClass::Folders,
            EntityType::Perspectives => CacheClass::Folders,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheClass::Tasks => "tasks",
            CacheClass::Projects => "projects",
            CacheClass::Tags => "tags",
            CacheClass::Folders => "folders",
            CacheClass::Reviews => "reviews",
            CacheClass::Analytics => "analytics",
        }
    }

    const ALL: [CacheClass; 6] = [
        CacheClass::Tasks,
        CacheClass::Projects,
        CacheClass::Tags,
        CacheClass::Folders,
        CacheClass::Reviews,
        CacheClass::Analytics,
    ];
}

/// Per-class time-to-live
#[derive(Debug, Clone)]
pub struct CacheTtls {
    pub tasks: Duration,
    pub projects: Duration,
    pub tags: Duration,
    pub folders: Duration,
    pub reviews: Duration,
    pub analytics: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            tasks: Duration::from_secs(300),
            projects: Duration::from_secs(300),
            tags: Duration::from_secs(600),
            folders: Duration::from_secs(600),
            reviews: Duration::from_secs(180),
            analytics: Duration::from_secs(3_600),
        }
    }
}

impl CacheTtls {
    fn for_class(&self, class: CacheClass) -> Duration {
        match class {
            CacheClass::Tasks => self.tasks,
            CacheClass::Projects => self.projects,
            CacheClass::Tags => self.tags,
            CacheClass::Folders => self.folders,
            CacheClass::Reviews => self.reviews,
            CacheClass::Analytics => self.analytics,
        }
    }
}

// ============================================================================
// ENTRIES
// ============================================================================

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    /// Logical insertion stamp; entries older than the class floor are dead
    inserted_clock: u64,
    /// Mode pattern this entry answers, for selective invalidation
    mode: Option<String>,
}

/// What a completed write invalidates
#[derive(Debug, Clone)]
pub enum Invalidation {
    /// Nothing observable changed (dry runs)
    None,
    /// Everything in the class
    Class,
    /// Only query patterns that could observe the change; entries with no
    /// recorded mode are invalidated too, conservatively
    Patterns(Vec<String>),
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub per_class: Vec<(String, usize)>,
}

// ============================================================================
// MANAGER
// ============================================================================

pub struct CacheManager {
    entries: DashMap<(CacheClass, String), CacheEntry>,
    ttls: CacheTtls,
    clock: AtomicU64,
    class_floor: DashMap<CacheClass, u64>,
    in_flight: DashMap<CacheClass, usize>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheManager {
    pub fn new() -> Self {
        Self::with_ttls(CacheTtls::default())
    }

    pub fn with_ttls(ttls: CacheTtls) -> Self {
        Self {
            entries: DashMap::new(),
            ttls,
            clock: AtomicU64::new(1),
            class_floor: DashMap::new(),
            in_flight: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Take a logical-clock snapshot; reads stamp their entries with the
    /// snapshot taken before their query executed
    pub fn snapshot(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    /// Look up a cached value; `None` on miss, expiry, invalidation, or when
    /// a write for the class is in flight
    pub fn get(&self, class: CacheClass, fingerprint: &str) -> Option<(Value, Duration)> {
        if self.writes_in_flight(class) > 0 {
            debug!(class = class.as_str(), "cache bypass, write in flight");
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let key = (class, fingerprint.to_string());
        let floor = self.floor(class);
        let ttl = self.ttls.for_class(class);

        let mut dead = false;
        let result = match self.entries.get(&key) {
            Some(entry) if entry.inserted_clock >= floor && entry.inserted_at.elapsed() < ttl => {
                Some((entry.value.clone(), entry.inserted_at.elapsed()))
            }
            Some(_) => {
                dead = true;
                None
            }
            None => None,
        };
        // Lazy expiry, after the read guard is released
        if dead {
            self.entries.remove(&key);
        }

        match &result {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    /// Insert a shaped value stamped with the read's pre-query snapshot
    pub fn insert(
        &self,
        class: CacheClass,
        fingerprint: &str,
        value: Value,
        mode: Option<&str>,
        snapshot: u64,
    ) {
        self.entries.insert(
            (class, fingerprint.to_string()),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                inserted_clock: snapshot,
                mode: mode.map(String::from),
            },
        );
    }

    /// Register an in-flight write; the returned guard must be completed (or
    /// dropped, which releases the bypass without invalidating)
    pub fn begin_write(&self, class: CacheClass) -> WriteGuard<'_> {
        *self.in_flight.entry(class).or_insert(0) += 1;
        WriteGuard {
            cache: self,
            class,
            done: false,
        }
    }

    /// Workflow-scoped invalidators
    pub fn invalidate_workflow(&self, workflow: &str) {
        match workflow {
            "inbox_processing" => {
                self.invalidate(CacheClass::Tasks, &Invalidation::Class);
                self.invalidate(CacheClass::Tags, &Invalidation::Class);
            }
            "weekly_review" => {
                self.invalidate(CacheClass::Projects, &Invalidation::Class);
                self.invalidate(CacheClass::Reviews, &Invalidation::Class);
            }
            "daily_planning" => {
                self.invalidate(
                    CacheClass::Tasks,
                    &Invalidation::Patterns(
                        ["today", "upcoming", "overdue", "flagged", "available"]
                            .iter()
                            .map(|s| s.to_string())
                            .collect(),
                    ),
                );
            }
            _ => {}
        }
    }

    /// Drop everything
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let mut per_class = Vec::new();
        for class in CacheClass::ALL {
            let count = self.entries.iter().filter(|e| e.key().0 == class).count();
            if count > 0 {
                per_class.push((class.as_str().to_string(), count));
            }
        }
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            per_class,
        }
    }

    /// Remove expired entries; called by the periodic sweeper
    pub fn sweep(&self) {
        self.entries
            .retain(|(class, _), entry| entry.inserted_at.elapsed() < self.ttls.for_class(*class));
    }

    /// Spawn the background sweeper task
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                cache.sweep();
            }
        })
    }

    fn invalidate(&self, class: CacheClass, invalidation: &Invalidation) {
        // Analytics freshness is governed by TTL alone; only an explicit
        // cache clear touches it
        if class == CacheClass::Analytics {
            return;
        }
        match invalidation {
            Invalidation::None => {}
            Invalidation::Class => {
                let floor = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
                self.class_floor.insert(class, floor);
                debug!(class = class.as_str(), floor, "class invalidated");
            }
            Invalidation::Patterns(patterns) => {
                self.entries.retain(|(c, _), entry| {
                    if *c != class {
                        return true;
                    }
                    match &entry.mode {
                        Some(mode) => !patterns.iter().any(|p| p == mode),
                        // Unknown shape could observe anything
                        None => false,
                    }
                });
                debug!(class = class.as_str(), ?patterns, "patterns invalidated");
            }
        }
    }

    fn writes_in_flight(&self, class: CacheClass) -> usize {
        self.in_flight.get(&class).map(|v| *v).unwrap_or(0)
    }

    fn floor(&self, class: CacheClass) -> u64 {
        self.class_floor.get(&class).map(|v| *v).unwrap_or(0)
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII handle for an in-flight write
///
/// Dropping without `complete` releases the read bypass but applies no
/// invalidation; failed writes changed nothing observable.
pub struct WriteGuard<'a> {
    cache: &'a CacheManager,
    class: CacheClass,
    done: bool,
}

impl WriteGuard<'_> {
    /// Apply invalidation at write-completion time
    pub fn complete(mut self, invalidation: Invalidation) {
        self.cache.invalidate(self.class, &invalidation);
        self.done = true;
        self.release();
    }

    fn release(&mut self) {
        if let Some(mut count) = self.cache.in_flight.get_mut(&self.class) {
            *count = count.saturating_sub(1);
        }
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.release();
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tiny_ttls() -> CacheTtls {
        CacheTtls {
            tasks: Duration::from_millis(30),
            projects: Duration::from_millis(30),
            tags: Duration::from_millis(30),
            folders: Duration::from_millis(30),
            reviews: Duration::from_millis(30),
            analytics: Duration::from_millis(30),
        }
    }

    #[test]
    fn hit_then_lazy_expiry() {
        let cache = CacheManager::with_ttls(tiny_ttls());
        let snap = cache.snapshot();
        cache.insert(CacheClass::Tasks, "fp1", json!({"n": 1}), Some("today"), snap);

        let (value, age) = cache.get(CacheClass::Tasks, "fp1").unwrap();
        assert_eq!(value["n"], 1);
        assert!(age < Duration::from_millis(30));

        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get(CacheClass::Tasks, "fp1").is_none());
        // Lazy expiry removed the entry
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn class_invalidation_kills_older_entries() {
        let cache = CacheManager::new();
        let snap = cache.snapshot();
        cache.insert(CacheClass::Tasks, "fp1", json!(1), Some("today"), snap);

        let guard = cache.begin_write(CacheClass::Tasks);
        guard.complete(Invalidation::Class);

        assert!(cache.get(CacheClass::Tasks, "fp1").is_none());

        // A fresh read inserted after the invalidation survives
        let snap = cache.snapshot();
        cache.insert(CacheClass::Tasks, "fp1", json!(2), Some("today"), snap);
        assert_eq!(cache.get(CacheClass::Tasks, "fp1").unwrap().0, json!(2));
    }

    #[test]
    fn selective_invalidation_spares_unrelated_patterns() {
        let cache = CacheManager::new();
        let snap = cache.snapshot();
        cache.insert(CacheClass::Tasks, "today-fp", json!(1), Some("today"), snap);
        cache.insert(CacheClass::Tasks, "blocked-fp", json!(2), Some("blocked"), snap);
        cache.insert(CacheClass::Tasks, "bare-fp", json!(3), None, snap);

        let guard = cache.begin_write(CacheClass::Tasks);
        guard.complete(Invalidation::Patterns(vec![
            "today".into(),
            "overdue".into(),
        ]));

        assert!(cache.get(CacheClass::Tasks, "today-fp").is_none());
        // Blocked queries could not observe a due-date change
        assert!(cache.get(CacheClass::Tasks, "blocked-fp").is_some());
        // Mode-less entries go conservatively
        assert!(cache.get(CacheClass::Tasks, "bare-fp").is_none());
    }

    #[test]
    fn in_flight_write_bypasses_reads() {
        let cache = CacheManager::new();
        let snap = cache.snapshot();
        cache.insert(CacheClass::Tasks, "fp1", json!(1), Some("today"), snap);

        let guard = cache.begin_write(CacheClass::Tasks);
        // Collision with an in-flight write for the same class
        assert!(cache.get(CacheClass::Tasks, "fp1").is_none());
        // Other classes are unaffected
        let psnap = cache.snapshot();
        cache.insert(CacheClass::Projects, "fp2", json!(2), None, psnap);
        assert!(cache.get(CacheClass::Projects, "fp2").is_some());

        guard.complete(Invalidation::None);
        assert!(cache.get(CacheClass::Tasks, "fp1").is_some());
    }

    #[test]
    fn read_overlapping_write_cannot_leave_stale_entry() {
        let cache = CacheManager::new();

        // Read takes its snapshot, then the write begins and completes
        // before the read inserts
        let read_snapshot = cache.snapshot();
        let guard = cache.begin_write(CacheClass::Tasks);
        guard.complete(Invalidation::Class);

        cache.insert(CacheClass::Tasks, "fp1", json!("stale"), Some("today"), read_snapshot);
        // The entry's clock is below the class floor set at write completion
        assert!(cache.get(CacheClass::Tasks, "fp1").is_none());
    }

    #[test]
    fn dropped_guard_releases_bypass_without_invalidating() {
        let cache = CacheManager::new();
        let snap = cache.snapshot();
        cache.insert(CacheClass::Tasks, "fp1", json!(1), Some("today"), snap);

        {
            let _guard = cache.begin_write(CacheClass::Tasks);
            assert!(cache.get(CacheClass::Tasks, "fp1").is_none());
        }
        // Failed write: entry survives
        assert!(cache.get(CacheClass::Tasks, "fp1").is_some());
    }

    #[test]
    fn analytics_ignores_write_invalidation() {
        let cache = CacheManager::new();
        let snap = cache.snapshot();
        cache.insert(CacheClass::Analytics, "fp1", json!(1), None, snap);

        let guard = cache.begin_write(CacheClass::Analytics);
        guard.complete(Invalidation::Class);

        assert!(cache.get(CacheClass::Analytics, "fp1").is_some());
    }

    #[test]
    fn workflow_invalidators() {
        let cache = CacheManager::new();
        let snap = cache.snapshot();
        cache.insert(CacheClass::Tasks, "t", json!(1), Some("today"), snap);
        cache.insert(CacheClass::Tasks, "b", json!(1), Some("blocked"), snap);
        cache.insert(CacheClass::Projects, "p", json!(1), None, snap);
        cache.insert(CacheClass::Reviews, "r", json!(1), None, snap);

        cache.invalidate_workflow("daily_planning");
        assert!(cache.get(CacheClass::Tasks, "t").is_none());
        assert!(cache.get(CacheClass::Tasks, "b").is_some());
        assert!(cache.get(CacheClass::Projects, "p").is_some());

        cache.invalidate_workflow("weekly_review");
        assert!(cache.get(CacheClass::Projects, "p").is_none());
        assert!(cache.get(CacheClass::Reviews, "r").is_none());
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let cache = CacheManager::with_ttls(tiny_ttls());
        let snap = cache.snapshot();
        cache.insert(CacheClass::Tasks, "fp1", json!(1), None, snap);
        std::thread::sleep(Duration::from_millis(40));

        cache.sweep();
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn stats_count_hits_and_misses() {
        let cache = CacheManager::new();
        let snap = cache.snapshot();
        cache.insert(CacheClass::Tags, "fp", json!(1), None, snap);

        let _ = cache.get(CacheClass::Tags, "fp");
        let _ = cache.get(CacheClass::Tags, "missing");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.per_class, vec![("tags".to_string(), 1)]);
    }
}
