//! Process-wide settings for the script execution subsystem
//!
//! Two load-bearing limits live here: the script byte ceiling (the host
//! silently truncates oversized scripts, so exceeding it must be refused
//! before spawn) and the per-call timeout. Both come from the environment
//! and are clamped to safe ranges.

use std::time::Duration;

/// Script byte ceiling default (the host truncation cliff sits just above)
pub const DEFAULT_MAX_SCRIPT_SIZE: usize = 100_000;

/// Per-call timeout default
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_millis(120_000);

/// Concurrent in-flight child processes (the host serializes them anyway)
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Time since last success after which the connection is considered stale
pub const DEFAULT_STALENESS_WINDOW: Duration = Duration::from_secs(300);

/// Due-soon horizon used by the today preset and the reason projection
pub const DEFAULT_DUE_SOON_DAYS: i64 = 3;

/// Runtime configuration, environment-derived with clamped ranges
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum script size in bytes, checked before spawn
    pub max_script_size: usize,

    /// Per-call execution timeout
    pub script_timeout: Duration,

    /// Semaphore permits around the runner
    pub max_concurrency: usize,

    /// Robust Runner staleness window
    pub staleness_window: Duration,

    /// Path to the osascript interpreter
    pub osascript_path: String,

    /// Days ahead that count as "due soon"
    pub due_soon_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_script_size: DEFAULT_MAX_SCRIPT_SIZE,
            script_timeout: DEFAULT_SCRIPT_TIMEOUT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            staleness_window: DEFAULT_STALENESS_WINDOW,
            osascript_path: "osascript".to_string(),
            due_soon_days: DEFAULT_DUE_SOON_DAYS,
        }
    }
}

impl Config {
    /// Load from environment variables, clamping every value to its safe range
    ///
    /// Unset or unparseable variables fall back to defaults. Ranges:
    /// - `OMNIBRIDGE_MAX_SCRIPT_SIZE`: 10 000 ..= 400 000 bytes
    /// - `OMNIBRIDGE_SCRIPT_TIMEOUT_MS`: 1 000 ..= 600 000 ms
    /// - `OMNIBRIDGE_MAX_CONCURRENCY`: 1 ..= 16
    /// - `OMNIBRIDGE_STALENESS_WINDOW_MS`: 10 000 ..= 3 600 000 ms
    /// - `OMNIBRIDGE_DUE_SOON_DAYS`: 1 ..= 30
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_script_size: env_clamped(
                "OMNIBRIDGE_MAX_SCRIPT_SIZE",
                defaults.max_script_size,
                10_000,
                400_000,
            ),
            script_timeout: Duration::from_millis(env_clamped(
                "OMNIBRIDGE_SCRIPT_TIMEOUT_MS",
                defaults.script_timeout.as_millis() as u64,
                1_000,
                600_000,
            )),
            max_concurrency: env_clamped(
                "OMNIBRIDGE_MAX_CONCURRENCY",
                defaults.max_concurrency,
                1,
                16,
            ),
            staleness_window: Duration::from_millis(env_clamped(
                "OMNIBRIDGE_STALENESS_WINDOW_MS",
                defaults.staleness_window.as_millis() as u64,
                10_000,
                3_600_000,
            )),
            osascript_path: std::env::var("OMNIBRIDGE_OSASCRIPT_PATH")
                .unwrap_or(defaults.osascript_path),
            due_soon_days: env_clamped("OMNIBRIDGE_DUE_SOON_DAYS", defaults.due_soon_days, 1, 30),
        }
    }

    /// Override the script size ceiling (tests, embedded callers)
    pub fn with_max_script_size(mut self, bytes: usize) -> Self {
        self.max_script_size = bytes;
        self
    }

    /// Override the per-call timeout
    pub fn with_script_timeout(mut self, timeout: Duration) -> Self {
        self.script_timeout = timeout;
        self
    }

    /// Override the staleness window
    pub fn with_staleness_window(mut self, window: Duration) -> Self {
        self.staleness_window = window;
        self
    }

    /// Override the osascript path
    pub fn with_osascript_path(mut self, path: impl Into<String>) -> Self {
        self.osascript_path = path.into();
        self
    }

    /// Override the due-soon horizon
    pub fn with_due_soon_days(mut self, days: i64) -> Self {
        self.due_soon_days = days;
        self
    }
}

/// Parse an env var as a number and clamp it; fall back to `default` when
/// unset or unparseable
fn env_clamped<T>(name: &str, default: T, min: T, max: T) -> T
where
    T: std::str::FromStr + PartialOrd + Copy,
{
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) if v < min => min,
            Ok(v) if v > max => max,
            Ok(v) => v,
            Err(_) => default,
        },
        Err(_) => default,
    }
}
