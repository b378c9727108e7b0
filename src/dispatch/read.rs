//! Read pipeline: compile → cache → build → run → shape

use chrono::Local;
use serde_json::{json, Map, Value};
use std::time::Instant;
use tracing::debug;

use super::{Dispatcher, QueryInput};
use crate::cache::CacheClass;
use crate::error::OmniError;
use crate::query::{
    compiler, fingerprint, EntityType, NormalizedQuery, QueryError, QueryMode, SortSpec,
    DEFAULT_LIMIT, MAX_LIMIT,
};
use crate::response::Envelope;
use crate::script::builder::{self, BuilderConfig};

/// Raw result of one query execution, cached or fresh
pub(crate) struct QueryOutcome {
    pub rows: Vec<Value>,
    pub count: u64,
    pub total: Option<u64>,
    pub optimization: Option<String>,
    pub from_cache: bool,
    pub query_ms: Option<u64>,
}

pub(crate) async fn run_read(d: &Dispatcher, input: QueryInput) -> Result<Envelope, OmniError> {
    let query = compile_input(d, &input)?;
    let outcome = execute(d, &query).await?;

    let entity_name = query.entity.as_str();
    let shown = outcome.count;
    let total = outcome.total.unwrap_or(shown);

    let summary = if query.count_only {
        format!("{total} {entity_name} match")
    } else {
        let mut s = format!("{shown} {entity_name}");
        if total > shown {
            s.push_str(&format!(" of {total} matching"));
        }
        if let Some(mode) = query.mode {
            s.push_str(&format!(" ({})", mode.as_str()));
        }
        s
    };

    let data = if query.count_only {
        json!({"count": total})
    } else {
        Value::Array(outcome.rows)
    };

    let mut envelope = Envelope::ok(data)
        .with_summary(summary)
        .with_total_count(total);
    if outcome.from_cache {
        envelope = envelope.from_cache();
    }
    if let Some(ms) = outcome.query_ms {
        envelope = envelope.with_query_time(ms);
    }
    if let Some(opt) = outcome.optimization {
        envelope = envelope.with_optimization(opt);
    }
    Ok(envelope)
}

/// Compile a `QueryInput` into the normalized query
pub(crate) fn compile_input(
    d: &Dispatcher,
    input: &QueryInput,
) -> Result<NormalizedQuery, OmniError> {
    let entity = parse_entity(&input.entity)?;
    let mode = input
        .mode
        .as_deref()
        .map(QueryMode::from_user)
        .transpose()?;
    let limit = input.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let offset = input.offset.unwrap_or(0);

    let fields = input
        .fields
        .as_deref()
        .map(|names| compiler::parse_projection(entity, names))
        .transpose()?;

    let sort: Vec<SortSpec> = input
        .sort
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .map(|s| compiler::parse_sort(entity, &s.field, s.direction.as_deref()))
        .collect::<Result<_, _>>()?;

    let empty = Map::new();
    let filters = input.filters.as_ref().unwrap_or(&empty);
    let now = Local::now().naive_local();
    let due_soon_days = input.due_soon_days.unwrap_or(d.config.due_soon_days);

    Ok(compiler::compile(
        entity,
        mode,
        filters,
        sort,
        limit,
        offset,
        fields,
        input.count_only,
        now,
        due_soon_days,
    )?)
}

/// Execute a normalized query through cache and runner
pub(crate) async fn execute(
    d: &Dispatcher,
    query: &NormalizedQuery,
) -> Result<QueryOutcome, OmniError> {
    let class = CacheClass::from_entity(query.entity);
    let fp = fingerprint(query);

    if let Some((cached, age)) = d.cache.get(class, &fp) {
        debug!(fingerprint = %fp, age_secs = age.as_secs(), "cache hit");
        return Ok(QueryOutcome {
            rows: cached["rows"].as_array().cloned().unwrap_or_default(),
            count: cached["count"].as_u64().unwrap_or(0),
            total: cached["total"].as_u64(),
            optimization: cached["optimization"].as_str().map(String::from),
            from_cache: true,
            query_ms: None,
        });
    }

    // A zero limit returns empty without troubling the host
    if query.limit == 0 && !query.count_only {
        return Ok(QueryOutcome {
            rows: Vec::new(),
            count: 0,
            total: None,
            optimization: None,
            from_cache: false,
            query_ms: None,
        });
    }

    let snapshot = d.cache.snapshot();
    let built = builder::build_read(
        query,
        &BuilderConfig {
            now: Local::now().naive_local(),
            due_soon_days: d.config.due_soon_days,
        },
    )?;

    let started = Instant::now();
    let value = d.runner.run(&built.source, None).await?;
    let query_ms = started.elapsed().as_millis() as u64;

    let (rows, count, total) = if query.count_only {
        let count = value.get("count").and_then(Value::as_u64).unwrap_or(0);
        (Vec::new(), count, Some(count))
    } else {
        let rows = value
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let count = rows.len() as u64;
        let total = value.get("total").and_then(Value::as_u64);
        (rows, count, total)
    };

    let optimization = built.optimization.map(String::from);
    d.cache.insert(
        class,
        &fp,
        json!({
            "rows": rows,
            "count": count,
            "total": total,
            "optimization": optimization,
        }),
        query.mode.map(|m| m.as_str()),
        snapshot,
    );

    Ok(QueryOutcome {
        rows,
        count,
        total,
        optimization,
        from_cache: false,
        query_ms: Some(query_ms),
    })
}

/// Internal fetch for analyzers: same pipeline, raw rows out
pub(crate) async fn fetch_rows(
    d: &Dispatcher,
    entity: EntityType,
    mode: Option<QueryMode>,
    filters: &Map<String, Value>,
    limit: usize,
) -> Result<Vec<Value>, OmniError> {
    let now = Local::now().naive_local();
    let query = compiler::compile(
        entity,
        mode,
        filters,
        Vec::new(),
        limit,
        0,
        None,
        false,
        now,
        d.config.due_soon_days,
    )?;
    Ok(execute(d, &query).await?.rows)
}

pub(crate) fn parse_entity(name: &str) -> Result<EntityType, OmniError> {
    Ok(match name {
        "tasks" => EntityType::Tasks,
        "projects" => EntityType::Projects,
        "tags" => EntityType::Tags,
        "folders" => EntityType::Folders,
        "perspectives" => EntityType::Perspectives,
        other => {
            return Err(QueryError::InvalidValue {
                field: "type".into(),
                detail: format!(
                    "'{other}' is not one of tasks, projects, tags, folders, perspectives"
                ),
            }
            .into())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::script::MockExecutor;
    use std::sync::Arc;

    fn dispatcher_with(mock: Arc<MockExecutor>) -> Dispatcher {
        Dispatcher::with_executor(mock, Config::default())
    }

    fn tasks_input() -> QueryInput {
        QueryInput {
            entity: "tasks".into(),
            mode: None,
            filters: None,
            sort: None,
            limit: None,
            offset: None,
            count_only: false,
            fields: None,
            due_soon_days: None,
        }
    }

    #[tokio::test]
    async fn read_shapes_rows_and_summary() {
        let mock = Arc::new(MockExecutor::new());
        mock.push_ok(json!({"items": [{"id": "a", "name": "One"}, {"id": "b", "name": "Two"}], "count": 2}));
        let d = dispatcher_with(mock);

        let env = run_read(&d, tasks_input()).await.unwrap();
        assert!(env.success);
        assert_eq!(env.summary.as_deref(), Some("2 tasks"));
        assert_eq!(env.metadata.total_count, Some(2));
        assert_eq!(env.data.unwrap().as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn second_read_hits_cache() {
        let mock = Arc::new(MockExecutor::new());
        mock.push_ok(json!({"items": [{"id": "a"}], "count": 1}));
        let d = dispatcher_with(mock.clone());

        let first = run_read(&d, tasks_input()).await.unwrap();
        assert!(!first.metadata.from_cache);

        let second = run_read(&d, tasks_input()).await.unwrap();
        assert!(second.metadata.from_cache);
        // Only one script ever ran
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn limit_zero_returns_empty_without_running() {
        let mock = Arc::new(MockExecutor::new());
        let d = dispatcher_with(mock.clone());

        let mut input = tasks_input();
        input.limit = Some(0);
        let env = run_read(&d, input).await.unwrap();
        assert!(env.success);
        assert_eq!(env.data.unwrap().as_array().unwrap().len(), 0);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn count_only_returns_scalar_and_optimization() {
        let mock = Arc::new(MockExecutor::new());
        mock.push_ok(json!({"count": 20}));
        let d = dispatcher_with(mock.clone());

        let mut input = tasks_input();
        input.count_only = true;
        input.filters = Some(
            json!({"project": null})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let env = run_read(&d, input).await.unwrap();

        assert_eq!(env.metadata.total_count, Some(20));
        assert_eq!(env.data.unwrap()["count"], 20);
        assert_eq!(
            env.metadata.optimization.as_deref(),
            Some("inbox_collection")
        );
        // The emitted script iterated the pre-filtered inbox collection
        assert!(mock.last_script().unwrap().contains("of inbox"));
    }

    #[tokio::test]
    async fn bad_entity_is_a_validation_error() {
        let d = dispatcher_with(Arc::new(MockExecutor::new()));
        let mut input = tasks_input();
        input.entity = "notes".into();
        let err = run_read(&d, input).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn sorted_query_reports_exact_total() {
        let mock = Arc::new(MockExecutor::new());
        mock.push_ok(json!({"items": [{"id": "a"}], "count": 1, "total": 7}));
        let d = dispatcher_with(mock);

        let mut input = tasks_input();
        input.sort = Some(vec![super::super::SortInput {
            field: "dueDate".into(),
            direction: Some("asc".into()),
        }]);
        let env = run_read(&d, input).await.unwrap();
        assert_eq!(env.metadata.total_count, Some(7));
        assert_eq!(env.summary.as_deref(), Some("1 tasks of 7 matching"));
    }
}
