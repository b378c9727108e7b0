//! Cross-dialect emission invariants
//!
//! These pin the rules both emitters must agree on, driven through the
//! public dispatch surface so regressions in compilation or emission both
//! trip them.

use std::sync::Arc;

use serde_json::json;

use omnibridge::{Config, Dispatcher, MockExecutor};

fn dispatcher_with(mock: Arc<MockExecutor>) -> Dispatcher {
    Dispatcher::with_executor(mock, Config::default())
}

async fn emitted_script(query: serde_json::Value) -> String {
    let mock = Arc::new(MockExecutor::new());
    mock.push_ok(json!({"items": [], "count": 0}));
    let d = dispatcher_with(mock.clone());
    let env = d.handle_read(json!({"query": query})).await;
    assert!(env.success, "query failed: {:?}", env.error);
    mock.last_script().unwrap()
}

#[tokio::test]
async fn filter_scripts_never_call_whose() {
    // The attribute-predicate API is the historical cause of 25s+ queries;
    // it is banned everywhere except single-id lookups
    for query in [
        json!({"type": "tasks", "mode": "today"}),
        json!({"type": "tasks", "filters": {"name": "budget", "flagged": true}}),
        json!({"type": "projects", "filters": {"status": "active"}}),
        json!({"type": "tasks", "filters": {"tags": ["work", "urgent"]}, "sort": [{"field": "dueDate"}]}),
    ] {
        let script = emitted_script(query.clone()).await;
        assert!(
            !script.contains("whose"),
            "whose() leaked into filter script for {query}"
        );
    }
}

#[tokio::test]
async fn empty_filter_compiles_to_true() {
    let script = emitted_script(json!({"type": "tasks"})).await;
    // Empty AND is the literal true, not an empty conjunction
    assert!(script.contains("if (!(true)) continue") || script.contains("if (true)"));
}

#[tokio::test]
async fn all_reads_ship_params_as_parsed_json() {
    let script = emitted_script(json!({"type": "tasks", "mode": "overdue", "offset": 10})).await;
    assert!(script.contains("JSON.parse"));
    // Dates rehydrate once, ahead of the loop
    assert!(script.contains("P.dates.map(s => new Date(s))"));
}

#[tokio::test]
async fn offset_pagination_uses_a_skip_counter() {
    let script = emitted_script(json!({"type": "tasks", "offset": 20, "limit": 10})).await;
    assert!(script.contains("skipped < P.offset"));
    assert!(script.contains("skipped++"));

    let no_offset = emitted_script(json!({"type": "tasks", "limit": 10})).await;
    assert!(!no_offset.contains("skipped++"));
}

#[tokio::test]
async fn includes_comparison_is_case_insensitive_both_sides() {
    let script = emitted_script(json!({"type": "tasks", "filters": {"name": "BudGet"}})).await;
    assert!(script.contains("toLowerCase()"));
    assert!(script.contains("budget"));
    assert!(!script.contains("BudGet"));
}

#[tokio::test]
async fn search_mode_spans_name_and_note() {
    let script = emitted_script(json!({
        "type": "tasks", "mode": "search", "filters": {"search": "quarterly"}
    }))
    .await;
    assert!(script.contains("name"));
    assert!(script.contains("note"));
    assert!(script.contains("quarterly"));
}

#[tokio::test]
async fn available_mode_expands_to_derived_definition() {
    let script = emitted_script(json!({"type": "tasks", "mode": "available"})).await;
    // Not blocked, not completed, not dropped, defer absent-or-past
    assert!(script.contains("Blocked"));
    assert!(script.contains("completed"));
    assert!(script.contains("Dropped"));
    assert!(script.contains("deferDate"));
}

#[tokio::test]
async fn projection_omits_unselected_accessors() {
    let script = emitted_script(json!({
        "type": "tasks", "fields": ["name", "dueDate"]
    }))
    .await;
    assert!(script.contains("dueDate: fmt(t.dueDate)"));
    assert!(!script.contains("estimatedMinutes"));
    assert!(!script.contains("deferDate: fmt"));
}

#[tokio::test]
async fn scripts_stay_under_the_byte_ceiling_for_large_tag_sets() {
    // Many tags still ride the parameter payload, not inline expressions
    let tags: Vec<String> = (0..300).map(|i| format!("tag-number-{i}")).collect();
    let script = emitted_script(json!({
        "type": "tasks", "filters": {"tags": {"operator": "OR", "values": tags}}
    }))
    .await;
    assert!(script.len() < 100_000);
    assert!(script.contains("P.tagSets[0]"));
}
