//! Integration tests for ensure_query: shape comparison, fetch settling, and wiring errors.

use super::support::{
    compile_test_query, identity, lifecycle, update, wait_until, ScriptedTransport, TestQuery,
};
use querykeep::accumulator::ShallowMergeAccumulator;
use querykeep::context::ContextEventKind;
use querykeep::error::{ConfigurationError, FetchError, TransportError};
use querykeep::orchestrator::QueryOrchestrator;
use querykeep::transport::Transport;
use querykeep::{Credentials, QueryLifecycle, QueryStatus};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_unchanged_shape_fetches_and_subscribes_once() {
    let transport = ScriptedTransport::new();
    transport.respond("A", json!({"a": 1}));
    let lifecycle = lifecycle(&transport);
    let id = identity("Q1");
    let query = TestQuery::new("A", &["items"]);
    let creds = Credentials::bearer("t");

    let handle = lifecycle.ensure_query(&id, &query, &creds).unwrap().unwrap();
    assert_eq!(handle.await, Ok(()));
    assert!(lifecycle.ensure_query(&id, &query, &creds).unwrap().is_none());
    assert!(lifecycle.ensure_query(&id, &query.clone(), &creds).unwrap().is_none());

    assert_eq!(transport.fetch_count("A"), 1);
    assert_eq!(transport.opened_streams(), 1);
    let ctx = lifecycle.get(&id);
    assert_eq!(ctx.results, json!({"a": 1}));
    assert!(ctx.has_resolved);
    assert_eq!(ctx.status(), QueryStatus::Resolved);
}

#[tokio::test]
async fn test_duplicate_call_while_in_flight_joins_execution() {
    let transport = ScriptedTransport::new();
    let gate = transport.hold("A");
    transport.respond("A", json!({"a": 1}));
    let lifecycle = lifecycle(&transport);
    let id = identity("Q1");
    let query = TestQuery::new("A", &[]);
    let creds = Credentials::anonymous();

    let first = lifecycle.ensure_query(&id, &query, &creds).unwrap().unwrap();
    let second = lifecycle.ensure_query(&id, &query, &creds).unwrap().unwrap();
    assert_eq!(first.epoch(), second.epoch());
    assert_eq!(lifecycle.get(&id).status(), QueryStatus::Fetching);
    assert!(!lifecycle.get(&id).has_resolved);

    gate.notify_one();
    assert_eq!(second.await, Ok(()));
    assert_eq!(first.await, Ok(()));
    assert_eq!(transport.fetch_count("A"), 1);
    assert!(lifecycle.get(&id).in_flight.is_none());
}

#[tokio::test]
async fn test_subscription_messages_merge_in_arrival_order() {
    let transport = ScriptedTransport::new();
    transport.respond("A", json!({"a": 1, "b": 1}));
    let lifecycle = lifecycle(&transport);
    let id = identity("Q1");
    let mut events = lifecycle.events();

    let handle = lifecycle
        .ensure_query(&id, &TestQuery::new("A", &["items"]), &Credentials::anonymous())
        .unwrap()
        .unwrap();
    handle.await.unwrap();

    assert!(transport.push("items", update(json!({"b": 2}))));
    assert!(transport.push("items", update(json!({"b": 3, "c": 1}))));
    wait_until(|| lifecycle.get(&id).results == json!({"a": 1, "b": 3, "c": 1})).await;

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    assert_eq!(
        kinds,
        vec![
            ContextEventKind::FetchStarted,
            ContextEventKind::Fetched,
            ContextEventKind::Merged,
            ContextEventKind::Merged,
        ]
    );
}

#[tokio::test]
async fn test_fetch_failure_is_stored_not_thrown() {
    let transport = ScriptedTransport::new();
    transport.fail_fetch("A", TransportError::Request("offline".to_string()));
    let lifecycle = lifecycle(&transport);
    let id = identity("Q1");

    let handle = lifecycle
        .ensure_query(&id, &TestQuery::new("A", &["items"]), &Credentials::anonymous())
        .unwrap()
        .unwrap();
    let outcome = handle.await;
    assert!(matches!(outcome, Err(FetchError::Transport(TransportError::Request(_)))));

    let ctx = lifecycle.get(&id);
    assert!(ctx.has_resolved);
    assert!(ctx.query_error.is_some());
    assert_eq!(ctx.status(), QueryStatus::Failed);
    assert_eq!(ctx.results, json!({}));
    assert_eq!(transport.opened_streams(), 0);

    // No automatic retry with the same shape
    assert!(lifecycle
        .ensure_query(&id, &TestQuery::new("A", &["items"]), &Credentials::anonymous())
        .unwrap()
        .is_none());
    assert_eq!(transport.fetch_count("A"), 1);
}

#[tokio::test]
async fn test_changed_shape_clears_previous_error_and_refetches() {
    let transport = ScriptedTransport::new();
    transport.fail_fetch("A", TransportError::Request("offline".to_string()));
    transport.respond("B", json!({"b": 1}));
    let lifecycle = lifecycle(&transport);
    let id = identity("Q1");
    let creds = Credentials::anonymous();

    let _ = lifecycle
        .ensure_query(&id, &TestQuery::new("A", &[]), &creds)
        .unwrap()
        .unwrap()
        .await;
    let handle = lifecycle
        .ensure_query(&id, &TestQuery::new("B", &[]), &creds)
        .unwrap()
        .unwrap();
    assert!(lifecycle.get(&id).query_error.is_none());
    handle.await.unwrap();

    let ctx = lifecycle.get(&id);
    assert_eq!(ctx.results, json!({"b": 1}));
    assert_eq!(ctx.status(), QueryStatus::Resolved);
}

#[tokio::test]
async fn test_compile_failure_is_a_fetch_error() {
    let transport = ScriptedTransport::new();
    let lifecycle = lifecycle(&transport);
    let id = identity("Q1");

    let handle = lifecycle
        .ensure_query(&id, &TestQuery::new("", &[]), &Credentials::anonymous())
        .unwrap()
        .unwrap();
    assert!(matches!(handle.await, Err(FetchError::Compile(_))));
    let ctx = lifecycle.get(&id);
    assert!(ctx.has_resolved);
    assert!(matches!(ctx.query_error, Some(FetchError::Compile(_))));
    assert_eq!(transport.total_fetches(), 0);
}

#[test]
fn test_ensure_query_without_runtime_is_configuration_error() {
    let transport = ScriptedTransport::new();
    let lifecycle = lifecycle(&transport);
    let result = lifecycle.ensure_query(
        &identity("Q1"),
        &TestQuery::new("A", &[]),
        &Credentials::anonymous(),
    );
    assert!(matches!(result, Err(ConfigurationError::NoRuntime(_))));
}

#[test]
fn test_missing_collaborators_fail_at_build() {
    let missing_transport = QueryLifecycle::<TestQuery>::builder()
        .compiler(compile_test_query)
        .accumulator(Arc::new(ShallowMergeAccumulator))
        .build();
    assert!(matches!(
        missing_transport,
        Err(ConfigurationError::MissingCollaborator("transport"))
    ));

    let missing_store = QueryOrchestrator::<TestQuery>::builder()
        .compiler(compile_test_query)
        .transport(ScriptedTransport::new() as Arc<dyn Transport>)
        .accumulator(Arc::new(ShallowMergeAccumulator))
        .build();
    assert!(matches!(
        missing_store,
        Err(ConfigurationError::MissingCollaborator("context store"))
    ));
}
