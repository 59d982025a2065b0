//! Integration tests for subscription failures tearing down the whole set.

use super::support::{identity, lifecycle, update, wait_until, ScriptedTransport, TestQuery};
use querykeep::context::ContextEventKind;
use querykeep::error::TransportError;
use querykeep::{Credentials, QueryStatus};
use serde_json::json;

#[tokio::test]
async fn test_one_failing_stream_cancels_all_three() {
    let transport = ScriptedTransport::new();
    transport.respond("A", json!({"a": 1}));
    let lifecycle = lifecycle(&transport);
    let id = identity("Q1");
    let query = TestQuery::new("A", &["first", "second", "third"]);

    lifecycle
        .ensure_query(&id, &query, &Credentials::anonymous())
        .unwrap()
        .unwrap()
        .await
        .unwrap();
    assert_eq!(transport.opened_streams(), 3);
    assert_eq!(lifecycle.store().registry().live_count(&id), 3);

    assert!(transport.push("first", update(json!({"a": 2}))));
    wait_until(|| lifecycle.get(&id).results == json!({"a": 2})).await;

    let mut events = lifecycle.events();
    assert!(transport.break_stream("second", TransportError::StreamClosed("reset".to_string())));
    wait_until(|| transport.closed_streams() == 3).await;

    let ctx = lifecycle.get(&id);
    let error = ctx.subscription_error.clone().unwrap();
    assert_eq!(error.subscription, "second");
    assert_eq!(ctx.results, json!({"a": 2}));
    assert!(ctx.query_error.is_none());
    assert_eq!(ctx.status(), QueryStatus::Resolved);
    assert_eq!(lifecycle.store().registry().live_count(&id), 0);
    assert_eq!(
        events.try_recv().unwrap().kind,
        ContextEventKind::SubscriptionFailed
    );

    // Streams are gone; later pushes go nowhere
    assert!(!transport.push("third", update(json!({"a": 3}))));
    assert_eq!(lifecycle.get(&id).results, json!({"a": 2}));
}

#[tokio::test]
async fn test_failure_to_open_closes_already_opened_streams() {
    let transport = ScriptedTransport::new();
    transport.respond("A", json!({"a": 1}));
    transport.fail_open("second");
    let lifecycle = lifecycle(&transport);
    let id = identity("Q1");

    let outcome = lifecycle
        .ensure_query(
            &id,
            &TestQuery::new("A", &["first", "second", "third"]),
            &Credentials::anonymous(),
        )
        .unwrap()
        .unwrap()
        .await;
    // The fetch itself succeeded
    assert_eq!(outcome, Ok(()));

    wait_until(|| transport.closed_streams() == 1).await;
    assert_eq!(transport.opened_streams(), 1);
    let ctx = lifecycle.get(&id);
    assert_eq!(ctx.subscription_error.unwrap().subscription, "second");
    assert_eq!(ctx.results, json!({"a": 1}));
    assert_eq!(lifecycle.store().registry().live_count(&id), 0);
}

#[tokio::test]
async fn test_same_shape_after_subscription_failure_does_not_refetch() {
    let transport = ScriptedTransport::new();
    transport.respond("A", json!({"a": 1}));
    transport.fail_open("items");
    let lifecycle = lifecycle(&transport);
    let id = identity("Q1");
    let query = TestQuery::new("A", &["items"]);
    let creds = Credentials::anonymous();

    lifecycle
        .ensure_query(&id, &query, &creds)
        .unwrap()
        .unwrap()
        .await
        .unwrap();
    assert!(lifecycle.get(&id).subscription_error.is_some());

    for _ in 0..5 {
        if let Some(handle) = lifecycle.ensure_query(&id, &query, &creds).unwrap() {
            let _ = handle.await;
        }
    }

    assert_eq!(transport.fetch_count("A"), 1);
    let ctx = lifecycle.get(&id);
    assert_eq!(ctx.subscription_error.unwrap().subscription, "items");
    assert_eq!(ctx.results, json!({"a": 1}));
}

#[tokio::test]
async fn test_clear_or_changed_shape_recovers_after_subscription_failure() {
    let transport = ScriptedTransport::new();
    transport.respond("A", json!({"a": 1}));
    transport.respond("B", json!({"b": 1}));
    let lifecycle = lifecycle(&transport);
    let id = identity("Q1");
    let query = TestQuery::new("A", &["items"]);
    let creds = Credentials::anonymous();

    lifecycle
        .ensure_query(&id, &query, &creds)
        .unwrap()
        .unwrap()
        .await
        .unwrap();
    transport.break_stream("items", TransportError::StreamClosed("reset".to_string()));
    wait_until(|| lifecycle.get(&id).subscription_error.is_some()).await;

    lifecycle.clear(&id);
    lifecycle
        .ensure_query(&id, &query, &creds)
        .unwrap()
        .unwrap()
        .await
        .unwrap();
    assert!(lifecycle.get(&id).subscription_error.is_none());
    assert_eq!(transport.fetch_count("A"), 2);
    assert_eq!(lifecycle.store().registry().live_count(&id), 1);

    transport.break_stream("items", TransportError::StreamClosed("reset".to_string()));
    wait_until(|| lifecycle.get(&id).subscription_error.is_some()).await;
    lifecycle
        .ensure_query(&id, &TestQuery::new("B", &["items"]), &creds)
        .unwrap()
        .unwrap()
        .await
        .unwrap();
    let ctx = lifecycle.get(&id);
    assert!(ctx.subscription_error.is_none());
    assert_eq!(ctx.results, json!({"b": 1}));
    assert_eq!(transport.fetch_count("B"), 1);
}

#[tokio::test]
async fn test_malformed_message_counts_as_stream_failure() {
    let transport = ScriptedTransport::new();
    transport.respond("A", json!({"a": 1}));
    let lifecycle = lifecycle(&transport);
    let id = identity("Q1");

    lifecycle
        .ensure_query(
            &id,
            &TestQuery::new("A", &["items", "other"]),
            &Credentials::anonymous(),
        )
        .unwrap()
        .unwrap()
        .await
        .unwrap();
    assert!(transport.push("items", json!({"operation": "merge"})));
    wait_until(|| transport.closed_streams() == 2).await;

    let error = lifecycle.get(&id).subscription_error.unwrap();
    assert!(matches!(error.source, TransportError::Malformed(_)));
    assert_eq!(lifecycle.get(&id).results, json!({"a": 1}));
}
