//! Scenario 5 (spec.md §8): a PUT that fails twice eventually succeeds,
//! and no other event is processed while retries are in flight.

mod support;

use std::sync::Arc;
use std::time::Duration;

use condo_core::validator::MinimalSchemaValidator;
use condo::reconciler;
use support::FakeConsulClient;

const NODES: &str = "condo/nodes";
const ROLES: &str = "condo/roles";
const SERVICES: &str = "condo/services";

#[tokio::test]
async fn put_retries_until_success() {
    let client = Arc::new(FakeConsulClient::new());
    let validator = Arc::new(MinimalSchemaValidator);

    client.fail_next_puts("condo/services/alpha/app", 2).await;

    let (_handle, _task) = reconciler::spawn(
        client.clone(),
        validator,
        NODES.to_string(),
        ROLES.to_string(),
        SERVICES.to_string(),
    )
    .await
    .unwrap();

    client
        .publish(ROLES, "web", r#"{:matcher (eq :dc "eu") :services {:app {:name "app" :environment []}}}"#, false)
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    client
        .publish(NODES, "alpha", r#"{"ip":"10.0.0.1","tags":{"dc":"eu"}}"#, false)
        .await;

    // the fake's backoff is the real 5s retry interval from the
    // reconciler; two failures plus the eventual success costs a
    // little over 10s to observe deterministically.
    tokio::time::sleep(Duration::from_millis(10_300)).await;

    let puts = client.puts().await;
    assert_eq!(puts.len(), 1, "exactly one successful PUT is recorded, not the failed attempts");
    assert_eq!(puts[0].0, "condo/services/alpha/app");
}
