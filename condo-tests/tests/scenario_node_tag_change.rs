//! Scenario 4 (spec.md §8): a `NodeUpdated` changing a node's matching
//! tag moves it from one role to another — DELETEs for the old role's
//! services, PUTs for the new role's services.

mod support;

use std::sync::Arc;
use std::time::Duration;

use condo_core::validator::MinimalSchemaValidator;
use condo::reconciler;
use support::FakeConsulClient;

const NODES: &str = "condo/nodes";
const ROLES: &str = "condo/roles";
const SERVICES: &str = "condo/services";

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn node_tag_change_reshuffles_matching_roles() {
    let client = Arc::new(FakeConsulClient::new());
    let validator = Arc::new(MinimalSchemaValidator);

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
    client
        .publish(ROLES, "svc", r#"{:matcher (eq :dc "us") :services {:worker {:name "worker" :environment []}}}"#, false)
        .await;
    settle().await;

    client
        .publish(NODES, "alpha", r#"{"ip":"10.0.0.1","tags":{"dc":"eu"}}"#, false)
        .await;
    settle().await;

    let puts_before = client.puts().await;
    assert_eq!(puts_before.len(), 1);
    assert_eq!(puts_before[0].0, "condo/services/alpha/app");

    client
        .publish(NODES, "alpha", r#"{"ip":"10.0.0.1","tags":{"dc":"us"}}"#, true)
        .await;
    settle().await;

    let deletes = client.deletes().await;
    assert!(deletes.contains(&"condo/services/alpha/app".to_string()));

    let puts_after = client.puts().await;
    assert!(puts_after.iter().any(|(p, _)| p == "condo/services/alpha/worker"));
}
