//! Scenario 1 (spec.md §8): empty start, then a node, then a matching
//! role. Publishing the node alone has no VKV effect; publishing the
//! role materializes one service document with `HOST` bound to the
//! node's IP.

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
async fn node_then_role_materializes_one_service() {
    let client = Arc::new(FakeConsulClient::new());
    let validator = Arc::new(MinimalSchemaValidator);

    let (handle, _task) = reconciler::spawn(
        client.clone(),
        validator,
        NODES.to_string(),
        ROLES.to_string(),
        SERVICES.to_string(),
    )
    .await
    .unwrap();

    client
        .publish(NODES, "alpha", r#"{"ip":"10.0.0.1","tags":{"dc":"eu"}}"#, false)
        .await;
    settle().await;

    assert!(client.puts().await.is_empty(), "node alone must not materialize anything");

    client
        .publish(
            ROLES,
            "web",
            r#"{:matcher (eq :dc "eu") :services {:app {:name "app" :environment []}}}"#,
            false,
        )
        .await;
    settle().await;

    let puts = client.puts().await;
    assert_eq!(puts.len(), 1);
    let (path, body) = &puts[0];
    assert_eq!(path, "condo/services/alpha/app");
    assert!(body.contains("\"HOST\""));
    assert!(body.contains("10.0.0.1"));

    let state = handle.get_state().await;
    assert_eq!(state.roles_for_node("alpha"), vec!["web"]);
}
