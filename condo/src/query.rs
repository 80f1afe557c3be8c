//! The read-only diagnostic query endpoint (C6, spec.md §4.6, §6).
//!
//! A single GET route doesn't warrant a full HTTP server stack, so this
//! hand-rolls the HTTP/1.1 request line and response directly over a
//! bare `tokio::net::TcpListener`: read the request line, ignore
//! headers and body, write a status line with a `Content-Type` header
//! and the body.

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::reconciler::ReconcilerHandle;

/// Serve `GET /state` on `port` until the process exits. Any other
/// request gets `404 Not Found` (spec.md §6).
pub async fn serve(port: u16, reconciler: ReconcilerHandle) -> miette::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| miette::miette!("failed to bind query endpoint on port {port}: {e}"))?;

    tracing::info!(port, "query endpoint listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept query connection");
                continue;
            }
        };

        let reconciler = reconciler.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, reconciler).await {
                tracing::debug!(peer = %peer, error = %e, "query connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    reconciler: ReconcilerHandle,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    // drain the remaining request headers; the query endpoint has no
    // use for them, but the client expects them to be read.
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 || line == "\r\n" || line == "\n" {
            break;
        }
    }

    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();

    let (status, content_type, body) = if path == "/state" {
        let state = reconciler.get_state().await;
        let body = serde_json::to_string(&state_to_json(&state))
            .unwrap_or_else(|_| "{}".to_string());
        ("200 OK", "application/json", body)
    } else {
        ("404 Not Found", "text/plain; charset=utf-8", "Not found".to_string())
    };

    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );

    write_half.write_all(response.as_bytes()).await?;
    write_half.flush().await?;
    Ok(())
}

/// Encode a `State` snapshot per spec.md §6's `GET /state` shape.
fn state_to_json(state: &condo_core::state::State) -> serde_json::Value {
    let roles: Vec<_> = state
        .roles
        .values()
        .map(|role| {
            json!({
                "key": role.key,
                "nodes": role.role_nodes,
                "services": role.services.iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
            })
        })
        .collect();

    let nodes: Vec<_> = state
        .nodes
        .values()
        .map(|node| {
            json!({
                "name": node.name,
                "ip": node.ip,
                "tags": node.tags.iter().map(|(k, v)| json!({"key": k, "value": v})).collect::<Vec<_>>(),
                "roles": state.roles_for_node(&node.name),
            })
        })
        .collect();

    let watchers: Vec<_> = state
        .watchers
        .values()
        .map(|watcher| {
            json!({
                "key": watcher.key,
                "roles": watcher.watcher_roles,
                "watcher_value": watcher.value.to_json(),
            })
        })
        .collect();

    json!({ "roles": roles, "nodes": nodes, "watchers": watchers })
}
