//! End-to-end tests for the management API and connection admission.

#![cfg(unix)]

mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{Value, json};

use common::{ECHO_AGENT, TestServer, eventually};

#[tokio::test]
async fn test_health_needs_no_key() -> Result<()> {
    let server = TestServer::start().await?;

    let resp = server
        .client
        .get(format!("{}/health", server.base_url()))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_sessions"], 0);
    assert_eq!(body["agents"], 1);

    Ok(())
}

#[tokio::test]
async fn test_api_rejects_wrong_key() -> Result<()> {
    let server = TestServer::start().await?;

    let resp = server
        .client
        .get(format!("{}/api/v1/sessions", server.base_url()))
        .header(tether_server::API_KEY_HEADER, "wrong")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn test_ws_rejects_missing_key() -> Result<()> {
    let server = TestServer::start().await?;

    assert!(server.connect_with_key(None).await.is_err());
    assert!(server.connect_with_key(Some("wrong")).await.is_err());
    assert!(server.state.guard.get_all_peers().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_sessions_capacity_and_terminate() -> Result<()> {
    let server = TestServer::start().await?;
    let mut ws = server.connect().await?;
    ws.start_session("managed").await?;

    let sessions: Value = server.get("/api/v1/sessions").send().await?.json().await?;
    assert_eq!(sessions["total"], 1);
    assert_eq!(sessions["sessions"][0]["session_id"], "managed");
    assert_eq!(sessions["sessions"][0]["running"], true);

    let capacity: Value = server
        .get(&format!("/api/v1/capacity?agent_id={}", ECHO_AGENT))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(capacity["server"]["active"], 1);
    assert_eq!(capacity["agent"]["active"], 1);

    let resp = server.delete("/api/v1/sessions/managed").send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let terminated: Value = resp.json().await?;
    assert_eq!(terminated["agent_id"], ECHO_AGENT);
    assert_eq!(terminated["was_active"], true);
    assert_eq!(server.state.admission.active_count(), 0);

    let resp = server.delete("/api/v1/sessions/managed").send().await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // the stream's process is gone; input is refused
    ws.send(json!({"type": "text", "value": "hi", "correlation_id": "after"}))
        .await?;
    let reply = ws.recv_until(|m| m["correlation_id"] == "after").await?;
    assert_eq!(reply["type"], "error");

    Ok(())
}

#[tokio::test]
async fn test_ban_blocks_new_streams() -> Result<()> {
    let server = TestServer::start().await?;

    let resp = server
        .post("/api/v1/peers/127.0.0.1/ban")
        .json(&json!({"reason": "testing"}))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    assert!(server.connect().await.is_err());

    let bans: Value = server.get("/api/v1/peers/banned").send().await?.json().await?;
    assert_eq!(bans["total"], 1);
    assert_eq!(bans["bans"][0]["reason"], "testing");

    let resp = server.delete("/api/v1/peers/127.0.0.1/ban").send().await?;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let ws = server.connect().await?;
    ws.close().await?;

    Ok(())
}

#[tokio::test]
async fn test_peers_and_history() -> Result<()> {
    let server = TestServer::start().await?;
    let ws = server.connect().await?;

    let peers: Value = server.get("/api/v1/peers").send().await?.json().await?;
    assert_eq!(peers["total"], 1);
    assert_eq!(peers["peers"][0]["peer"], "127.0.0.1");
    assert_eq!(peers["peers"][0]["active_connections"], 1);

    ws.close().await?;
    let guard = server.state.guard.clone();
    assert!(eventually(|| guard.get_connected_peers().is_empty()).await);

    let all: Value = server
        .get("/api/v1/peers?all=true")
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(all["total"], 1);

    let history: Value = server
        .get("/api/v1/peers/history?limit=10")
        .send()
        .await?
        .json()
        .await?;
    let actions: Vec<&str> = history["entries"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["action"].as_str())
        .collect();
    assert!(actions.contains(&"open"));
    assert!(actions.contains(&"close"));

    Ok(())
}

#[tokio::test]
async fn test_abandoned_sessions_endpoint() -> Result<()> {
    let server = TestServer::start().await?;
    let mut ws = server.connect().await?;
    ws.start_session("dropped").await?;
    ws.close().await?;

    let admission = server.state.admission.clone();
    assert!(eventually(|| !admission.list_abandoned_sessions().is_empty()).await);

    let abandoned: Value = server
        .get("/api/v1/sessions/abandoned")
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(abandoned["total"], 1);
    assert_eq!(abandoned["sessions"][0]["session_id"], "dropped");
    assert_eq!(
        abandoned["sessions"][0]["reason"],
        "stream closed without STOP"
    );

    Ok(())
}
