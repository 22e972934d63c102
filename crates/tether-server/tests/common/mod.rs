//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use tether_agent::{AgentCommand, AgentRegistry, CommandFactory};
use tether_server::{API_KEY_HEADER, AppState, Server, ServerConfig};

/// Agent id of the `cat` agent every test server registers.
pub const ECHO_AGENT: &str = "echo";

/// How long a test waits for a single frame.
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// A test server that runs in the background.
pub struct TestServer {
    /// The server's address.
    pub addr: SocketAddr,
    /// The API key for the server.
    pub api_key: String,
    /// HTTP client for this server.
    pub client: Client,
    /// Shared state, for asserting on guard and admission directly.
    pub state: AppState,
    shutdown: CancellationToken,
    _handle: JoinHandle<()>,
    /// Upload directory.
    pub temp_dir: TempDir,
}

impl TestServer {
    /// Start a test server with a `cat` agent and default limits.
    pub async fn start() -> Result<Self> {
        Self::start_with(|config| config).await
    }

    /// Start a test server after adjusting its configuration.
    pub async fn start_with(configure: impl FnOnce(ServerConfig) -> ServerConfig) -> Result<Self> {
        Self::start_with_agents(configure, &[]).await
    }

    /// Start a test server with extra agents registered beside `echo`.
    pub async fn start_with_agents(
        configure: impl FnOnce(ServerConfig) -> ServerConfig,
        extra_agents: &[(&str, AgentCommand)],
    ) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let api_key = "test-key".to_string();

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = ServerConfig::new(Some(api_key.clone()))
            .with_bind_address(addr)
            .with_rate_limiting(false)
            .with_request_logging(false)
            .with_upload_dir(temp_dir.path());
        let config = configure(config);

        let mut agents = AgentRegistry::new();
        agents.register(CommandFactory::new(ECHO_AGENT, AgentCommand::new("cat")));
        for (agent_id, command) in extra_agents {
            agents.register(CommandFactory::new(*agent_id, command.clone()));
        }
        let agents = agents.with_default(ECHO_AGENT);

        let server = Server::new(config, agents);
        let state = server.state().clone();
        let shutdown = server.shutdown_token();
        let handle = tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        let client = Client::new();
        wait_for_server(&client, addr).await?;

        Ok(Self {
            addr,
            api_key,
            client,
            state,
            shutdown,
            _handle: handle,
            temp_dir,
        })
    }

    /// Get the base URL for the server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get an authenticated GET request builder.
    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url(), path))
            .header(API_KEY_HEADER, &self.api_key)
    }

    /// Get an authenticated POST request builder.
    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url(), path))
            .header(API_KEY_HEADER, &self.api_key)
    }

    /// Get an authenticated DELETE request builder.
    pub fn delete(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .delete(format!("{}{}", self.base_url(), path))
            .header(API_KEY_HEADER, &self.api_key)
    }

    /// Open an authenticated WebSocket stream.
    pub async fn connect(&self) -> Result<WsClient> {
        self.connect_with_key(Some(&self.api_key)).await
    }

    /// Open a WebSocket stream with an arbitrary key (or none).
    pub async fn connect_with_key(&self, key: Option<&str>) -> Result<WsClient> {
        let mut request = format!("ws://{}/ws", self.addr).into_client_request()?;
        if let Some(key) = key {
            request
                .headers_mut()
                .insert(API_KEY_HEADER, HeaderValue::from_str(key)?);
        }
        let (stream, _) = connect_async(request).await?;
        Ok(WsClient { stream })
    }

    /// Stop the server and every open stream.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A connected WebSocket client.
pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    /// Send one JSON frame.
    pub async fn send(&mut self, msg: Value) -> Result<()> {
        self.stream.send(Message::text(msg.to_string())).await?;
        Ok(())
    }

    /// Send a raw text frame.
    pub async fn send_raw(&mut self, text: &str) -> Result<()> {
        self.stream.send(Message::text(text.to_string())).await?;
        Ok(())
    }

    /// Next JSON frame from the server.
    pub async fn recv(&mut self) -> Result<Value> {
        loop {
            let msg = timeout(FRAME_TIMEOUT, self.stream.next())
                .await
                .context("timed out waiting for a frame")?
                .context("stream ended")??;
            match msg {
                Message::Text(text) => return Ok(serde_json::from_str(text.as_str())?),
                Message::Close(_) => anyhow::bail!("stream closed by server"),
                _ => continue,
            }
        }
    }

    /// Skip frames until one matches `pred`.
    pub async fn recv_until(&mut self, pred: impl Fn(&Value) -> bool) -> Result<Value> {
        loop {
            let msg = self.recv().await?;
            if pred(&msg) {
                return Ok(msg);
            }
        }
    }

    /// Send START and wait for the `session_started` event.
    pub async fn start_session(&mut self, session_id: &str) -> Result<Value> {
        self.send(serde_json::json!({
            "type": "control",
            "action": "start",
            "session_id": session_id,
            "correlation_id": format!("start-{}", session_id),
        }))
        .await?;
        self.recv_until(|m| m["type"] == "event").await
    }

    /// Send START for a specific agent and wait for the resulting event.
    pub async fn start_agent(&mut self, session_id: &str, agent_id: &str) -> Result<Value> {
        self.send(serde_json::json!({
            "type": "control",
            "action": "start",
            "session_id": session_id,
            "agent_id": agent_id,
            "correlation_id": format!("start-{}", session_id),
        }))
        .await?;
        self.recv_until(|m| m["type"] == "event").await
    }

    /// Close the stream from the client side.
    pub async fn close(mut self) -> Result<()> {
        self.stream.close(None).await?;
        Ok(())
    }
}

/// Wait for the server to become ready.
async fn wait_for_server(client: &Client, addr: SocketAddr) -> Result<()> {
    let url = format!("http://{}/health", addr);

    let result = timeout(Duration::from_secs(5), async {
        loop {
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return,
                _ => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    })
    .await;

    match result {
        Ok(()) => Ok(()),
        Err(_) => anyhow::bail!("Timeout waiting for server to start"),
    }
}

/// Poll `check` until it holds or a few seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
