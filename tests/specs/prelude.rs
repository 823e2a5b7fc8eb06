//! Shared harness for the end-to-end specs.

pub use serde_json::{json, Value};
pub use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use std::io::{BufRead, BufReader};
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Upper bound for any single wait in a spec.
pub const SPEC_WAIT: Duration = Duration::from_secs(15);

/// A running `pad` server rooted at a temp data dir.
pub struct Server {
    temp: TempDir,
    child: Child,
    pub addr: SocketAddr,
}

impl Server {
    pub fn start() -> Self {
        Self::start_with_env(&[])
    }

    /// Spawn `pad` with extra environment overrides.
    pub fn start_with_env(envs: &[(&str, &str)]) -> Self {
        let temp = TempDir::new().unwrap();
        Self::spawn(temp, envs)
    }

    fn spawn(temp: TempDir, envs: &[(&str, &str)]) -> Self {
        let port = free_port();
        let data_dir = temp.path().join("data");

        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin("pad"));
        cmd.arg("--data-dir")
            .arg(&data_dir)
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(port.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        for (key, value) in envs {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().expect("failed to spawn pad");

        // The server prints READY once it is accepting connections.
        let stdout = child.stdout.take().expect("child stdout missing");
        let ready = BufReader::new(stdout).lines().next();
        assert!(
            matches!(ready, Some(Ok(ref line)) if line == "READY"),
            "server did not report READY: {ready:?}"
        );

        Self { temp, child, addr: SocketAddr::from(([127, 0, 0, 1], port)) }
    }

    /// Kill the server and start a fresh one on the same data dir.
    pub fn restart(mut self, envs: &[(&str, &str)]) -> Self {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let temp = std::mem::replace(&mut self.temp, TempDir::new().unwrap());
        drop(self);
        Self::spawn(temp, envs)
    }

    /// Where the server keeps per-project metadata and logs.
    pub fn project_data_dir(&self) -> PathBuf {
        self.temp.path().join("data").join("projects")
    }

    /// Create a directory suitable as a project root.
    pub fn workspace(&self, name: &str) -> String {
        let root = self.temp.path().join("roots").join(name);
        std::fs::create_dir_all(&root).unwrap();
        root.display().to_string()
    }

    /// Write an executable fake agent script and return its path.
    pub fn fake_agent(&self, name: &str, body: &str) -> PathBuf {
        let path = self.temp.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    pub async fn client(&self) -> Client {
        Client::connect(self.addr).await
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// One WebSocket client connection.
pub struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .expect("websocket connect failed");
        Self { ws }
    }

    pub async fn send(&mut self, value: Value) {
        self.ws.send(Message::text(value.to_string())).await.expect("send failed");
    }

    /// Next text frame as JSON.
    pub async fn recv(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(SPEC_WAIT, self.ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("connection closed")
                .expect("read error");
            match msg {
                Message::Text(text) => {
                    return serde_json::from_str(text.as_str()).expect("invalid server JSON")
                }
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    /// Skip frames until one with the given type tag arrives.
    pub async fn recv_type(&mut self, kind: &str) -> Value {
        let deadline = tokio::time::Instant::now() + SPEC_WAIT;
        loop {
            assert!(
                tokio::time::Instant::now() < deadline,
                "no '{kind}' message within {SPEC_WAIT:?}"
            );
            let msg = self.recv().await;
            if msg["type"] == kind {
                return msg;
            }
        }
    }

    /// Skip frames until a `project_state` with the given state arrives.
    pub async fn recv_state(&mut self, state: &str) -> Value {
        let deadline = tokio::time::Instant::now() + SPEC_WAIT;
        loop {
            assert!(
                tokio::time::Instant::now() < deadline,
                "no project_state '{state}' within {SPEC_WAIT:?}"
            );
            let msg = self.recv_type("project_state").await;
            if msg["data"]["state"] == state {
                return msg;
            }
        }
    }

    /// Create a project and return its id.
    pub async fn create_project(&mut self, path: &str) -> String {
        self.send(json!({"type": "project_create", "data": {"path": path}})).await;
        let reply = self.recv_type("project_state").await;
        assert_eq!(reply["data"]["state"], "IDLE");
        reply["data"]["id"].as_str().expect("missing project id").to_string()
    }

    pub async fn join(&mut self, project_id: &str) {
        self.send(json!({"type": "project_join", "project_id": project_id})).await;
        let reply = self.recv_type("project_joined").await;
        assert_eq!(reply["data"]["project"]["id"], project_id);
    }

    pub async fn execute(&mut self, project_id: &str, prompt: &str) {
        self.send(json!({
            "type": "execute",
            "project_id": project_id,
            "data": {"prompt": prompt}
        }))
        .await;
    }
}

/// A scripted agent that reports a session id and two messages.
pub const CHATTY_AGENT: &str = r#"echo '{"type":"system","text":"starting","session_id":"sess-e2e"}'
echo '{"type":"result","text":"all done","session_id":"sess-e2e"}'"#;

/// A scripted agent that hangs until killed.
pub const SLEEPY_AGENT: &str = "sleep 30";

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind failed");
    let port = listener.local_addr().expect("local_addr failed").port();
    drop(listener);
    port
}
