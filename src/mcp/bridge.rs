use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to spawn tool process '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tool process pipe unavailable: {0}")]
    Pipe(&'static str),

    #[error("failed to write request: {0}")]
    Write(#[from] std::io::Error),

    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("connection to '{0}' closed before a response arrived")]
    ConnectionClosed(String),

    #[error("initialization of '{server}' failed: {message}")]
    Initialize { server: String, message: String },

    #[error("tool call failed: {message}")]
    Protocol { code: i64, message: String },
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: i64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BridgeState {
    Disconnected,
    Connecting,
    Connected,
}

struct Connection {
    child: Child,
    stdin: Arc<tokio::sync::Mutex<ChildStdin>>,
}

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<RpcResponse>>>>;

/// Removes a pending-response slot on every exit path, so an abandoned call
/// never leaks its map entry.
struct SlotGuard {
    pending: PendingMap,
    id: i64,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.pending
            .lock()
            .expect("pending map poisoned")
            .remove(&self.id);
    }
}

/// Client side of one external tool subprocess, speaking line-delimited
/// JSON-RPC 2.0 over the child's stdin/stdout. Owns the process and its
/// pipes; the child is killed and reaped on close.
pub struct BridgeClient {
    server_name: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,

    next_id: AtomicI64,
    pending: PendingMap,

    state: tokio::sync::Mutex<BridgeState>,
    connection: tokio::sync::Mutex<Option<Connection>>,
}

impl BridgeClient {
    pub fn new(
        server_name: &str,
        command: &str,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> Self {
        Self {
            server_name: server_name.to_string(),
            command: command.to_string(),
            args,
            env,
            next_id: AtomicI64::new(0),
            pending: Arc::new(Mutex::new(HashMap::new())),
            state: tokio::sync::Mutex::new(BridgeState::Disconnected),
            connection: tokio::sync::Mutex::new(None),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Spawn the tool process, start the reader tasks, and perform the
    /// initialize handshake. A no-op when already connected.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        {
            let mut state = self.state.lock().await;
            if *state == BridgeState::Connected {
                return Ok(());
            }
            *state = BridgeState::Connecting;
        }

        let result = self.establish().await;

        let mut state = self.state.lock().await;
        match result {
            Ok(()) => {
                *state = BridgeState::Connected;
                info!(server = %self.server_name, "bridge connected");
                Ok(())
            }
            Err(e) => {
                // A half-open connection (spawned but not initialized) must
                // not outlive the failed attempt.
                if let Some(mut connection) = self.connection.lock().await.take() {
                    let _ = connection.child.kill().await;
                    let _ = connection.child.wait().await;
                }
                *state = BridgeState::Disconnected;
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<(), BridgeError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BridgeError::Spawn {
                command: self.command.clone(),
                source: e,
            })?;

        let stdin = child.stdin.take().ok_or(BridgeError::Pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(BridgeError::Pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(BridgeError::Pipe("stderr"))?;

        // Response demultiplexer: route each stdout line to the caller
        // waiting on its id. Lines with no registered id are dropped; the
        // caller already gave up.
        let pending = self.pending.clone();
        let server = self.server_name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let response: RpcResponse = match serde_json::from_str(&line) {
                            Ok(r) => r,
                            Err(e) => {
                                error!(server = %server, "failed to parse bridge response: {e}");
                                continue;
                            }
                        };
                        let slot = pending
                            .lock()
                            .expect("pending map poisoned")
                            .remove(&response.id);
                        if let Some(slot) = slot {
                            let _ = slot.send(response);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(server = %server, "bridge stdout read error: {e}");
                        break;
                    }
                }
            }
            // Dropping the senders wakes every caller still waiting on this
            // connection with a closed-channel error.
            pending.lock().expect("pending map poisoned").clear();
            debug!(server = %server, "bridge stdout reader finished");
        });

        // Drain stderr into the log.
        let server = self.server_name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(server = %server, "tool stderr: {line}");
            }
        });

        *self.connection.lock().await = Some(Connection {
            child,
            stdin: Arc::new(tokio::sync::Mutex::new(stdin)),
        });

        self.initialize().await?;
        Ok(())
    }

    async fn initialize(&self) -> Result<(), BridgeError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "modelgate",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        match self.send_request("initialize", Some(params)).await {
            Ok(_) => Ok(()),
            Err(BridgeError::Protocol { message, .. }) => Err(BridgeError::Initialize {
                server: self.server_name.clone(),
                message,
            }),
            Err(e) => Err(e),
        }
    }

    /// Invoke a tool on the subprocess and wait for the matching response.
    /// Connects first when disconnected. The wait has no internal timeout;
    /// callers bound it with their own deadline.
    pub async fn call_tool(&self, tool_name: &str, args: Value) -> Result<Value, BridgeError> {
        if *self.state.lock().await != BridgeState::Connected {
            self.connect().await?;
        }

        let params = json!({
            "name": tool_name,
            "arguments": args,
        });

        self.send_request("tools/call", Some(params)).await
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(id, tx);
        let _guard = SlotGuard {
            pending: self.pending.clone(),
            id,
        };

        let stdin = {
            let connection = self.connection.lock().await;
            connection
                .as_ref()
                .map(|c| c.stdin.clone())
                .ok_or(BridgeError::Pipe("stdin"))?
        };
        {
            let mut stdin = stdin.lock().await;
            stdin.write_all(&line).await?;
            stdin.flush().await?;
        }

        let response = rx
            .await
            .map_err(|_| BridgeError::ConnectionClosed(self.server_name.clone()))?;

        if let Some(err) = response.error {
            // A protocol-level error fails this call only; the connection
            // stays usable.
            return Err(BridgeError::Protocol {
                code: err.code,
                message: err.message,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Kill and reap the subprocess. Safe to call repeatedly.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if *state == BridgeState::Disconnected {
            return;
        }

        if let Some(mut connection) = self.connection.lock().await.take() {
            if let Err(e) = connection.child.kill().await {
                warn!(server = %self.server_name, "failed to kill tool process: {e}");
            }
            let _ = connection.child.wait().await;
        }

        *state = BridgeState::Disconnected;
        info!(server = %self.server_name, "bridge disconnected");
    }
}
