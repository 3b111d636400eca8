//! Stdio transport for MCP servers.
//!
//! A server is a child process; the client owns its stdin/stdout pair and
//! exchanges newline-delimited JSON-RPC frames over it. One request is in
//! flight at a time per server: the pipe pair sits behind a single mutex
//! held for the whole send/receive cycle, which is what keeps responses
//! from being attributed to the wrong caller.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use crate::protocol::{self, JsonRpcResponse};
use tern_domain::config::McpServerConfig;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("stdio I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("message encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server process is gone")]
    ProcessExited,

    #[error("no response within the deadline")]
    Timeout,
}

/// How long to wait for the response to a single request.
const RESPONSE_WAIT: tokio::time::Duration = tokio::time::Duration::from_secs(30);

/// Non-JSON stdout lines tolerated per read before the server is declared
/// broken. Catches servers that log to stdout instead of stderr.
const NOISE_LINE_LIMIT: usize = 1000;

struct Pipes {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Child-process transport speaking line-delimited JSON-RPC.
pub struct StdioTransport {
    pipes: Mutex<Pipes>,
    child: Mutex<Child>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

fn pipe_missing(name: &str) -> TransportError {
    TransportError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        format!("child {name} pipe was not captured"),
    ))
}

impl StdioTransport {
    /// Start the configured command with piped stdio.
    pub fn spawn(config: &McpServerConfig) -> Result<Self, TransportError> {
        let mut command = tokio::process::Command::new(&config.command);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = command.spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| pipe_missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| pipe_missing("stdout"))?;

        Ok(Self {
            pipes: Mutex::new(Pipes {
                stdin,
                stdout: BufReader::new(stdout),
            }),
            child: Mutex::new(child),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Issue a request and wait for the response carrying the same id.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        if !self.is_alive() {
            return Err(TransportError::ProcessExited);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let wire = serde_json::to_string(&protocol::request(id, method, params))?;

        // Lock held across the full cycle: no interleaved requests.
        let mut pipes = self.pipes.lock().await;
        tracing::debug!(id, method, "mcp request");
        write_frame(&mut pipes.stdin, &wire).await?;

        match tokio::time::timeout(RESPONSE_WAIT, self.await_response(&mut pipes, id)).await {
            Ok(response) => response,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    /// Fire-and-forget message; nothing is read back.
    pub async fn send_notification(&self, method: &str) -> Result<(), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::ProcessExited);
        }
        let wire = serde_json::to_string(&protocol::notification(method))?;
        let mut pipes = self.pipes.lock().await;
        tracing::debug!(method, "mcp notification");
        write_frame(&mut pipes.stdin, &wire).await
    }

    /// Close stdin, give the process five seconds to exit, then kill it.
    pub async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);

        {
            let mut pipes = self.pipes.lock().await;
            if let Err(e) = pipes.stdin.shutdown().await {
                tracing::debug!(error = %e, "closing server stdin failed");
            }
        }

        let mut child = self.child.lock().await;
        let wait = tokio::time::timeout(tokio::time::Duration::from_secs(5), child.wait());
        match wait.await {
            Ok(Ok(status)) => tracing::debug!(?status, "mcp server exited"),
            Ok(Err(e)) => tracing::warn!(error = %e, "waiting on mcp server failed"),
            Err(_) => {
                tracing::warn!("mcp server ignored stdin close, killing it");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "kill failed");
                }
            }
        }
    }

    /// Keep reading frames until one is a response with the wanted id.
    /// Notifications from the server and responses to other ids are logged
    /// and dropped.
    async fn await_response(
        &self,
        pipes: &mut Pipes,
        id: u64,
    ) -> Result<JsonRpcResponse, TransportError> {
        loop {
            let line = self.recv_line(pipes).await?;
            match serde_json::from_str::<JsonRpcResponse>(&line) {
                Ok(response) if response.id == id => return Ok(response),
                Ok(response) => {
                    tracing::debug!(wanted = id, got = response.id, "dropping unmatched response");
                }
                Err(_) => {
                    tracing::debug!(line = %line, "dropping non-response frame");
                }
            }
        }
    }

    /// Next JSON-looking line from stdout. Blank lines are ignored; other
    /// noise is counted against [`NOISE_LINE_LIMIT`]. EOF marks the server
    /// dead.
    async fn recv_line(&self, pipes: &mut Pipes) -> Result<String, TransportError> {
        let mut noise = 0usize;
        loop {
            let mut line = String::new();
            if pipes.stdout.read_line(&mut line).await? == 0 {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::ProcessExited);
            }

            let frame = line.trim();
            if frame.is_empty() {
                continue;
            }
            if frame.starts_with('{') {
                return Ok(frame.to_owned());
            }

            tracing::debug!(line = %frame, "ignoring non-JSON stdout line");
            noise += 1;
            if noise >= NOISE_LINE_LIMIT {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "server floods stdout with non-JSON output",
                )));
            }
        }
    }
}

async fn write_frame(stdin: &mut ChildStdin, wire: &str) -> Result<(), TransportError> {
    stdin.write_all(wire.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::methods;

    fn server(command: &str) -> McpServerConfig {
        McpServerConfig {
            id: "test".into(),
            command: command.into(),
            args: Vec::new(),
            env: Default::default(),
        }
    }

    #[tokio::test]
    async fn echo_process_round_trips_a_request() {
        // `cat` reflects the request line back; the echo parses as a
        // response with the matching id and a null result.
        let transport = StdioTransport::spawn(&server("cat")).unwrap();
        let resp = transport.send_request(methods::TOOLS_LIST, None).await.unwrap();
        assert_eq!(resp.into_result().unwrap(), Value::Null);

        assert!(transport.is_alive());
        transport.shutdown().await;
        assert!(!transport.is_alive());
    }

    #[tokio::test]
    async fn spawn_of_missing_binary_fails() {
        let result = StdioTransport::spawn(&server("tern-no-such-binary-for-tests"));
        assert!(matches!(result, Err(TransportError::Io(_))));
    }

    #[tokio::test]
    async fn requests_refused_after_shutdown() {
        let transport = StdioTransport::spawn(&server("cat")).unwrap();
        transport.shutdown().await;

        let result = transport.send_request(methods::TOOLS_LIST, None).await;
        assert!(matches!(result, Err(TransportError::ProcessExited)));
    }
}
