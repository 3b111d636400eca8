//! Shell command execution, disabled by default.
//!
//! Foreground only: run the command under `sh -c`, wait up to the
//! configured timeout, return combined stdout/stderr. Commands matching
//! any denied pattern are rejected before spawning.

use std::process::Stdio;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tern_domain::config::ExecConfig;
use tern_domain::error::{Error, Result};
use tern_domain::message::ToolDefinition;
use tokio::process::Command;
use tracing::warn;

use crate::{Tool, ToolContext, ToolOutput};

pub struct ExecTool {
    timeout: Duration,
    max_output_chars: usize,
    denied: Vec<Regex>,
}

impl ExecTool {
    pub fn new(config: &ExecConfig) -> Result<Self> {
        let mut denied = Vec::with_capacity(config.denied_patterns.len());
        for pattern in &config.denied_patterns {
            let re = Regex::new(pattern).map_err(|e| {
                Error::Config(format!("tools.exec.denied_patterns `{pattern}`: {e}"))
            })?;
            denied.push(re);
        }
        Ok(Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_output_chars: config.max_output_chars,
            denied,
        })
    }

    fn check_denied(&self, command: &str) -> Result<()> {
        if self.denied.iter().any(|re| re.is_match(command)) {
            warn!(command = %command, "exec command blocked");
            return Err(Error::tool("exec", "command matches a denied pattern"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Tool for ExecTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "exec".into(),
            description: "Run a shell command and return its combined output.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Shell command to run via sh -c" },
                    "workdir": { "type": "string", "description": "Working directory (optional)" }
                },
                "required": ["command"]
            }),
        }
    }

    async fn run(&self, arguments: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let command = arguments
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::tool("exec", "missing args.command"))?;
        self.check_denied(command)?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        if let Some(workdir) = arguments.get("workdir").and_then(|v| v.as_str()) {
            cmd.current_dir(workdir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| Error::tool("exec", format!("failed to spawn: {e}")))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "command exceeded {}s timeout",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| Error::tool("exec", e.to_string()))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }
        if combined.chars().count() > self.max_output_chars {
            combined = combined.chars().take(self.max_output_chars).collect();
            combined.push_str("\n[output truncated]");
        }

        let code = output.status.code();
        let summary = match code {
            Some(0) => combined,
            Some(n) => format!("exit code {n}\n{combined}"),
            None => format!("terminated by signal\n{combined}"),
        };

        Ok(ToolOutput::text(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> ExecTool {
        ExecTool::new(&ExecConfig::default()).unwrap()
    }

    #[test]
    fn default_denylist_blocks_destructive_commands() {
        let t = tool();
        assert!(t.check_denied("rm -rf /").is_err());
        assert!(t.check_denied("sudo mkfs.ext4 /dev/sda").is_err());
        assert!(t.check_denied("dd if=/dev/zero of=/dev/sda").is_err());
        assert!(t.check_denied("shutdown -h now").is_err());
        assert!(t.check_denied("ls -la").is_ok());
        assert!(t.check_denied("echo hello").is_ok());
    }

    #[test]
    fn invalid_pattern_fails_construction() {
        let config = ExecConfig {
            denied_patterns: vec!["[unclosed".to_string()],
            ..Default::default()
        };
        assert!(ExecTool::new(&config).is_err());
    }

    #[tokio::test]
    async fn runs_command_and_captures_output() {
        let out = tool()
            .run(
                serde_json::json!({"command": "echo hello"}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert!(out.summary.contains("hello"));
        assert!(out.documents.is_empty());
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_in_summary() {
        let out = tool()
            .run(
                serde_json::json!({"command": "exit 3"}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert!(out.summary.contains("exit code 3"));
    }

    #[tokio::test]
    async fn long_output_is_truncated() {
        let config = ExecConfig {
            max_output_chars: 50,
            ..Default::default()
        };
        let t = ExecTool::new(&config).unwrap();
        let out = t
            .run(
                serde_json::json!({"command": "yes x | head -200"}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert!(out.summary.contains("[output truncated]"));
    }
}
