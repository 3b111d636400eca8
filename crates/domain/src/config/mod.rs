mod engine;
mod llm;
mod mcp;
mod observability;
mod server;
mod sessions;
mod tools;

pub use engine::*;
pub use llm::*;
pub use mcp::*;
pub use observability::*;
pub use server::*;
pub use sessions::*;
pub use tools::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub mcp: McpConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// One finding from [`Config::validate`]. Warnings are advisory;
/// errors make the config unusable.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            ConfigSeverity::Error => write!(f, "[ERROR] {}: {}", self.field, self.message),
            ConfigSeverity::Warning => write!(f, "[WARN] {}: {}", self.field, self.message),
        }
    }
}

impl Config {
    /// Check the whole config and report everything at once rather than
    /// failing on the first problem.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut findings = Vec::new();
        self.check_server(&mut findings);
        self.check_llm(&mut findings);
        self.check_engine(&mut findings);
        self.check_tools(&mut findings);
        self.check_mcp(&mut findings);
        findings
    }

    /// True when no `Error`-severity finding exists.
    pub fn is_valid(&self) -> bool {
        self.validate()
            .iter()
            .all(|issue| issue.severity != ConfigSeverity::Error)
    }

    fn check_server(&self, findings: &mut Vec<ConfigError>) {
        if self.server.port == 0 {
            findings.push(ConfigError::error(
                "server.port",
                "port must be greater than 0",
            ));
        }
        if self.server.host.is_empty() {
            findings.push(ConfigError::error(
                "server.host",
                "host must not be empty",
            ));
        }
        if let Some(rl) = &self.server.rate_limit {
            if rl.requests_per_second == 0 {
                findings.push(ConfigError::error(
                    "server.rate_limit.requests_per_second",
                    "must be greater than 0",
                ));
            }
            if rl.burst_size == 0 {
                findings.push(ConfigError::error(
                    "server.rate_limit.burst_size",
                    "must be greater than 0",
                ));
            }
        }
    }

    fn check_llm(&self, findings: &mut Vec<ConfigError>) {
        if self.llm.transports.is_empty() {
            findings.push(ConfigError::warning(
                "llm.transports",
                "no transports configured; the engine cannot run a turn",
            ));
        }

        let mut ids = std::collections::HashSet::new();
        for t in &self.llm.transports {
            if t.id.is_empty() {
                findings.push(ConfigError::error(
                    "llm.transports.id",
                    "transport id must not be empty",
                ));
            } else if !ids.insert(t.id.as_str()) {
                findings.push(ConfigError::error(
                    "llm.transports",
                    format!("duplicate transport id `{}`", t.id),
                ));
            }
            if t.model.is_empty() {
                findings.push(ConfigError::error(
                    format!("llm.transports.{}.model", t.id),
                    "model must not be empty",
                ));
            }
        }

        if let Some(def) = &self.llm.default_transport {
            if !self.llm.transports.iter().any(|t| &t.id == def) {
                findings.push(ConfigError::error(
                    "llm.default_transport",
                    format!("`{def}` does not name a configured transport"),
                ));
            }
        }
    }

    fn check_engine(&self, findings: &mut Vec<ConfigError>) {
        if self.engine.max_iterations == 0 {
            findings.push(ConfigError::error(
                "engine.max_iterations",
                "must be at least 1",
            ));
        }
        if self.engine.tool_parallelism == 0 {
            findings.push(ConfigError::error(
                "engine.tool_parallelism",
                "must be at least 1",
            ));
        }
        if self.engine.tool_timeout_secs == 0 {
            findings.push(ConfigError::warning(
                "engine.tool_timeout_secs",
                "a zero timeout cancels every tool call immediately",
            ));
        }
    }

    fn check_tools(&self, findings: &mut Vec<ConfigError>) {
        // Exec is opt-in and deserves a loud reminder.
        if self.tools.exec.enabled {
            findings.push(ConfigError::warning(
                "tools.exec.enabled",
                "shell execution is enabled; commands run with the server's privileges",
            ));
        }
        if self.tools.http.enabled && self.tools.http.allowed_hosts.is_empty() {
            findings.push(ConfigError::warning(
                "tools.http.allowed_hosts",
                "http tool is enabled with an empty allowlist; every request will be refused",
            ));
        }
    }

    // Server ids namespace MCP tool names, so collisions would alias tools.
    fn check_mcp(&self, findings: &mut Vec<ConfigError>) {
        let mut ids = std::collections::HashSet::new();
        for s in &self.mcp.servers {
            if s.id.is_empty() {
                findings.push(ConfigError::error(
                    "mcp.servers.id",
                    "server id must not be empty",
                ));
            } else if !ids.insert(s.id.as_str()) {
                findings.push(ConfigError::error(
                    "mcp.servers",
                    format!("duplicate server id `{}`", s.id),
                ));
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
