//! Shared boot path: wire every subsystem into an [`AppState`].
//!
//! `serve`, `run`, and `chat` all come through [`build_app_state`], so the
//! CLI one-shots drive exactly the engine the HTTP server drives, minus
//! the listener.

use std::sync::Arc;

use anyhow::Context;

use tern_domain::config::{Config, ConfigSeverity};
use tern_mcp::{mcp_tools, McpManager};
use tern_providers::TransportRegistry;
use tern_sessions::{SessionStore, TurnLog};
use tern_tools::ToolRegistry;

use crate::engine::TurnRegistry;
use crate::state::AppState;

const FLUSH_INTERVAL_SECS: u64 = 30;

/// Validate config, initialize every subsystem, and return a fully-wired
/// [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    check_config(&config)?;

    // ── Transports ───────────────────────────────────────────────────
    let transports = Arc::new(
        TransportRegistry::from_config(&config.llm).context("initializing model transports")?,
    );
    match transports.len() {
        0 => tracing::warn!(
            "no model transports configured — add an [[llm.transports]] entry to answer chats"
        ),
        n => tracing::info!(transports = n, "transport registry ready"),
    }

    // ── Tool registry, built-ins then MCP bridges ────────────────────
    let mut tools = ToolRegistry::from_config(&config.tools).context("initializing tools")?;

    let mcp = if config.mcp.servers.is_empty() {
        Arc::new(McpManager::disabled())
    } else {
        tracing::info!(count = config.mcp.servers.len(), "starting MCP servers");
        Arc::new(McpManager::connect_all(&config.mcp).await)
    };
    let bridged = mcp_tools(&mcp);
    if !bridged.is_empty() {
        tracing::info!(
            servers = mcp.connected_count(),
            tools = bridged.len(),
            "MCP tools discovered"
        );
        for tool in bridged {
            tools.register(tool);
        }
    }
    let tools = Arc::new(tools);
    tracing::info!(tools = tools.len(), "tool registry ready");

    // ── Persistence ──────────────────────────────────────────────────
    let sessions = Arc::new(
        SessionStore::new(&config.sessions.state_path, config.sessions.preview_chars)
            .context("initializing session store")?,
    );
    let turn_log = Arc::new(TurnLog::new(&sessions.sessions_dir()));
    tracing::info!(
        state_path = %config.sessions.state_path.display(),
        sessions = sessions.list().len(),
        "session store ready"
    );

    Ok(AppState {
        config,
        transports,
        tools,
        sessions,
        turn_log,
        turns: Arc::new(TurnRegistry::new()),
        mcp,
    })
}

/// Log every validation finding and refuse to boot on errors.
fn check_config(config: &Config) -> anyhow::Result<()> {
    let mut errors = 0usize;
    for issue in config.validate() {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("{issue}"),
            ConfigSeverity::Error => {
                errors += 1;
                tracing::error!("{issue}");
            }
        }
    }
    if errors > 0 {
        anyhow::bail!("configuration has {errors} error(s); refusing to start");
    }
    Ok(())
}

/// Spawn the long-running background tasks. Call this after
/// [`build_app_state`] when running the HTTP server; CLI one-shots skip it.
pub fn spawn_background_tasks(state: &AppState) {
    spawn_flush_loop(state.sessions.clone());
    tracing::info!("background tasks spawned");
}

/// Persist the session registry every [`FLUSH_INTERVAL_SECS`] so a crash
/// loses at most one interval of counter updates.
fn spawn_flush_loop(sessions: Arc<SessionStore>) {
    tokio::spawn(async move {
        let period = std::time::Duration::from_secs(FLUSH_INTERVAL_SECS);
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if let Err(e) = sessions.flush() {
                tracing::warn!(error = %e, "periodic session flush failed");
            }
        }
    });
}
