use std::sync::Arc;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig as _;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;

use tern_domain::config::{Config, ObservabilityConfig};
use tern_gateway::api;
use tern_gateway::bootstrap;
use tern_gateway::cli::{Cli, Command, ConfigCommand};
use tern_gateway::state::AppState;

const DEFAULT_MAX_CONCURRENT: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Bare `tern` serves.
        None | Some(Command::Serve) => {
            let (config, config_path) = tern_gateway::cli::load_config()?;
            let provider = setup_server_tracing(&config.observability);
            tracing::info!(config = %config_path, "Tern starting");
            serve(Arc::new(config), provider).await
        }
        Some(Command::Run { message, session, transport, model, json }) => {
            setup_cli_tracing();
            let (config, _) = tern_gateway::cli::load_config()?;
            tern_gateway::cli::run::run(Arc::new(config), message, session, transport, model, json)
                .await
        }
        Some(Command::Chat { session, transport, model }) => {
            setup_cli_tracing();
            let (config, _) = tern_gateway::cli::load_config()?;
            tern_gateway::cli::chat::chat(Arc::new(config), session, transport, model).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = tern_gateway::cli::load_config()?;
            if !tern_gateway::cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _) = tern_gateway::cli::load_config()?;
            tern_gateway::cli::config::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("tern {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tracing setup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Server-mode tracing: JSON lines on stdout, plus an OpenTelemetry
/// layer when `otlp_endpoint` is set. The returned provider handle must
/// live until shutdown; dropping it early loses buffered spans.
fn setup_server_tracing(obs: &ObservabilityConfig) -> Option<SdkTracerProvider> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tern_gateway=debug"));

    let provider = obs
        .otlp_endpoint
        .as_deref()
        .and_then(|endpoint| span_provider(obs, endpoint));
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("tern")));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .with(otel_layer)
        .init();

    provider
}

/// Wire up the OTLP/gRPC span exporter. A broken exporter is not fatal;
/// the server runs on with log output only.
fn span_provider(obs: &ObservabilityConfig, endpoint: &str) -> Option<SdkTracerProvider> {
    let built = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build();
    let exporter = match built {
        Ok(exporter) => exporter,
        Err(e) => {
            // Logging is not up yet at this point.
            eprintln!("WARNING: OTLP exporter for {endpoint} failed to build ({e}); span export disabled");
            return None;
        }
    };

    let service = Resource::builder()
        .with_service_name(obs.service_name.clone())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_sampler(Sampler::TraceIdRatioBased(obs.sample_rate))
            .with_resource(service)
            .build(),
    )
}

/// One-shot commands log compactly to stderr so stdout stays clean for
/// their actual output. Default level is warn.
fn setup_cli_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn serve(config: Arc<Config>, provider: Option<SdkTracerProvider>) -> anyhow::Result<()> {
    let state = bootstrap::build_app_state(config.clone()).await?;
    bootstrap::spawn_background_tasks(&state);

    let app = assemble_router(&config, state.clone());

    // Take the PID lock before binding so a second instance fails early.
    let pid_file = config.server.pid_file.clone();
    let pid_handle = match &pid_file {
        Some(path) => {
            Some(tern_gateway::cli::pid::write_pid_file(path).context("acquiring PID lock")?)
        }
        None => None,
    };

    let bind_to = (config.server.host.clone(), config.server.port);
    let listener = tokio::net::TcpListener::bind(bind_to.clone())
        .await
        .with_context(|| format!("binding to {}:{}", bind_to.0, bind_to.1))?;
    tracing::info!(host = %bind_to.0, port = bind_to.1, "Tern listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    tracing::info!("server stopped, draining");

    // Buffered spans are lost unless the provider shuts down cleanly.
    if let Some(provider) = provider {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = ?e, "tracer provider did not shut down cleanly");
        }
    }

    if let Err(e) = state.sessions.flush() {
        tracing::warn!(error = %e, "final session flush failed");
    }
    state.mcp.shutdown().await;

    if let (Some(path), Some(handle)) = (&pid_file, pid_handle) {
        tern_gateway::cli::pid::remove_pid_file(path, handle);
    }

    tracing::info!("shutdown complete");
    Ok(())
}

/// Stack the middleware and bake in the state: CORS, a global
/// concurrency cap, and (when configured) a per-IP governor.
fn assemble_router(config: &Config, state: AppState) -> axum::Router {
    use tower_governor::governor::GovernorConfigBuilder;
    use tower_governor::GovernorLayer;

    let limit = concurrency_limit();
    tracing::info!(max_concurrent = limit, "request concurrency capped");

    let router = api::router()
        .layer(build_cors_layer(&config.server.cors))
        .layer(tower::limit::ConcurrencyLimitLayer::new(limit));

    let governor = config.server.rate_limit.as_ref().and_then(|rl| {
        let built = GovernorConfigBuilder::default()
            .per_second(rl.requests_per_second)
            .burst_size(rl.burst_size)
            .finish();
        match built {
            Some(gov_config) => {
                tracing::info!(
                    rate = rl.requests_per_second,
                    burst = rl.burst_size,
                    "per-IP rate limit active"
                );
                Some(GovernorLayer {
                    config: Arc::new(gov_config),
                })
            }
            None => {
                tracing::warn!(
                    "rate_limit needs requests_per_second and burst_size above zero; limiter not installed"
                );
                None
            }
        }
    });

    match governor {
        Some(layer) => router.layer(layer).with_state(state),
        None => {
            tracing::info!("no per-IP rate limit configured");
            router.with_state(state)
        }
    }
}

fn concurrency_limit() -> usize {
    std::env::var("TERN_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_CONCURRENT)
}

/// Resolves when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                // Ctrl-C still works without the SIGTERM handler.
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                let _ = ctrl_c.await;
                return;
            }
        };

        tokio::select! {
            _ = ctrl_c => tracing::info!("SIGINT received, shutting down"),
            _ = sigterm.recv() => tracing::info!("SIGTERM received, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("SIGINT received, shutting down");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CORS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// CORS policy from the configured origin list.
///
/// An entry may end in `:*` to admit any port on that host
/// (`http://localhost:*` covers every local dev server). The single
/// entry `"*"` opens the API to all origins; credentials stay off in
/// that mode because the wildcard forbids them.
fn build_cors_layer(cors: &tern_domain::config::CorsConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if matches!(cors.allowed_origins.as_slice(), [only] if only == "*") {
        tracing::warn!("CORS admits every origin (\"*\")");
        return base.allow_origin(tower_http::cors::Any);
    }

    let mut fixed: Vec<HeaderValue> = Vec::new();
    let mut any_port_hosts: Vec<String> = Vec::new();
    for entry in &cors.allowed_origins {
        if let Some(host) = entry.strip_suffix(":*") {
            any_port_hosts.push(format!("{host}:"));
        } else {
            match entry.parse::<HeaderValue>() {
                Ok(value) => fixed.push(value),
                Err(_) => tracing::warn!(origin = %entry, "unparseable CORS origin ignored"),
            }
        }
    }

    let allowed = if any_port_hosts.is_empty() {
        AllowOrigin::list(fixed)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            if fixed.iter().any(|known| known.as_bytes() == origin.as_bytes()) {
                return true;
            }
            let Ok(text) = origin.to_str() else {
                return false;
            };
            any_port_hosts.iter().any(|prefix| {
                match text.strip_prefix(prefix.as_str()) {
                    Some(port) => !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()),
                    None => false,
                }
            })
        })
    };

    base.allow_origin(allowed).allow_credentials(true)
}
