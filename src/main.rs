mod config;
mod csp;
mod filter;
mod forward;
mod handler;

use crate::filter::ForwardingFilter;
use crate::forward::Upstream;
use crate::handler::AppState;
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Receives CSP violation reports and relays the ones worth looking at to Sentry.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// TOML config file, the built-in defaults apply when it does not exist.
    #[arg(long, env = "CSP_FORWARDER_CONFIG", default_value = "csp-forwarder.toml")]
    config: PathBuf,

    /// Overrides `upstream.url`, so the Sentry key can stay out of the file.
    #[arg(long, env = "CSP_FORWARDER_UPSTREAM_URL")]
    upstream_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "csp_forwarder=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = config::load_or_default(&cli.config)?;
    if let Some(url) = cli.upstream_url {
        config.upstream.url = url;
    }
    config.validate()?;

    let filter = ForwardingFilter::new(&config.filter);
    let (schemes, pseudo_schemes, hostnames) = filter.list_sizes();
    tracing::info!(
        schemes,
        pseudo_schemes,
        hostnames,
        success_status = %config.upstream.success_status,
        "filter loaded"
    );

    let state = Arc::new(AppState {
        filter,
        upstream: Upstream::new(&config.upstream)?,
    });
    let app = handler::router(state, config.max_body_bytes);

    let bind_address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    tracing::info!(address = %listener.local_addr()?, "listening for reports");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
