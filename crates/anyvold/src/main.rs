//! anyvold - anyvol volume plugin daemon.
//!
//! Serves the Docker volume plugin protocol over TCP or a unix socket.

use std::path::PathBuf;
use std::sync::Arc;

use anyvol::catalog::MountTypeCatalog;
use anyvol::engine::MountEngine;
use anyvol::exec::SystemExecutor;
use anyvol::runtime::VolumeLifecycle;
use anyvol::staging::HttpFetcher;
use anyvol_common::AnyvolPaths;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod api;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// TCP port to listen on
    #[arg(long, default_value_t = 5000)]
    port: u16,

    /// Listen on a unix socket instead of TCP
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Data directory for mountpoints, staged sources and state
    #[arg(long, env = "ANYVOL_ROOT", default_value = "/var/lib/anyvol")]
    root: PathBuf,

    /// YAML file replacing the built-in mount types
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, env = "VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "anyvol=debug,anyvold=debug,tower_http=debug"
    } else {
        "anyvol=info,anyvold=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let catalog = match &args.config {
        Some(path) => MountTypeCatalog::from_yaml_file(path)?,
        None => MountTypeCatalog::builtin(),
    };
    tracing::info!(
        types = ?catalog.types().collect::<Vec<_>>(),
        "Mount types loaded"
    );

    let engine = MountEngine::new(Arc::new(catalog), Arc::new(SystemExecutor));
    let volumes = VolumeLifecycle::new(
        AnyvolPaths::with_root(&args.root),
        engine,
        Arc::new(HttpFetcher::new()),
    )?;
    let app = api::server::app(Arc::new(volumes));

    if let Some(socket) = &args.socket {
        match std::fs::remove_file(socket) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        if let Some(parent) = socket.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = tokio::net::UnixListener::bind(socket)?;
        tracing::info!(socket = %socket.display(), "anyvold listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        if let Err(e) = std::fs::remove_file(socket) {
            tracing::warn!(socket = %socket.display(), error = %e, "Failed to remove socket");
        }
    } else {
        let addr = format!("{}:{}", args.host, args.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(%addr, "anyvold listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    }

    tracing::info!("anyvold stopped");
    Ok(())
}

async fn shutdown_signal() {
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        () = terminate => {}
    }
    tracing::info!("Shutdown requested, finishing in-flight requests");
}
