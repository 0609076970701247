mod api;
mod config;
mod error;
mod filemanager;
mod persistence;
mod remote;
mod sandbox;
mod sftp;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::persistence::SqliteIdStore;
use crate::remote::RemoteClient;
use crate::sandbox::driver::ContainerDriver;
use crate::sandbox::registry::ServerRegistry;
use crate::sftp::SftpServer;

#[derive(Parser)]
#[command(name = "dockhand", about = "Node agent for a container-backed server hosting platform")]
enum Cli {
    /// Start the HTTP + SFTP agent (default when no subcommand is given).
    #[command(alias = "run")]
    Serve {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
    /// Bootstrap `config.json` by calling the remote helper's `/fetch-ports`.
    Configure {
        #[arg(long)]
        uuid: String,
        #[arg(long)]
        remote: String,
        #[arg(long)]
        token: String,
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value = "config.json")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();
    let cli = if args.len() <= 1 {
        Cli::Serve { config: PathBuf::from("config.json") }
    } else {
        Cli::parse()
    };

    match cli {
        Cli::Serve { config } => {
            init_tracing();
            if let Err(e) = serve(&config).await {
                tracing::error!(error = %e, "agent exited with error");
                std::process::exit(1);
            }
            Ok(())
        }
        Cli::Configure { uuid, remote, token, path, out } => {
            init_tracing();
            match configure(uuid, remote, token, path, &out).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    tracing::error!(error = %e, "configure failed");
                    std::process::exit(1);
                }
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dockhand=info,tower_http=warn,hyper=warn"));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_tree::HierarchicalLayer::new(2).with_targets(true).with_bracketed_fields(false));

    match std::env::var("SENTRY_DSN") {
        Ok(dsn) if !dsn.is_empty() => {
            registry
                .with(sentry::integrations::tracing::layer().event_filter(|metadata| match *metadata.level() {
                    tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
                    tracing::Level::WARN | tracing::Level::INFO => sentry::integrations::tracing::EventFilter::Breadcrumb,
                    _ => sentry::integrations::tracing::EventFilter::Ignore,
                }))
                .init();
            let _guard = sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    send_default_pii: true,
                    traces_sample_rate: 0.2,
                    enable_logs: true,
                    ..Default::default()
                },
            ));
            std::mem::forget(_guard);
        }
        _ => registry.init(),
    }
}

/// `configure` subcommand: calls `/fetch-ports` and writes `config.json`.
async fn configure(uuid: String, remote: String, token: String, path: PathBuf, out: &std::path::Path) -> Result<()> {
    let client = RemoteClient::new(remote.clone(), uuid.clone(), token.clone()).context("building remote client")?;
    let ports = client.fetch_ports().await.context("fetch-ports failed")?;

    let config = Config {
        uuid,
        port: ports.port,
        sftp: ports.sftp,
        remote,
        token,
        path,
        ssl: ports.ssl,
        cert_path: None,
        key_path: None,
    };
    config.save(out)?;
    tracing::info!(path = %out.display(), "wrote config");
    Ok(())
}

async fn serve(config_path: &std::path::Path) -> Result<()> {
    let config = Config::load(config_path).context("loading config")?;
    std::fs::create_dir_all(&config.path).context("creating BASE_SERVER_PATH")?;

    let driver = Arc::new(ContainerDriver::connect().context("connecting to container runtime")?);

    let id_store_path = config.path.join("servers.sqlite");
    let id_store = Arc::new(SqliteIdStore::open(&id_store_path).context("opening id store")?);

    let registry = Arc::new(ServerRegistry::new(config.path.clone(), driver.clone(), id_store));
    registry.reconcile().await.context("reconciling server registry")?;

    let remote = Arc::new(RemoteClient::new(config.remote.clone(), config.uuid.clone(), config.token.clone()).context("building remote client")?);

    let host_key_path = config.path.join("sftp_host_key.pem");
    let sftp_server = SftpServer::new(registry.clone(), remote.clone(), &host_key_path).context("initializing SFTP server")?;
    let sftp_addr = config.sftp_addr();

    let http_addr = config.http_addr();
    let state = Arc::new(api::AppState { config, registry, remote });
    let app = api::create_app(state);

    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("binding HTTP listener on {http_addr}"))?;
    tracing::info!(addr = %http_addr, "HTTP control surface listening");
    tracing::info!(addr = %sftp_addr, "SFTP service listening");

    let http_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });
    let sftp_task = tokio::spawn(async move { sftp_server.serve(&sftp_addr).await });

    tokio::select! {
        result = http_task => {
            result.context("HTTP server task panicked")?.context("HTTP server failed")?;
        }
        result = sftp_task => {
            result.context("SFTP server task panicked")?.context("SFTP server failed")?;
        }
    }

    Ok(())
}

/// Waits for SIGINT/SIGTERM. Per spec §5, shutdown closes listeners and
/// client sockets but never stops or deletes containers — they outlive the
/// agent and are reconciled on the next boot.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
            return;
        };
        sig.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining HTTP listener");
}
