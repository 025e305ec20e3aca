//! frame-server: serve a bundled application over length-prefixed TCP frames.
//!
//! ```text
//! frame-server echo   --listen 127.0.0.1:6868
//! frame-server ingest --images-dir /srv/images
//! ```
//!
//! Settings are layered: defaults, then `--config` (TOML), then environment
//! variables, then command-line flags.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::net::TcpListener;
use tracing::{info, warn, Level};

use frame_server::apps::{EchoCallback, IngestCallback};
use frame_server::config::NetworkConfig;
use frame_server::error::{ProtocolError, Result};
use frame_server::protocol::{BlockProtocol, LengthPrefixedProtocol, Protocol};
use frame_server::server::{Callback, Server};
use frame_server::utils::logging::init_logging;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum App {
    /// Write every packet back to its sender
    Echo,
    /// Store images sent as metadata + image blocks
    Ingest,
}

#[derive(Debug, Parser)]
#[command(name = "frame-server", version, about)]
struct Cli {
    /// Application to serve
    #[arg(value_enum)]
    app: App,

    /// Listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory receiving images (ingest only)
    #[arg(long, env = "IMAGES_REPOSITORY")]
    images_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<Level>,
}

impl Cli {
    fn load_config(&self) -> Result<NetworkConfig> {
        let mut config = match &self.config {
            Some(path) => NetworkConfig::from_file(path)?,
            None => NetworkConfig::default(),
        };
        config.apply_env();

        if let Some(listen) = &self.listen {
            config.server.address = listen.clone();
        }
        if let Some(dir) = &self.images_dir {
            config.ingest.images_dir = Some(dir.clone());
        }
        if let Some(level) = self.log_level {
            config.logging.log_level = level;
        }

        config.validate_strict()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_logging(&config.logging)?;

    info!(
        app = ?cli.app,
        address = %config.server.address,
        send_queue_limit = config.server.send_queue_limit,
        receive_queue_limit = config.server.receive_queue_limit,
        "Starting frame-server"
    );

    let max_packet_size = config.server.max_packet_size;
    match cli.app {
        App::Echo => {
            let protocol = LengthPrefixedProtocol::new(max_packet_size);
            run(config, EchoCallback::default(), protocol).await
        }
        App::Ingest => {
            let callback = IngestCallback::from_config(&config.ingest)?;
            info!(images_dir = %callback.images_dir().display(), "Storing images");
            run(config, callback, BlockProtocol::new(max_packet_size)).await
        }
    }
}

async fn run<C, P>(config: NetworkConfig, callback: C, protocol: P) -> Result<()>
where
    P: Protocol,
    C: Callback<P::Packet>,
{
    let listener = TcpListener::bind(&config.server.address)
        .await
        .map_err(ProtocolError::Listener)?;
    info!(address = ?listener.local_addr().ok(), "Listening");

    let grace = config.server.shutdown_timeout;
    let server = Arc::new(Server::new(config.server, callback, protocol));

    let signals = {
        let server = server.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            server.stop().await;
        })
    };

    let outcome = server.start(listener, grace).await;
    signals.abort();
    outcome
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    Ok(()) = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
                    _ = terminate.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                wait_for_ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received CTRL+C signal, shutting down"),
        Err(e) => {
            // without a handler the server runs until the listener fails
            warn!(error = %e, "CTRL+C handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}
