//! `tcp-platform` host binary.
//!
//! Runs one application together with its REST control server:
//!
//! ```text
//!   echo       TCP echo back end                  + PUT /shutdown/
//!   proxy      TCP reverse proxy to the back end  + PUT /shutdown/
//!   initiator  pipelined client to the back end   + POST /utf8string/<text>/
//!                                                 + PUT /shutdown/
//! ```
//!
//! The process stops when the control server is told to shut down or on
//! SIGINT/SIGTERM. Components are then shut down in order, control server last.

use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use tcp_platform::apps::{EchoClient, EchoCodec, EchoServer, EchoUtf8StringHandler, ShutdownHandler};
use tcp_platform::config::loader::load_config;
use tcp_platform::config::PlatformConfig;
use tcp_platform::lifecycle::signals::spawn_signal_listener;
use tcp_platform::lifecycle::{shutdown_all, Shutdown, Shutdownable};
use tcp_platform::observability::{logging, metrics};
use tcp_platform::proxy::ReverseProxyServer;
use tcp_platform::rest::RestServer;

#[derive(Parser)]
#[command(name = "tcp-platform", version)]
#[command(about = "Pipelined TCP client, REST control plane and reverse proxy", long_about = None)]
struct Cli {
    /// TOML configuration file; built-in defaults are used without one
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    app: App,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum App {
    /// Echo back end
    Echo,
    /// Reverse proxy in front of the back end
    Proxy,
    /// REST-driven echo client of the back end
    Initiator,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => PlatformConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), app = ?cli.app, "tcp-platform starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    match cli.app {
        App::Echo => run_echo(&config).await,
        App::Proxy => run_proxy(&config).await,
        App::Initiator => run_initiator(&config).await,
    }
}

async fn run_echo(config: &PlatformConfig) -> Result<(), Box<dyn Error>> {
    let timeout = config.shutdown.termination_timeout();
    let echo = Arc::new(EchoServer::echo(&config.echo, timeout));
    let shutdown = ShutdownHandler::new(
        "Echo server was stopped. Shutdown command for control server is accepted",
        vec![Arc::clone(&echo) as Arc<dyn Shutdownable>],
    )
    .bound()?;
    let control = RestServer::new(&config.control, timeout, [shutdown])?;

    echo.start().await?;
    control.start().await?;
    serve_until_stopped(&control, &[&*echo]).await;
    Ok(())
}

async fn run_proxy(config: &PlatformConfig) -> Result<(), Box<dyn Error>> {
    let timeout = config.shutdown.termination_timeout();
    let proxy = Arc::new(ReverseProxyServer::reverse_proxy(&config.proxy, timeout));
    let shutdown = ShutdownHandler::new(
        "Proxy server was stopped. Shutdown command for control server is accepted",
        vec![Arc::clone(&proxy) as Arc<dyn Shutdownable>],
    )
    .bound()?;
    let control = RestServer::new(&config.control, timeout, [shutdown])?;

    proxy.start().await?;
    control.start().await?;
    serve_until_stopped(&control, &[&*proxy]).await;
    Ok(())
}

async fn run_initiator(config: &PlatformConfig) -> Result<(), Box<dyn Error>> {
    let timeout = config.shutdown.termination_timeout();
    let client = Arc::new(EchoClient::new(&config.client, timeout, EchoCodec::new));
    let echo = EchoUtf8StringHandler::new(Arc::clone(&client), &config.initiator).bound()?;
    let shutdown = ShutdownHandler::new(
        "Client was stopped. Shutdown command for control server is accepted",
        vec![Arc::clone(&client) as Arc<dyn Shutdownable>],
    )
    .bound()?;
    let control = RestServer::new(&config.control, timeout, [echo, shutdown])?;

    control.start().await?;
    serve_until_stopped(&control, &[&*client]).await;
    Ok(())
}

/// Waits for a shutdown request or a signal, then shuts everything down.
async fn serve_until_stopped(control: &RestServer, components: &[&dyn Shutdownable]) {
    let shutdown = Shutdown::new();
    let mut signalled = shutdown.subscribe();
    let _signals = spawn_signal_listener(&shutdown);

    tokio::select! {
        _ = control.closed() => tracing::info!(server = %control.name(), "Control server requested shutdown"),
        _ = signalled.recv() => tracing::info!("Shutting down on signal"),
    }

    let targets: Vec<&dyn Shutdownable> = components
        .iter()
        .copied()
        .chain(std::iter::once(control as &dyn Shutdownable))
        .collect();
    shutdown_all(&targets).await;
    tracing::info!("Shutdown complete");
}
