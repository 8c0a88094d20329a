//! Task Router
//!
//! The router is the central broker of the work-dispatch platform: producers
//! submit tasks and wait for their results, workers retrieve tasks of the
//! types they accept, report liveness through heartbeats, and post results.
//! All state lives in memory; a restart loses in-flight tasks.
// This is the main entry point for the router application. It's responsible
// for:
// - Initializing logging and parsing command-line arguments.
// - Setting up the main `Server` struct with a keepalive-tuned listener.
// - Starting the web server and API endpoints.
// - Handling graceful shutdown.

// Use jemalloc as the global allocator for better performance
#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

// The router is organized into modules for the queue, registry, broker and API.
mod api;
mod broker;
mod config;
mod multi_queue;
mod registry;
mod task;
#[cfg(test)]
mod tests;

use broker::Broker;
use config::RouterConfig;

/// Command-line arguments for the router
#[derive(Parser, Debug)]
#[command(name = "task-router")]
#[command(about = "Task router dispatching work from producers to workers", long_about = None)]
struct CliArgs {
    /// Hostname to listen on; `*` binds all interfaces
    #[arg(long, value_name = "HOST", default_value_t = shared::defaults::default_host())]
    host: String,

    /// Port of the webserver
    #[arg(long, value_name = "PORT", default_value_t = shared::defaults::default_port())]
    port: u16,

    /// Heartbeat timeout in seconds before an assigned task is returned to
    /// its queue
    #[arg(long = "heartbeat-timeout", value_name = "SECONDS", default_value_t = shared::defaults::default_heartbeat_timeout())]
    heartbeat_timeout: u64,
}

/// The main application structure for the router.
/// It holds the broker and the network address to listen on.
pub struct Server {
    config: RouterConfig,
    /// The broker shared with every API handler
    broker: Arc<Broker>,
    /// Shutdown signal sender for the HTTP server
    shutdown_tx: Option<tokio::sync::broadcast::Sender<()>>,
}

impl Server {
    /// Creates a new server instance from validated configuration.
    pub fn new(config: RouterConfig) -> Result<Self> {
        // fail early on an unusable listen address
        let _ = config.listen_address()?;

        let broker = Arc::new(Broker::new(config.heartbeat_timeout()));

        Ok(Self {
            config,
            broker,
            shutdown_tx: None,
        })
    }

    /// Starts the server and runs until shutdown.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting task router");

        let listen_address = self.config.listen_address()?;
        info!(
            listen_address = %listen_address,
            heartbeat_timeout_seconds = self.config.heartbeat_timeout_seconds,
            "Router configuration loaded"
        );

        // Create shutdown broadcast channel
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        // Set up the REST API using the `api` module
        let app = api::create_router(api::AppState::new(Arc::clone(&self.broker)));

        info!("Starting HTTP server on {}", listen_address);

        let listener = bind_with_keepalive(listen_address).with_context(|| {
            format!(
                "Failed to bind TCP listener to {}. \
                 Check if port is already in use (EADDRINUSE) or requires elevated permissions (EACCES).",
                listen_address
            )
        })?;

        // Create a shutdown signal receiver for axum
        let shutdown_signal = {
            let mut rx = shutdown_tx.subscribe();
            async move {
                let _ = rx.recv().await;
                info!("HTTP server received shutdown signal");
            }
        };

        // Start the axum server with graceful shutdown support
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }

    /// Initiates a graceful shutdown of the server.
    ///
    /// In-flight requests are allowed to finish; pending heartbeat timers
    /// and suspended long polls die with the process. Queued tasks are
    /// intentionally not persisted.
    pub fn shutdown(&mut self) {
        info!("Shutting down task router");

        if let Some(shutdown_tx) = &self.shutdown_tx {
            // send fails when the HTTP server already stopped on its own
            let _ = shutdown_tx.send(());
        }
    }
}

/// Binds a listening socket with TCP keepalive enabled so half-open
/// producer and worker connections are detected: 3 unacknowledged probes,
/// 60s idle before the first probe, 60s between probes.
fn bind_with_keepalive(listen_address: SocketAddr) -> Result<tokio::net::TcpListener> {
    use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};

    let domain = if listen_address.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(shared::defaults::keepalive_idle_seconds()))
        .with_interval(Duration::from_secs(
            shared::defaults::keepalive_interval_seconds(),
        ));
    #[cfg(not(windows))]
    let keepalive = keepalive.with_retries(shared::defaults::keepalive_probe_count());
    socket.set_tcp_keepalive(&keepalive)?;

    socket.bind(&listen_address.into())?;
    socket.listen(1024)?;
    socket.set_nonblocking(true)?;

    let listener: std::net::TcpListener = socket.into();
    Ok(tokio::net::TcpListener::from_std(listener)?)
}

/// Sets up signal handlers for graceful shutdown.
/// Returns a future that completes when a shutdown signal is received.
///
/// On Unix systems, handles SIGTERM and SIGINT signals.
/// On non-Unix systems, handles Ctrl+C.
/// If signal registration fails, falls back to Ctrl+C handling.
async fn setup_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let sigterm = signal(SignalKind::terminate());
        let sigint = signal(SignalKind::interrupt());

        match (sigterm, sigint) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to register signal handlers: {}", e);
                error!("Falling back to Ctrl+C only");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to wait for Ctrl+C: {}", e);
                } else {
                    info!("Received Ctrl+C");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to receive Ctrl+C signal: {}", e);
        } else {
            info!("Received Ctrl+C");
        }
    }
}

/// Router entry point
///
/// Initializes logging, parses command-line arguments, creates the server
/// instance, and runs until a shutdown signal is received.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging.
    let file_appender = tracing_appender::rolling::daily("./logs", "router.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Configure logging with proper RUST_LOG environment variable handling
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Default directives are only used if RUST_LOG is not set
        tracing_subscriber::EnvFilter::new("router=info,shared=info")
    });

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    // Parse command-line arguments
    let cli_args = CliArgs::parse();

    info!("Task router starting up");

    let config = RouterConfig {
        host: cli_args.host,
        port: cli_args.port,
        heartbeat_timeout_seconds: cli_args.heartbeat_timeout,
    };

    // Create and initialize the server. Exit if initialization fails.
    let mut server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to initialize router: {}", e);
            std::process::exit(1);
        }
    };

    // Run the server and the shutdown signal handler concurrently.
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        _ = setup_shutdown_signal() => {
            info!("Shutdown signal received, initiating graceful shutdown");
        }
    }

    // Perform graceful shutdown.
    server.shutdown();
    info!("Router shutdown complete");
    Ok(())
}
