//! Relaymux - UDP Multiplexing Relay for Game Servers
//!
//! This is the main entry point for the Relaymux application.

use anyhow::{Context, Result};
use clap::Parser;
use relaymux::config::{load_config, UpstreamRegistry};
use relaymux::console::run_console;
use relaymux::mux::{LogChallenge, Multiplexer};
use relaymux::transport::SocketOpts;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Relaymux - UDP relay that binds game clients to switchable upstream servers
#[derive(Parser, Debug)]
#[command(name = "relaymux")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,

    /// Number of worker tasks (overrides the config file)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Do not read console commands from stdin
    #[arg(long)]
    no_console: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(&args.log_level, args.json_log)?;

    // Load configuration
    let config = load_config(&args.config)?;

    info!("Relaymux v{}", relaymux::VERSION);
    info!("Configuration loaded from: {:?}", args.config);

    let registry = UpstreamRegistry::resolve(&config.upstreams)
        .await
        .with_context(|| "Failed to resolve upstreams")?;
    let default_upstream = registry
        .default_upstream()
        .with_context(|| "cannot find valid upstreams")?;

    for (name, addr) in registry.iter() {
        info!("Upstream {}: {}", name, addr);
    }
    info!("Default upstream: {}", default_upstream);

    let mux = Arc::new(Multiplexer::new(default_upstream));
    mux.set_timeout(config.mux.timeout());
    mux.set_workers(args.workers.unwrap_or_else(|| config.mux.worker_count()));
    mux.set_socket_opts(SocketOpts::from_mux_config(&config.mux))
        .await;
    mux.add_challenge_handler(LogChallenge).await;

    if !args.no_console {
        let mux = mux.clone();
        tokio::spawn(async move {
            let stdin = BufReader::new(tokio::io::stdin());
            if let Err(e) = run_console(mux, &registry, stdin, tokio::io::stdout()).await {
                warn!("Console stopped: {:#}", e);
            }
        });
    }

    // Handle Ctrl+C and termination signals (cross-platform)
    let signal_mux = mux.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            info!("Received Ctrl+C, shutting down...");
                        }
                        _ = sigterm.recv() => {
                            info!("Received SIGTERM, shutting down...");
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to setup SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Received Ctrl+C, shutting down...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            // On Windows, only handle Ctrl+C
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down...");
        }

        signal_mux.request_stop();
    });

    // Run the relay
    let result = mux
        .run(&config.mux.bind)
        .await
        .with_context(|| format!("Relay on {} failed", config.mux.bind));

    // A blocked stdin read cannot be cancelled and would hold the runtime open
    if !args.no_console {
        if let Err(e) = &result {
            error!("{:#}", e);
            std::process::exit(1);
        }
        std::process::exit(0);
    }

    result
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
