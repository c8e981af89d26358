//! relaychat - broadcast chat
//!
//! CLI entry point for running a coordinator and joining it as a peer.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use relaychat::cli::{Cli, Command, get_log_path};
use relaychat::config::Config;
use relaychat::coordinator::{Coordinator, Delivery};
use relaychat::ipc::{CoordinatorClient, CoordinatorServer};
use relaychat::peer::Peer;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(name) = cli.command.name() {
        config.coordinator.name = name.to_string();
    }
    info!(name = %config.coordinator.name, "relaychat loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Serve { .. } => cmd_serve(config).await,
        Command::Join { handle, .. } => cmd_join(&config, handle).await,
        Command::Send { handle, message, .. } => cmd_send(&config, &handle, &message).await,
        Command::Ping { .. } => cmd_ping(&config).await,
    }
}

/// Run a coordinator until SIGINT/SIGTERM
async fn cmd_serve(config: Config) -> Result<()> {
    let name = config.coordinator.name.clone();
    let coordinator = Arc::new(Coordinator::new(config.coordinator));
    let server = CoordinatorServer::bind(Arc::clone(&coordinator)).context("Failed to publish coordinator")?;
    let socket_path = server.socket_path().to_path_buf();

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let server_handle = tokio::spawn(server.run(shutdown_rx));

    println!("[start] coordinator '{}' listening on {}", name, socket_path.display());
    info!(%name, ?socket_path, "Coordinator running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => warn!("SIGINT received"),
            _ = sigterm.recv() => warn!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    info!("Coordinator shutting down...");
    let _ = shutdown_tx.send(()).await;
    server_handle.await.context("Coordinator server task failed")??;

    let metrics = coordinator.metrics();
    println!(
        "[stop] {} broadcasts, {} deliveries, {} failed",
        metrics.broadcasts, metrics.deliveries, metrics.delivery_failures
    );
    Ok(())
}

fn print_delivery(delivery: &Delivery) {
    let time = chrono::Local::now().format("%H:%M:%S");
    println!(
        "{} {} {}",
        time.to_string().dimmed(),
        format!("[{}]", delivery.sender).cyan().bold(),
        delivery.message
    );
}

fn print_status(label: &str, text: &str) {
    eprintln!("{} {}", format!("[{}]", label).yellow(), text);
}

/// Try to (re)connect, reporting the outcome instead of failing
async fn try_connect(peer: &mut Peer, client: &CoordinatorClient, buffer: usize) -> Option<mpsc::Receiver<Delivery>> {
    match peer.connect(client, buffer).await {
        Ok(inbox) => {
            print_status("connect", &format!("registered as '{}'", peer.handle()));
            Some(inbox)
        }
        Err(e) => {
            warn!(error = %e, "Failed to join coordinator");
            print_status("connect", &format!("ERROR: {:#}", e));
            print_status("connect", "running disconnected; type /reconnect to retry");
            None
        }
    }
}

/// Interactive peer: stdin lines out, relayed messages in
async fn cmd_join(config: &Config, handle: String) -> Result<()> {
    let client = config.coordinator_client()?;
    let buffer = config.peer.inbound_buffer;
    let mut peer = Peer::new(handle)?;
    let mut inbox = try_connect(&mut peer, &client, buffer).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let next_delivery = async {
            match inbox.as_mut() {
                Some(rx) => rx.recv().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            delivery = next_delivery => match delivery {
                Some(delivery) => print_delivery(&delivery),
                None => {
                    print_status("connect", "lost connection to coordinator; type /reconnect to retry");
                    inbox = None;
                }
            },
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    debug!("cmd_join: stdin closed");
                    break;
                };
                let line = line.trim();
                match line {
                    "" => {}
                    "/quit" => break,
                    "/reconnect" => {
                        if peer.is_connected() {
                            print_status("connect", "already connected");
                        } else {
                            inbox = try_connect(&mut peer, &client, buffer).await;
                        }
                    }
                    "/status" => {
                        let state = if peer.is_connected() { "connected" } else { "disconnected" };
                        print_status("status", &format!("'{}' is {}", peer.handle(), state));
                    }
                    message => {
                        if let Err(e) = peer.send(message).await {
                            print_status("send", &format!("ERROR: {:#}", e));
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                debug!("cmd_join: ctrl-c");
                break;
            }
        }
    }

    if let Err(e) = peer.disconnect().await {
        print_status("disconnect", &format!("ERROR: {:#}", e));
    } else {
        print_status("disconnect", "bye");
    }
    Ok(())
}

/// One-shot broadcast
async fn cmd_send(config: &Config, handle: &str, message: &str) -> Result<()> {
    let client = config.coordinator_client()?;
    client
        .broadcast(message, handle)
        .await
        .context(format!("Failed to send via {}", client.socket_path().display()))?;
    println!("Sent as '{}'", handle);
    Ok(())
}

/// Ping the coordinator
async fn cmd_ping(config: &Config) -> Result<()> {
    let client = config.coordinator_client()?;
    let socket: PathBuf = client.socket_path().to_path_buf();

    if !client.socket_exists() {
        println!("No coordinator published as '{}'", config.coordinator.name);
        println!("Expected socket: {}", socket.display());
        return Ok(());
    }

    match client.ping().await {
        Ok(version) => {
            println!("Coordinator '{}' is alive", config.coordinator.name);
            println!("Version: {}", version);
        }
        Err(e) => {
            println!("Socket exists but coordinator is not responding");
            println!("Error: {:#}", e);
        }
    }
    Ok(())
}
