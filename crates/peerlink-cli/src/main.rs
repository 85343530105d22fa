//! PeerLink CLI
//!
//! Rendezvous registry server, peer node with a stdio JSON bridge, and
//! one-shot helpers for scripting.

mod config;

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use clap::{Parser, Subcommand};
use peerlink_core::node::{Bridge, BridgeCommand, BridgeEvent, ConnectionManager};
use peerlink_discovery::{Registry, RegistryClient, RegistryHandle, RegistryServer};
use peerlink_files::sanitize_file_name;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use config::Config;

/// PeerLink - find peers through a registry, then talk to them directly
#[derive(Parser)]
#[command(name = "peerlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the rendezvous registry
    Registry {
        /// Bind address
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Run a peer with a JSON-lines bridge on stdin/stdout
    Peer {
        /// Username to register on startup
        #[arg(short, long)]
        username: Option<String>,

        /// Registry base URL
        #[arg(short, long)]
        registry: Option<String>,

        /// Listen address for direct sessions
        #[arg(short, long)]
        listen: Option<String>,

        /// Write received files to this directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List live peers
    Peers {
        /// Registry base URL
        #[arg(short, long)]
        registry: Option<String>,
    },

    /// Check registry health
    Health {
        /// Registry base URL
        #[arg(short, long)]
        registry: Option<String>,
    },

    /// Register, send one message or file, and leave
    Send {
        /// Username to register as
        #[arg(short, long, required = true)]
        username: String,

        /// Recipient username
        #[arg(short, long, required = true)]
        to: String,

        /// Message text
        #[arg(short, long, conflicts_with = "file")]
        message: Option<String>,

        /// File to send
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Registry base URL
        #[arg(short, long)]
        registry: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load_or_default()?,
    };

    // Logs go to stderr; stdout carries bridge events.
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Registry { bind } => {
            if let Some(bind) = bind {
                config.registry.bind_addr = bind;
            }
            config.validate()?;
            run_registry(&config).await?;
        }
        Commands::Peer {
            username,
            registry,
            listen,
            output,
        } => {
            if let Some(listen) = listen {
                config.node.listen_addr = listen;
            }
            if let Some(output) = output {
                config.transfer.download_dir = Some(output);
            }
            if username.is_some() {
                config.node.username = username;
            }
            config.validate()?;
            run_peer(registry.as_deref(), &config).await?;
        }
        Commands::Peers { registry } => {
            config.validate()?;
            list_peers(registry.as_deref(), &config).await?;
        }
        Commands::Health { registry } => {
            config.validate()?;
            show_health(registry.as_deref(), &config).await?;
        }
        Commands::Send {
            username,
            to,
            message,
            file,
            registry,
        } => {
            config.validate()?;
            let payload = match (message, file) {
                (Some(text), None) => Payload::Message(text),
                (None, Some(path)) => Payload::File(path),
                _ => anyhow::bail!("Give exactly one of --message or --file"),
            };
            send_once(&username, &to, payload, registry.as_deref(), &config).await?;
        }
    }

    Ok(())
}

/// Run the registry until Ctrl+C
async fn run_registry(config: &Config) -> anyhow::Result<()> {
    let bind = config.parse_registry_bind()?;
    let registry = Arc::new(Registry::new(config.registry_config()));
    let server = RegistryServer::bind(bind, registry)
        .await
        .with_context(|| format!("failed to bind registry on {bind}"))?;

    eprintln!("PeerLink Registry");
    eprintln!("Version: {}", env!("CARGO_PKG_VERSION"));
    eprintln!("Listen: {}", server.local_addr()?);
    eprintln!("TTL: {}s", config.registry.ttl_secs);
    eprintln!("Press Ctrl+C to stop");

    server
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    eprintln!("Shutting down...");
    Ok(())
}

fn registry_client(url: Option<&str>, config: &Config) -> anyhow::Result<RegistryClient> {
    Ok(RegistryClient::new(config.client_config(url))?)
}

/// Bridge stdin commands to the node and node events to stdout
async fn run_peer(registry_url: Option<&str>, config: &Config) -> anyhow::Result<()> {
    let registry: Arc<dyn RegistryHandle> = Arc::new(registry_client(registry_url, config)?);
    let (mut bridge, mut events) = Bridge::new(config.node_config()?, registry);
    let download_dir = config.transfer.download_dir.clone();

    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = events.recv().await {
            if let (Some(dir), BridgeEvent::FileReceived { filename, data, .. }) =
                (&download_dir, &event)
            {
                match save_received(dir, filename, data).await {
                    Ok(path) => tracing::info!("Saved {}", path.display()),
                    Err(e) => tracing::warn!("Could not save {}: {:#}", filename, e),
                }
            }

            let line = match serde_json::to_string(&event) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!("Could not encode event: {}", e);
                    continue;
                }
            };
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                break;
            }
        }
    });

    if let Some(username) = config.node.username.clone() {
        bridge.handle(BridgeCommand::Register { username }).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => bridge.handle_json(line.trim()).await,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("Input closed, shutting down");
    bridge.shutdown().await;
    drop(bridge);
    let _ = printer.await;
    Ok(())
}

async fn save_received(dir: &Path, filename: &str, data: &str) -> anyhow::Result<PathBuf> {
    let name = sanitize_file_name(filename).context("unusable file name")?;
    let bytes = BASE64.decode(data)?;
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(name);
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

/// List live peers
async fn list_peers(registry_url: Option<&str>, config: &Config) -> anyhow::Result<()> {
    let client = registry_client(registry_url, config)?;
    let peers = client.list(None).await?;

    println!("Live Peers ({}):", client.base_url());
    println!();
    if peers.is_empty() {
        println!("No peers registered");
    }
    for peer in peers {
        println!("  {:<32} {:<24} {}", peer.username, peer.endpoint(), peer.kind);
    }
    Ok(())
}

/// Show registry health
async fn show_health(registry_url: Option<&str>, config: &Config) -> anyhow::Result<()> {
    let client = registry_client(registry_url, config)?;
    let health = client.health().await?;

    println!("PeerLink Registry Status");
    println!("URL: {}", client.base_url());
    println!("Status: {}", health.status);
    println!("Peers: {}", health.peer_count);
    println!("Timestamp: {}", health.timestamp);
    Ok(())
}

enum Payload {
    Message(String),
    File(PathBuf),
}

/// Register, deliver one payload, disconnect and deregister
async fn send_once(
    username: &str,
    to: &str,
    payload: Payload,
    registry_url: Option<&str>,
    config: &Config,
) -> anyhow::Result<()> {
    let registry: Arc<dyn RegistryHandle> = Arc::new(registry_client(registry_url, config)?);
    let (manager, _events) = ConnectionManager::new(username, config.node_config()?, registry)?;

    manager.start().await?;
    let result = deliver(&manager, to, payload).await;
    manager.shutdown().await?;
    result
}

async fn deliver(manager: &ConnectionManager, to: &str, payload: Payload) -> anyhow::Result<()> {
    manager.register().await?;
    manager
        .connect(to)
        .await
        .with_context(|| format!("failed to connect to {to}"))?;

    match payload {
        Payload::Message(text) => {
            manager.send_message(to, &text).await?;
            println!("Message sent to {to}");
        }
        Payload::File(path) => {
            let checksum = manager
                .send_file_path(to, &path)
                .await
                .with_context(|| format!("failed to send {}", path.display()))?;
            println!("File: {}", path.display());
            println!("Recipient: {to}");
            println!("Checksum: {}", checksum.to_hex());
        }
    }

    manager.disconnect(to).await?;
    Ok(())
}
