// ============================================
// File: crates/veiltun-server/src/main.rs
// ============================================
//! # VeilTun Server Entry Point
//!
//! ## Creation Reason
//! Main entry point for the VeilTun tunnel endpoint binary.
//! Handles CLI parsing, logging setup, and server initialization.
//!
//! ## Main Functionality
//! - CLI argument parsing with clap
//! - Logging initialization with tracing
//! - Configuration loading and validation
//! - Master key generation and loading
//! - Server execution until Ctrl-C
//!
//! ## Usage
//! ```bash
//! # Generate the shared master key
//! veiltun-server genkey --output /etc/veiltun/master.key
//!
//! # Start server
//! veiltun-server start --config /etc/veiltun/server.toml
//!
//! # Check a config file
//! veiltun-server validate --config /etc/veiltun/server.toml
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Without `[crypto] key_file` a fresh key is generated on every start,
//!   so clients can never share it; that mode is only useful for testing
//! - The key file holds the raw master key; it is written 0600
//!
//! ## Last Modified
//! v0.1.0 - Initial CLI implementation

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use veiltun_common::Timestamp;
use veiltun_core::{CryptoEngine, MasterKey};
use veiltun_server::{LoggingSink, ServerConfig, StaticIdentityResolver, TunnelServer};

const KEY_FILE_VERSION: &str = "1.0";
const KEY_TYPE: &str = "chacha20poly1305-master";

// ============================================
// CLI Definition
// ============================================

/// VeilTun tunnel endpoint
#[derive(Parser, Debug)]
#[command(name = "veiltun-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the server
    Start {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/veiltun/server.toml")]
        config: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/veiltun/server.toml")]
        config: PathBuf,
    },

    /// Generate a new master key file
    Genkey {
        /// Where to write the key file
        #[arg(short, long)]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // `start` installs logging itself once the configured level is known.
    if !matches!(cli.command, Commands::Start { .. }) {
        init_logging("info");
    }

    let result = match cli.command {
        Commands::Start { config } => cmd_start(config).await,
        Commands::Validate { config } => cmd_validate(config).await,
        Commands::Genkey { output, force } => cmd_genkey(output, force).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

// ============================================
// Commands
// ============================================

/// Starts the server and runs until Ctrl-C.
async fn cmd_start(config_path: PathBuf) -> anyhow::Result<()> {
    let config = if config_path.exists() {
        let config = ServerConfig::load(&config_path).await;
        init_logging(config.as_ref().map_or("info", |c| c.logging.level.as_str()));
        config?
    } else {
        init_logging("info");
        info!(path = %config_path.display(), "Config file not found, using defaults");
        ServerConfig::default()
    };

    let crypto = match &config.crypto.key_file {
        Some(path) => {
            info!(path = %path.display(), "Loading master key");
            CryptoEngine::with_master_key(load_key(path).await?)?
        }
        None => {
            warn!("No key_file configured, generating an ephemeral master key");
            CryptoEngine::generate()?
        }
    };

    let identity = StaticIdentityResolver::from_config(&config.identity);
    if identity.is_empty() {
        warn!("No identity tokens configured; every handshake will be rejected");
    }

    let server = TunnelServer::new(
        config,
        Arc::new(crypto),
        Arc::new(identity),
        Arc::new(LoggingSink::new()),
    )?;

    let handle = server.start().await?;
    info!(
        stream_addr = %handle.stream_addr,
        datagram_addr = %handle.datagram_addr,
        "Server running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;

    server.stop().await;

    let stats = server.stats();
    info!(
        accepted = stats.connections_accepted,
        rejected = stats.connections_rejected,
        handshakes = stats.handshakes_completed,
        datagrams_in = stats.datagrams_received,
        datagrams_out = stats.datagrams_sent,
        "Final statistics"
    );

    Ok(())
}

/// Validates a configuration file.
async fn cmd_validate(config_path: PathBuf) -> anyhow::Result<()> {
    if !config_path.exists() {
        println!("⚠️  Config file not found: {}", config_path.display());
        println!("   Server will use default values.");
        return Ok(());
    }

    let config = ServerConfig::load(&config_path).await?;

    if let Some(path) = &config.crypto.key_file {
        load_key(path)
            .await
            .with_context(|| format!("key file '{}'", path.display()))?;
    }

    println!("✅ Configuration is valid");
    println!();
    println!("Network:");
    println!("   Stream:     {}", config.network.stream_addr);
    println!("   Datagram:   {}", config.network.datagram_addr);
    println!();
    println!("Tunnel:");
    println!("   Range:      {}", config.tunnel.address_range);
    println!("   Gateway:    {}", config.tunnel.gateway);
    println!("   MTU:        {}", config.tunnel.mtu);
    println!();
    println!("Limits:");
    println!("   Max Connections:    {}", config.limits.max_connections);
    println!("   Handshake Timeout:  {}s", config.limits.handshake_timeout_secs);
    println!("   Idle Timeout:       {}s", config.limits.idle_timeout_secs);
    println!();
    println!("Identity:");
    println!("   Tokens:     {}", config.identity.tokens.len());
    println!();

    Ok(())
}

/// Writes a fresh master key file.
async fn cmd_genkey(output: PathBuf, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "'{}' already exists; pass --force to overwrite",
            output.display()
        );
    }

    let key = MasterKey::generate()?;
    save_key(&key, &output).await?;

    println!("✅ Master key written to {}", output.display());
    println!("   Distribute it to clients over a secure channel.");
    Ok(())
}

// ============================================
// Helper Functions
// ============================================

/// Initializes the tracing subscriber.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .ok();
}

/// Master key file format.
#[derive(Serialize, Deserialize)]
struct KeyFile {
    version: String,
    key_type: String,
    key: String,
    created_at: u64,
}

/// Loads a master key from a JSON key file.
async fn load_key(path: &Path) -> anyhow::Result<MasterKey> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading key file '{}'", path.display()))?;
    let key_data: KeyFile = serde_json::from_str(&content)
        .with_context(|| format!("parsing key file '{}'", path.display()))?;

    if key_data.key_type != KEY_TYPE {
        anyhow::bail!(
            "key file '{}' has key_type '{}', expected '{}'",
            path.display(),
            key_data.key_type,
            KEY_TYPE
        );
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(key_data.key.trim())
        .context("decoding key")?;

    Ok(MasterKey::from_bytes(&bytes)?)
}

/// Saves a master key to a JSON key file.
async fn save_key(key: &MasterKey, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let key_data = KeyFile {
        version: KEY_FILE_VERSION.to_string(),
        key_type: KEY_TYPE.to_string(),
        key: base64::engine::general_purpose::STANDARD.encode(key.as_bytes()),
        created_at: Timestamp::now().as_secs(),
    };

    let content = serde_json::to_string_pretty(&key_data)?;
    tokio::fs::write(path, content).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = tokio::fs::metadata(path).await?.permissions();
        perms.set_mode(0o600);
        tokio::fs::set_permissions(path, perms).await?;
    }

    Ok(())
}
