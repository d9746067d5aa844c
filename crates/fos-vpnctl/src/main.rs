//! fos-vpnctl: operator tool for the VPN key store
//!
//! ```text
//! fos-vpnctl [--config <path>] <keys|status|rotate|check>
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use fos_vpn_auth::{needs_refresh, AuthConfig, KeyStore};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "fos-vpnctl")]
#[command(version, about = "Inspect and manage the VPN client key store", long_about = None)]
struct Args {
    /// Configuration file (.toml or .json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Print the client public key and the derived WireGuard keys
    Keys,
    /// Show the cached certificate and whether it needs refreshing
    Status,
    /// Replace the client keys (drops the certificate)
    Rotate,
    /// Validate and print the configuration
    Check,
}

fn load_config(path: Option<&PathBuf>) -> Result<AuthConfig> {
    let config = match path {
        Some(path) => AuthConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => AuthConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn open_store(config: &AuthConfig) -> Result<KeyStore> {
    debug!("Opening key store at {}", config.store_dir.display());
    KeyStore::open(&config.store_dir)
        .with_context(|| format!("failed to open {}", config.store_dir.display()))
}

fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Keys => {
            let keys = open_store(&config)?.keys()?;
            println!("{}", keys.public.to_pem());
            println!("X25519 private: {}", keys.private.to_x25519_base64());
            println!("X25519 public:  {}", keys.private.x25519_public_base64());
        }
        Command::Status => {
            let store = open_store(&config)?;
            match store.cached_certificate()? {
                Some(certificate) => {
                    println!("valid until: {}", certificate.valid_until);
                    if let Some(refresh_at) = certificate.refresh_at {
                        println!("refresh at:  {}", refresh_at);
                    }
                    if let Some(features) = certificate.features {
                        println!("features:    {}", features.to_json());
                    }
                    let stale = needs_refresh(
                        Some(&certificate),
                        None,
                        config.refresh_margin(),
                        Utc::now(),
                    );
                    println!("needs refresh: {}", stale);
                }
                None => println!("no certificate"),
            }
        }
        Command::Rotate => {
            let keys = open_store(&config)?.rotate_keys()?;
            info!("Rotated client keys");
            println!("{}", keys.public.to_pem());
        }
        Command::Check => {
            println!("{}", config.to_toml());
        }
    }

    Ok(())
}
