//! Schemata Registry Server
//!
//! Loads configuration, assembles the storage topology, subscribes the
//! startup streams and replays them until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use config::{Environment, File, FileFormat};
use schemata_common::RegistryConfig;
use schemata_registry::assemble;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "schemata-server")]
#[command(about = "Schemata multi-tenant schema registry")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML, optional)
    #[arg(short, long, default_value = "/etc/schemata/registry.toml")]
    config: PathBuf,

    /// Log endpoint (memory://, file://<dir> or a directory), repeatable
    #[arg(long = "log-endpoint")]
    log_endpoints: Vec<String>,

    /// Durable backend database file
    #[arg(long)]
    backend_path: Option<PathBuf>,

    /// Serve many tenants, one log stream each
    #[arg(long)]
    multi_tenant: bool,

    /// Tenant served in single-tenant mode
    #[arg(long)]
    tenant: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// File, then `SCHEMATA__SECTION__KEY` variables, then flags
fn load_config(args: &Args) -> Result<RegistryConfig> {
    let mut config: RegistryConfig = config::Config::builder()
        .add_source(File::from(args.config.as_path()).format(FileFormat::Toml).required(false))
        .add_source(
            Environment::with_prefix("SCHEMATA")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("log.endpoints")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("loading configuration from {}", args.config.display()))?
        .try_deserialize()
        .context("invalid configuration")?;

    apply_overrides(&mut config, args);
    Ok(config)
}

fn apply_overrides(config: &mut RegistryConfig, args: &Args) {
    if !args.log_endpoints.is_empty() {
        config.log.endpoints.clone_from(&args.log_endpoints);
    }
    if let Some(path) = &args.backend_path {
        config.backend.path = Some(path.clone());
    }
    if args.multi_tenant {
        config.tenancy.multi_tenant = true;
    }
    if let Some(tenant) = &args.tenant {
        config.tenancy.default_tenant.clone_from(tenant);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Schemata registry");

    let config = load_config(&args)?;
    let tokens = schemata_auth::select_token_store(&config.auth)?;

    // Backend bootstrap sleeps between attempts
    let registry = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || assemble(&config, tokens)).await??
    };

    registry.gate.start();
    info!(
        "Registry ready (topology: {}, log: {}, multi-tenant: {})",
        registry.topology,
        if registry.has_log() { "on" } else { "off" },
        config.tenancy.multi_tenant
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    registry.shutdown();

    Ok(())
}
