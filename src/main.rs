//! # VendHub Manager
//!
//! Back office for vending operations: staff and roles, machines, task
//! checklists, ingredient bunkers, a Telegram bot and a live event relay.
//!
//! Usage:
//!   vendhub serve                          # HTTP API + WebSocket + Telegram bot
//!   vendhub serve --port 8080              # Custom port
//!   vendhub init-admin --email a@b.uz      # Create the first administrator
//!   vendhub seed-templates                 # Install the default checklist templates
//!   vendhub init-config                    # Write a default config file

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vendhub_core::config::DEFAULT_JWT_SECRET;
use vendhub_core::{Actor, VendHubConfig};
use vendhub_db::VendDb;
use vendhub_gateway::{UserService, generate_password};

#[derive(Parser)]
#[command(name = "vendhub", version, about = "🏪 VendHub Manager: vending back office")]
struct Cli {
    /// Config file (default: $VENDHUB_CONFIG or ~/.vendhub/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Database path override
    #[arg(long, global = true)]
    db: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the gateway server
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(long)]
        host: Option<String>,
    },
    /// Create the first administrator account
    InitAdmin {
        #[arg(long, default_value = "Administrator")]
        name: String,
        #[arg(long)]
        email: String,
        /// Falls back to $VENDHUB_ADMIN_PASSWORD, then to a generated one
        #[arg(long, env = "VENDHUB_ADMIN_PASSWORD")]
        password: Option<String>,
    },
    /// Install the default checklist templates (skips existing names)
    SeedTemplates,
    /// Write a config file with every default filled in
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn config_path(cli: &Cli) -> PathBuf {
    match cli.config {
        Some(ref p) => PathBuf::from(shellexpand::tilde(p).to_string()),
        None => VendHubConfig::resolve_path(),
    }
}

fn load_config(cli: &Cli) -> Result<VendHubConfig> {
    let path = config_path(cli);
    let mut config =
        VendHubConfig::load_or_default(&path).with_context(|| format!("loading {}", path.display()))?;
    config.apply_env();
    if let Some(ref db) = cli.db {
        config.database.path = db.clone();
    }
    Ok(config)
}

fn open_db(config: &VendHubConfig) -> Result<Arc<VendDb>> {
    let path = config.database.resolved_path();
    let db = VendDb::open(&path).with_context(|| format!("opening database {}", path.display()))?;
    tracing::info!("💾 Database: {}", path.display());
    Ok(Arc::new(db))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "vendhub=debug,vendhub_gateway=debug,vendhub_tasks=debug,tower_http=debug"
    } else {
        "vendhub=info,vendhub_gateway=info,vendhub_tasks=info,vendhub_inventory=info,vendhub_notify=info,vendhub_channels=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    if let Command::InitConfig { force } = cli.command {
        let path = config_path(&cli);
        if path.exists() && !force {
            anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
        }
        VendHubConfig::default()
            .save_to(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("📝 Config written to {}", path.display());
        return Ok(());
    }

    let mut config = load_config(&cli)?;
    let db = open_db(&config)?;

    match cli.command {
        Command::Serve { port, host } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if config.auth.jwt_secret == DEFAULT_JWT_SECRET {
                tracing::warn!("⚠️ Using the DEFAULT JWT secret! Set VENDHUB_JWT_SECRET for production.");
            }
            if db.count_users()? == 0 {
                tracing::warn!("⚠️ No users yet. Run `vendhub init-admin` to create one.");
            }
            vendhub_gateway::serve(config, db).await?;
        }
        Command::InitAdmin { name, email, password } => {
            let generated = password.is_none();
            let password = password.unwrap_or_else(|| generate_password(16));
            let user = UserService::new(db).bootstrap_admin(&name, &email, &password).await?;
            println!("✅ Admin user created:");
            println!("   Name:  {}", user.name);
            println!("   Email: {}", user.email);
            println!("   Id:    {}", user.id);
            if generated {
                println!("   Password: {password}");
                println!("   ⚠️ Change it after the first login.");
            }
        }
        Command::SeedTemplates => {
            let added = vendhub_tasks::seed_default_templates(&db, &Actor::system())?;
            println!("📋 {added} template(s) added");
        }
        Command::InitConfig { .. } => {}
    }
    Ok(())
}
