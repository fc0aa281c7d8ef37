//! otpfill-agent: keeps the OTP channel open and fills codes into pages.
//!
//! ## Subcommands
//!
//! - `run`: Start the agent (optionally against a page snapshot file)
//! - `connect`: Save the user identity and enable auto-connect
//! - `disconnect`: Disable auto-connect
//! - `status`: Print the stored identity, mailbox and last code
//! - `fill`: One-shot fill of a page snapshot file

use clap::{Parser, Subcommand};
use fill_core::{FillEngine, MemoryPage, PageContext, PageSnapshot};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;

use otpfill_agent::logging::init_logging;
use otpfill_agent::{
    load_config, AgentConfig, AgentError, ChannelManager, LocalPages, ObserverEvent, Result,
    StorageConfig, Stores, WsConnector,
};

#[derive(Parser)]
#[command(name = "otpfill-agent")]
#[command(about = "Relays one-time passcodes into the active page")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.otpfill/agent.toml)
    #[arg(long, global = true, env = "OTPFILL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent until interrupted
    Run {
        /// Page snapshot (JSON) to use as the active page
        #[arg(long, value_name = "FILE")]
        page: Option<PathBuf>,
    },

    /// Save the user identity and connect on next run
    Connect {
        #[arg(value_name = "USER")]
        user: String,
    },

    /// Stop connecting automatically
    Disconnect,

    /// Show stored identity, mailbox and last code
    Status,

    /// Fill a code into a page snapshot and print the outcome
    Fill {
        #[arg(long, value_name = "FILE")]
        page: PathBuf,

        #[arg(long)]
        code: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let storage = match StorageConfig::from_home() {
        Ok(storage) => storage,
        Err(err) => {
            eprintln!("otpfill-agent: {}", err);
            std::process::exit(1);
        }
    };
    let config_path = cli.config.unwrap_or_else(|| storage.config_file());
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("otpfill-agent: {}; using defaults", err);
            AgentConfig::default()
        }
    };
    let _logging_guard = init_logging(&config.logging, &storage.log_dir());

    let result = match cli.command {
        Commands::Run { page } => run(config, &storage, page.as_deref()).await,
        Commands::Connect { user } => connect(&config, &storage, &user),
        Commands::Disconnect => disconnect(&storage),
        Commands::Status => status(&storage),
        Commands::Fill { page, code } => fill(&config, &page, &code),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "otpfill-agent failed");
        std::process::exit(1);
    }
}

async fn run(config: AgentConfig, storage: &StorageConfig, page: Option<&Path>) -> Result<()> {
    let stores = Stores::open(storage)?;
    if stores.user_identity().is_none() {
        tracing::warn!("No user identity stored; waiting idle until `connect` is run");
    }

    let pages = Arc::new(LocalPages::new(config.fill.clone()));
    let page = match page {
        Some(path) => {
            let page = Arc::new(Mutex::new(MemoryPage::new(read_page(path)?)));
            pages.open(Arc::clone(&page));
            tracing::info!(path = %path.display(), "Page snapshot loaded");
            Some(page)
        }
        None => None,
    };

    let channel = ChannelManager::new(config, WsConnector, stores, pages).spawn();
    let mut events = channel.subscribe();
    tracing::info!("otpfill agent started");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "Observer lagged"),
                Err(RecvError::Closed) => break,
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::warn!(error = %e, "Failed to listen for ctrl-c");
                }
                break;
            }
        }
    }

    channel.shutdown().await?;
    if let Some(page) = page {
        print_page(&page)?;
    }
    tracing::info!("otpfill agent stopped");
    Ok(())
}

fn log_event(event: &ObserverEvent) {
    match serde_json::to_string(event) {
        Ok(json) => tracing::info!(event = %json, "Observer event"),
        Err(e) => tracing::debug!(error = %e, "Unserializable observer event"),
    }
}

fn connect(config: &AgentConfig, storage: &StorageConfig, user: &str) -> Result<()> {
    let user = user.trim();
    // Validate before persisting.
    let url = config.channel_url(user)?;
    let mut stores = Stores::open(storage)?;
    stores.set_user_identity(user)?;
    stores.set_auto_connect(true)?;
    println!("Saved identity {}; channel {}", user, url);
    Ok(())
}

fn disconnect(storage: &StorageConfig) -> Result<()> {
    let mut stores = Stores::open(storage)?;
    stores.set_auto_connect(false)?;
    println!("Auto-connect disabled");
    Ok(())
}

fn status(storage: &StorageConfig) -> Result<()> {
    let stores = Stores::open(storage)?;
    let status = serde_json::json!({
        "userIdentity": stores.user_identity(),
        "autoConnect": stores.auto_connect(),
        "currentEmail": stores.current_email(),
        "lastOtp": stores.last_otp(),
    });
    println!("{}", serde_json::to_string_pretty(&status).unwrap_or_default());
    Ok(())
}

fn fill(config: &AgentConfig, path: &Path, code: &str) -> Result<()> {
    let mut page = MemoryPage::new(read_page(path)?);
    let mut engine = FillEngine::new(config.fill.clone());
    let outcome = engine.fill(&mut page, code);
    println!("{}", serde_json::to_string_pretty(&outcome).unwrap_or_default());
    print_values(&page)
}

fn read_page(path: &Path) -> Result<PageSnapshot> {
    let json = fs_err::read_to_string(path).map_err(|source| AgentError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(PageSnapshot::from_json(&json)?)
}

fn print_page(page: &Mutex<MemoryPage>) -> Result<()> {
    match page.lock() {
        Ok(page) => print_values(&page),
        Err(poisoned) => print_values(&poisoned.into_inner()),
    }
}

fn print_values(page: &MemoryPage) -> Result<()> {
    let snapshot = page.snapshot()?;
    for input in snapshot.inputs().filter(|input| !input.value.is_empty()) {
        println!("{} = {}", input.describe(), input.value);
    }
    Ok(())
}
