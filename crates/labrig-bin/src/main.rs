//! Command-line front end for labrig.
//!
//! Provides subcommands for:
//! - Listing the registered instrument drivers
//! - Checking a configuration document without touching hardware
//! - Loading a configuration into a resource table (and closing it again)
//! - Identifying instruments by `*IDN?` and drafting a configuration
//!
//! # Usage
//!
//! ```bash
//! labrig drivers
//! labrig check bench.json
//! labrig load bench.toml --workers 4
//! labrig draft GPIB0::5::INSTR TCPIP0::10.0.0.9::INSTR > bench.json
//! ```
//!
//! Settings come from `labrig.toml` (or `--settings`) and `LABRIG_*`
//! environment variables; `RUST_LOG` overrides the configured log level.

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use labrig_core::LoadError;
use labrig_hardware::config::{LogFormat, RigSettings};
use labrig_hardware::{
    default_registry, draft_document, identify, ConfigDocument, DriverRegistry, Identification,
    ResourceManager, ResourceTable, TransportBinder,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "labrig")]
#[command(about = "Load lab instrument configurations into live device handles", long_about = None)]
struct Cli {
    /// Settings file (defaults to ./labrig.toml when present)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered drivers
    Drivers,

    /// Resolve every entry of a configuration without opening channels
    Check {
        /// Configuration document (.json or .toml)
        config: PathBuf,
    },

    /// Load a configuration, report the outcome, then close every device
    Load {
        /// Configuration document (.json or .toml)
        config: PathBuf,

        /// Concurrent entry workers (overrides load.workers)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Query *IDN? at each address and list matching drivers
    Identify {
        /// VISA-style resource addresses
        #[arg(required = true)]
        addresses: Vec<String>,
    },

    /// Identify instruments and print a draft JSON configuration
    Draft {
        /// VISA-style resource addresses
        #[arg(required = true)]
        addresses: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let settings = RigSettings::load(cli.settings.as_deref()).context("failed to load settings")?;
    init_logging(&settings, cli.verbose)?;

    // Keep the driver crates in the final binary.
    labrig_driver_source::link();
    labrig_driver_sink::link();
    labrig_driver_funcgen::link();

    let registry = Arc::new(default_registry().context("failed to register built-in drivers")?);
    let binder = Arc::new(TransportBinder::with_defaults(&settings.transport));

    let ok = match cli.command {
        Commands::Drivers => {
            list_drivers(&registry);
            true
        }
        Commands::Check { config } => {
            let manager = ResourceManager::new(registry, binder);
            check(&manager, &config)?
        }
        Commands::Load { config, workers } => {
            let workers = workers.unwrap_or(settings.load.workers);
            let manager = ResourceManager::new(registry, binder).with_workers(workers);
            load(&manager, &config).await?
        }
        Commands::Identify { addresses } => {
            let results = identify(&binder, &registry, &addresses).await;
            print_identifications(&results);
            results
                .iter()
                .all(|r| matches!(r, Identification::Found { .. }))
        }
        Commands::Draft { addresses } => {
            let results = identify(&binder, &registry, &addresses).await;
            let document = draft_document(&registry, &results);
            let json = document
                .to_json_pretty()
                .context("failed to render draft configuration")?;
            println!("{}", json);
            !document.is_empty()
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn init_logging(settings: &RigSettings, verbose: bool) -> Result<()> {
    let fallback = if verbose {
        "debug"
    } else {
        settings.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .context("invalid log filter")?;

    let installed = match settings.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install logger: {}", e))
}

fn read_document(path: &Path) -> Result<ConfigDocument> {
    ConfigDocument::from_path(path)
        .with_context(|| format!("failed to read configuration {}", path.display()))
}

fn list_drivers(registry: &DriverRegistry) {
    println!("{:<28} {:<18} {:<18} OPERATIONS", "DEFINITION", "OBJECT", "CATEGORY");
    for descriptor in registry.descriptors() {
        println!(
            "{:<28} {:<18} {:<18} {}",
            descriptor.definition,
            descriptor.object,
            descriptor.category,
            descriptor.operations
        );
    }
}

fn check(manager: &ResourceManager, path: &Path) -> Result<bool> {
    let document = read_document(path)?;
    match manager.check(&document) {
        None => {
            println!("{}: {} entries, all drivers resolved", path.display(), document.len());
            Ok(true)
        }
        Some(error) => {
            print_failures(&error);
            Ok(false)
        }
    }
}

async fn load(manager: &ResourceManager, path: &Path) -> Result<bool> {
    let document = read_document(path)?;

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling load");
                cancel.cancel();
            }
        }
    });

    let (table, error) = manager.load_with_cancel(&document, &cancel).await;
    interrupt.abort();

    print_table(&table).await;
    if let Some(error) = &error {
        print_failures(error);
    }

    let close_failures = table.close_all().await;
    for failure in &close_failures {
        tracing::error!(device = %failure.name, error = %failure.error, "close failed");
    }

    Ok(error.is_none() && close_failures.is_empty())
}

async fn print_table(table: &ResourceTable) {
    if table.is_empty() {
        println!("no devices loaded");
        return;
    }
    println!("{:<20} {:<28} DEVICE", "NAME", "ADDRESS");
    for (name, device) in table.iter() {
        let description = if device.is_virtual() {
            match device.bound_object().await {
                Some(object) => format!("virtual ({})", object),
                None => "virtual (unbound)".to_string(),
            }
        } else {
            device.idn().unwrap_or("-").to_string()
        };
        println!("{:<20} {:<28} {}", name, device.address(), description);
    }
}

fn print_failures(error: &LoadError) {
    tracing::error!(
        failed = error.failures.len(),
        attempted = error.attempted,
        "configuration did not load cleanly"
    );
    eprintln!("{}", error);
}

fn print_identifications(results: &[Identification]) {
    for result in results {
        match result {
            Identification::Found { address, idn, matches } => {
                println!("{}: {}", address, idn);
                if matches.is_empty() {
                    println!("    no matching driver");
                }
                for descriptor in matches {
                    println!("    {} / {}", descriptor.definition, descriptor.object);
                }
            }
            Identification::Unreachable { address, error } => {
                println!("{}: unreachable ({})", address, error);
            }
        }
    }
}
