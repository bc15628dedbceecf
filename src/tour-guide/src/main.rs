//! Tour Guide: step-by-step product tours driven from the command line.
//!
//! Registers the demo tour set, syncs it into an in-memory store and answers
//! one query for one user.

mod demo;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tour_core::config::{AppConfig, LoggingConfig};
use tour_core::User;
use tour_engine::{DefinitionRegistry, NavigationGuard, SyncReport, TourEngine};
use tour_store::MemoryStore;

#[derive(Parser, Debug)]
#[command(name = "tour-guide")]
#[command(about = "Step-by-step product tours with completion tracking")]
#[command(version)]
struct Cli {
    /// User to answer for
    #[arg(long, env = "TOUR_GUIDE__USER", default_value_t = 1)]
    user: u64,

    /// Step keys the user has finished, comma separated
    #[arg(long, value_delimiter = ',')]
    done: Vec<String>,

    /// Tour to enroll the user in before answering
    #[arg(long, default_value = demo::ONBOARDING)]
    enroll: String,

    /// Never redirect (overrides config)
    #[arg(long, default_value_t = false)]
    no_enforce: bool,

    /// Emit JSON logs (overrides config)
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Materialize every registered tour and report what changed
    Sync,
    /// Print where the user should go next
    Next,
    /// Decide whether a request for PATH goes through or is redirected
    Check { path: String },
    /// Print a tour with per-step progress; defaults to the user's current tour
    Show {
        #[arg(long)]
        tour: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct SyncSummary {
    tour: String,
    tour_id: u64,
    tour_created: bool,
    steps_created: usize,
    steps_updated: usize,
}

impl From<&SyncReport> for SyncSummary {
    fn from(report: &SyncReport) -> Self {
        Self {
            tour: report.tour.tour_class.clone(),
            tour_id: report.tour.id,
            tour_created: report.tour_created,
            steps_created: report.steps_created,
            steps_updated: report.steps_updated,
        }
    }
}

fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration; logging is not up yet so report failures after.
    let (mut config, load_error) = match AppConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    // Apply CLI overrides
    if cli.json_logs {
        config.logging.json = true;
    }
    if cli.no_enforce {
        config.engine.enforce_navigation = false;
    }

    init_tracing(&config.logging);
    if let Some(e) = load_error {
        warn!(error = %e, "Failed to load config, using defaults");
    }

    info!(
        user = cli.user,
        sync_on_startup = config.engine.sync_on_startup,
        enforce_navigation = config.engine.enforce_navigation,
        "Configuration loaded"
    );

    let done: HashSet<String> = cli
        .done
        .iter()
        .map(|key| key.trim())
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect();
    let registry = Arc::new(DefinitionRegistry::new());
    demo::register(&registry, Arc::new(done)).context("Failed to register demo tours")?;

    let store = Arc::new(MemoryStore::with_capacity(config.store.initial_capacity));
    let engine = TourEngine::new(store, registry);

    let reports = if config.engine.sync_on_startup || matches!(cli.command, Command::Sync) {
        engine
            .materialize_all()
            .context("Failed to materialize tours")?
    } else {
        Vec::new()
    };

    let user = User::new(cli.user);
    engine
        .add_user(&cli.enroll, &user)
        .with_context(|| format!("Failed to enroll user in {}", cli.enroll))?;

    match cli.command {
        Command::Sync => {
            let summary: Vec<SyncSummary> = reports.iter().map(SyncSummary::from).collect();
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Next => match engine.get_next_url(&user)? {
            Some(url) => println!("{url}"),
            None => println!("no tour in progress"),
        },
        Command::Check { path } => {
            let guard = NavigationGuard::from_config(&config.engine);
            let decision = guard.check(&engine, &path, &user)?;
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        Command::Show { tour } => {
            let instance = match tour {
                Some(key) => Some(engine.instance(&key)?),
                None => match engine.get_active_tour(&user)? {
                    Some(tour) => Some(tour),
                    None => engine.get_most_recent_tour(&user)?,
                },
            };
            match instance {
                Some(instance) => {
                    let snapshot = instance.snapshot(&user)?;
                    println!("{}", serde_json::to_string_pretty(&snapshot)?);
                }
                None => println!("no tour in progress"),
            }
        }
    }

    Ok(())
}
