use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::metadata::LevelFilter;
use tracing::{error, info, info_span, warn, Instrument};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter, EnvFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use orca_migrate::app_state::{AppState, MigrationSettings, Providers};
use orca_migrate::config::{Config, LogConfig, LogFormat, RollPeriod};
use orca_migrate::database::{self, Ledger};
use orca_migrate::driver::MigrationDriver;
use orca_migrate::dto::address::AddressScheme;
use orca_migrate::dto::difference::DifferenceFile;
use orca_migrate::provider::azure::AzureCli;
use orca_migrate::provider::gcloud::GcloudArtifactRegistry;
use orca_migrate::provider::gcrane::Gcrane;

#[derive(Parser, Debug)]
#[command(name = "orca-migrate")]
#[command(about = "Migrate container images from Azure Container Registry to Google Artifact Registry")]
#[command(version)]
struct Cli {
    /// Path to the config file
    #[arg(long = "config-path", help = "Path to the toml config file")]
    config_path: Option<String>,

    /// Replay a difference file instead of scanning every registry
    #[arg(long = "diff-file", help = "Only migrate the images listed in this difference file")]
    diff_file: Option<PathBuf>,

    #[arg(long = "strict", help = "Exit with status 2 when any image failed to migrate")]
    strict: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Snapshot both registries and write the images missing from the destination
    Diff {
        #[arg(long = "replay", help = "Migrate the difference right after computing it")]
        replay: bool,
    },
    /// Inspect or reset the ledger of migrated images
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },
}

#[derive(Subcommand, Debug)]
enum LedgerAction {
    /// Print every migrated image
    List,
    /// Forget every migrated image so the next run copies everything again
    Clear,
}

fn init_logging(logc: &LogConfig) -> anyhow::Result<Vec<WorkerGuard>> {
    let mut logging_guards = Vec::new();

    // Create log directory if it doesn't exist
    let log_path = &logc.path;
    std::fs::create_dir_all(log_path)?;

    // Get a rolling file appender depending on the config
    let file_appender = match logc.roll_period {
        RollPeriod::Minutely => tracing_appender::rolling::minutely(log_path, "orca-migrate.log"),
        RollPeriod::Hourly => tracing_appender::rolling::hourly(log_path, "orca-migrate.log"),
        RollPeriod::Daily => tracing_appender::rolling::daily(log_path, "orca-migrate.log"),
        RollPeriod::Never => tracing_appender::rolling::never(log_path, "orca-migrate.log"),
    };

    // Create non blocking loggers
    let (file_appender_nb, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_nb, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    logging_guards.push(file_guard);
    logging_guards.push(stdout_guard);

    // Get json or text layers
    let (json_a, json_b, plain_a, plain_b) = match logc.format {
        LogFormat::Json => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file_appender_nb)
                    .json()
            ),
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(stdout_nb)
                    .json()
            ),
            None,
            None
        ),
        LogFormat::Human => (
            None,
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file_appender_nb)
                    .with_ansi(false)
            ),
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(stdout_nb)
            )
        )
    };

    // Only log orca_migrate at the configured level unless an env filter is given
    let targets_filter = if logc.env_filter.is_some() {
        None
    } else {
        Some(
            filter::Targets::new()
                .with_target("orca_migrate", logc.level)
                .with_default(LevelFilter::WARN)
        )
    };

    let env_filter = match &logc.env_filter {
        Some(env_filter) => Some(EnvFilter::from_str(env_filter)
            .with_context(|| format!("Invalid log env filter `{}`", env_filter))?),
        None => None,
    };

    tracing_subscriber::registry()
        .with(json_a)
        .with(json_b)
        .with(plain_a)
        .with(plain_b)
        .with(targets_filter)
        .with(env_filter)
        .init();

    Ok(logging_guards)
}

/// Wire the command line tools into the provider seams.
async fn build_state(config: &Config, ledger: Arc<dyn Ledger>) -> anyhow::Result<AppState> {
    let destination = config.destination()?;

    let subscription_id = match &config.source.subscription_id {
        Some(id) => id.clone(),
        None => AzureCli::resolve_subscription(&config.tools.az).await
            .context("Failed to resolve the Azure subscription")?,
    };
    info!("Using Azure subscription {}", subscription_id);

    let addresses = AddressScheme::new(&config.source.registry_suffix, &destination.region, &destination.project_id);
    let azure = Arc::new(AzureCli::new(&config.tools.az, subscription_id));
    let gcloud = Arc::new(GcloudArtifactRegistry::new(
        &config.tools.gcloud,
        &destination.project_id,
        destination.location(),
        addresses.destination_host(),
    ));

    let providers = Providers {
        source: azure.clone(),
        destination: gcloud.clone(),
        credentials: azure,
        provisioner: gcloud,
        transfer: Arc::new(Gcrane::new(&config.tools.gcrane)),
    };

    Ok(AppState::new(ledger, providers, addresses, MigrationSettings::from_config(config)))
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<ExitCode> {
    // registries and their tags are both bounded by the same limit
    let jobs = config.migration.max_concurrent_jobs;
    let pool = database::open(config.sqlite(), jobs.saturating_mul(jobs).clamp(1, 64) as u32).await
        .with_context(|| format!("Failed to open the ledger at {}", config.sqlite().path))?;
    info!("Opened ledger at {}", config.sqlite().path);

    if let Some(Command::Ledger { action }) = &cli.command {
        match action {
            LedgerAction::List => {
                for record in pool.list_all().await? {
                    println!("Processed: {}", record);
                }
            },
            LedgerAction::Clear => {
                let removed = pool.clear_all().await?;
                warn!("Removed {} records from the ledger", removed);
            },
        }

        return Ok(ExitCode::SUCCESS);
    }

    let difference = match &cli.diff_file {
        Some(path) if !path.exists() => {
            error!("Difference file {} does not exist", path.display());
            return Ok(ExitCode::from(1));
        },
        Some(path) => {
            let file = DifferenceFile::read(path).await
                .with_context(|| format!("Failed to read difference file {}", path.display()))?;
            info!("Loaded {} images from {}", file.entries.len(), path.display());
            Some(file)
        },
        None => None,
    };

    let state = build_state(&config, Arc::new(pool)).await?;
    let mut driver = MigrationDriver::new(Arc::new(state));

    let summary = match (cli.command, difference) {
        (Some(Command::Diff { replay }), difference) => {
            if difference.is_some() {
                warn!("Ignoring --diff-file, the diff command computes its own difference");
            }
            driver.run_diff(&config.snapshot, replay).await?
        },
        (_, Some(difference)) => driver.run_replay(difference).await?,
        _ => driver.run_full_scan().await?,
    };

    if (cli.strict || config.migration.fail_on_item_errors) && summary.has_failures() {
        error!("{} items failed to migrate", summary.failed);
        return Ok(ExitCode::from(2));
    }

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::new(cli.config_path.as_deref())
        .context("Failure to parse config")?;
    let _logging_guards = init_logging(&config.log)?;

    let mode = match &cli.command {
        Some(Command::Diff { .. }) => "diff",
        Some(Command::Ledger { .. }) => "ledger",
        None if cli.diff_file.is_some() => "replay",
        None => "full_scan",
    };

    let span = info_span!("run", id = %Uuid::new_v4(), mode);
    run(cli, config).instrument(span).await
}
