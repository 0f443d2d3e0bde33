//! Fieldsync CLI - Command line interface for the survey sync queue.
//!
//! This tool validates survey files, queues them durably and drives
//! dispatch cycles against a remote store.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fieldsync_common::QueueItemId;
use fieldsync_storage::{
    DiskFreeSpace, FixedFreeSpace, FreeSpaceProbe, HttpRemote, MemoryRemote, RemoteStore,
    SqliteStore,
};
use fieldsync_sync::{
    CycleStatus, EnqueueError, FieldSyncConfig, NetworkSource, NetworkState, QueueBackends,
    QueueItem, Reachability, StaticNetworkSource, SyncQueue,
};
use fieldsync_validation::{Survey, Validator};

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "Fieldsync - Offline survey queue and validation")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Queue database (default: platform data directory).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a survey file against every rule.
    Validate {
        /// Survey JSON file.
        survey: PathBuf,
    },

    /// Check owner, phone and parcel identifiers.
    CheckId {
        /// Owner national ID.
        #[arg(long)]
        owner: Option<String>,

        /// Owner mobile number.
        #[arg(long)]
        phone: Option<String>,

        /// Cadastral parcel ID.
        #[arg(long)]
        parcel: Option<String>,
    },

    /// Validate a survey file and add it to the queue.
    Enqueue {
        /// Survey JSON file.
        survey: PathBuf,

        /// Pretend this many bytes are free instead of probing the disk.
        #[arg(long)]
        free_bytes: Option<u64>,
    },

    /// Run one dispatch cycle.
    Dispatch {
        /// Base URL of the remote store.
        #[arg(short, long)]
        remote: String,

        /// Treat the link as disconnected.
        #[arg(long)]
        offline: bool,

        /// Reported internet reachability.
        #[arg(long, value_enum, default_value = "yes")]
        reachability: ReachabilityArg,
    },

    /// List every queued item.
    Status,

    /// List items that ran out of retries.
    Exhausted,

    /// Drop an exhausted item.
    Discard {
        /// Queue item ID.
        id: String,
    },

    /// Give an exhausted item a fresh retry budget.
    Requeue {
        /// Queue item ID.
        id: String,
    },

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ReachabilityArg {
    Yes,
    No,
    Unknown,
}

impl From<ReachabilityArg> for Reachability {
    fn from(arg: ReachabilityArg) -> Self {
        match arg {
            ReachabilityArg::Yes => Reachability::Reachable,
            ReachabilityArg::No => Reachability::Unreachable,
            ReachabilityArg::Unknown => Reachability::Unknown,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Validate { survey } => cmd_validate(&survey, &config),

        Commands::CheckId {
            owner,
            phone,
            parcel,
        } => cmd_check_id(owner.as_deref(), phone.as_deref(), parcel.as_deref(), &config),

        Commands::Enqueue { survey, free_bytes } => {
            cmd_enqueue(&survey, free_bytes, cli.db, config).await
        }

        Commands::Dispatch {
            remote,
            offline,
            reachability,
        } => {
            let network = NetworkState::new(!offline, reachability.into());
            cmd_dispatch(&remote, network, cli.db, config).await
        }

        Commands::Status => cmd_status(cli.db, config).await,

        Commands::Exhausted => cmd_exhausted(cli.db, config).await,

        Commands::Discard { id } => cmd_discard(&id, cli.db, config).await,

        Commands::Requeue { id } => cmd_requeue(&id, cli.db, config).await,

        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "fieldsync", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<FieldSyncConfig> {
    match path {
        Some(path) => FieldSyncConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(FieldSyncConfig::default()),
    }
}

fn db_path(db: Option<PathBuf>) -> Result<PathBuf> {
    let path = match db {
        Some(path) => path,
        None => dirs::data_dir()
            .context("No platform data directory; pass --db")?
            .join("fieldsync")
            .join("queue.db"),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(path)
}

fn read_survey(path: &Path) -> Result<Survey> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Survey::from_json(&json).with_context(|| format!("Invalid survey file {}", path.display()))
}

/// Open the queue with the given remote and network; storage comes from `db`.
async fn open_queue(
    db: Option<PathBuf>,
    config: FieldSyncConfig,
    remote: Arc<dyn RemoteStore>,
    network: NetworkState,
    free_space: Option<Arc<dyn FreeSpaceProbe>>,
) -> Result<SyncQueue> {
    let path = db_path(db)?;
    let store = SqliteStore::open(&path).context("Failed to open queue database")?;
    let free_space: Arc<dyn FreeSpaceProbe> = match free_space {
        Some(probe) => probe,
        None => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            Arc::new(DiskFreeSpace::new(dir))
        }
    };
    let network: Arc<dyn NetworkSource> = Arc::new(StaticNetworkSource(network));

    let queue = SyncQueue::open(
        QueueBackends {
            store: Arc::new(store),
            remote,
            network,
            free_space,
        },
        config,
    )
    .await?;
    Ok(queue)
}

/// Open the queue for commands that never reach the remote.
async fn open_local_queue(db: Option<PathBuf>, config: FieldSyncConfig) -> Result<SyncQueue> {
    open_queue(
        db,
        config,
        Arc::new(MemoryRemote::new()),
        NetworkState::offline(),
        None,
    )
    .await
}

fn print_item(item: &QueueItem) {
    let last_attempt = item
        .last_attempt()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());

    println!(
        "  {} {:<10} survey={} retries={}/{} last_attempt={}",
        item.id(),
        item.status(),
        item.survey_id(),
        item.retry_count(),
        item.max_retries(),
        last_attempt
    );
    if let Some(error) = item.last_error() {
        println!("      last error: {}", error);
    }
}

/// Check a survey file.
fn cmd_validate(path: &Path, config: &FieldSyncConfig) -> Result<()> {
    let survey = read_survey(path)?;
    let validator = Validator::new(config.validation.clone());

    let report = validator.validate_survey(&survey);
    if report.is_valid() {
        println!("Survey {} is complete.", survey.id);
    } else {
        println!("Survey {} has {} problem(s):", survey.id, report.violations().len());
        for message in report.messages() {
            println!("  - {}", message);
        }
    }

    if let Some((lat, lng)) = survey.coordinates() {
        if !validator.is_valid_region(lat, lng) {
            println!("  - Location {}, {} is outside the survey region", lat, lng);
        }
    }

    if !survey.polygon.is_empty() {
        match validator.validate_polygon(&survey.polygon) {
            Ok(()) => println!("Boundary: {} points", survey.polygon.len()),
            Err(e) => println!("Boundary: {}", e),
        }
    }

    for problem in [
        survey
            .owner_id
            .as_deref()
            .and_then(|owner| validator.validate_owner_id(Some(owner)).err())
            .map(|e| e.to_string()),
        validator.validate_phone(survey.owner_phone.as_deref()).err().map(|e| e.to_string()),
        validator.validate_parcel_id(survey.parcel_id.as_deref()).err().map(|e| e.to_string()),
    ]
    .into_iter()
    .flatten()
    {
        println!("  - {}", problem);
    }

    Ok(())
}

/// Check identifiers.
fn cmd_check_id(
    owner: Option<&str>,
    phone: Option<&str>,
    parcel: Option<&str>,
    config: &FieldSyncConfig,
) -> Result<()> {
    if owner.is_none() && phone.is_none() && parcel.is_none() {
        anyhow::bail!("Pass at least one of --owner, --phone or --parcel");
    }

    let validator = Validator::new(config.validation.clone());
    let mut failed = false;

    if let Some(owner) = owner {
        match validator.validate_owner_id(Some(owner)) {
            Ok(()) => println!("Owner ID {}: ok", owner),
            Err(e) => {
                failed = true;
                println!("Owner ID {}: {}", owner, e);
            }
        }
    }
    if let Some(phone) = phone {
        match validator.validate_phone(Some(phone)) {
            Ok(()) => println!("Phone {}: ok", phone),
            Err(e) => {
                failed = true;
                println!("Phone {}: {}", phone, e);
            }
        }
    }
    if let Some(parcel) = parcel {
        match validator.validate_parcel_id(Some(parcel)) {
            Ok(()) => println!("Parcel ID {}: ok", parcel),
            Err(e) => {
                failed = true;
                println!("Parcel ID {}: {}", parcel, e);
            }
        }
    }

    if failed {
        anyhow::bail!("One or more identifiers are invalid");
    }
    Ok(())
}

/// Queue a survey.
async fn cmd_enqueue(
    path: &Path,
    free_bytes: Option<u64>,
    db: Option<PathBuf>,
    config: FieldSyncConfig,
) -> Result<()> {
    let survey = read_survey(path)?;
    info!("Queueing survey {}", survey.id);

    let free_space = free_bytes.map(|n| Arc::new(FixedFreeSpace(n)) as Arc<dyn FreeSpaceProbe>);
    let queue = open_queue(
        db,
        config,
        Arc::new(MemoryRemote::new()),
        NetworkState::offline(),
        free_space,
    )
    .await?;

    match queue.enqueue(survey).await {
        Ok(id) => {
            println!("Queued as {}", id);
            Ok(())
        }
        Err(EnqueueError::ValidationFailed(violations)) => {
            println!("Survey rejected:");
            for violation in &violations {
                println!("  - {}", violation);
            }
            anyhow::bail!("Survey failed validation")
        }
        Err(EnqueueError::StorageExhausted { .. }) => {
            anyhow::bail!("Not enough free storage; free up space and try again")
        }
        Err(e) => Err(e.into()),
    }
}

/// Run one dispatch cycle.
async fn cmd_dispatch(
    remote_url: &str,
    network: NetworkState,
    db: Option<PathBuf>,
    config: FieldSyncConfig,
) -> Result<()> {
    let remote = HttpRemote::new(remote_url, config.sync.remote_timeout())
        .context("Invalid remote URL")?;
    let queue = open_queue(db, config, Arc::new(remote), network, None).await?;

    let report = queue.run_dispatch_cycle().await;
    match report.status {
        CycleStatus::Completed => {
            println!("Dispatch completed in {:?}", report.duration);
            println!("  Attempted: {}", report.attempted);
            println!("  Delivered: {}", report.delivered);
            println!("  Failed:    {}", report.failed);
            println!("  Deferred:  {}", report.deferred);
            println!("  Exhausted: {}", report.exhausted);
        }
        CycleStatus::NetworkUnavailable => println!("Network not ready; nothing sent."),
        CycleStatus::AlreadyRunning => println!("Another dispatch is in progress."),
    }
    Ok(())
}

/// Show the queue.
async fn cmd_status(db: Option<PathBuf>, config: FieldSyncConfig) -> Result<()> {
    let queue = open_local_queue(db, config).await?;
    let items = queue.items().await;

    if items.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    println!(
        "{} item(s), {} pending:",
        items.len(),
        queue.pending_count().await
    );
    for item in &items {
        print_item(item);
    }
    Ok(())
}

/// Show exhausted items.
async fn cmd_exhausted(db: Option<PathBuf>, config: FieldSyncConfig) -> Result<()> {
    let queue = open_local_queue(db, config).await?;
    let items = queue.exhausted_items().await;

    if items.is_empty() {
        println!("No exhausted items.");
        return Ok(());
    }

    println!("{} item(s) need attention:", items.len());
    for item in &items {
        print_item(item);
    }
    Ok(())
}

/// Drop an exhausted item.
async fn cmd_discard(id: &str, db: Option<PathBuf>, config: FieldSyncConfig) -> Result<()> {
    let id = QueueItemId::parse(id)?;
    let queue = open_local_queue(db, config).await?;

    let item = queue.discard(id).await?;
    println!("Discarded survey {}", item.survey_id());
    Ok(())
}

/// Requeue an exhausted item.
async fn cmd_requeue(id: &str, db: Option<PathBuf>, config: FieldSyncConfig) -> Result<()> {
    let id = QueueItemId::parse(id)?;
    let queue = open_local_queue(db, config).await?;

    queue.requeue(id).await?;
    println!("Requeued {}", id);
    Ok(())
}
