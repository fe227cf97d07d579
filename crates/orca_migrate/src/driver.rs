//! Runs a migration from start to finish.
//!
//! A run is either a full scan of every source registry, a targeted replay of a
//! difference file, or an inventory snapshot of both sides which may continue into a
//! replay. All of them copy images the same way: check the
//! ledger first, and record an image only once its copy went through.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::app_state::AppState;
use crate::config::SnapshotConfig;
use crate::diff::diff;
use crate::dto::difference::DifferenceFile;
use crate::dto::{ImageIdentity, LedgerRecord};
use crate::error::{MigrateError, ProviderError};
use crate::orchestrator::Orchestrator;
use crate::provider::{InventoryProvider, ProvisionOutcome};
use crate::retry::RetryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Enumerating,
    Diffing,
    Copying,
    Reporting,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Phase::Idle => write!(f, "idle"),
            Phase::Enumerating => write!(f, "enumerating"),
            Phase::Diffing => write!(f, "diffing"),
            Phase::Copying => write!(f, "copying"),
            Phase::Reporting => write!(f, "reporting"),
            Phase::Done => write!(f, "done"),
        }
    }
}

/// Counters shared by every worker of a run.
#[derive(Debug, Default)]
struct RunStats {
    copied: AtomicUsize,
    already_migrated: AtomicUsize,
    missing_digest: AtomicUsize,
    failed: AtomicUsize,
    malformed_lines: AtomicUsize,
    missing_from_destination: AtomicUsize,
}

impl RunStats {
    fn add(counter: &AtomicUsize, n: usize) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn summary(&self, ledger_records: usize) -> RunSummary {
        RunSummary {
            copied: self.copied.load(Ordering::Relaxed),
            already_migrated: self.already_migrated.load(Ordering::Relaxed),
            missing_digest: self.missing_digest.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            malformed_lines: self.malformed_lines.load(Ordering::Relaxed),
            missing_from_destination: self.missing_from_destination.load(Ordering::Relaxed),
            ledger_records,
        }
    }
}

/// What a run did, logged at the end of every mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub copied: usize,
    pub already_migrated: usize,
    pub missing_digest: usize,
    /// Items, repositories or registries that could not be processed.
    pub failed: usize,
    pub malformed_lines: usize,
    /// Size of the computed difference. Only set by the diff mode.
    pub missing_from_destination: usize,
    pub ledger_records: usize,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// The per-item half of a run, cloned into every spawned task.
#[derive(Clone)]
struct Worker {
    state: Arc<AppState>,
    stats: Arc<RunStats>,
    orchestrator: Orchestrator,
}

impl Worker {
    async fn process_registry(self, registry: String) -> Result<(), MigrateError> {
        let retry = self.state.settings.retry;
        let source = &self.state.providers.source;

        let resource_group = retry.execute("get_resource_group_name", || source.locate(&registry)).await?
            .ok_or_else(|| MigrateError::MissingLocation(registry.clone()))?;

        if self.state.settings.login_with_registry_credentials {
            let credentials = retry.execute("get_registry_credentials", || {
                self.state.providers.credentials.get_credentials(&registry, &resource_group)
            }).await?;

            let host = self.state.addresses.source_host(&registry);
            retry.execute("authenticate", || self.state.providers.transfer.authenticate(&host, &credentials)).await?;
        }

        let repositories = retry.execute("list_repositories", || source.list_repositories(&registry)).await?;
        info!(registry = %registry, resource_group = %resource_group, "Processing {} repositories", repositories.len());

        for repository in repositories {
            if let Err(e) = self.process_repository(&registry, &repository, &resource_group).await {
                error!(registry = %registry, repository = %repository, "Error processing repository {}: {}", repository, e);
                RunStats::add(&self.stats.failed, 1);
            }
        }

        Ok(())
    }

    async fn process_repository(&self, registry: &str, repository: &str, location: &str) -> Result<(), MigrateError> {
        let retry = self.state.settings.retry;
        let source = &self.state.providers.source;

        let tags = retry.execute("list_tags", || source.list_tags(registry, repository)).await?;
        debug!(registry, repository, "Found {} tags", tags.len());

        if tags.is_empty() {
            return Ok(());
        }

        self.ensure_destination(registry).await?;

        let report = self.orchestrator.run_bounded("tag", tags, |tag: String| {
            self.clone().migrate_tag(registry.to_string(), repository.to_string(), tag, location.to_string())
        }).await;
        RunStats::add(&self.stats.failed, report.failed);

        Ok(())
    }

    async fn migrate_tag(self, registry: String, repository: String, tag: String, location: String) -> Result<(), MigrateError> {
        let source = &self.state.providers.source;
        let digest = self.state.settings.retry
            .execute("get_tag_digest", || source.get_digest(&registry, &repository, &tag)).await?;

        let digest = match digest {
            Some(digest) => digest,
            None => {
                error!(registry = %registry, repository = %repository, tag = %tag,
                    "Skipping {}/{}:{} due to missing digest.", registry, repository, tag);
                RunStats::add(&self.stats.missing_digest, 1);
                return Ok(());
            }
        };

        let identity = ImageIdentity::new(registry, repository, tag, digest);
        debug!(location = %location, "Found {}", identity);
        self.migrate_identity(&identity).await
    }

    /// Copy one image unless the ledger already has it, and record it once copied.
    async fn migrate_identity(&self, identity: &ImageIdentity) -> Result<(), MigrateError> {
        let retry = self.state.settings.retry;
        let ledger = &self.state.ledger;

        if retry.execute("check_if_processed", || ledger.exists(identity)).await? {
            info!("Skipping {} as it has been processed before.", identity);
            RunStats::add(&self.stats.already_migrated, 1);
            return Ok(());
        }

        let source = self.state.addresses.source_address(identity);
        let destination = self.state.addresses.destination_address(identity);
        let transfer = &self.state.providers.transfer;
        retry.execute("copy_image", || transfer.copy_image(&source, &destination)).await?;

        if !retry.execute("insert_processed", || ledger.insert(identity)).await? {
            debug!("{} was recorded by another worker first", identity);
        }
        RunStats::add(&self.stats.copied, 1);

        Ok(())
    }

    /// Make sure the destination repository for `registry` exists.
    async fn ensure_destination(&self, registry: &str) -> Result<(), MigrateError> {
        let name = self.state.addresses.destination_repository(registry);
        let project = self.state.addresses.project_id();
        let provisioner = &self.state.providers.provisioner;

        match self.state.settings.retry.execute("create_repository", || provisioner.ensure_repository(project, name)).await {
            Ok(ProvisionOutcome::Created) => {
                info!(repository = name, "Created destination repository {}", name);
                Ok(())
            },
            Ok(ProvisionOutcome::AlreadyExists) | Err(RetryError::Permanent(ProviderError::AlreadyExists(_))) => {
                debug!(repository = name, "Destination repository {} already exists", name);
                Ok(())
            },
            Err(e) => Err(MigrateError::Provisioning {
                repository: name.to_string(),
                source: e,
            }),
        }
    }

    /// Every tagged image behind `provider`, one listing per registry.
    async fn inventory(&self, side: &'static str, provider: Arc<dyn InventoryProvider>) -> Inventory {
        let retry = self.state.settings.retry;

        let registries = match retry.execute("list_registries", || provider.list_registries()).await {
            Ok(registries) => registries,
            Err(e) => {
                error!(side, "Failed to list {} registries: {}", side, e);
                RunStats::add(&self.stats.failed, 1);
                return Inventory { images: BTreeSet::new(), complete: false };
            }
        };
        info!(side, "Found {} {} registries", registries.len(), side);

        let images = Arc::new(Mutex::new(BTreeSet::new()));
        let report = self.orchestrator.run_bounded("registry", registries, |registry: String| {
            let provider = provider.clone();
            let images = images.clone();
            async move {
                let found = retry.execute("list_images", || provider.list_images(&registry)).await?;
                info!(side, registry = %registry, "Found {} images", found.len());
                images.lock().await.extend(found);

                Ok::<(), MigrateError>(())
            }
        }).await;
        RunStats::add(&self.stats.failed, report.failed);

        let mut images = images.lock().await;
        Inventory {
            images: std::mem::take(&mut *images),
            complete: report.failed == 0,
        }
    }
}

/// One side of a diff. Incomplete when a registry listing failed.
struct Inventory {
    images: BTreeSet<ImageIdentity>,
    complete: bool,
}

pub struct MigrationDriver {
    phase: Phase,
    worker: Worker,
}

impl MigrationDriver {
    pub fn new(state: Arc<AppState>) -> Self {
        let orchestrator = Orchestrator::new(state.settings.concurrency);

        Self {
            phase: Phase::Idle,
            worker: Worker {
                state,
                stats: Arc::new(RunStats::default()),
                orchestrator,
            },
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn transition(&mut self, next: Phase) {
        info!(from = %self.phase, to = %next, "Entering {} phase", next);
        self.phase = next;
    }

    /// Migrate every tag of every source registry that the ledger does not know yet.
    pub async fn run_full_scan(&mut self) -> Result<RunSummary, MigrateError> {
        self.transition(Phase::Enumerating);

        let source = &self.worker.state.providers.source;
        let registries = match self.worker.state.settings.retry.execute("list_registries", || source.list_registries()).await {
            Ok(registries) => registries,
            Err(e) => {
                error!("Failed to list source registries: {}", e);
                RunStats::add(&self.worker.stats.failed, 1);
                Vec::new()
            }
        };
        info!("Found {} source registries", registries.len());

        // the ledger lookup of each tag stands in for an inventory diff
        self.transition(Phase::Diffing);
        self.transition(Phase::Copying);

        let worker = self.worker.clone();
        let report = self.worker.orchestrator.run_chunked("registry", registries, |registry: String| {
            worker.clone().process_registry(registry)
        }).await;
        RunStats::add(&self.worker.stats.failed, report.failed);

        self.report().await
    }

    /// Migrate exactly the images listed in a difference file.
    pub async fn run_replay(&mut self, difference: DifferenceFile) -> Result<RunSummary, MigrateError> {
        RunStats::add(&self.worker.stats.malformed_lines, difference.malformed);
        self.transition(Phase::Copying);

        if difference.entries.is_empty() {
            info!("No images to copy.");
        }

        let registries: Vec<String> = difference.entries.iter()
            .map(|id| id.registry.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let ready = Arc::new(Mutex::new(HashSet::new()));
        let worker = self.worker.clone();
        self.worker.orchestrator.run_bounded("registry", registries, |registry: String| {
            let worker = worker.clone();
            let ready = ready.clone();
            async move {
                worker.ensure_destination(&registry).await?;
                ready.lock().await.insert(registry);

                Ok::<(), MigrateError>(())
            }
        }).await;

        let ready = std::mem::take(&mut *ready.lock().await);
        let (runnable, skipped): (Vec<_>, Vec<_>) = difference.entries.into_iter()
            .partition(|id| ready.contains(&id.registry));

        for identity in &skipped {
            error!("Skipping {} since its destination repository is unavailable", identity);
        }
        RunStats::add(&self.worker.stats.failed, skipped.len());

        let report = self.worker.orchestrator.run_bounded("image", runnable, |identity: ImageIdentity| {
            let worker = worker.clone();
            async move { worker.migrate_identity(&identity).await }
        }).await;
        RunStats::add(&self.worker.stats.failed, report.failed);

        self.report().await
    }

    /// Snapshot both inventories to `files` and compute what the destination is missing.
    ///
    /// With `replay` the difference is migrated right away.
    pub async fn run_diff(&mut self, files: &SnapshotConfig, replay: bool) -> Result<RunSummary, MigrateError> {
        self.transition(Phase::Enumerating);

        let providers = self.worker.state.providers.clone();
        let (source, destination) = tokio::join!(
            self.worker.inventory("source", providers.source),
            self.worker.inventory("destination", providers.destination),
        );

        DifferenceFile::write(&files.source_file, &source.images).await?;
        info!("Wrote {} source images to {}", source.images.len(), files.source_file);
        DifferenceFile::write(&files.destination_file, &destination.images).await?;
        info!("Wrote {} destination images to {}", destination.images.len(), files.destination_file);

        self.transition(Phase::Diffing);
        let missing = diff(&source.images, &destination.images);
        self.worker.stats.missing_from_destination.store(missing.len(), Ordering::Relaxed);

        if !(source.complete && destination.complete) {
            error!("Inventory is incomplete, leaving {} untouched and skipping the replay", files.difference_file);

            let summary = self.worker.stats.summary(0);
            self.finish(&summary);
            return Ok(summary);
        }

        if missing.is_empty() {
            info!("All source images are present in the destination");

            match tokio::fs::remove_file(&files.difference_file).await {
                Ok(()) => info!("Removed stale difference file {}", files.difference_file),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {},
                Err(e) => return Err(e.into()),
            }
        } else {
            DifferenceFile::write(&files.difference_file, &missing).await?;
            warn!("{} images are missing from the destination, written to {}", missing.len(), files.difference_file);
        }

        if replay {
            return self.run_replay(DifferenceFile {
                entries: missing.into_iter().collect(),
                malformed: 0,
            }).await;
        }

        let summary = self.worker.stats.summary(0);
        self.finish(&summary);

        Ok(summary)
    }

    async fn ledger_records(&self) -> Result<Vec<LedgerRecord>, MigrateError> {
        let ledger = &self.worker.state.ledger;
        Ok(self.worker.state.settings.retry.execute("get_all_processed", || ledger.list_all()).await?)
    }

    async fn report(&mut self) -> Result<RunSummary, MigrateError> {
        self.transition(Phase::Reporting);

        let records = self.ledger_records().await?;
        for record in &records {
            println!("Processed: {}", record);
        }

        let summary = self.worker.stats.summary(records.len());
        self.finish(&summary);

        Ok(summary)
    }

    fn finish(&mut self, summary: &RunSummary) {
        info!(
            copied = summary.copied,
            already_migrated = summary.already_migrated,
            missing_digest = summary.missing_digest,
            failed = summary.failed,
            malformed_lines = summary.malformed_lines,
            missing_from_destination = summary.missing_from_destination,
            ledger_records = summary.ledger_records,
            "Run finished"
        );
        self.transition(Phase::Done);
    }
}
