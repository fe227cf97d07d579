#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Pool, Sqlite};
use tempfile::TempDir;

use orca_migrate::app_state::{AppState, MigrationSettings, Providers};
use orca_migrate::config::SqliteDbConfig;
use orca_migrate::database;
use orca_migrate::driver::MigrationDriver;
use orca_migrate::dto::address::AddressScheme;
use orca_migrate::dto::ImageIdentity;
use orca_migrate::error::ProviderError;
use orca_migrate::provider::{
    CredentialProvider, Credentials, InventoryProvider, ProvisionOutcome, RepositoryProvisioner, TransferProvider,
};
use orca_migrate::retry::RetryPolicy;

pub const PROJECT: &str = "proj";

pub fn image(registry: &str, repository: &str, tag: &str, digest: &str) -> ImageIdentity {
    ImageIdentity::new(registry, repository, tag, digest)
}

pub fn source_address(registry: &str, repository: &str, tag: &str) -> String {
    format!("{}.azurecr.io/{}:{}", registry, repository, tag)
}

pub fn destination_address(registry: &str, repository: &str, tag: &str) -> String {
    format!("us-docker.pkg.dev/{}/{}/{}:{}", PROJECT, registry, repository, tag)
}

/// A registry listing held in memory. An image with an empty digest is a tag
/// that does not resolve.
#[derive(Default)]
pub struct FakeInventory {
    images: Vec<ImageIdentity>,
    unlocated: HashSet<String>,
    broken_repositories: HashSet<(String, String)>,
    listing_denied: bool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeInventory {
    pub fn new<I: IntoIterator<Item = ImageIdentity>>(images: I) -> Self {
        Self {
            images: images.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn without_location(mut self, registry: &str) -> Self {
        self.unlocated.insert(registry.to_string());
        self
    }

    pub fn with_broken_repository(mut self, registry: &str, repository: &str) -> Self {
        self.broken_repositories.insert((registry.to_string(), repository.to_string()));
        self
    }

    /// Refuse to list registries at all.
    pub fn deny_listing(mut self) -> Self {
        self.listing_denied = true;
        self
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl InventoryProvider for FakeInventory {
    async fn list_registries(&self) -> Result<Vec<String>, ProviderError> {
        self.record("list_registries".to_string());
        if self.listing_denied {
            return Err(ProviderError::Denied("list_registries".to_string()));
        }

        let registries: BTreeSet<String> = self.images.iter().map(|i| i.registry.clone()).collect();
        Ok(registries.into_iter().collect())
    }

    async fn list_repositories(&self, registry: &str) -> Result<Vec<String>, ProviderError> {
        self.record(format!("list_repositories {}", registry));
        let repositories: BTreeSet<String> = self.images.iter()
            .filter(|i| i.registry == registry)
            .map(|i| i.repository.clone())
            .collect();
        Ok(repositories.into_iter().collect())
    }

    async fn list_tags(&self, registry: &str, repository: &str) -> Result<Vec<String>, ProviderError> {
        self.record(format!("list_tags {}/{}", registry, repository));
        if self.broken_repositories.contains(&(registry.to_string(), repository.to_string())) {
            return Err(ProviderError::Denied(format!("{}/{}", registry, repository)));
        }

        Ok(self.images.iter()
            .filter(|i| i.registry == registry && i.repository == repository)
            .map(|i| i.tag.clone())
            .collect())
    }

    async fn get_digest(&self, registry: &str, repository: &str, tag: &str) -> Result<Option<String>, ProviderError> {
        self.record(format!("get_digest {}/{}:{}", registry, repository, tag));
        Ok(self.images.iter()
            .find(|i| i.registry == registry && i.repository == repository && i.tag == tag)
            .filter(|i| !i.digest.is_empty())
            .map(|i| i.digest.clone()))
    }

    async fn locate(&self, registry: &str) -> Result<Option<String>, ProviderError> {
        if self.unlocated.contains(registry) {
            return Ok(None);
        }

        Ok(Some(format!("rg-{}", registry)))
    }
}

/// Records every copy. Failures are configured per source address.
#[derive(Default)]
pub struct FakeTransfer {
    pub copies: Mutex<Vec<(String, String)>>,
    pub attempts: Mutex<HashMap<String, u32>>,
    pub logins: Mutex<Vec<(String, String)>>,
    transient_failures: Mutex<HashMap<String, u32>>,
    permanent_failures: Mutex<HashSet<String>>,
    delay: Mutex<Duration>,
}

impl FakeTransfer {
    /// Fail the next `times` copies of `source` with a transient error.
    pub fn fail_transiently(&self, source: &str, times: u32) {
        self.transient_failures.lock().unwrap().insert(source.to_string(), times);
    }

    pub fn fail_permanently(&self, source: &str) {
        self.permanent_failures.lock().unwrap().insert(source.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn copied_sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.copies.lock().unwrap().iter().map(|(s, _)| s.clone()).collect();
        sources.sort();
        sources
    }

    pub fn attempts_of(&self, source: &str) -> u32 {
        self.attempts.lock().unwrap().get(source).copied().unwrap_or(0)
    }
}

#[async_trait]
impl TransferProvider for FakeTransfer {
    async fn copy_image(&self, source: &str, destination: &str) -> Result<(), ProviderError> {
        *self.attempts.lock().unwrap().entry(source.to_string()).or_insert(0) += 1;

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.permanent_failures.lock().unwrap().contains(source) {
            return Err(ProviderError::Denied(source.to_string()));
        }

        {
            let mut transient = self.transient_failures.lock().unwrap();
            if let Some(left) = transient.get_mut(source) {
                if *left > 0 {
                    *left -= 1;
                    return Err(ProviderError::Transient(format!("connection reset copying {}", source)));
                }
            }
        }

        self.copies.lock().unwrap().push((source.to_string(), destination.to_string()));
        Ok(())
    }

    async fn authenticate(&self, host: &str, credentials: &Credentials) -> Result<(), ProviderError> {
        self.logins.lock().unwrap().push((host.to_string(), credentials.username.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeProvisioner {
    pub calls: Mutex<Vec<(String, String)>>,
    existing: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeProvisioner {
    pub fn mark_existing(&self, name: &str) {
        self.existing.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_for(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn names(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(_, n)| n.clone()).collect()
    }
}

#[async_trait]
impl RepositoryProvisioner for FakeProvisioner {
    async fn ensure_repository(&self, project: &str, name: &str) -> Result<ProvisionOutcome, ProviderError> {
        self.calls.lock().unwrap().push((project.to_string(), name.to_string()));

        if self.failing.lock().unwrap().contains(name) {
            return Err(ProviderError::Denied(format!("cannot create {}", name)));
        }

        let mut existing = self.existing.lock().unwrap();
        if existing.insert(name.to_string()) {
            Ok(ProvisionOutcome::Created)
        } else {
            Ok(ProvisionOutcome::AlreadyExists)
        }
    }
}

#[derive(Default)]
pub struct FakeCredentials {
    pub calls: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn get_credentials(&self, registry: &str, resource_group: &str) -> Result<Credentials, ProviderError> {
        self.calls.lock().unwrap().push((registry.to_string(), resource_group.to_string()));
        Ok(Credentials {
            username: registry.to_string(),
            secret: "secret".to_string(),
        })
    }
}

/// Fakes wired into a real SQLite ledger inside a temporary directory.
pub struct Harness {
    pub dir: TempDir,
    pub ledger: Pool<Sqlite>,
    pub source: Arc<FakeInventory>,
    pub destination: Arc<FakeInventory>,
    pub transfer: Arc<FakeTransfer>,
    pub provisioner: Arc<FakeProvisioner>,
    pub credentials: Arc<FakeCredentials>,
}

impl Harness {
    pub async fn new(source: FakeInventory, destination: FakeInventory) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = SqliteDbConfig {
            path: dir.path().join("processed.db").to_string_lossy().to_string(),
        };
        let ledger = database::open(&config, 16).await.unwrap();

        Self {
            dir,
            ledger,
            source: Arc::new(source),
            destination: Arc::new(destination),
            transfer: Arc::new(FakeTransfer::default()),
            provisioner: Arc::new(FakeProvisioner::default()),
            credentials: Arc::new(FakeCredentials::default()),
        }
    }

    pub fn settings(concurrency: usize) -> MigrationSettings {
        MigrationSettings {
            concurrency,
            retry: RetryPolicy::new(3, Duration::ZERO),
            login_with_registry_credentials: false,
        }
    }

    pub fn driver(&self, concurrency: usize) -> MigrationDriver {
        self.driver_with(Self::settings(concurrency))
    }

    pub fn driver_with(&self, settings: MigrationSettings) -> MigrationDriver {
        let providers = Providers {
            source: self.source.clone(),
            destination: self.destination.clone(),
            credentials: self.credentials.clone(),
            provisioner: self.provisioner.clone(),
            transfer: self.transfer.clone(),
        };
        let state = AppState::new(
            Arc::new(self.ledger.clone()),
            providers,
            AddressScheme::new("azurecr.io", "us", PROJECT),
            settings,
        );

        MigrationDriver::new(Arc::new(state))
    }
}
