use std::sync::Arc;

use crate::config::Config;
use crate::database::Ledger;
use crate::dto::address::AddressScheme;
use crate::provider::{CredentialProvider, InventoryProvider, RepositoryProvisioner, TransferProvider};
use crate::retry::RetryPolicy;

/// The external collaborators a migration talks to.
#[derive(Clone)]
pub struct Providers {
    pub source: Arc<dyn InventoryProvider>,
    pub destination: Arc<dyn InventoryProvider>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub provisioner: Arc<dyn RepositoryProvisioner>,
    pub transfer: Arc<dyn TransferProvider>,
}

#[derive(Debug, Clone, Copy)]
pub struct MigrationSettings {
    /// Max number of registries, and of copies per repository, in flight at once.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub login_with_registry_credentials: bool,
}

impl MigrationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.migration.max_concurrent_jobs,
            retry: config.retry_policy(),
            login_with_registry_credentials: config.migration.login_with_registry_credentials,
        }
    }
}

/// Everything a run needs, created once at startup and shared by every worker.
pub struct AppState {
    pub ledger: Arc<dyn Ledger>,
    pub providers: Providers,
    pub addresses: AddressScheme,
    pub settings: MigrationSettings,
}

impl AppState {
    pub fn new(ledger: Arc<dyn Ledger>, providers: Providers, addresses: AddressScheme, settings: MigrationSettings) -> Self
    {
        Self {
            ledger,
            providers,
            addresses,
            settings,
        }
    }
}
