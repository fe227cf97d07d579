//! Source side provider backed by the Azure CLI.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::ProviderError;

use super::command::CommandRunner;
use super::{CredentialProvider, Credentials, InventoryProvider};

#[derive(Deserialize)]
struct AcrPassword {
    value: String,
}

#[derive(Deserialize)]
struct AcrCredentials {
    username: String,
    passwords: Vec<AcrPassword>,
}

/// Lists Azure Container Registries of one subscription.
pub struct AzureCli {
    az: CommandRunner,
    subscription_id: String,
}

impl AzureCli {
    pub fn new(az: &str, subscription_id: String) -> Self {
        Self {
            az: CommandRunner::new(az),
            subscription_id,
        }
    }

    /// Find the default subscription of the logged in account.
    pub async fn resolve_subscription(az: &str) -> Result<String, ProviderError> {
        let out = CommandRunner::new(az)
            .run(["account", "list", "--query", "[?isDefault].id", "--output", "tsv"]).await?;

        match out.lines().map(str::trim).find(|l| !l.is_empty()) {
            Some(id) => Ok(id.to_string()),
            None => Err(ProviderError::NotFound("no default Azure subscription for the logged in account".to_string())),
        }
    }

    async fn az_json<T>(&self, args: &[&str]) -> Result<T, ProviderError>
    where
        T: serde::de::DeserializeOwned,
    {
        let out = self.az.run(args.iter().copied().chain(["--subscription", self.subscription_id.as_str(), "--output", "json"])).await?;
        Ok(serde_json::from_str(&out)?)
    }

    async fn az_tsv(&self, args: &[&str]) -> Result<Option<String>, ProviderError> {
        let out = self.az.run(args.iter().copied().chain(["--subscription", self.subscription_id.as_str(), "--output", "tsv"])).await?;
        let out = out.trim();

        if out.is_empty() {
            Ok(None)
        } else {
            Ok(Some(out.to_string()))
        }
    }
}

#[async_trait]
impl InventoryProvider for AzureCli {
    async fn list_registries(&self) -> Result<Vec<String>, ProviderError> {
        self.az_json(&["acr", "list", "--query", "[].name"]).await
    }

    async fn list_repositories(&self, registry: &str) -> Result<Vec<String>, ProviderError> {
        self.az_json(&["acr", "repository", "list", "--name", registry]).await
    }

    async fn list_tags(&self, registry: &str, repository: &str) -> Result<Vec<String>, ProviderError> {
        self.az_json(&["acr", "repository", "show-tags", "--name", registry, "--repository", repository]).await
    }

    async fn get_digest(&self, registry: &str, repository: &str, tag: &str) -> Result<Option<String>, ProviderError> {
        let image = format!("{}:{}", repository, tag);

        match self.az_tsv(&["acr", "repository", "show", "--name", registry, "--image", &image, "--query", "digest", "--only-show-errors"]).await {
            Ok(digest) => Ok(digest),
            Err(ProviderError::NotFound(msg)) => {
                debug!("Tag {}/{} has no manifest: {}", registry, image, msg);
                Ok(None)
            },
            Err(e) => Err(e),
        }
    }

    /// The resource group of the registry.
    async fn locate(&self, registry: &str) -> Result<Option<String>, ProviderError> {
        self.az_tsv(&["acr", "show", "--name", registry, "--query", "resourceGroup"]).await
    }
}

#[async_trait]
impl CredentialProvider for AzureCli {
    async fn get_credentials(&self, registry: &str, resource_group: &str) -> Result<Credentials, ProviderError> {
        let creds: AcrCredentials = self.az_json(&["acr", "credential", "show", "--name", registry, "--resource-group", resource_group]).await?;

        let secret = creds.passwords.into_iter()
            .next()
            .map(|p| p.value)
            .ok_or_else(|| ProviderError::Malformed(format!("no admin password returned for registry `{}`", registry)))?;

        Ok(Credentials {
            username: creds.username,
            secret,
        })
    }
}
