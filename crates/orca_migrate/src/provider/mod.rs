pub mod azure;
pub mod command;
pub mod gcloud;
pub mod gcrane;

use std::fmt;

use async_trait::async_trait;
use tracing::debug;

use crate::dto::ImageIdentity;
use crate::error::ProviderError;

/// Enumerates the images of one side of a migration.
#[async_trait]
pub trait InventoryProvider: Send + Sync {
    async fn list_registries(&self) -> Result<Vec<String>, ProviderError>;
    async fn list_repositories(&self, registry: &str) -> Result<Vec<String>, ProviderError>;
    async fn list_tags(&self, registry: &str, repository: &str) -> Result<Vec<String>, ProviderError>;
    /// Get the digest a tag currently points to.
    ///
    /// Returns `None` if the tag does not resolve to anything.
    async fn get_digest(&self, registry: &str, repository: &str, tag: &str) -> Result<Option<String>, ProviderError>;

    /// Where the registry lives, e.g. its resource group or project.
    async fn locate(&self, _registry: &str) -> Result<Option<String>, ProviderError> {
        Ok(None)
    }

    /// Every tagged image in a registry.
    ///
    /// The default walks repositories, tags and digests one call at a time. Providers
    /// that can list a registry in one go should override it.
    async fn list_images(&self, registry: &str) -> Result<Vec<ImageIdentity>, ProviderError> {
        let mut images = Vec::new();

        for repository in self.list_repositories(registry).await? {
            for tag in self.list_tags(registry, &repository).await? {
                match self.get_digest(registry, &repository, &tag).await? {
                    Some(digest) => images.push(ImageIdentity::new(registry, repository.as_str(), tag, digest)),
                    None => debug!("No digest for {}/{}:{}, leaving it out", registry, repository, tag),
                }
            }
        }

        Ok(images)
    }
}

/// Registry login used to authenticate the transfer tool. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_credentials(&self, registry: &str, resource_group: &str) -> Result<Credentials, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    AlreadyExists,
}

#[async_trait]
pub trait RepositoryProvisioner: Send + Sync {
    /// Make sure a destination repository exists. An existing repository is a success.
    async fn ensure_repository(&self, project: &str, name: &str) -> Result<ProvisionOutcome, ProviderError>;
}

#[async_trait]
pub trait TransferProvider: Send + Sync {
    /// Copy an image between two fully qualified references.
    ///
    /// Copying an image that is already present at the destination must succeed.
    async fn copy_image(&self, source: &str, destination: &str) -> Result<(), ProviderError>;

    /// Log in to a registry host before copying from it.
    async fn authenticate(&self, _host: &str, _credentials: &Credentials) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_hides_secret() {
        let creds = Credentials {
            username: "prodacr".to_string(),
            secret: "hunter2".to_string(),
        };

        let out = format!("{:?}", creds);
        assert!(out.contains("prodacr"));
        assert!(!out.contains("hunter2"));
    }
}
