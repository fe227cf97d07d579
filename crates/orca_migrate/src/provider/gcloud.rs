//! Destination side provider backed by the `gcloud` CLI and Google Artifact Registry.

use std::collections::BTreeSet;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::dto::ImageIdentity;
use crate::error::ProviderError;

use super::command::CommandRunner;
use super::{InventoryProvider, ProvisionOutcome, RepositoryProvisioner};

lazy_static! {
    static ref REPOSITORY_NAME_REGEX: Regex = Regex::new(r"^projects/([^/]+)/locations/([^/]+)/repositories/([^/]+)$").unwrap();
}

#[derive(Deserialize)]
struct RepositoryListing {
    name: String,
    format: Option<String>,
}

#[derive(Deserialize)]
struct ImageListing {
    package: String,
    version: String,
    #[serde(default)]
    tags: Value,
}

/// One row of a docker image listing, with the package path made relative to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ImageRow {
    repository: String,
    digest: String,
    tags: Vec<String>,
}

/// Depending on the gcloud version tags are either a list or a comma joined string.
fn parse_tags(tags: &Value) -> Vec<String> {
    match tags {
        Value::String(s) => s.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect(),
        Value::Array(values) => values.iter()
            .filter_map(|v| v.as_str())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

/// Extract the repository id from `projects/<p>/locations/<l>/repositories/<id>`.
fn repository_id(name: &str) -> Option<&str> {
    REPOSITORY_NAME_REGEX.captures(name)
        .and_then(|c| c.get(3))
        .map(|m| m.as_str())
}

pub struct GcloudArtifactRegistry {
    gcloud: CommandRunner,
    project_id: String,
    location: String,
    host: String,
}

impl GcloudArtifactRegistry {
    /// * `host`: The registry host images are listed from, e.g. `us-docker.pkg.dev`.
    pub fn new(gcloud: &str, project_id: &str, location: &str, host: &str) -> Self {
        Self {
            gcloud: CommandRunner::new(gcloud),
            project_id: project_id.to_string(),
            location: location.to_string(),
            host: host.to_string(),
        }
    }

    fn registry_path(&self, registry: &str) -> String {
        format!("{}/{}/{}", self.host, self.project_id, registry)
    }

    async fn image_rows(&self, registry: &str) -> Result<Vec<ImageRow>, ProviderError> {
        let path = self.registry_path(registry);
        let out = self.gcloud.run(["artifacts", "docker", "images", "list", path.as_str(), "--include-tags", "--format=json"]).await?;
        let listings: Vec<ImageListing> = serde_json::from_str(&out)?;

        let prefix = format!("{}/", path);
        let rows = listings.into_iter()
            .filter_map(|l| {
                let repository = match l.package.strip_prefix(&prefix) {
                    Some(repo) => repo.replace("%2F", "/"),
                    None => {
                        debug!("Ignoring package outside of {}: {}", path, l.package);
                        return None;
                    }
                };

                Some(ImageRow {
                    repository,
                    digest: l.version,
                    tags: parse_tags(&l.tags),
                })
            })
            .collect();

        Ok(rows)
    }
}

#[async_trait]
impl InventoryProvider for GcloudArtifactRegistry {
    async fn list_registries(&self) -> Result<Vec<String>, ProviderError> {
        let location = format!("--location={}", self.location);
        let project = format!("--project={}", self.project_id);
        let out = self.gcloud.run(["artifacts", "repositories", "list", location.as_str(), project.as_str(), "--format=json"]).await?;
        let listings: Vec<RepositoryListing> = serde_json::from_str(&out)?;

        let registries = listings.iter()
            .filter(|r| r.format.as_deref().map(|f| f.eq_ignore_ascii_case("docker")).unwrap_or(true))
            .filter_map(|r| repository_id(&r.name))
            .map(String::from)
            .collect();

        Ok(registries)
    }

    async fn list_repositories(&self, registry: &str) -> Result<Vec<String>, ProviderError> {
        let repos: BTreeSet<String> = self.image_rows(registry).await?
            .into_iter()
            .map(|r| r.repository)
            .collect();

        Ok(repos.into_iter().collect())
    }

    async fn list_tags(&self, registry: &str, repository: &str) -> Result<Vec<String>, ProviderError> {
        let tags = self.image_rows(registry).await?
            .into_iter()
            .filter(|r| r.repository == repository)
            .flat_map(|r| r.tags)
            .collect();

        Ok(tags)
    }

    async fn get_digest(&self, registry: &str, repository: &str, tag: &str) -> Result<Option<String>, ProviderError> {
        let digest = self.image_rows(registry).await?
            .into_iter()
            .find(|r| r.repository == repository && r.tags.iter().any(|t| t == tag))
            .map(|r| r.digest);

        Ok(digest)
    }

    async fn locate(&self, _registry: &str) -> Result<Option<String>, ProviderError> {
        Ok(Some(format!("projects/{}/locations/{}", self.project_id, self.location)))
    }

    /// One listing call per registry instead of one per tag.
    async fn list_images(&self, registry: &str) -> Result<Vec<ImageIdentity>, ProviderError> {
        let mut images = Vec::new();

        for row in self.image_rows(registry).await? {
            if row.tags.is_empty() {
                debug!("Leaving out untagged image {}/{}@{}", registry, row.repository, row.digest);
                continue;
            }

            for tag in &row.tags {
                images.push(ImageIdentity::new(registry, row.repository.as_str(), tag.as_str(), row.digest.as_str()));
            }
        }

        Ok(images)
    }
}

#[async_trait]
impl RepositoryProvisioner for GcloudArtifactRegistry {
    async fn ensure_repository(&self, project: &str, name: &str) -> Result<ProvisionOutcome, ProviderError> {
        let location = format!("--location={}", self.location);
        let project = format!("--project={}", project);
        let description = format!("--description=Repository for {}", name);

        match self.gcloud.run(["artifacts", "repositories", "create", name, "--repository-format=docker", location.as_str(), project.as_str(), description.as_str()]).await {
            Ok(_) => {
                info!("Successfully created repository {}", name);
                Ok(ProvisionOutcome::Created)
            },
            Err(ProviderError::AlreadyExists(_)) => {
                info!("Repository {} already exists. Skipping creation.", name);
                Ok(ProvisionOutcome::AlreadyExists)
            },
            Err(e) => Err(e),
        }
    }
}
