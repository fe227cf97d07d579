use super::ImageIdentity;

/// Builds fully qualified image references for both sides of a migration.
///
/// Source images live at `<registry>.<suffix>/<repository>:<tag>`, destination images
/// at `<region>-docker.pkg.dev/<project>/<registry>/<repository>:<tag>`. Each source
/// registry gets its own destination repository named after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressScheme {
    source_suffix: String,
    destination_host: String,
    project_id: String,
}

impl AddressScheme {
    pub fn new(source_suffix: &str, region: &str, project_id: &str) -> Self {
        Self {
            source_suffix: source_suffix.trim_matches('.').to_string(),
            destination_host: format!("{}-docker.pkg.dev", region),
            project_id: project_id.to_string(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn source_host(&self, registry: &str) -> String {
        format!("{}.{}", registry, self.source_suffix)
    }

    pub fn destination_host(&self) -> &str {
        &self.destination_host
    }

    /// Name of the destination repository that receives images from `registry`.
    pub fn destination_repository<'a>(&self, registry: &'a str) -> &'a str {
        registry
    }

    pub fn source_address(&self, identity: &ImageIdentity) -> String {
        format!("{}/{}:{}", self.source_host(&identity.registry), identity.repository, identity.tag)
    }

    pub fn destination_address(&self, identity: &ImageIdentity) -> String {
        format!(
            "{}/{}/{}/{}:{}",
            self.destination_host,
            self.project_id,
            self.destination_repository(&identity.registry),
            identity.repository,
            identity.tag
        )
    }
}
