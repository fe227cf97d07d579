use std::fmt;

pub mod address;
pub mod difference;
pub mod digest;

/// The canonical identity of an image inside a registry.
///
/// Two identities are only equal when all four fields match. A tag that has been
/// moved to another digest is a different identity, not an update of the old one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageIdentity {
    pub registry: String,
    pub repository: String,
    pub tag: String,
    pub digest: String,
}

impl ImageIdentity {
    pub fn new<R, P, T, D>(registry: R, repository: P, tag: T, digest: D) -> Self
    where
        R: Into<String>,
        P: Into<String>,
        T: Into<String>,
        D: Into<String>,
    {
        Self {
            registry: registry.into(),
            repository: repository.into(),
            tag: tag.into(),
            digest: digest.into(),
        }
    }
}

impl fmt::Display for ImageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}@{}", self.registry, self.repository, self.tag, self.digest)
    }
}

/// A copy that has been confirmed successful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
    pub identity: ImageIdentity,
    /// Unix timestamp of the first successful copy.
    pub recorded_at: i64,
}

impl LedgerRecord {
    pub fn new(identity: ImageIdentity, recorded_at: i64) -> Self {
        Self {
            identity,
            recorded_at,
        }
    }
}

impl fmt::Display for LedgerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = &self.identity;
        write!(f, "('{}', '{}', '{}', '{}')", id.registry, id.repository, id.tag, id.digest)
    }
}
