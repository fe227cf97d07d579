//! The flat difference file format.
//!
//! Every line holds one image as `registry:repository:tag:-digest`. The hyphen in
//! front of the digest is part of the format that older tooling produced, so it is
//! written out and accepted (or tolerated when missing) on the way back in.
//!
//! The digest shape is part of the format too: the last field must read
//! `algorithm:hex`, so `myacr:api:v2:-d2` is as malformed as a line with three fields.

use std::collections::HashSet;
use std::io;
use std::path::Path;

use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

use super::{digest, ImageIdentity};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DifferenceLineError {
    #[error("expected 4 colon delimited fields, found {0}")]
    MissingFields(usize),
    #[error("empty `{0}` field")]
    EmptyField(&'static str),
    #[error("invalid digest: '{0}'")]
    InvalidDigest(String),
}

impl ImageIdentity {
    /// Render the identity as a line of a difference file.
    pub fn to_difference_line(&self) -> String {
        format!("{}:{}:{}:-{}", self.registry, self.repository, self.tag, self.digest)
    }
}

impl TryFrom<&str> for ImageIdentity {
    type Error = DifferenceLineError;

    fn try_from(val: &str) -> Result<Self, Self::Error> {
        // the digest itself contains a colon, so only split off the first three fields
        let splits: Vec<&str> = val.trim().splitn(4, ':').collect();
        if splits.len() != 4 {
            return Err(DifferenceLineError::MissingFields(splits.len()));
        }

        let names = ["registry", "repository", "tag", "digest"];
        for (name, field) in names.into_iter().zip(&splits) {
            if field.is_empty() {
                return Err(DifferenceLineError::EmptyField(name));
            }
        }

        let digest = splits[3].strip_prefix('-').unwrap_or(splits[3]);
        if !digest::is_digest(digest) {
            return Err(DifferenceLineError::InvalidDigest(splits[3].to_string()));
        }

        Ok(ImageIdentity::new(splits[0], splits[1], splits[2], digest))
    }
}

/// The parsed contents of a difference file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DifferenceFile {
    /// Images in the order they first appear in the file.
    pub entries: Vec<ImageIdentity>,
    /// Count of lines that could not be parsed and were skipped.
    pub malformed: usize,
}

impl DifferenceFile {
    /// Parse every line independently. Blank lines are ignored, malformed ones are
    /// logged and skipped, repeated ones are kept once.
    ///
    /// A line is malformed when a field is missing or empty, or when its digest is
    /// not of the form `algorithm:hex`.
    pub fn parse(contents: &str) -> Self {
        let mut seen = HashSet::new();
        let mut file = DifferenceFile::default();

        for (number, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match ImageIdentity::try_from(line) {
                Ok(identity) => {
                    if seen.insert(identity.clone()) {
                        file.entries.push(identity);
                    } else {
                        debug!("Ignoring repeated line {}: '{}'", number + 1, line);
                    }
                },
                Err(e) => {
                    warn!(line = number + 1, "Skipping malformed difference line '{}': {}", line, e);
                    file.malformed += 1;
                }
            }
        }

        file
    }

    pub async fn read<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let contents = fs::read_to_string(path).await?;
        Ok(Self::parse(&contents))
    }

    /// Render identities as difference file contents, one per line.
    pub fn render<'a, I>(identities: I) -> String
    where
        I: IntoIterator<Item = &'a ImageIdentity>,
    {
        let mut out = String::new();
        for identity in identities {
            out.push_str(&identity.to_difference_line());
            out.push('\n');
        }

        out
    }

    pub async fn write<'a, P, I>(path: P, identities: I) -> io::Result<()>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = &'a ImageIdentity>,
    {
        fs::write(path, Self::render(identities)).await
    }
}
