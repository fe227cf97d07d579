use async_trait::async_trait;
use tracing::info;

use crate::error::ProviderError;

use super::command::CommandRunner;
use super::{Credentials, TransferProvider};

/// Copies images with `gcrane cp`, which is a no-op when the destination already
/// holds the same manifest.
pub struct Gcrane {
    gcrane: CommandRunner,
}

impl Gcrane {
    pub fn new(gcrane: &str) -> Self {
        Self {
            gcrane: CommandRunner::new(gcrane),
        }
    }
}

#[async_trait]
impl TransferProvider for Gcrane {
    async fn copy_image(&self, source: &str, destination: &str) -> Result<(), ProviderError> {
        self.gcrane.run(["cp", source, destination]).await?;
        info!("Successfully copied {} to {}", source, destination);

        Ok(())
    }

    async fn authenticate(&self, host: &str, credentials: &Credentials) -> Result<(), ProviderError> {
        self.gcrane.run_with_stdin(
            ["auth", "login", host, "--username", credentials.username.as_str(), "--password-stdin"],
            &credentials.secret,
        ).await?;
        info!("Logged in to {} as {}", host, credentials.username);

        Ok(())
    }
}
