pub mod app_state;
pub mod config;
pub mod database;
pub mod diff;
pub mod driver;
pub mod dto;
pub mod error;
pub mod orchestrator;
pub mod provider;
pub mod retry;

use std::path::Path;
use std::{fs, io};

/// Create directory tree up to the file in `path`.
pub fn create_path_to<P: AsRef<Path>>(path: P) -> io::Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_missing_parents() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a").join("b").join("processed.db");

        create_path_to(&file).unwrap();
        assert!(dir.path().join("a").join("b").is_dir());

        // bare file names have no parent to create
        create_path_to("processed.db").unwrap();
    }
}
