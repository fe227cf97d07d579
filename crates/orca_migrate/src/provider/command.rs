use std::ffi::OsStr;
use std::process::{Output, Stdio};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::error::ProviderError;

/// Runs a cloud command line tool and classifies its failures.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: String,
}

impl CommandRunner {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    /// Run the tool and return its stdout.
    pub async fn run<I, S>(&self, args: I) -> Result<String, ProviderError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = self.command(args);
        let output = command.output().await
            .map_err(|e| self.unavailable(e))?;

        self.finish(output)
    }

    /// Run the tool with `input` written to its stdin.
    pub async fn run_with_stdin<I, S>(&self, args: I, input: &str) -> Result<String, ProviderError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = self.command(args);
        command.stdin(Stdio::piped());

        let mut child = command.spawn()
            .map_err(|e| self.unavailable(e))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await
                .map_err(|e| ProviderError::Transient(format!("writing to `{}` stdin: {}", self.program, e)))?;
        }

        let output = child.wait_with_output().await
            .map_err(|e| ProviderError::Transient(format!("waiting for `{}`: {}", self.program, e)))?;

        self.finish(output)
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        command.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(program = %self.program, "Running {:?}", command.as_std());
        command
    }

    fn unavailable(&self, source: std::io::Error) -> ProviderError {
        ProviderError::Unavailable {
            program: self.program.clone(),
            source,
        }
    }

    fn finish(&self, output: Output) -> Result<String, ProviderError> {
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        trace!(program = %self.program, "stdout: {}", stdout);

        if output.status.success() {
            Ok(stdout)
        } else {
            Err(classify_failure(&self.program, output.status.code(), &stderr))
        }
    }
}

/// Map a failed invocation to an error kind from what the tool printed.
///
/// Anything that is not recognised as a permanent condition is assumed to be a
/// transient hiccup and will be retried.
pub fn classify_failure(program: &str, code: Option<i32>, stderr: &str) -> ProviderError {
    let message = match code {
        Some(code) => format!("`{}` exited with {}: {}", program, code, stderr.trim()),
        None => format!("`{}` was terminated: {}", program, stderr.trim()),
    };
    let lower = stderr.to_lowercase();

    if contains_any(&lower, &["already_exists", "already exists"]) {
        ProviderError::AlreadyExists(message)
    } else if contains_any(&lower, &["not_found", "not found", "notfound", "does not exist", "manifest_unknown", "name_unknown"]) {
        ProviderError::NotFound(message)
    } else if contains_any(&lower, &["permission_denied", "permission denied", "unauthorized", "authorizationfailed", "forbidden", "admin user is disabled", "az login"]) {
        ProviderError::Denied(message)
    } else {
        ProviderError::Transient(message)
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}
