use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

/// Write a config that keeps the ledger and logs inside `dir` and points the
/// destination tooling at a program that does not exist.
fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("config.toml");
    let config = format!(r#"
[source]
subscription_id = "sub"

[destination]
project_id = "proj"

[migration]
retry_limit = 1
retry_delay_secs = 0

[database]
type = "sqlite"
path = '{ledger}'

[tools]
az = '{missing}'
gcloud = '{missing}'
gcrane = '{missing}'

[log]
path = '{logs}'
"#,
        ledger = dir.join("processed.db").display(),
        missing = dir.join("no-such-tool").display(),
        logs = dir.join("logs").display(),
    );
    std::fs::write(&path, config).unwrap();

    path
}

fn orca_migrate(dir: &TempDir, args: &[&str]) -> Output {
    let config = write_config(dir.path());

    Command::new(env!("CARGO_BIN_EXE_orca-migrate"))
        .current_dir(dir.path())
        .arg("--config-path")
        .arg(&config)
        .args(args)
        .output()
        .unwrap()
}

#[test]
fn missing_difference_file_exits_with_one() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("difference_images.txt");

    let output = orca_migrate(&dir, &["--diff-file", missing.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(1));
    assert!(dir.path().join("processed.db").exists());
}

#[test]
fn listing_an_empty_ledger_succeeds() {
    let dir = tempfile::tempdir().unwrap();

    let output = orca_migrate(&dir, &["ledger", "list"]);

    assert_eq!(output.status.code(), Some(0));
    assert!(!String::from_utf8_lossy(&output.stdout).contains("Processed:"));
}

#[test]
fn failed_items_only_change_the_exit_code_in_strict_mode() {
    let dir = tempfile::tempdir().unwrap();
    let difference = dir.path().join("difference_images.txt");
    std::fs::write(&difference, "prodacr:app:v1:-sha256:aaa\n").unwrap();
    let difference = difference.to_str().unwrap();

    // the destination repository can not be created, so the line fails
    let lenient = orca_migrate(&dir, &["--diff-file", difference]);
    assert_eq!(lenient.status.code(), Some(0));

    let strict = orca_migrate(&dir, &["--strict", "--diff-file", difference]);
    assert_eq!(strict.status.code(), Some(2));
}
