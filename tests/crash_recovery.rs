//! Startup reconciliation after crashes and outside changes

mod helper;

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use sdkvm::inventory::{InventoryStore, Origin, VersionStatus};
use sdkvm::version::resolver::VersionToken;

use helper::catalog::StaticCatalog;
use helper::engine::{candidates, open_engine};
use helper::installer::FakeInstaller;

/// Leave an install half-done the way a killed process would
fn crash_during_install(data_dir: &std::path::Path, candidate: &str, version: &str) {
    let store = InventoryStore::open(&data_dir.join("inventory.db"), &candidates(data_dir)).unwrap();
    store.record_install_start(candidate, version).unwrap();
    fs::create_dir_all(data_dir.join("candidates").join(candidate).join(version)).unwrap();
}

#[tokio::test]
async fn interrupted_install_is_broken_after_restart() {
    let temp_dir = TempDir::new().unwrap();
    crash_during_install(temp_dir.path(), "java", "21.0.1");

    let catalog = StaticCatalog::new().with_versions("java", &["21.0.1"]).shared();
    let engine = open_engine(temp_dir.path(), catalog, Arc::new(FakeInstaller::new()));

    let listed = engine.list_versions("java").unwrap();
    let entry = listed.iter().find(|l| l.version == "21.0.1").unwrap();
    assert_eq!(entry.status, VersionStatus::Broken);
    assert_eq!(
        engine.startup_report().interrupted,
        vec![("java".to_string(), "21.0.1".to_string())]
    );
}

#[tokio::test]
async fn broken_version_can_be_reinstalled_over_leftovers() {
    let temp_dir = TempDir::new().unwrap();
    crash_during_install(temp_dir.path(), "java", "21.0.1");
    fs::write(temp_dir.path().join("candidates/java/21.0.1/partial"), b"x").unwrap();

    let catalog = StaticCatalog::new().with_versions("java", &["21.0.1"]).shared();
    let engine = open_engine(temp_dir.path(), catalog, Arc::new(FakeInstaller::new()));

    let outcome = engine
        .install("java", &VersionToken::Exact("21.0.1".to_string()))
        .await
        .unwrap();

    assert_eq!(outcome.entry().status, VersionStatus::Installed);
    let dir = temp_dir.path().join("candidates/java/21.0.1");
    assert!(!dir.join("partial").exists());
    assert!(dir.join("bin/java").is_file());
}

#[tokio::test]
async fn manually_placed_versions_are_unmanaged_installs() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("candidates/java");
    fs::create_dir_all(root.join("11.0.21-local/bin")).unwrap();
    #[cfg(unix)]
    std::os::unix::fs::symlink("11.0.21-local", root.join("current")).unwrap();

    let catalog = StaticCatalog::new().with_versions("java", &["21.0.1"]).shared();
    let engine = open_engine(temp_dir.path(), catalog, Arc::new(FakeInstaller::new()));

    let listed = engine.list_versions("java").unwrap();
    let adopted = listed.iter().find(|l| l.version == "11.0.21-local").unwrap();
    assert_eq!(adopted.status, VersionStatus::Installed);
    assert_eq!(adopted.origin, Some(Origin::Unmanaged));
    assert_eq!(adopted.vendor.as_deref(), Some("local"));
    #[cfg(unix)]
    assert_eq!(engine.get_default("java").unwrap().version, "11.0.21-local");
}

#[tokio::test]
async fn deleted_version_directory_becomes_broken_and_loses_default() {
    let temp_dir = TempDir::new().unwrap();
    let catalog = StaticCatalog::new().with_versions("java", &["21.0.1"]).shared();
    let engine = open_engine(temp_dir.path(), catalog.clone(), Arc::new(FakeInstaller::new()));
    engine
        .install("java", &VersionToken::Exact("21.0.1".to_string()))
        .await
        .unwrap();
    engine.set_default("java", "21.0.1").await.unwrap();
    drop(engine);

    fs::remove_dir_all(temp_dir.path().join("candidates/java/21.0.1")).unwrap();
    let engine = open_engine(temp_dir.path(), catalog, Arc::new(FakeInstaller::new()));

    let listed = engine.list_versions("java").unwrap();
    assert_eq!(listed[0].status, VersionStatus::Broken);
    assert!(!listed[0].is_default);
    assert!(engine.get_default("java").is_err());
}
