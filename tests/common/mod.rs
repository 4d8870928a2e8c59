//! Common test utilities shared across integration tests.
#![allow(dead_code)]

use pt::config::{load_config_file, resolve, ConfigResult, ResolvedConfig};
use pt::execution::Runner;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::watch;

/// Create a project directory with a `pt.toml` and auxiliary files.
pub fn project(config: &str, files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("pt.toml"), config).unwrap();
    for (name, content) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
    }
    dir
}

/// Load and resolve the project's configuration.
pub fn resolve_project(dir: &TempDir, profile: Option<&str>) -> ConfigResult<ResolvedConfig> {
    let loaded = load_config_file(&dir.path().join("pt.toml"))?;
    resolve(&loaded, profile)
}

/// Build a runner over the project with a never-fired cancel signal.
pub fn runner(dir: &TempDir) -> Arc<Runner> {
    runner_with_profile(dir, None)
}

/// Build a runner under a specific profile.
pub fn runner_with_profile(dir: &TempDir, profile: Option<&str>) -> Arc<Runner> {
    let resolved = resolve_project(dir, profile).unwrap();
    let (tx, rx) = watch::channel(false);
    // The cancel signal stays quiet for the lifetime of the test.
    std::mem::forget(tx);
    Arc::new(Runner::new(Arc::new(resolved), rx))
}

/// Build a runner together with its cancel sender.
pub fn runner_with_cancel(dir: &TempDir) -> (Arc<Runner>, watch::Sender<bool>) {
    let resolved = resolve_project(dir, None).unwrap();
    let (tx, rx) = watch::channel(false);
    (Arc::new(Runner::new(Arc::new(resolved), rx)), tx)
}

/// Read a file the tasks under test wrote into the project directory.
pub fn read_marker(dir: &TempDir, name: &str) -> String {
    fs::read_to_string(dir.path().join(name)).unwrap_or_default()
}

/// Whether a marker file exists.
pub fn marker_exists(dir: &TempDir, name: &str) -> bool {
    dir.path().join(name).exists()
}
