//! Shared testing infrastructure for the high-contrast imaging workspace.
//!
//! Two concerns live here:
//!
//! - locating the workspace root and the `test_output/` directory where tests
//!   drop figures, FITS files and reports for manual inspection;
//! - [`synthetic`]: deterministic ADI datasets (static speckles, seeded noise,
//!   rotating companions) with analytically known companion positions.
//!
//! This crate deliberately uses plain `ndarray` types so every workspace
//! member can take it as a dev-dependency.
//!
//! # Usage
//! ```no_run
//! use test_helpers::{output_path, synthetic::SyntheticAdi};
//!
//! let data = SyntheticAdi::default().build();
//! assert_eq!(data.angles.len(), data.cube.dim().0);
//!
//! let figure = output_path("pca/snrs.png");
//! println!("writing to {}", figure.display());
//! ```

pub mod synthetic;

use once_cell::sync::Lazy;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory under the workspace root that collects test artifacts.
pub const TEST_OUTPUT_DIR: &str = "test_output";

#[derive(thiserror::Error, Debug)]
pub enum TestHelperError {
    #[error("cannot read the working directory: {0}")]
    WorkingDirectory(#[source] std::io::Error),
    #[error("no workspace manifest above {}", .0.display())]
    NoWorkspace(PathBuf),
}

fn is_workspace_manifest(dir: &Path) -> bool {
    fs::read_to_string(dir.join("Cargo.toml"))
        .map(|manifest| manifest.contains("[workspace]"))
        .unwrap_or(false)
}

/// Nearest ancestor of the working directory whose `Cargo.toml` declares a
/// `[workspace]`. Member crates resolve to the same root.
pub fn workspace_root() -> Result<PathBuf, TestHelperError> {
    let start = env::current_dir().map_err(TestHelperError::WorkingDirectory)?;
    start
        .ancestors()
        .find(|dir| is_workspace_manifest(dir))
        .map(Path::to_path_buf)
        .ok_or(TestHelperError::NoWorkspace(start))
}

static WORKSPACE_ROOT: Lazy<PathBuf> =
    Lazy::new(|| workspace_root().expect("tests must run inside the workspace"));

/// `<workspace>/test_output/`, created on first use.
pub fn test_output_dir() -> PathBuf {
    let dir = WORKSPACE_ROOT.join(TEST_OUTPUT_DIR);
    fs::create_dir_all(&dir).expect("test output directory is writable");
    dir
}

/// Path of a test artifact such as `pca/snrs.png`, with its parent
/// directories created.
pub fn output_path<P: AsRef<Path>>(relative: P) -> PathBuf {
    let path = test_output_dir().join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("test output subdirectory is writable");
    }
    path
}
