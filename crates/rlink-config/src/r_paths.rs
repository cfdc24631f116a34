//! Utility functions for resolving paths inside an R installation
//!
//! This module provides platform-specific path resolution for:
//! - the R front-end executable below `R_HOME`
//! - the `R_HOME` directory an executable belongs to

use std::path::{Path, PathBuf};

/// The name of the binaries directory inside `R_HOME`
pub const R_BIN_DIR: &str = "bin";

/// The name of the package library directory inside `R_HOME`
pub const R_LIBRARY_DIR: &str = "library";

/// Candidate executable paths relative to the binaries directory
#[cfg(not(windows))]
const R_EXE_CANDIDATES: &[&str] = &["R"];
#[cfg(windows)]
const R_EXE_CANDIDATES: &[&str] = &["x64/R.exe", "R.exe"];

/// Error type for R installation path resolution
#[derive(Debug, Clone, thiserror::Error)]
pub enum RPathError {
    /// The R home path does not exist or is not a directory
    #[error("R installation not found: {}", .0.display())]
    RHomeNotFound(PathBuf),
    /// Failed to find a required directory or file
    #[error("{0}")]
    PathResolution(String),
}

/// Resolve the R executable for an installation root (`R_HOME`)
///
/// # Platform differences
///
/// - **Unix/macOS**: `R_HOME/bin/R`
/// - **Windows**: `R_HOME\bin\x64\R.exe`, falling back to `R_HOME\bin\R.exe`
pub fn resolve_r_executable(r_home: &Path) -> Result<PathBuf, RPathError> {
    if !r_home.is_dir() {
        return Err(RPathError::RHomeNotFound(r_home.to_path_buf()));
    }

    let bin_dir = r_home.join(R_BIN_DIR);
    if !bin_dir.is_dir() {
        return Err(RPathError::PathResolution(format!(
            "bin directory not found: {}",
            bin_dir.display()
        )));
    }

    R_EXE_CANDIDATES
        .iter()
        .map(|exe| bin_dir.join(exe))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            RPathError::PathResolution(format!("R executable not found in {}", bin_dir.display()))
        })
}

/// Resolve `R_HOME` from an executable living at `R_HOME/bin/R`
///
/// Distribution wrappers such as `/usr/bin/R` are shell scripts outside of
/// `R_HOME`; for those `None` is returned and the wrapper finds its own home.
pub fn resolve_r_home(executable: &Path) -> Option<PathBuf> {
    let mut bin_dir = executable.parent()?;
    // Windows layouts put the executable one level deeper (bin/x64)
    if bin_dir.file_name().is_some_and(|name| name == "x64") {
        bin_dir = bin_dir.parent()?;
    }
    if bin_dir.file_name().is_none_or(|name| name != R_BIN_DIR) {
        return None;
    }
    let home = bin_dir.parent()?;
    home.join(R_LIBRARY_DIR)
        .is_dir()
        .then(|| home.to_path_buf())
}
