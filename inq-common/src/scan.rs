//! Incoming-directory scanning.
//!
//! One pass yields the artifacts to admit, source bundles first. A binary
//! package whose source descriptor is still sitting in the queue is
//! skipped: it belongs to a source bundle that has not finished uploading,
//! and admitting it now would double-admit the package once the bundle's
//! `.changes` arrives.

use crate::config::RepositoryConfig;
use crate::errors::ConfigError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Create the processed queue directories and verify the incoming
/// directory exists. Called once at startup; a missing incoming directory
/// is fatal.
pub fn ensure_queue_dirs(repository: &RepositoryConfig) -> Result<(), ConfigError> {
    let incoming = repository.incoming_dir();
    if !incoming.is_dir() {
        return Err(ConfigError::QueueDir {
            path: incoming,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such directory"),
        });
    }
    for dir in [repository.processed_dir(), repository.failed_dir()] {
        std::fs::create_dir_all(&dir).map_err(|source| ConfigError::QueueDir {
            path: dir.clone(),
            source,
        })?;
    }
    Ok(())
}

/// List the artifacts of one scan pass, in processing order: `.changes`
/// bundles first, then binary packages without a pending source
/// descriptor. Entries are sorted for a deterministic order within each
/// group.
pub fn scan_incoming(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::QueueDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ConfigError::QueueDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    let mut ordered: Vec<PathBuf> = Vec::new();
    for path in &files {
        if extension_is(path, "changes") {
            ordered.push(path.clone());
        }
    }
    for path in &files {
        if !extension_is(path, "deb") {
            continue;
        }
        if let Some(descriptor) = source_descriptor(path) {
            if descriptor.is_file() {
                debug!(package = %path.display(),
                       "skipping binary package with pending source descriptor");
                continue;
            }
        }
        ordered.push(path.clone());
    }
    Ok(ordered)
}

fn extension_is(path: &Path, wanted: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(wanted)
}

/// `foo_1.2-3_i386.deb` → `foo_1.2-3.dsc` in the same directory.
fn source_descriptor(deb: &Path) -> Option<PathBuf> {
    let name = deb.file_name()?.to_str()?;
    let stem = name.strip_suffix(".deb")?;
    let (without_arch, _arch) = stem.rsplit_once('_')?;
    if !without_arch.contains('_') {
        // Needs at least name_version before the architecture.
        return None;
    }
    Some(deb.with_file_name(format!("{without_arch}.dsc")))
}
