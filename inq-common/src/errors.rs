//! Error taxonomy for the admission engine.
//!
//! `ConfigError` is fatal: a process that cannot load its configuration,
//! its distribution registry, or its queue directories must not start (or,
//! for a running daemon, must not process the pass). `ParseError` fails a
//! single upload before the repository tool is ever invoked; the controller
//! routes it straight to failed finalization. Everything the repository
//! tool itself reports is classified into [`crate::outcome::Outcome`]
//! instead of surfacing as an error type.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal configuration failures. None of these are recoverable per-upload.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file parsed but contains unusable values.
    #[error("invalid configuration in {path}: {message}")]
    Invalid { path: PathBuf, message: String },

    /// The distributions (or updates) file is not in paragraph format.
    #[error("malformed registry file {path}: {message}")]
    MalformedRegistry { path: PathBuf, message: String },

    /// A queue directory is missing or cannot be created.
    #[error("queue directory {path} is not available: {source}")]
    QueueDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-upload parse failures. These never abort the batch.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The filename does not follow the `name_version_arch` convention.
    #[error("{path} does not look like a package artifact")]
    UnrecognizedFilename { path: PathBuf },

    /// A source bundle without a `Files:` section has nothing to admit.
    #[error("{path} has no Files: section")]
    MissingFilesSection { path: PathBuf },

    /// A required metadata header was absent.
    #[error("{path} is missing a {field}: field")]
    MissingField { path: PathBuf, field: &'static str },
}
