//! Upload admission engine for a multi-distribution package repository.
//!
//! Artifacts dropped into an incoming directory are parsed into typed
//! upload descriptors, run through an ordered policy chain, handed to the
//! external repository tool, and finalized exactly once: archived into the
//! processed (or failed) queue and notified by mail. The tool's free-form
//! failure text is classified into a typed outcome taxonomy that drives a
//! small set of bounded recoveries.
//!
//! The CLI (`inq`) and the daemon (`inqd`) are thin frontends over this
//! crate; both make identical routing, retry, and notification decisions.

#![forbid(unsafe_code)]

pub mod config;
pub mod controller;
pub mod errors;
pub mod journal;
pub mod mailer;
pub mod mock_tool;
pub mod outcome;
pub mod policy;
pub mod registry;
pub mod repotool;
pub mod scan;
pub mod upload;

pub use config::Config;
pub use controller::{AdmissionReport, BatchSummary, Controller};
pub use errors::{ConfigError, ParseError};
pub use outcome::{Outcome, classify};
pub use registry::{Distribution, Registry};
pub use repotool::{RepoTool, Reprepro, ToolResult};
pub use upload::{Upload, UploadKind};
