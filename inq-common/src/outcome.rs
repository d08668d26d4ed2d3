//! Typed outcomes of a repository tool invocation.
//!
//! The tool reports failures as free-form text on a combined
//! stdout/stderr stream. That text is matched against an ordered pattern
//! table, first match wins; anything unmatched with a nonzero (or absent)
//! exit status is a tool-internal failure. The table is the one place the
//! brittleness of string-matching a third-party tool's diagnostics lives;
//! extend it here when the tool's wording changes.

use crate::repotool::ToolResult;
use regex::Regex;
use std::sync::LazyLock;

/// Result of attempting to add an artifact, or of a policy decision made
/// before the tool was ever invoked. Failure variants carry the text shown
/// to administrators: the policy reason, or the tool's raw diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// A policy chain rule rejected the upload.
    PolicyViolation(String),
    /// The upload names no repository, or not this one.
    NoRepository(String),
    /// The target distribution is not in the registry.
    UnknownDistribution(String),
    /// The tool skipped the package for want of a section override.
    NoSectionGiven(String),
    /// The tool skipped the package for want of a priority override.
    NoPriorityGiven(String),
    /// A file with the same name but different checksum is already in the
    /// pool. The existing version is extracted when the diagnostics name
    /// one.
    AlreadyRegistered {
        raw: String,
        existing_version: Option<String>,
    },
    /// A referenced file is not on disk yet; transient while an upload is
    /// still arriving.
    FileMissing(String),
    /// A referenced file is on disk with the wrong checksum.
    ChecksumMismatch(String),
    /// Signature verification failed inside the tool.
    SignatureFailure(String),
    /// Anything else the tool reported, including timeouts and spawn
    /// failures.
    ToolInternalFailure(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Outcomes the controller is allowed to recover from.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Outcome::NoSectionGiven(_)
                | Outcome::NoPriorityGiven(_)
                | Outcome::AlreadyRegistered { .. }
                | Outcome::FileMissing(_)
        )
    }

    /// Short label for notification subjects and the journal.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::PolicyViolation(_) => "policy violation",
            Outcome::NoRepository(_) => "no repository",
            Outcome::UnknownDistribution(_) => "unknown distribution",
            Outcome::NoSectionGiven(_) => "no section",
            Outcome::NoPriorityGiven(_) => "no priority",
            Outcome::AlreadyRegistered { .. } => "already registered",
            Outcome::FileMissing(_) => "file missing",
            Outcome::ChecksumMismatch(_) => "checksum mismatch",
            Outcome::SignatureFailure(_) => "signature failure",
            Outcome::ToolInternalFailure(_) => "tool failure",
        }
    }

    /// The text shown in notification bodies: the policy reason, or the
    /// tool's raw diagnostics.
    pub fn message(&self) -> &str {
        match self {
            Outcome::Success => "",
            Outcome::PolicyViolation(reason) => reason,
            Outcome::NoRepository(message) => message,
            Outcome::UnknownDistribution(message) => message,
            Outcome::NoSectionGiven(raw)
            | Outcome::NoPriorityGiven(raw)
            | Outcome::FileMissing(raw)
            | Outcome::ChecksumMismatch(raw)
            | Outcome::SignatureFailure(raw)
            | Outcome::ToolInternalFailure(raw) => raw,
            Outcome::AlreadyRegistered { raw, .. } => raw,
        }
    }
}

static NO_SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"No section was given for").expect("valid regex"));
static NO_PRIORITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"No priority was given for").expect("valid regex"));
static ALREADY_REGISTERED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"is already registered with other md5sum").expect("valid regex"));
static CHECKSUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"has md5sum.*was expected").expect("valid regex"));
static FILE_MISSING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(Cannot find file.*changes'|No such file or directory)").expect("valid regex")
});
static SIGNATURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"gpgme").expect("valid regex"));
static UNKNOWN_DISTRIBUTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Cannot find definition of distribution").expect("valid regex")
});

/// Pulls the version out of a quoted `name_version_arch` filename in the
/// already-registered diagnostics, when present.
static REGISTERED_VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'[^']*?([^'/_]+)_([^'_]+)_[^'_]+' is already registered").expect("valid regex")
});

/// Classify a tool invocation. Exit status zero is success regardless of
/// output; otherwise the pattern table decides, in order.
pub fn classify(result: &ToolResult) -> Outcome {
    if result.success() {
        return Outcome::Success;
    }
    let raw = result.output.clone();
    if NO_SECTION_RE.is_match(&result.output) {
        Outcome::NoSectionGiven(raw)
    } else if NO_PRIORITY_RE.is_match(&result.output) {
        Outcome::NoPriorityGiven(raw)
    } else if ALREADY_REGISTERED_RE.is_match(&result.output) {
        let existing_version = REGISTERED_VERSION_RE
            .captures(&result.output)
            .and_then(|caps| caps.get(2))
            .map(|m| m.as_str().to_string());
        Outcome::AlreadyRegistered {
            raw,
            existing_version,
        }
    } else if CHECKSUM_RE.is_match(&result.output) {
        Outcome::ChecksumMismatch(raw)
    } else if FILE_MISSING_RE.is_match(&result.output) {
        Outcome::FileMissing(raw)
    } else if SIGNATURE_RE.is_match(&result.output) {
        Outcome::SignatureFailure(raw)
    } else if UNKNOWN_DISTRIBUTION_RE.is_match(&result.output) {
        Outcome::UnknownDistribution(raw)
    } else {
        Outcome::ToolInternalFailure(raw)
    }
}
