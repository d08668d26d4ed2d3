//! Artifact parsing: filesystem paths (and, for source bundles, the
//! bundle's metadata text) become typed [`Upload`] descriptors.
//!
//! Parsing has no side effects and fixes the upload's file set once; the
//! set never grows, no matter how many recovery retries follow. The only
//! field the controller rewrites later is [`Upload::command`].

use crate::errors::ParseError;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// `name_version_arch.deb`.
static DEB_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^_]+)_([^_]+)_([^_.]+)\.deb$").expect("valid regex"));

/// Repository tag from the Debian revision suffix, e.g. `1.2-3untangle`.
static REPO_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_[^_]*-\d+([a-z]+)_").expect("valid regex"));

/// `user` out of `Name <user@domain>`.
static ADDRESS_USER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^<>@]+)@[^<>]*>").expect("valid regex"));

/// Detached-signature marker terminating the metadata section.
const SIGNATURE_MARKER: &str = "-----BEGIN PGP SIGNATURE-----";

/// What kind of artifact an upload was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadKind {
    /// A standalone binary package (`.deb`).
    BinaryPackage,
    /// A source bundle: a `.changes` manifest plus the files it lists.
    SourceBundle,
}

/// Component/section/priority overrides passed to the repository tool.
///
/// This is the one mutable part of an upload: recovery may force the
/// configured default section or priority onto it mid-run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolCommand {
    pub component: Option<String>,
    pub section: Option<String>,
    pub priority: Option<String>,
}

/// Defaults injected into parsing, taken from configuration.
#[derive(Debug, Clone)]
pub struct UploadDefaults {
    /// The running repository's identity, claimed by binary packages that
    /// carry no tag of their own.
    pub repository: String,
    pub distribution: String,
    pub component: String,
    pub priority: String,
}

/// A parsed upload, ready for policy evaluation and submission.
#[derive(Debug, Clone, Serialize)]
pub struct Upload {
    pub kind: UploadKind,
    /// Primary artifact: the `.deb` itself, or the `.changes` manifest.
    pub artifact_path: PathBuf,
    /// Files referenced by a source bundle's `Files:` section, in manifest
    /// order. Empty for binary packages.
    pub auxiliary_files: Vec<PathBuf>,
    pub package_name: String,
    pub version: String,
    pub distribution: String,
    pub component: String,
    /// `Changed-By:` for source bundles; injected build context for binary
    /// packages, when available.
    pub uploader: Option<String>,
    pub maintainer: Option<String>,
    /// The repository this upload claims to target.
    pub repository: Option<String>,
    pub command: ToolCommand,
}

impl Upload {
    /// Every file to archive at finalization: the artifact plus auxiliaries.
    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        std::iter::once(&self.artifact_path).chain(self.auxiliary_files.iter())
    }

    /// Username part of the uploader identity (`Name <user@domain>`), used
    /// by policy checks. Identities without an angle-bracket address are
    /// matched whole.
    pub fn uploader_username(&self) -> Option<&str> {
        let uploader = self.uploader.as_deref()?;
        match ADDRESS_USER_RE.captures(uploader) {
            Some(caps) => caps.get(1).map(|m| m.as_str()),
            None => Some(uploader),
        }
    }

    /// Package names the conflict-clearing recovery may remove: one per
    /// `.deb`/`.dsc` in the file set for source bundles, the package itself
    /// otherwise.
    pub fn removable_packages(&self) -> Vec<String> {
        match self.kind {
            UploadKind::BinaryPackage => vec![self.package_name.clone()],
            UploadKind::SourceBundle => {
                let mut names = Vec::new();
                for file in &self.auxiliary_files {
                    let name = file.file_name().map(|n| n.to_string_lossy());
                    let Some(name) = name else { continue };
                    if !(name.ends_with(".deb") || name.ends_with(".dsc")) {
                        continue;
                    }
                    let stem = match name.split_once('_') {
                        Some((stem, _)) => stem.to_string(),
                        None => continue,
                    };
                    if !names.contains(&stem) {
                        names.push(stem);
                    }
                }
                if names.is_empty() {
                    names.push(self.package_name.clone());
                }
                names
            }
        }
    }
}

impl fmt::Display for Upload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = format!("{}\n", self.package_name);
        s.push_str(&format!(
            "  repository   = {}\n",
            self.repository.as_deref().unwrap_or("")
        ));
        s.push_str(&format!("  distribution = {}\n", self.distribution));
        s.push_str(&format!("  version      = {}\n", self.version));
        s.push_str(&format!("  component    = {}\n", self.component));
        s.push_str(&format!(
            "  maintainer   = {}\n",
            self.maintainer.as_deref().unwrap_or("")
        ));
        s.push_str(&format!(
            "  uploader     = {}\n",
            self.uploader.as_deref().unwrap_or("")
        ));
        s.push_str("  files        =\n");
        for file in self.files() {
            s.push_str(&format!("                 {}\n", file.display()));
        }
        f.write_str(s.trim_end())
    }
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn repository_tag(path: &Path) -> Option<String> {
    REPO_TAG_RE
        .captures(&basename(path))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Parse a standalone binary package from its filename.
///
/// The uploader identity comes from build context outside the artifact
/// itself and is injected by the caller when known.
pub fn parse_package(
    path: &Path,
    defaults: &UploadDefaults,
    uploader: Option<String>,
) -> Result<Upload, ParseError> {
    let name = basename(path);
    let caps = DEB_RE
        .captures(&name)
        .ok_or_else(|| ParseError::UnrecognizedFilename {
            path: path.to_path_buf(),
        })?;
    let repository = repository_tag(path).or_else(|| Some(defaults.repository.clone()));
    Ok(Upload {
        kind: UploadKind::BinaryPackage,
        artifact_path: path.to_path_buf(),
        auxiliary_files: Vec::new(),
        package_name: caps[1].to_string(),
        version: caps[2].to_string(),
        distribution: defaults.distribution.clone(),
        component: defaults.component.clone(),
        uploader,
        maintainer: None,
        repository,
        command: ToolCommand {
            component: Some(defaults.component.clone()),
            section: None,
            priority: Some(defaults.priority.clone()),
        },
    })
}

/// Parse a source bundle's `.changes` manifest.
///
/// Metadata is read line by line up to the detached-signature marker.
/// The `Files:` section contributes one auxiliary file per indented line
/// (last whitespace-delimited token, resolved against the manifest's
/// directory); the first entry's section token sets the component when the
/// manifest did not already name one.
pub fn parse_changes(path: &Path, defaults: &UploadDefaults) -> Result<Upload, ParseError> {
    let text = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();

    let mut name = None;
    let mut version = None;
    let mut distribution = None;
    let mut maintainer = None;
    let mut uploader = None;
    let mut component = None;
    let mut files = Vec::new();
    let mut saw_files_section = false;
    let mut in_files = false;

    for line in text.lines() {
        let line = line.trim();
        if line.starts_with(SIGNATURE_MARKER) {
            break;
        }
        if let Some(v) = line.strip_prefix("Source: ") {
            name = Some(v.to_string());
            continue;
        }
        if let Some(v) = line.strip_prefix("Version: ") {
            version = Some(v.to_string());
            continue;
        }
        if let Some(v) = line.strip_prefix("Distribution: ") {
            distribution = Some(v.to_string());
            continue;
        }
        if let Some(v) = line.strip_prefix("Maintainer: ") {
            maintainer = Some(v.to_string());
            continue;
        }
        if let Some(v) = line.strip_prefix("Changed-By: ") {
            uploader = Some(v.to_string());
            continue;
        }
        if line == "Files:" {
            saw_files_section = true;
            in_files = true;
            continue;
        }
        if in_files && !line.is_empty() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if let Some(last) = parts.last() {
                files.push(dir.join(last));
            }
            if component.is_none() && parts.len() >= 3 {
                let section = parts[2];
                component = Some(
                    section
                        .split('/')
                        .next()
                        .unwrap_or(section)
                        .to_string(),
                );
            }
        }
    }

    if !saw_files_section || files.is_empty() {
        return Err(ParseError::MissingFilesSection {
            path: path.to_path_buf(),
        });
    }
    let missing = |field| ParseError::MissingField {
        path: path.to_path_buf(),
        field,
    };
    let name = name.ok_or_else(|| missing("Source"))?;
    let version = version.ok_or_else(|| missing("Version"))?;
    let distribution = distribution.ok_or_else(|| missing("Distribution"))?;

    Ok(Upload {
        kind: UploadKind::SourceBundle,
        artifact_path: path.to_path_buf(),
        auxiliary_files: files,
        package_name: name,
        version,
        distribution,
        component: component.unwrap_or_else(|| defaults.component.clone()),
        uploader,
        maintainer,
        repository: repository_tag(path),
        command: ToolCommand::default(),
    })
}
