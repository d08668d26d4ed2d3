//! Configuration for the incoming queue.
//!
//! Everything the original deployment kept as process-wide constants
//! (administrator and automation identity sets, QA and testing distribution
//! names, mail recipients, retry limits) is explicit configuration here,
//! loaded once at startup from a TOML file and passed into the registry and
//! controller at construction.

use crate::errors::ConfigError;
use crate::upload::UploadDefaults;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration, one section per concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// The repository this queue feeds, plus the defaults applied to binary
/// packages that carry no metadata of their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Repository base path; the registry's identity is its basename.
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
    /// Distribution for binary packages uploaded without a source bundle.
    #[serde(default = "default_distribution")]
    pub default_distribution: String,
    #[serde(default = "default_component")]
    pub default_component: String,
    /// Section forced onto an upload the tool rejects with "no section".
    #[serde(default = "default_section")]
    pub default_section: String,
    /// Priority forced onto an upload the tool rejects with "no priority".
    #[serde(default = "default_priority")]
    pub default_priority: String,
    /// Prefix repository tool invocations with sudo.
    #[serde(default)]
    pub use_sudo: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            default_distribution: default_distribution(),
            default_component: default_component(),
            default_section: default_section(),
            default_priority: default_priority(),
            use_sudo: false,
        }
    }
}

impl RepositoryConfig {
    /// Registry identity: the basename of the base path.
    pub fn name(&self) -> String {
        self.base_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn incoming_dir(&self) -> PathBuf {
        self.base_path.join("incoming")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.base_path.join("processed")
    }

    pub fn failed_dir(&self) -> PathBuf {
        self.processed_dir().join("failed")
    }

    pub fn distributions_file(&self) -> PathBuf {
        self.base_path.join("conf").join("distributions")
    }

    pub fn updates_file(&self) -> PathBuf {
        self.base_path.join("conf").join("updates")
    }
}

/// Privileged uploader classes and special-cased distribution sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Usernames allowed to upload to testing distributions and to force
    /// non-VCS versions.
    #[serde(default)]
    pub admins: Vec<String>,
    /// Automation identities (build bots). Restricted to QA distributions.
    #[serde(default = "default_automation_uploaders")]
    pub automation_uploaders: Vec<String>,
    /// Distributions (by codename or suite) only administrators may target.
    #[serde(default = "default_testing_distributions")]
    pub testing_distributions: Vec<String>,
    /// Distributions (by codename) reserved for automation uploads.
    #[serde(default = "default_qa_distributions")]
    pub qa_distributions: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            admins: Vec::new(),
            automation_uploaders: default_automation_uploaders(),
            testing_distributions: default_testing_distributions(),
            qa_distributions: default_qa_distributions(),
        }
    }
}

/// Notification settings for the local mail relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_relay")]
    pub relay: String,
    #[serde(default = "default_mail_port")]
    pub port: u16,
    /// From mailbox, `Name <address>` form.
    #[serde(default = "default_from")]
    pub from: String,
    /// Recipient domain filter; addresses outside this domain are dropped.
    /// Empty disables the filter.
    #[serde(default)]
    pub domain: String,
    /// Administrators copied on failures (and on uploads that carry no
    /// uploader or maintainer of their own).
    #[serde(default)]
    pub default_recipients: Vec<String>,
    /// Addresses substituted for automation identities, so the QA team is
    /// notified instead of a bot account.
    #[serde(default)]
    pub qa_recipients: Vec<String>,
    #[serde(default = "default_true")]
    pub notify_success: bool,
    #[serde(default = "default_true")]
    pub notify_failure: bool,
    /// Copy `default_recipients` on every notification instead of failures
    /// only. The two historical deployments disagreed on this; it is a
    /// switch rather than a hardcoded choice.
    #[serde(default)]
    pub always_copy_default_recipients: bool,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            relay: default_relay(),
            port: default_mail_port(),
            from: default_from(),
            domain: String::new(),
            default_recipients: Vec::new(),
            qa_recipients: Vec::new(),
            notify_success: true,
            notify_failure: true,
            always_copy_default_recipients: false,
        }
    }
}

/// Bounded-recovery settings for the admission controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum `add` attempts when the tool reports a missing file.
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,
    /// Sleep between missing-file retries.
    #[serde(default = "default_backoff", with = "humantime_serde")]
    pub backoff: Duration,
    /// Hard ceiling on a single repository tool invocation; expiry is
    /// classified as a tool failure.
    #[serde(default = "default_tool_timeout", with = "humantime_serde")]
    pub tool_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_tries: default_max_tries(),
            backoff: default_backoff(),
            tool_timeout: default_tool_timeout(),
        }
    }
}

/// Daemon scan-loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Pause between full incoming-directory scans.
    #[serde(default = "default_scan_interval", with = "humantime_serde")]
    pub scan_interval: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            scan_interval: default_scan_interval(),
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&text).map_err(|e| ConfigError::Invalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::Invalid {
            path: path.to_path_buf(),
            message,
        };
        if self.repository.name().is_empty() {
            return Err(invalid("repository.base_path has no basename".into()));
        }
        if self.retry.max_tries == 0 {
            return Err(invalid("retry.max_tries must be at least 1".into()));
        }
        if self.retry.tool_timeout.is_zero() {
            return Err(invalid("retry.tool_timeout must be nonzero".into()));
        }
        if self.mail.enabled && self.mail.relay.is_empty() {
            return Err(invalid("mail.relay must be set when mail is enabled".into()));
        }
        Ok(())
    }

    /// Defaults applied while parsing artifacts.
    pub fn upload_defaults(&self) -> UploadDefaults {
        UploadDefaults {
            repository: self.repository.name(),
            distribution: self.repository.default_distribution.clone(),
            component: self.repository.default_component.clone(),
            priority: self.repository.default_priority.clone(),
        }
    }
}

/// Resolve the configuration file path: explicit flag, then the user config
/// directory, then the system-wide location.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    if let Some(dirs) = directories::ProjectDirs::from("", "", "inq") {
        let candidate = dirs.config_dir().join("config.toml");
        if candidate.is_file() {
            return candidate;
        }
    }
    PathBuf::from("/etc/inq/config.toml")
}

fn default_true() -> bool {
    true
}

fn default_base_path() -> PathBuf {
    PathBuf::from("/var/www/repository")
}

fn default_distribution() -> String {
    "chaos".to_string()
}

fn default_component() -> String {
    "upstream".to_string()
}

fn default_section() -> String {
    "utils".to_string()
}

fn default_priority() -> String {
    "normal".to_string()
}

fn default_automation_uploaders() -> Vec<String> {
    vec!["buildbot".to_string()]
}

fn default_testing_distributions() -> Vec<String> {
    vec!["testing".to_string(), "alpha".to_string()]
}

fn default_qa_distributions() -> Vec<String> {
    vec!["daily-dogfood".to_string(), "qa".to_string()]
}

fn default_relay() -> String {
    "localhost".to_string()
}

fn default_mail_port() -> u16 {
    25
}

fn default_from() -> String {
    "Incoming Queue Daemon <incoming@localhost>".to_string()
}

fn default_max_tries() -> u32 {
    3
}

fn default_backoff() -> Duration {
    Duration::from_secs(3)
}

fn default_tool_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_scan_interval() -> Duration {
    Duration::from_secs(60)
}
