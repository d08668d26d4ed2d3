//! Admission controller: the state machine that takes a parsed upload
//! through policy, submission, bounded recovery, and finalization.
//!
//! One upload gets exactly one admission run. The run may loop internally
//! (missing-file backoff, forced section/priority, conflict clearing) but
//! always ends in exactly one finalization: one notification, one
//! relocation of the upload's file set. Per-upload failures never abort
//! the batch.

use crate::config::{Config, MailConfig, PolicyConfig};
use crate::errors::ParseError;
use crate::journal::{AdmissionRecord, Journal};
use crate::mailer::Mailer;
use crate::outcome::{Outcome, classify};
use crate::policy;
use crate::registry::Registry;
use crate::repotool::RepoTool;
use crate::scan;
use crate::upload::{Upload, parse_changes, parse_package};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, error, info, warn};

/// `address` out of `Name <address>`.
static ANGLE_ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^<>]+)>").expect("valid regex"));

/// Terminal result of one admission run.
#[derive(Debug, Clone)]
pub struct AdmissionReport {
    pub package: String,
    pub distribution: String,
    pub succeeded: bool,
    pub outcome: Outcome,
}

/// Counters for one scan pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// How a duplicate-registration conflict was resolved.
enum ConflictResolution {
    /// A sibling distribution held the same version; it was copied into
    /// the target and the upload is done.
    Copied { from: String },
    /// The conflicting entries were removed from every unlocked
    /// distribution that held them; `add` may be retried once.
    Cleared,
}

pub struct Controller<'a, T: RepoTool, M: Mailer> {
    config: &'a Config,
    registry: &'a Registry,
    tool: T,
    mailer: M,
    journal: Journal,
    move_files: bool,
    send_mail: bool,
    /// Build-context identity injected for binary packages, when known.
    binary_uploader: Option<String>,
}

impl<'a, T: RepoTool, M: Mailer> Controller<'a, T, M> {
    pub fn new(config: &'a Config, registry: &'a Registry, tool: T, mailer: M) -> Self {
        let journal = Journal::new(config.repository.processed_dir().join("admissions.jsonl"));
        Self {
            config,
            registry,
            tool,
            mailer,
            journal,
            move_files: true,
            send_mail: true,
            binary_uploader: None,
        }
    }

    /// Leave files in place after processing.
    pub fn without_moves(mut self) -> Self {
        self.move_files = false;
        self
    }

    /// Suppress notifications.
    pub fn without_mail(mut self) -> Self {
        self.send_mail = false;
        self
    }

    pub fn with_binary_uploader(mut self, uploader: Option<String>) -> Self {
        self.binary_uploader = uploader;
        self
    }

    pub fn tool(&self) -> &T {
        &self.tool
    }

    pub fn mailer(&self) -> &M {
        &self.mailer
    }

    /// Process every artifact currently in the configured incoming
    /// directory, in scan order. Only queue-directory loss aborts; any
    /// per-upload failure is finalized and counted.
    pub async fn run_batch(&mut self) -> Result<BatchSummary, crate::errors::ConfigError> {
        let incoming = self.config.repository.incoming_dir();
        self.run_batch_in(&incoming).await
    }

    /// Same as [`run_batch`](Self::run_batch) against an explicit
    /// directory.
    pub async fn run_batch_in(
        &mut self,
        dir: &Path,
    ) -> Result<BatchSummary, crate::errors::ConfigError> {
        let artifacts = scan::scan_incoming(dir)?;
        debug!(count = artifacts.len(), "scan pass found artifacts");
        let mut summary = BatchSummary::default();
        for path in artifacts {
            let report = self.admit_artifact(&path).await;
            if report.succeeded {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
        }
        Ok(summary)
    }

    /// Parse and admit a single artifact. Parse failures are finalized
    /// like any other failed upload, without ever invoking the tool.
    pub async fn admit_artifact(&mut self, path: &Path) -> AdmissionReport {
        let defaults = self.config.upload_defaults();
        let parsed = if path.extension().and_then(|e| e.to_str()) == Some("changes") {
            parse_changes(path, &defaults)
        } else {
            parse_package(path, &defaults, self.binary_uploader.clone())
        };
        match parsed {
            Ok(upload) => self.admit(upload).await,
            Err(err) => self.fail_unparsed(path, &err),
        }
    }

    /// One admission run for one parsed upload.
    pub async fn admit(&mut self, mut upload: Upload) -> AdmissionReport {
        info!(package = %upload.package_name,
              distribution = %upload.distribution,
              version = %upload.version,
              "admitting upload");
        let mut note = None;
        let outcome = match policy::check(&upload, self.registry, &self.config.policy) {
            Err(violation) => violation,
            Ok(()) => self.submit(&mut upload, &mut note).await,
        };
        self.finalize(&upload, outcome, note)
    }

    /// Submission loop: invoke `add`, classify, and run the recovery
    /// protocol. Three recoveries exist, each explicitly bounded:
    /// missing-file backoff (counted against `retry.max_tries`), one
    /// forced section and one forced priority override, and one retry
    /// after clearing a duplicate registration.
    async fn submit(&mut self, upload: &mut Upload, note: &mut Option<String>) -> Outcome {
        let max_tries = self.config.retry.max_tries;
        let mut missing_failures = 0u32;
        let mut forced_section = false;
        let mut forced_priority = false;
        let mut cleared_conflict = false;

        loop {
            let result = self.tool.add(upload).await;
            let outcome = classify(&result);
            match outcome {
                Outcome::Success => return Outcome::Success,
                Outcome::AlreadyRegistered { .. } if !cleared_conflict => {
                    match self.resolve_conflict(upload).await {
                        ConflictResolution::Copied { from } => {
                            let repository =
                                upload.repository.clone().unwrap_or_default();
                            *note = Some(format!(
                                "This package was already present in the '{repository}' \
                                 repository, in distribution {from}, with version \
                                 '{}', so it was simply copied over.",
                                upload.version
                            ));
                            return Outcome::Success;
                        }
                        ConflictResolution::Cleared => {
                            cleared_conflict = true;
                        }
                    }
                }
                Outcome::FileMissing(_) => {
                    missing_failures += 1;
                    if missing_failures >= max_tries {
                        return outcome;
                    }
                    debug!(attempt = missing_failures, "file missing, backing off");
                    tokio::time::sleep(self.config.retry.backoff).await;
                }
                Outcome::NoSectionGiven(_) if !forced_section => {
                    upload.command.section =
                        Some(self.config.repository.default_section.clone());
                    forced_section = true;
                    info!(section = %self.config.repository.default_section,
                          "forcing default section");
                }
                Outcome::NoPriorityGiven(_) if !forced_priority => {
                    upload.command.priority =
                        Some(self.config.repository.default_priority.clone());
                    forced_priority = true;
                    info!(priority = %self.config.repository.default_priority,
                          "forcing default priority");
                }
                other => return other,
            }
        }
    }

    /// Duplicate-registration recovery. First pass: a sibling unlocked
    /// distribution holding the same version donates a copy. Second pass:
    /// no donor, so the conflicting entries are removed from every
    /// unlocked distribution holding this version, clearing the way for
    /// one retried `add`. When several siblings hold the version the
    /// first in codename order wins.
    async fn resolve_conflict(&mut self, upload: &Upload) -> ConflictResolution {
        let target = upload.distribution.clone();
        let unlocked: Vec<String> = self
            .registry
            .unlocked()
            .map(|d| d.codename.clone())
            .collect();

        for codename in unlocked.iter().filter(|c| **c != target) {
            let Some(version) = self
                .tool
                .list_version(codename, &upload.package_name)
                .await
            else {
                continue;
            };
            if version != upload.version {
                continue;
            }
            info!(package = %upload.package_name, version = %version,
                  donor = %codename, "found same version in sibling distribution");
            if self
                .tool
                .copy(codename, &target, &upload.package_name)
                .await
            {
                return ConflictResolution::Copied {
                    from: codename.clone(),
                };
            }
            warn!(donor = %codename, "copy from sibling failed, clearing instead");
            break;
        }

        for codename in &unlocked {
            let Some(version) = self
                .tool
                .list_version(codename, &upload.package_name)
                .await
            else {
                continue;
            };
            if version != upload.version {
                continue;
            }
            for package in upload.removable_packages() {
                if !self.tool.remove(codename, &package).await {
                    warn!(package = %package, distribution = %codename,
                          "failed to remove conflicting entry");
                }
            }
        }
        ConflictResolution::Cleared
    }

    /// Finalization: compose and send the notification, relocate the
    /// upload's file set, journal the outcome. Runs exactly once per
    /// admission run and never fails; individual file-move and mail
    /// errors are logged and swallowed.
    fn finalize(
        &mut self,
        upload: &Upload,
        outcome: Outcome,
        note: Option<String>,
    ) -> AdmissionReport {
        let succeeded = outcome.is_success();
        let repository = upload
            .repository
            .clone()
            .unwrap_or_else(|| self.registry.name().to_string());
        let mut subject = format!(
            "Upload of {} to {}/{}",
            upload.package_name, repository, upload.distribution
        );
        let body = if succeeded {
            subject.push_str(" succeeded");
            info!(package = %upload.package_name, "upload succeeded");
            match &note {
                Some(note) => format!("{note}\n\n{upload}"),
                None => upload.to_string(),
            }
        } else {
            subject.push_str(&format!(" failed ({})", outcome.label()));
            error!(package = %upload.package_name,
                   outcome = outcome.label(),
                   reason = %outcome.message(),
                   "upload failed");
            format!("{}\n\n{upload}", outcome.message())
        };

        let wants_mail = if succeeded {
            self.config.mail.notify_success
        } else {
            self.config.mail.notify_failure
        };
        if self.send_mail && self.config.mail.enabled && wants_mail {
            let recipients = self.recipients_for(upload, succeeded);
            if recipients.is_empty() {
                debug!("no recipients left after scrubbing, skipping notification");
            } else if let Err(e) = self.mailer.send(&recipients, &subject, &body) {
                warn!(error = %e, "failed to send notification");
            }
        }

        if self.move_files {
            let destination = if succeeded {
                self.config.repository.processed_dir()
            } else {
                self.config.repository.failed_dir()
            };
            for file in upload.files() {
                let Some(file_name) = file.file_name() else {
                    continue;
                };
                if let Err(e) = std::fs::rename(file, destination.join(file_name)) {
                    // Already moved or never arrived; finalization goes on.
                    debug!(file = %file.display(), error = %e, "could not archive file");
                }
            }
        }

        let record = AdmissionRecord {
            finished_at: chrono::Utc::now(),
            package: upload.package_name.clone(),
            version: upload.version.clone(),
            distribution: upload.distribution.clone(),
            succeeded,
            outcome: outcome.label().to_string(),
            detail: (!succeeded).then(|| outcome.message().to_string()),
        };
        if let Err(e) = self.journal.record(&record) {
            warn!(error = %e, "failed to append admission journal");
        }

        AdmissionReport {
            package: upload.package_name.clone(),
            distribution: upload.distribution.clone(),
            succeeded,
            outcome,
        }
    }

    /// Finalize an artifact that never became an upload: notify the
    /// default recipients and archive the one file we know about.
    fn fail_unparsed(&mut self, path: &Path, err: &ParseError) -> AdmissionReport {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        error!(artifact = %name, error = %err, "artifact failed to parse");

        let subject = format!("Upload of {name} failed (parse error)");
        if self.send_mail && self.config.mail.enabled && self.config.mail.notify_failure {
            let recipients = scrub_recipients(
                &self.config.mail.default_recipients,
                &self.config.mail,
                &self.config.policy,
            );
            if !recipients.is_empty() {
                if let Err(e) = self.mailer.send(&recipients, &subject, &err.to_string()) {
                    warn!(error = %e, "failed to send notification");
                }
            }
        }
        if self.move_files {
            let destination = self.config.repository.failed_dir();
            if let Some(file_name) = path.file_name() {
                if let Err(e) = std::fs::rename(path, destination.join(file_name)) {
                    debug!(file = %path.display(), error = %e, "could not archive file");
                }
            }
        }
        let record = AdmissionRecord {
            finished_at: chrono::Utc::now(),
            package: name.clone(),
            version: String::new(),
            distribution: String::new(),
            succeeded: false,
            outcome: "parse error".to_string(),
            detail: Some(err.to_string()),
        };
        if let Err(e) = self.journal.record(&record) {
            warn!(error = %e, "failed to append admission journal");
        }

        AdmissionReport {
            package: name,
            distribution: String::new(),
            succeeded: false,
            outcome: Outcome::ToolInternalFailure(err.to_string()),
        }
    }

    /// Base recipient set for a finalized upload: the uploader and
    /// maintainer, falling back to the default recipients when the upload
    /// names nobody, plus the default recipients on failure (or always,
    /// by configuration).
    fn recipients_for(&self, upload: &Upload, succeeded: bool) -> Vec<String> {
        let mail = &self.config.mail;
        let mut raw: Vec<String> = Vec::new();
        if let Some(uploader) = &upload.uploader {
            raw.push(uploader.clone());
        }
        if let Some(maintainer) = &upload.maintainer {
            raw.push(maintainer.clone());
        }
        if raw.is_empty() || !succeeded || mail.always_copy_default_recipients {
            raw.extend(mail.default_recipients.iter().cloned());
        }
        scrub_recipients(&raw, mail, &self.config.policy)
    }
}

/// Scrub a recipient list: drop addresses outside the configured domain,
/// reduce `Name <address>` to the bare address, replace automation
/// identities with the QA team, and deduplicate preserving order.
pub fn scrub_recipients(raw: &[String], mail: &MailConfig, policy: &PolicyConfig) -> Vec<String> {
    let domain_suffix = format!("@{}", mail.domain);
    let mut list: Vec<String> = raw
        .iter()
        .filter(|r| mail.domain.is_empty() || r.contains(&domain_suffix))
        .map(|r| extract_address(r))
        .collect();

    let is_automation = |address: &str| {
        policy
            .automation_uploaders
            .iter()
            .any(|a| address.contains(a.as_str()))
    };
    if list.iter().any(|r| is_automation(r)) {
        list.retain(|r| !is_automation(r));
        list.extend(mail.qa_recipients.iter().cloned());
    }

    let mut seen = std::collections::BTreeSet::new();
    list.retain(|r| seen.insert(r.clone()));
    list
}

fn extract_address(recipient: &str) -> String {
    match ANGLE_ADDRESS_RE.captures(recipient) {
        Some(caps) => caps[1].trim().to_string(),
        None => recipient.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use crate::mailer::RecordingMailer;
    use crate::mock_tool::{MockRepoTool, ToolCall};
    use crate::repotool::ToolResult;
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;

    const DISTRIBUTIONS: &str = "\
Codename: stable
Suite: stable
Components: main

Codename: chaos
Suite: unstable
Components: main

Codename: sid
Suite: unstable
Components: main

Codename: testing
Suite: testing
Components: main
";

    struct Fixture {
        _dir: tempfile::TempDir,
        config: Config,
        registry: Registry,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            repository: RepositoryConfig {
                base_path: dir.path().to_path_buf(),
                ..RepositoryConfig::default()
            },
            ..Config::default()
        };
        config.retry.backoff = Duration::ZERO;
        config.mail.domain = "example.com".to_string();
        config.mail.default_recipients = vec!["admins@example.com".to_string()];
        config.mail.qa_recipients = vec!["qa@example.com".to_string()];
        config.policy.admins = vec!["seb".to_string()];
        std::fs::create_dir_all(config.repository.incoming_dir()).unwrap();
        std::fs::create_dir_all(config.repository.failed_dir()).unwrap();
        let registry =
            Registry::from_text("untangle", DISTRIBUTIONS, "", &config.policy).unwrap();
        Fixture {
            _dir: dir,
            config,
            registry,
        }
    }

    fn write_incoming(fixture: &Fixture, name: &str, content: &str) -> PathBuf {
        let path = fixture.config.repository.incoming_dir().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    fn changes_text(distribution: &str) -> String {
        format!(
            "Source: foo\n\
             Version: 1.2-3untangle+svn20080805T1130\n\
             Distribution: {distribution}\n\
             Maintainer: Maint <maint@example.com>\n\
             Changed-By: Dev <dev@example.com>\n\
             Files:\n\
              0123 10 utils normal foo_1.2-3untangle.dsc\n\
              4567 20 utils normal foo_1.2-3untangle_i386.deb\n"
        )
    }

    fn write_bundle(fixture: &Fixture, distribution: &str) -> PathBuf {
        let path = write_incoming(
            fixture,
            "foo_1.2-3untangle_i386.changes",
            &changes_text(distribution),
        );
        write_incoming(fixture, "foo_1.2-3untangle.dsc", "dsc");
        write_incoming(fixture, "foo_1.2-3untangle_i386.deb", "deb");
        path
    }

    #[tokio::test]
    async fn policy_violation_never_invokes_the_tool() {
        let f = fixture();
        let path = write_bundle(&f, "testing");
        let mut controller = Controller::new(
            &f.config,
            &f.registry,
            MockRepoTool::new(),
            RecordingMailer::new(),
        );

        let report = controller.admit_artifact(&path).await;
        assert!(!report.succeeded);
        assert!(matches!(report.outcome, Outcome::PolicyViolation(_)));
        assert_eq!(controller.tool().add_calls(), 0);
        // Finalized into the failed queue.
        assert!(
            f.config
                .repository
                .failed_dir()
                .join("foo_1.2-3untangle_i386.changes")
                .is_file()
        );
        let sent = &controller.mailer().sent;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.contains("failed (policy violation)"));
    }

    #[tokio::test]
    async fn clean_upload_succeeds_and_archives() {
        let f = fixture();
        let path = write_bundle(&f, "chaos");
        let mut controller = Controller::new(
            &f.config,
            &f.registry,
            MockRepoTool::new(),
            RecordingMailer::new(),
        );

        let report = controller.admit_artifact(&path).await;
        assert!(report.succeeded);
        assert_eq!(controller.tool().add_calls(), 1);
        let processed = f.config.repository.processed_dir();
        assert!(processed.join("foo_1.2-3untangle_i386.changes").is_file());
        assert!(processed.join("foo_1.2-3untangle.dsc").is_file());
        assert!(processed.join("foo_1.2-3untangle_i386.deb").is_file());
        let sent = &controller.mailer().sent;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.ends_with("succeeded"));
        // Uploader and maintainer, bare addresses, no defaults on success.
        assert_eq!(
            sent[0].recipients,
            vec!["dev@example.com", "maint@example.com"]
        );
    }

    #[tokio::test]
    async fn file_missing_retries_are_bounded() {
        let f = fixture();
        let path = write_bundle(&f, "chaos");
        let tool = MockRepoTool::new()
            .with_add_result(ToolResult::failed(1, "No such file or directory"))
            .with_add_result(ToolResult::failed(1, "No such file or directory"))
            .with_add_result(ToolResult::failed(1, "No such file or directory"));
        let mut controller =
            Controller::new(&f.config, &f.registry, tool, RecordingMailer::new());

        let report = controller.admit_artifact(&path).await;
        assert!(!report.succeeded);
        assert!(matches!(report.outcome, Outcome::FileMissing(_)));
        assert_eq!(controller.tool().add_calls(), 3);
        // Failure notifications carry the raw diagnostic text.
        let sent = &controller.mailer().sent;
        assert!(sent[0].body.contains("No such file or directory"));
    }

    #[tokio::test]
    async fn file_missing_recovers_when_the_file_arrives() {
        let f = fixture();
        let path = write_bundle(&f, "chaos");
        let tool = MockRepoTool::new()
            .with_add_result(ToolResult::failed(1, "No such file or directory"))
            .with_add_result(ToolResult::failed(1, "No such file or directory"));
        let mut controller =
            Controller::new(&f.config, &f.registry, tool, RecordingMailer::new());

        let report = controller.admit_artifact(&path).await;
        assert!(report.succeeded);
        assert_eq!(controller.tool().add_calls(), 3);
    }

    #[tokio::test]
    async fn missing_section_is_forced_once() {
        let f = fixture();
        let path = write_bundle(&f, "chaos");
        let tool = MockRepoTool::new()
            .with_add_result(ToolResult::failed(1, "No section was given for 'foo', skipping"));
        let mut controller =
            Controller::new(&f.config, &f.registry, tool, RecordingMailer::new());

        let report = controller.admit_artifact(&path).await;
        assert!(report.succeeded);
        assert_eq!(controller.tool().add_calls(), 2);
    }

    #[tokio::test]
    async fn repeated_missing_section_is_terminal() {
        let f = fixture();
        let path = write_bundle(&f, "chaos");
        let tool = MockRepoTool::new()
            .with_add_result(ToolResult::failed(1, "No section was given for 'foo', skipping"))
            .with_add_result(ToolResult::failed(1, "No section was given for 'foo', skipping"));
        let mut controller =
            Controller::new(&f.config, &f.registry, tool, RecordingMailer::new());

        let report = controller.admit_artifact(&path).await;
        assert!(!report.succeeded);
        assert!(matches!(report.outcome, Outcome::NoSectionGiven(_)));
        assert_eq!(controller.tool().add_calls(), 2);
    }

    #[tokio::test]
    async fn conflict_with_sibling_donor_copies_instead_of_adding() {
        let f = fixture();
        let path = write_bundle(&f, "chaos");
        let tool = MockRepoTool::new()
            .with_add_result(ToolResult::failed(1, "is already registered with other md5sum"))
            .with_package("sid", "foo", "1.2-3untangle+svn20080805T1130");
        let mut controller =
            Controller::new(&f.config, &f.registry, tool, RecordingMailer::new());

        let report = controller.admit_artifact(&path).await;
        assert!(report.succeeded);
        assert_eq!(controller.tool().add_calls(), 1);
        assert!(controller.tool().calls.contains(&ToolCall::Copy {
            from: "sid".to_string(),
            to: "chaos".to_string(),
            package: "foo".to_string(),
        }));
        assert_eq!(
            controller.tool().version_of("chaos", "foo"),
            Some("1.2-3untangle+svn20080805T1130")
        );
        let sent = &controller.mailer().sent;
        assert!(sent[0].body.contains("simply copied over"));
    }

    #[tokio::test]
    async fn conflict_without_donor_clears_and_retries_once() {
        let f = fixture();
        let path = write_bundle(&f, "chaos");
        // Only the target itself holds the conflicting version, so there is
        // no donor to copy from.
        let tool = MockRepoTool::new()
            .with_add_result(ToolResult::failed(1, "is already registered with other md5sum"))
            .with_package("chaos", "foo", "1.2-3untangle+svn20080805T1130");
        let mut controller =
            Controller::new(&f.config, &f.registry, tool, RecordingMailer::new());

        let report = controller.admit_artifact(&path).await;
        assert!(report.succeeded);
        // One failed add, conflicting entry removed, one retried add.
        assert_eq!(controller.tool().add_calls(), 2);
        assert!(controller.tool().calls.contains(&ToolCall::Remove {
            distribution: "chaos".to_string(),
            package: "foo".to_string(),
        }));
    }

    #[tokio::test]
    async fn conflict_that_survives_clearing_is_terminal() {
        let f = fixture();
        let path = write_bundle(&f, "chaos");
        let tool = MockRepoTool::new()
            .with_add_result(ToolResult::failed(1, "is already registered with other md5sum"))
            .with_add_result(ToolResult::failed(1, "is already registered with other md5sum"));
        let mut controller =
            Controller::new(&f.config, &f.registry, tool, RecordingMailer::new());

        let report = controller.admit_artifact(&path).await;
        assert!(!report.succeeded);
        assert!(matches!(
            report.outcome,
            Outcome::AlreadyRegistered { .. }
        ));
        assert_eq!(controller.tool().add_calls(), 2);
    }

    #[tokio::test]
    async fn failed_copy_falls_back_to_clearing() {
        let f = fixture();
        let path = write_bundle(&f, "chaos");
        let tool = MockRepoTool::new()
            .with_add_result(ToolResult::failed(1, "is already registered with other md5sum"))
            .with_package("sid", "foo", "1.2-3untangle+svn20080805T1130")
            .failing_copy();
        let mut controller =
            Controller::new(&f.config, &f.registry, tool, RecordingMailer::new());

        let report = controller.admit_artifact(&path).await;
        assert!(report.succeeded);
        // Donor copy failed, so the conflicting entry was removed from the
        // sibling and the add retried.
        assert_eq!(controller.tool().add_calls(), 2);
        assert!(controller.tool().calls.contains(&ToolCall::Remove {
            distribution: "sid".to_string(),
            package: "foo".to_string(),
        }));
    }

    #[tokio::test]
    async fn finalization_moves_what_it_can() {
        let f = fixture();
        // The manifest lists two files but only the .dsc ever arrived.
        let path = write_incoming(
            &f,
            "foo_1.2-3untangle_i386.changes",
            &changes_text("chaos"),
        );
        write_incoming(&f, "foo_1.2-3untangle.dsc", "dsc");
        let mut controller = Controller::new(
            &f.config,
            &f.registry,
            MockRepoTool::new(),
            RecordingMailer::new(),
        );

        let report = controller.admit_artifact(&path).await;
        assert!(report.succeeded);
        let processed = f.config.repository.processed_dir();
        assert!(processed.join("foo_1.2-3untangle_i386.changes").is_file());
        assert!(processed.join("foo_1.2-3untangle.dsc").is_file());
        assert!(!processed.join("foo_1.2-3untangle_i386.deb").exists());
    }

    #[tokio::test]
    async fn unparsable_artifact_is_finalized_as_failed() {
        let f = fixture();
        let path = write_incoming(&f, "garbage_i386.changes", "not a manifest");
        let mut controller = Controller::new(
            &f.config,
            &f.registry,
            MockRepoTool::new(),
            RecordingMailer::new(),
        );

        let report = controller.admit_artifact(&path).await;
        assert!(!report.succeeded);
        assert_eq!(controller.tool().add_calls(), 0);
        assert!(
            f.config
                .repository
                .failed_dir()
                .join("garbage_i386.changes")
                .is_file()
        );
        let sent = &controller.mailer().sent;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.contains("parse error"));
        assert_eq!(sent[0].recipients, vec!["admins@example.com"]);
    }

    #[tokio::test]
    async fn batch_keeps_going_after_failures() {
        let f = fixture();
        write_bundle(&f, "testing"); // policy violation
        write_incoming(&f, "bar_2.0_amd64.deb", "deb");
        let mut controller = Controller::new(
            &f.config,
            &f.registry,
            MockRepoTool::new(),
            RecordingMailer::new(),
        );

        let summary = controller.run_batch().await.unwrap();
        assert_eq!(summary.total(), 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 1);
    }

    #[test]
    fn scrubbing_filters_extracts_substitutes_and_dedups() {
        let f = fixture();
        let raw = vec![
            "Dev <dev@example.com>".to_string(),
            "Dev <dev@example.com>".to_string(),
            "Outsider <out@elsewhere.org>".to_string(),
            "Bot <buildbot@example.com>".to_string(),
        ];
        let scrubbed = scrub_recipients(&raw, &f.config.mail, &f.config.policy);
        assert_eq!(scrubbed, vec!["dev@example.com", "qa@example.com"]);
    }

    #[test]
    fn scrubbing_without_domain_keeps_everyone() {
        let f = fixture();
        let mut mail = f.config.mail.clone();
        mail.domain = String::new();
        let raw = vec!["Outsider <out@elsewhere.org>".to_string()];
        assert_eq!(
            scrub_recipients(&raw, &mail, &f.config.policy),
            vec!["out@elsewhere.org"]
        );
    }

    #[tokio::test]
    async fn always_copy_defaults_adds_admins_to_success_mail() {
        let mut f = fixture();
        f.config.mail.always_copy_default_recipients = true;
        let path = write_bundle(&f, "chaos");
        let mut controller = Controller::new(
            &f.config,
            &f.registry,
            MockRepoTool::new(),
            RecordingMailer::new(),
        );

        controller.admit_artifact(&path).await;
        let sent = &controller.mailer().sent;
        assert_eq!(
            sent[0].recipients,
            vec!["dev@example.com", "maint@example.com", "admins@example.com"]
        );
    }
}
