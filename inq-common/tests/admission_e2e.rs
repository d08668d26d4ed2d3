//! End-to-end admission scenarios over a real queue directory, a scripted
//! repository tool, and a recording mailer.

use inq_common::config::{Config, RepositoryConfig};
use inq_common::controller::Controller;
use inq_common::mailer::RecordingMailer;
use inq_common::mock_tool::{MockRepoTool, ToolCall};
use inq_common::outcome::Outcome;
use inq_common::registry::Registry;
use inq_common::repotool::ToolResult;
use inq_common::scan;
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

struct Queue {
    _dir: tempfile::TempDir,
    config: Config,
    registry: Registry,
}

fn queue() -> Queue {
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
    std::fs::create_dir_all(config.repository.incoming_dir()).unwrap();
    scan::ensure_queue_dirs(&config.repository).unwrap();
    let registry = Registry::from_text("untangle", DISTRIBUTIONS, "", &config.policy).unwrap();
    Queue {
        _dir: dir,
        config,
        registry,
    }
}

fn drop_file(queue: &Queue, name: &str, content: &str) -> PathBuf {
    let path = queue.config.repository.incoming_dir().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

fn drop_bundle(queue: &Queue, distribution: &str) -> PathBuf {
    let changes = format!(
        "Source: foo\n\
         Version: 1.2-3untangle+svn20080805T1130\n\
         Distribution: {distribution}\n\
         Maintainer: Maint <maint@example.com>\n\
         Changed-By: Dev <dev@example.com>\n\
         Files:\n\
          0123 10 utils normal foo_1.2-3untangle.dsc\n\
          4567 20 utils normal foo_1.2-3untangle_i386.deb\n"
    );
    let path = drop_file(queue, "foo_1.2-3untangle_i386.changes", &changes);
    drop_file(queue, "foo_1.2-3untangle.dsc", "dsc");
    drop_file(queue, "foo_1.2-3untangle_i386.deb", "deb");
    path
}

// Scenario A: a binary package against the default distribution sails
// through and lands in processed/, with one success notification to the
// default recipients.
#[tokio::test]
async fn binary_package_happy_path() {
    let q = queue();
    let path = drop_file(&q, "foo_1.2.3_amd64.deb", "deb");
    let mut controller = Controller::new(
        &q.config,
        &q.registry,
        MockRepoTool::new(),
        RecordingMailer::new(),
    );

    let report = controller.admit_artifact(&path).await;
    assert!(report.succeeded);
    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.distribution, "chaos");
    assert!(
        q.config
            .repository
            .processed_dir()
            .join("foo_1.2.3_amd64.deb")
            .is_file()
    );
    let sent = &controller.mailer().sent;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.ends_with("succeeded"));
    assert_eq!(sent[0].recipients, vec!["admins@example.com"]);
}

// Scenario B: a source bundle aimed at testing by a non-administrator is
// rejected by policy; the tool is never called and the bundle is archived
// under processed/failed/.
#[tokio::test]
async fn testing_upload_without_permission_is_rejected() {
    let q = queue();
    let path = drop_bundle(&q, "testing");
    let mut controller = Controller::new(
        &q.config,
        &q.registry,
        MockRepoTool::new(),
        RecordingMailer::new(),
    );

    let report = controller.admit_artifact(&path).await;
    assert!(!report.succeeded);
    assert!(matches!(report.outcome, Outcome::PolicyViolation(_)));
    assert!(controller.tool().calls.is_empty());
    let failed = q.config.repository.failed_dir();
    for name in [
        "foo_1.2-3untangle_i386.changes",
        "foo_1.2-3untangle.dsc",
        "foo_1.2-3untangle_i386.deb",
    ] {
        assert!(failed.join(name).is_file(), "{name} not archived");
    }
    assert_eq!(controller.mailer().sent.len(), 1);
}

// Scenario C: a duplicate registration with no donor distribution is
// cleared from every unlocked distribution holding the version, then the
// add is retried exactly once and succeeds.
#[tokio::test]
async fn duplicate_registration_clears_and_retries() {
    let q = queue();
    let path = drop_bundle(&q, "chaos");
    let tool = MockRepoTool::new()
        .with_add_result(ToolResult::failed(
            1,
            "foo_1.2-3untangle_i386.deb is already registered with other md5sum",
        ))
        .with_package("chaos", "foo", "1.2-3untangle+svn20080805T1130")
        .with_package("sid", "foo", "1.2-3untangle+svn20080805T1130");
    let mut controller = Controller::new(&q.config, &q.registry, tool, RecordingMailer::new());

    let report = controller.admit_artifact(&path).await;
    assert!(report.succeeded);

    // sid held the same version, so it donated a copy before any clearing.
    let copies: Vec<&ToolCall> = controller
        .tool()
        .calls
        .iter()
        .filter(|c| matches!(c, ToolCall::Copy { .. }))
        .collect();
    assert_eq!(copies.len(), 1);
    assert_eq!(controller.tool().add_calls(), 1);
}

// Scenario C variant: when no sibling holds the version at all, the
// conflicting entries are removed and the add retried once.
#[tokio::test]
async fn duplicate_registration_without_donor_removes_then_retries() {
    let q = queue();
    let path = drop_bundle(&q, "chaos");
    let tool = MockRepoTool::new()
        .with_add_result(ToolResult::failed(
            1,
            "is already registered with other md5sum",
        ))
        .with_package("chaos", "foo", "1.2-3untangle+svn20080805T1130");
    let mut controller = Controller::new(&q.config, &q.registry, tool, RecordingMailer::new());

    let report = controller.admit_artifact(&path).await;
    assert!(report.succeeded);
    assert_eq!(controller.tool().add_calls(), 2);
    assert!(controller.tool().calls.contains(&ToolCall::Remove {
        distribution: "chaos".to_string(),
        package: "foo".to_string(),
    }));
    assert_eq!(
        controller.tool().version_of("chaos", "foo"),
        Some("1.2-3untangle+svn20080805T1130")
    );
}

// Scenario D: three consecutive missing-file failures exhaust the retry
// budget; exactly one failure notification goes out, carrying the raw
// diagnostic text.
#[tokio::test]
async fn persistent_missing_file_fails_after_three_tries() {
    let q = queue();
    let path = drop_bundle(&q, "chaos");
    let missing = "Cannot find file './foo_1.2-3untangle_i386.changes'";
    let tool = MockRepoTool::new()
        .with_add_result(ToolResult::failed(1, missing))
        .with_add_result(ToolResult::failed(1, missing))
        .with_add_result(ToolResult::failed(1, missing));
    let mut controller = Controller::new(&q.config, &q.registry, tool, RecordingMailer::new());

    let report = controller.admit_artifact(&path).await;
    assert!(!report.succeeded);
    assert!(matches!(report.outcome, Outcome::FileMissing(_)));
    assert_eq!(controller.tool().add_calls(), 3);

    let sent = &controller.mailer().sent;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.contains("failed (file missing)"));
    assert!(sent[0].body.contains(missing));
    assert!(
        q.config
            .repository
            .failed_dir()
            .join("foo_1.2-3untangle_i386.changes")
            .is_file()
    );
}

// A full batch: bundles first, orphan binaries second, failures isolated.
#[tokio::test]
async fn batch_processes_bundles_before_orphan_binaries() {
    let q = queue();
    drop_bundle(&q, "chaos");
    drop_file(&q, "bar_2.0_amd64.deb", "deb");
    let mut controller = Controller::new(
        &q.config,
        &q.registry,
        MockRepoTool::new(),
        RecordingMailer::new(),
    );

    let summary = controller.run_batch().await.unwrap();
    assert_eq!(summary.total(), 2);
    assert_eq!(summary.failed, 0);

    let adds: Vec<&ToolCall> = controller
        .tool()
        .calls
        .iter()
        .filter(|c| matches!(c, ToolCall::Add { .. }))
        .collect();
    assert_eq!(
        adds,
        vec![
            &ToolCall::Add {
                distribution: "chaos".to_string(),
                package: "foo".to_string(),
            },
            &ToolCall::Add {
                distribution: "chaos".to_string(),
                package: "bar".to_string(),
            },
        ]
    );
    // The bundle's .deb was not admitted on its own: only the manifest and
    // the orphan binary produced adds.
    assert!(q.config.repository.incoming_dir().read_dir().unwrap().next().is_none());
}
