//! Repository tool adapter.
//!
//! Four logical operations against the external repository manager
//! (reprepro): add, list, remove, copy. Each is one subprocess invocation
//! against the repository base path. The adapter never fails on a nonzero
//! exit; it hands the combined stdout/stderr and exit status back for
//! classification. The one shared mutable resource (the on-disk pool and
//! indices) is owned by these invocations, serialized by the controller.

use crate::config::Config;
use crate::upload::{Upload, UploadKind};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Exit status and combined output of one tool invocation. An absent exit
/// code means the process never ran to completion (spawn failure, timeout,
/// signal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub exit_code: Option<i32>,
    pub output: String,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            output: output.into(),
        }
    }

    pub fn failed(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            output: output.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// The contract the admission controller drives. Implemented by the real
/// reprepro adapter and by the scripted mock in [`crate::mock_tool`].
///
/// Admission is single-task by design (the tool is not safe to run
/// concurrently against one base path), so the futures need no Send bound.
#[allow(async_fn_in_trait)]
pub trait RepoTool {
    /// Add the upload's artifact to its target distribution. The caller
    /// classifies the result; this never errors.
    async fn add(&mut self, upload: &Upload) -> ToolResult;

    /// Version of a package in a distribution, if present. Taken from the
    /// last whitespace token of the listing, matching the historical
    /// behavior (the last architecture line wins when several are listed).
    async fn list_version(&mut self, codename: &str, package: &str) -> Option<String>;

    /// Remove a package from a distribution.
    async fn remove(&mut self, codename: &str, package: &str) -> bool;

    /// Copy a package between distributions of the same repository.
    async fn copy(&mut self, from: &str, to: &str, package: &str) -> bool;
}

/// The real adapter: `reprepro -V -b <base> …`.
#[derive(Debug, Clone)]
pub struct Reprepro {
    program: String,
    base_path: PathBuf,
    use_sudo: bool,
    timeout: Duration,
}

impl Reprepro {
    pub fn new(config: &Config) -> Self {
        Self {
            program: "reprepro".to_string(),
            base_path: config.repository.base_path.clone(),
            use_sudo: config.repository.use_sudo,
            timeout: config.retry.tool_timeout,
        }
    }

    /// Flags and operands for an `add`, after the base invocation.
    fn add_args(upload: &Upload) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        if let Some(section) = &upload.command.section {
            args.push("--section".to_string());
            args.push(section.clone());
        }
        if let Some(priority) = &upload.command.priority {
            args.push("--priority".to_string());
            args.push(priority.clone());
        }
        match upload.kind {
            UploadKind::SourceBundle => {
                args.push("include".to_string());
            }
            UploadKind::BinaryPackage => {
                if let Some(component) = &upload.command.component {
                    args.push("--component".to_string());
                    args.push(component.clone());
                }
                args.push("includedeb".to_string());
            }
        }
        args.push(upload.distribution.clone());
        args.push(upload.artifact_path.display().to_string());
        args
    }

    async fn run(&self, args: Vec<String>) -> ToolResult {
        let mut argv: Vec<String> = Vec::new();
        if self.use_sudo {
            argv.push(self.program.clone());
        }
        argv.push("-V".to_string());
        argv.push("-b".to_string());
        argv.push(self.base_path.display().to_string());
        argv.extend(args);
        let program = if self.use_sudo {
            "sudo"
        } else {
            self.program.as_str()
        };
        debug!(command = %format!("{} {}", program, argv.join(" ")),
               "running repository tool");

        let mut command = Command::new(program);
        command
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                debug!(exit = ?output.status.code(), "repository tool finished");
                ToolResult {
                    exit_code: output.status.code(),
                    output: combined,
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "failed to spawn repository tool");
                ToolResult {
                    exit_code: None,
                    output: format!("failed to run {program}: {e}"),
                }
            }
            Err(_) => {
                warn!(timeout = %humantime::format_duration(self.timeout),
                      "repository tool timed out");
                ToolResult {
                    exit_code: None,
                    output: format!(
                        "{program} timed out after {}",
                        humantime::format_duration(self.timeout)
                    ),
                }
            }
        }
    }
}

impl RepoTool for Reprepro {
    async fn add(&mut self, upload: &Upload) -> ToolResult {
        self.run(Self::add_args(upload)).await
    }

    async fn list_version(&mut self, codename: &str, package: &str) -> Option<String> {
        let result = self
            .run(vec![
                "list".to_string(),
                codename.to_string(),
                package.to_string(),
            ])
            .await;
        if !result.success() || result.output.trim().is_empty() {
            return None;
        }
        result.output.split_whitespace().last().map(str::to_string)
    }

    async fn remove(&mut self, codename: &str, package: &str) -> bool {
        info!(package, distribution = codename, "removing package");
        self.run(vec![
            "remove".to_string(),
            codename.to_string(),
            package.to_string(),
        ])
        .await
        .success()
    }

    async fn copy(&mut self, from: &str, to: &str, package: &str) -> bool {
        info!(package, from, to, "copying package between distributions");
        self.run(vec![
            "copy".to_string(),
            to.to_string(),
            from.to_string(),
            package.to_string(),
        ])
        .await
        .success()
    }
}
