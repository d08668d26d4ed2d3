//! Scripted repository tool for tests.
//!
//! The mock keeps a queue of results for `add`, a simple in-memory
//! repository state for `list`/`remove`/`copy`, and a log of every call
//! made, so tests can assert both final repository state and the exact
//! call sequence (how many `add` attempts, whether policy short-circuited
//! the tool entirely).

use crate::repotool::{RepoTool, ToolResult};
use crate::upload::Upload;
use std::collections::{BTreeMap, VecDeque};

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    Add {
        distribution: String,
        package: String,
    },
    List {
        distribution: String,
        package: String,
    },
    Remove {
        distribution: String,
        package: String,
    },
    Copy {
        from: String,
        to: String,
        package: String,
    },
}

/// Builder-style scripted tool.
#[derive(Debug, Default)]
pub struct MockRepoTool {
    add_results: VecDeque<ToolResult>,
    versions: BTreeMap<(String, String), String>,
    fail_remove: bool,
    fail_copy: bool,
    pub calls: Vec<ToolCall>,
}

impl MockRepoTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next `add`. Once the queue is exhausted,
    /// `add` succeeds.
    pub fn with_add_result(mut self, result: ToolResult) -> Self {
        self.add_results.push_back(result);
        self
    }

    /// Seed the simulated repository with a package version.
    pub fn with_package(mut self, codename: &str, package: &str, version: &str) -> Self {
        self.versions.insert(
            (codename.to_string(), package.to_string()),
            version.to_string(),
        );
        self
    }

    pub fn failing_remove(mut self) -> Self {
        self.fail_remove = true;
        self
    }

    pub fn failing_copy(mut self) -> Self {
        self.fail_copy = true;
        self
    }

    /// Number of `add` invocations so far.
    pub fn add_calls(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, ToolCall::Add { .. }))
            .count()
    }

    /// Simulated repository state, for final-state assertions.
    pub fn version_of(&self, codename: &str, package: &str) -> Option<&str> {
        self.versions
            .get(&(codename.to_string(), package.to_string()))
            .map(String::as_str)
    }
}

impl RepoTool for MockRepoTool {
    async fn add(&mut self, upload: &Upload) -> ToolResult {
        self.calls.push(ToolCall::Add {
            distribution: upload.distribution.clone(),
            package: upload.package_name.clone(),
        });
        let result = self.add_results.pop_front().unwrap_or_else(|| ToolResult::ok(""));
        if result.success() {
            self.versions.insert(
                (upload.distribution.clone(), upload.package_name.clone()),
                upload.version.clone(),
            );
        }
        result
    }

    async fn list_version(&mut self, codename: &str, package: &str) -> Option<String> {
        self.calls.push(ToolCall::List {
            distribution: codename.to_string(),
            package: package.to_string(),
        });
        self.versions
            .get(&(codename.to_string(), package.to_string()))
            .cloned()
    }

    async fn remove(&mut self, codename: &str, package: &str) -> bool {
        self.calls.push(ToolCall::Remove {
            distribution: codename.to_string(),
            package: package.to_string(),
        });
        if self.fail_remove {
            return false;
        }
        self.versions
            .remove(&(codename.to_string(), package.to_string()));
        true
    }

    async fn copy(&mut self, from: &str, to: &str, package: &str) -> bool {
        self.calls.push(ToolCall::Copy {
            from: from.to_string(),
            to: to.to_string(),
            package: package.to_string(),
        });
        if self.fail_copy {
            return false;
        }
        if let Some(version) = self
            .versions
            .get(&(from.to_string(), package.to_string()))
            .cloned()
        {
            self.versions
                .insert((to.to_string(), package.to_string()), version);
        }
        true
    }
}
