//! Distribution registry: the repository's `conf/distributions` and
//! `conf/updates` files, parsed once at load.
//!
//! Both files are paragraph-delimited `Key: value` text. A distribution
//! paragraph may reference an updater paragraph by name through its
//! `Update:` field. Classification (locked, testing, developer, QA) is
//! computed at load and cached; it never changes during an admission run.

use crate::config::PolicyConfig;
use crate::errors::ConfigError;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// An updater record from `conf/updates`.
#[derive(Debug, Clone)]
pub struct Updater {
    pub name: String,
    pub method: Option<String>,
    pub suite: Option<String>,
    pub components: Vec<String>,
}

/// One distribution paragraph from `conf/distributions`.
#[derive(Debug, Clone)]
pub struct Distribution {
    pub codename: String,
    pub origin: Option<String>,
    pub label: Option<String>,
    pub suite: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub components: Vec<String>,
    pub architectures: Vec<String>,
    /// Name of the updater paragraph this distribution pulls from.
    pub update: Option<String>,
}

impl Distribution {
    /// Stable-like suites are locked against further uploads. "unstable"
    /// contains "stable", hence the second check.
    pub fn is_locked(&self) -> bool {
        match self.suite.as_deref() {
            Some(suite) => suite.contains("stable") && !suite.contains("unstable"),
            None => false,
        }
    }

    /// Distributions without a suite are per-developer channels.
    pub fn is_developer(&self) -> bool {
        self.suite.is_none()
    }

    /// Re-render the paragraph in configuration order.
    pub fn to_paragraph(&self) -> String {
        let mut s = format!("Codename: {}\n", self.codename);
        push_field(&mut s, "Origin", &self.origin);
        push_field(&mut s, "Label", &self.label);
        push_field(&mut s, "Suite", &self.suite);
        push_field(&mut s, "Version", &self.version);
        push_field(&mut s, "Description", &self.description);
        if !self.components.is_empty() {
            s.push_str(&format!("Components: {}\n", self.components.join(" ")));
        }
        if !self.architectures.is_empty() {
            s.push_str(&format!(
                "Architectures: {}\n",
                self.architectures.join(" ")
            ));
        }
        push_field(&mut s, "Update", &self.update);
        s
    }
}

/// The loaded registry: distributions, updaters, and cached classification.
#[derive(Debug, Clone)]
pub struct Registry {
    name: String,
    distributions: BTreeMap<String, Distribution>,
    updaters: BTreeMap<String, Updater>,
    locked: BTreeSet<String>,
    testing: BTreeSet<String>,
    developer: BTreeSet<String>,
    qa: BTreeSet<String>,
}

impl Registry {
    /// Load the registry from a repository base path. The distributions
    /// file is required; a missing updates file means no updaters.
    pub fn load(base_path: &Path, policy: &PolicyConfig) -> Result<Registry, ConfigError> {
        let name = base_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let distributions_file = base_path.join("conf").join("distributions");
        let distributions =
            std::fs::read_to_string(&distributions_file).map_err(|source| ConfigError::Io {
                path: distributions_file.clone(),
                source,
            })?;
        let updates_file = base_path.join("conf").join("updates");
        let updates = std::fs::read_to_string(&updates_file).unwrap_or_default();
        Self::from_text(&name, &distributions, &updates, policy)
    }

    /// Build a registry from in-memory configuration text.
    pub fn from_text(
        name: &str,
        distributions: &str,
        updates: &str,
        policy: &PolicyConfig,
    ) -> Result<Registry, ConfigError> {
        let mut updaters = BTreeMap::new();
        for paragraph in parse_paragraphs(updates, "updates")? {
            let Some(updater_name) = paragraph.get("Name").cloned() else {
                return Err(malformed("updates", "paragraph without a Name: field"));
            };
            updaters.insert(
                updater_name.clone(),
                Updater {
                    name: updater_name,
                    method: paragraph.get("Method").cloned(),
                    suite: paragraph.get("Suite").cloned(),
                    components: split_list(paragraph.get("Components")),
                },
            );
        }

        let mut dists = BTreeMap::new();
        for paragraph in parse_paragraphs(distributions, "distributions")? {
            let Some(codename) = paragraph.get("Codename").cloned() else {
                return Err(malformed(
                    "distributions",
                    "paragraph without a Codename: field",
                ));
            };
            let update = paragraph.get("Update").cloned();
            if let Some(update) = &update {
                if !updaters.contains_key(update) {
                    return Err(malformed(
                        "distributions",
                        &format!("{codename} references unknown updater '{update}'"),
                    ));
                }
            }
            dists.insert(
                codename.clone(),
                Distribution {
                    codename,
                    origin: paragraph.get("Origin").cloned(),
                    label: paragraph.get("Label").cloned(),
                    suite: paragraph.get("Suite").cloned(),
                    version: paragraph.get("Version").cloned(),
                    description: paragraph.get("Description").cloned(),
                    components: split_list(paragraph.get("Components")),
                    architectures: split_list(paragraph.get("Architectures")),
                    update,
                },
            );
        }
        if dists.is_empty() {
            return Err(malformed("distributions", "no distribution paragraphs"));
        }

        let mut locked = BTreeSet::new();
        let mut testing = BTreeSet::new();
        let mut developer = BTreeSet::new();
        let mut qa = BTreeSet::new();
        for d in dists.values() {
            if d.is_locked() {
                locked.insert(d.codename.clone());
            }
            if d.is_developer() {
                developer.insert(d.codename.clone());
            }
            let named_testing = policy
                .testing_distributions
                .iter()
                .any(|t| t == &d.codename || Some(t.as_str()) == d.suite.as_deref());
            if named_testing {
                testing.insert(d.codename.clone());
            }
            if policy.qa_distributions.iter().any(|q| q == &d.codename) {
                qa.insert(d.codename.clone());
            }
        }

        Ok(Registry {
            name: name.to_string(),
            distributions: dists,
            updaters,
            locked,
            testing,
            developer,
            qa,
        })
    }

    /// The registry's identity (the repository base path's basename).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, codename: &str) -> Option<&Distribution> {
        self.distributions.get(codename)
    }

    pub fn updater(&self, name: &str) -> Option<&Updater> {
        self.updaters.get(name)
    }

    pub fn is_locked(&self, codename: &str) -> bool {
        self.locked.contains(codename)
    }

    pub fn is_testing(&self, codename: &str) -> bool {
        self.testing.contains(codename)
    }

    pub fn is_developer(&self, codename: &str) -> bool {
        self.developer.contains(codename)
    }

    pub fn is_qa(&self, codename: &str) -> bool {
        self.qa.contains(codename)
    }

    /// Unlocked distributions in codename order.
    pub fn unlocked(&self) -> impl Iterator<Item = &Distribution> {
        self.distributions
            .values()
            .filter(|d| !self.locked.contains(&d.codename))
    }

    pub fn distributions(&self) -> impl Iterator<Item = &Distribution> {
        self.distributions.values()
    }
}

fn push_field(s: &mut String, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        s.push_str(&format!("{key}: {value}\n"));
    }
}

fn malformed(which: &str, message: &str) -> ConfigError {
    ConfigError::MalformedRegistry {
        path: which.into(),
        message: message.to_string(),
    }
}

fn split_list(value: Option<&String>) -> Vec<String> {
    value
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Split paragraph-delimited `Key: value` text. Comment lines are skipped;
/// indented lines continue the previous value.
fn parse_paragraphs(
    text: &str,
    which: &str,
) -> Result<Vec<BTreeMap<String, String>>, ConfigError> {
    let mut paragraphs = Vec::new();
    let mut current: BTreeMap<String, String> = BTreeMap::new();
    let mut last_key: Option<String> = None;

    for line in text.lines() {
        if line.trim_start().starts_with('#') {
            continue;
        }
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            last_key = None;
            continue;
        }
        if line.starts_with(char::is_whitespace) {
            let Some(key) = &last_key else {
                return Err(malformed(which, "continuation line without a field"));
            };
            if let Some(value) = current.get_mut(key) {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(malformed(which, &format!("line without a field: {line:?}")));
        };
        let key = key.trim().to_string();
        current.insert(key.clone(), value.trim().to_string());
        last_key = Some(key);
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs)
}
