//! Upload policy chain.
//!
//! Ordered predicate rules over an upload and the loaded registry. The
//! first failing rule wins and the order is load-bearing: later rules
//! assume the existence and locking checks before them already passed.
//! The chain exists to keep unreviewed builds out of production-facing
//! distributions while letting administrators and automation identities
//! through controlled exceptions.

use crate::config::PolicyConfig;
use crate::outcome::Outcome;
use crate::registry::Registry;
use crate::upload::{Upload, UploadKind};
use regex::Regex;
use std::sync::LazyLock;

/// Versions carrying a `+<word><digits>T<digits>` stamp were built from a
/// locally modified tree.
static LOCAL_BUILD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\+[a-z]+[0-9]+T[0-9]+").expect("valid regex"));

/// Marker token present in versions built from the VCS.
const VCS_MARKER: &str = "svn";

/// Evaluate the chain top to bottom. `Ok(())` admits the upload to the
/// submission stage; an error is the typed violation to finalize with.
pub fn check(upload: &Upload, registry: &Registry, policy: &PolicyConfig) -> Result<(), Outcome> {
    let name = &upload.package_name;
    let username = upload.uploader_username();
    let is_admin = username.is_some_and(|u| policy.admins.iter().any(|a| a == u));
    let is_automation =
        username.is_some_and(|u| policy.automation_uploaders.iter().any(|a| a == u));

    // 1. The upload must target this repository.
    match upload.repository.as_deref() {
        None => {
            return Err(Outcome::NoRepository(format!(
                "{name} doesn't specify a repository to be added to."
            )));
        }
        Some(repository) if repository != registry.name() => {
            return Err(Outcome::NoRepository(format!(
                "{name} specifies an unknown repository ({repository}) to be added to."
            )));
        }
        Some(_) => {}
    }

    // 2. The target distribution must exist.
    let distribution = &upload.distribution;
    if registry.get(distribution).is_none() {
        return Err(Outcome::UnknownDistribution(format!(
            "{name} specifies an unknown distribution ({distribution}) to be added to."
        )));
    }

    // 3. Testing distributions take uploads from administrators only.
    if registry.is_testing(distribution) && !is_admin {
        return Err(Outcome::PolicyViolation(format!(
            "{name} was intended for {distribution}, but you don't have permission to upload there."
        )));
    }

    // 4. Source bundles must be built from the VCS, unless an administrator
    //    forces the version.
    if upload.kind == UploadKind::SourceBundle
        && !upload.version.contains(VCS_MARKER)
        && !is_admin
    {
        return Err(Outcome::PolicyViolation(format!(
            "{} doesn't contain '{VCS_MARKER}', but you don't have permission to force the version.",
            upload.version
        )));
    }

    // 5. Locked distributions take no uploads at all.
    if registry.is_locked(distribution) {
        return Err(Outcome::PolicyViolation(format!(
            "{name} was intended for {distribution}, but this distribution is now locked."
        )));
    }

    // 6. Root builds are never processed.
    if username.is_some_and(|u| u.to_lowercase().contains("root")) {
        return Err(Outcome::PolicyViolation(format!(
            "{name} was built by root, not processing."
        )));
    }

    // 7. QA distributions and automation identities imply each other.
    if registry.is_qa(distribution) && !(is_automation || is_admin) {
        return Err(Outcome::PolicyViolation(format!(
            "{name} was intended for {distribution}, but was not built by an automation \
             identity or a release master."
        )));
    }
    if is_automation && !registry.is_qa(distribution) {
        return Err(Outcome::PolicyViolation(format!(
            "{name} was built by an automation identity, but was not intended for a QA \
             distribution."
        )));
    }

    // 8. Developer distributions only take locally modified builds.
    if registry.is_developer(distribution) && !LOCAL_BUILD_RE.is_match(&upload.version) {
        return Err(Outcome::PolicyViolation(format!(
            "{name} was intended for user distribution '{distribution}', but was not built \
             from a locally modified tree."
        )));
    }

    Ok(())
}
