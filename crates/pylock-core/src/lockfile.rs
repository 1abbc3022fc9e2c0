//! Lockfile entry schema.
//!
//! A lockfile records, for every resolved dependency, the pinned version and
//! the exact location it came from. Entries are produced by candidates after
//! metadata resolution and consumed by the lockfile writer.

use serde::{Deserialize, Serialize};
use std::ops::Not;

/// Pinned resolution record for one dependency.
///
/// Only the keys relevant to the dependency's source are present; absent
/// keys are skipped on serialization.
///
/// # Examples
///
/// ```
/// use pylock_core::LockfileEntry;
///
/// let entry = LockfileEntry::new("requests", "2.19.1")
///     .with_marker(Some("python_version >= \"3.6\"".into()));
/// assert_eq!(entry.name, "requests");
/// assert!(entry.url.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockfileEntry {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bzr: Option<String>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdirectory: Option<String>,
    #[serde(default, skip_serializing_if = "Not::not")]
    pub editable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl LockfileEntry {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn with_marker(mut self, marker: Option<String>) -> Self {
        self.marker = marker;
        self
    }

    /// Sets the repository URL under the key named after the VCS kind.
    pub fn set_vcs_url(&mut self, vcs: &str, url: impl Into<String>) {
        let url = Some(url.into());
        match vcs {
            "git" => self.git = url,
            "hg" => self.hg = url,
            "svn" => self.svn = url,
            "bzr" => self.bzr = url,
            other => tracing::warn!("unknown VCS kind in lockfile entry: {}", other),
        }
    }

    /// Returns `(kind, url)` for VCS entries.
    pub fn vcs(&self) -> Option<(&'static str, &str)> {
        [
            ("git", &self.git),
            ("hg", &self.hg),
            ("svn", &self.svn),
            ("bzr", &self.bzr),
        ]
        .into_iter()
        .find_map(|(kind, url)| url.as_deref().map(|url| (kind, url)))
    }
}
