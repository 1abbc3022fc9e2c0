//! Dependency declarations.
//!
//! A [`Requirement`] is the canonical form of every supported declaration
//! syntax: plain names with version specifiers, extras and markers, direct
//! URLs, VCS references and local paths. Requirements parse from a line
//! ([`Requirement::from_line`]), from the mapping form used by manifests
//! ([`Requirement::from_req_dict`]) and render back to both.

use crate::error::RequirementError;
use crate::formats;
use crate::markers::Marker;
use crate::specifiers::SpecifierSet;
use once_cell::sync::Lazy;
use pep508_rs::{Requirement as Pep508Requirement, VersionOrUrl};
use pylock_core::paths::{self, has_project_root, is_file_url, path_to_url, to_posix, url_to_path};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Not;
use std::path::{Path, PathBuf};
use toml_edit::Item;
use url::Url;

static EGG_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>[A-Za-z0-9][A-Za-z0-9._-]*)(?:\[(?P<extras>[^\]]*)\])?$").unwrap()
});

/// File name suffixes of installable archives.
const ARCHIVE_EXTENSIONS: &[&str] = &[
    ".whl", ".tar.gz", ".tgz", ".tar.bz2", ".tbz", ".tar.xz", ".txz", ".tar", ".zip",
];

/// Files marking a directory as an installable project.
pub const PROJECT_MARKERS: &[&str] = &["pyproject.toml", "setup.py", "setup.cfg"];

/// Supported version control systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VcsKind {
    Git,
    Hg,
    Svn,
    Bzr,
}

impl VcsKind {
    pub const ALL: [Self; 4] = [Self::Git, Self::Hg, Self::Svn, Self::Bzr];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Hg => "hg",
            Self::Svn => "svn",
            Self::Bzr => "bzr",
        }
    }

    /// Parses the `git+`-style prefix of a VCS URL.
    fn from_url(url: &str) -> Option<(Self, &str)> {
        Self::ALL.into_iter().find_map(|kind| {
            url.strip_prefix(kind.as_str())
                .and_then(|rest| rest.strip_prefix('+'))
                .map(|rest| (kind, rest))
        })
    }
}

impl fmt::Display for VcsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a requirement is obtained from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequirementSource {
    /// Resolved by name from a package index
    Named,
    /// A direct URL to an archive
    Url { url: String },
    /// A project directory or archive on the local filesystem
    LocalPath { path: String },
    /// A version control checkout
    Vcs {
        vcs: VcsKind,
        repo_url: String,
        reference: Option<String>,
        subdirectory: Option<String>,
    },
}

/// A canonical dependency declaration.
///
/// # Examples
///
/// ```
/// use pylock_pypi::Requirement;
///
/// let line = r#"requests[security,tests]==2.8.*,>=2.8.1; python_version < "2.7""#;
/// let req = Requirement::from_line(line, false).unwrap();
///
/// assert_eq!(req.name.as_deref(), Some("requests"));
/// assert_eq!(req.extras.iter().collect::<Vec<_>>(), ["security", "tests"]);
/// assert_eq!(req.specifier.to_string(), "==2.8.*,>=2.8.1");
/// assert_eq!(req.marker.as_ref().unwrap().to_string(), r#"python_version < "2.7""#);
/// assert_eq!(req.as_line(), line);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: Option<String>,
    pub extras: BTreeSet<String>,
    pub specifier: SpecifierSet,
    pub marker: Option<Marker>,
    pub source: RequirementSource,
    pub editable: bool,
}

impl Requirement {
    /// A named requirement with no constraints.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            extras: BTreeSet::new(),
            specifier: SpecifierSet::default(),
            marker: None,
            source: RequirementSource::Named,
            editable: false,
        }
    }

    /// Parses a requirement line.
    ///
    /// Local paths are checked to exist and to contain an installable
    /// project, unless they use the `${PROJECT_ROOT}` placeholder.
    pub fn from_line(line: &str, editable: bool) -> Result<Self, RequirementError> {
        parse_line(line, editable, true)
    }

    /// Parses a dependency line from package metadata without touching the
    /// filesystem.
    pub fn parse_dependency(line: &str) -> Result<Self, RequirementError> {
        parse_line(line, false, false)
    }

    /// Builds a requirement from its mapping form.
    ///
    /// # Examples
    ///
    /// ```
    /// use pylock_pypi::{Requirement, RequirementSpec};
    ///
    /// let spec = RequirementSpec::Version("<2.21.0,>=2.20.0".into());
    /// let req = Requirement::from_req_dict(Some("requests"), &spec).unwrap();
    /// assert_eq!(req.as_line(), "requests<2.21.0,>=2.20.0");
    /// ```
    pub fn from_req_dict(
        name: Option<&str>,
        spec: &RequirementSpec,
    ) -> Result<Self, RequirementError> {
        let context = || name.unwrap_or("<unnamed>").to_string();
        let detailed = match spec {
            RequirementSpec::Version(version) => {
                let name = name.ok_or_else(|| {
                    RequirementError::invalid(version.clone(), "a version-only entry needs a name")
                })?;
                let mut req = Self::named(name);
                req.specifier = parse_specifier(&context(), version)?;
                return Ok(req);
            }
            RequirementSpec::Detailed(detailed) => detailed,
        };

        let source = if let Some((vcs, repo_url)) = detailed.vcs() {
            RequirementSource::Vcs {
                vcs,
                repo_url: repo_url.to_string(),
                reference: detailed.reference.clone(),
                subdirectory: detailed.subdirectory.clone(),
            }
        } else if let Some(url) = &detailed.url {
            source_for_url(url)
        } else if let Some(path) = &detailed.path {
            if is_archive(path) && (Path::new(path).is_absolute() || has_project_root(path)) {
                RequirementSource::Url {
                    url: path_to_url(Path::new(path)),
                }
            } else {
                RequirementSource::LocalPath {
                    path: path.clone(),
                }
            }
        } else {
            RequirementSource::Named
        };

        let marker = detailed
            .marker
            .as_deref()
            .map(|m| {
                Marker::parse(m).map_err(|e| RequirementError::parse(m, e.position, e.reason))
            })
            .transpose()?;

        let req = Self {
            name: name.map(str::to_string),
            extras: detailed.extras.iter().cloned().collect(),
            specifier: parse_specifier(&context(), detailed.version.as_deref().unwrap_or(""))?,
            marker,
            source,
            editable: detailed.editable,
        };
        req.check_editable(&context())?;
        Ok(req)
    }

    fn check_editable(&self, line: &str) -> Result<(), RequirementError> {
        if self.editable
            && !matches!(
                self.source,
                RequirementSource::LocalPath { .. } | RequirementSource::Vcs { .. }
            )
        {
            return Err(RequirementError::EditableUnsupported {
                line: line.to_string(),
            });
        }
        Ok(())
    }

    /// Normalized project name used for comparisons.
    pub fn key(&self) -> Option<String> {
        self.name.as_deref().map(crate::markers::normalize_name)
    }

    pub fn is_named(&self) -> bool {
        matches!(self.source, RequirementSource::Named)
    }

    pub fn is_vcs(&self) -> bool {
        matches!(self.source, RequirementSource::Vcs { .. })
    }

    fn extras_suffix(&self) -> String {
        if self.extras.is_empty() {
            String::new()
        } else {
            format!(
                "[{}]",
                self.extras.iter().cloned().collect::<Vec<_>>().join(",")
            )
        }
    }

    fn marker_suffix(&self) -> String {
        self.marker
            .as_ref()
            .map(|m| format!("; {}", m))
            .unwrap_or_default()
    }

    /// Renders the requirement as a line that parses back to an equivalent
    /// requirement.
    ///
    /// Named local paths render as `name[extras] @ locator`, where absolute
    /// and `${PROJECT_ROOT}` paths become `file://` URLs and relative paths
    /// stay as written. Unnamed paths render as `path[extras]`.
    pub fn as_line(&self) -> String {
        let extras = self.extras_suffix();
        let marker = self.marker_suffix();
        let name = self.name.as_deref();

        match &self.source {
            RequirementSource::Named => format!(
                "{}{}{}{}",
                name.unwrap_or_default(),
                extras,
                self.specifier,
                marker
            ),
            RequirementSource::Url { url } => match name {
                Some(name) => format!("{}{} @ {}{}", name, extras, url, marker),
                None => format!("{}{}", url, marker),
            },
            RequirementSource::LocalPath { path } => {
                let editable = if self.editable { "-e " } else { "" };
                match name {
                    Some(name) => {
                        let absolute = Path::new(path).is_absolute() || has_project_root(path);
                        let locator = if absolute {
                            path_to_url(Path::new(path))
                        } else {
                            path.clone()
                        };
                        format!("{}{}{} @ {}{}", editable, name, extras, locator, marker)
                    }
                    None => format!("{}{}{}{}", editable, path, extras, marker),
                }
            }
            RequirementSource::Vcs {
                vcs,
                repo_url,
                reference,
                subdirectory,
            } => {
                let mut line = String::new();
                if self.editable {
                    line.push_str("-e ");
                }
                line.push_str(&format!("{}+{}", vcs, repo_url));
                if let Some(reference) = reference {
                    line.push_str(&format!("@{}", reference));
                }
                let mut fragment = Vec::new();
                if let Some(name) = name {
                    fragment.push(format!("egg={}{}", name, extras));
                }
                if let Some(subdirectory) = subdirectory {
                    fragment.push(format!("subdirectory={}", subdirectory));
                }
                if !fragment.is_empty() {
                    line.push('#');
                    line.push_str(&fragment.join("&"));
                }
                line.push_str(&marker);
                line
            }
        }
    }

    /// Renders the requirement in mapping form.
    ///
    /// Plain named requirements collapse to their specifier (`"*"` when
    /// unconstrained).
    pub fn as_req_dict(&self) -> (Option<String>, RequirementSpec) {
        let name = self.name.clone();
        if self.is_named() && self.extras.is_empty() && self.marker.is_none() && !self.editable {
            let version = if self.specifier.is_empty() {
                "*".to_string()
            } else {
                self.specifier.to_string()
            };
            return (name, RequirementSpec::Version(version));
        }

        let mut detailed = DetailedSpec {
            version: (!self.specifier.is_empty()).then(|| self.specifier.to_string()),
            marker: self.marker.as_ref().map(ToString::to_string),
            extras: self.extras.iter().cloned().collect(),
            editable: self.editable,
            ..DetailedSpec::default()
        };
        match &self.source {
            RequirementSource::Named => {}
            RequirementSource::Url { url } => detailed.url = Some(url.clone()),
            RequirementSource::LocalPath { path } => detailed.path = Some(path.clone()),
            RequirementSource::Vcs {
                vcs,
                repo_url,
                reference,
                subdirectory,
            } => {
                detailed.set_vcs(*vcs, repo_url.clone());
                detailed.reference = reference.clone();
                detailed.subdirectory = subdirectory.clone();
            }
        }
        (name, RequirementSpec::Detailed(Box::new(detailed)))
    }

    /// The form consumed by the artifact installer.
    pub fn as_ireq(&self) -> InstallRequirement {
        let link = match &self.source {
            RequirementSource::Named => None,
            RequirementSource::Url { url } => Some(Link::new(url.clone())),
            RequirementSource::LocalPath { path } => {
                let path = Path::new(path);
                let absolute = if path.is_absolute() || has_project_root(&to_posix(path)) {
                    path.to_path_buf()
                } else {
                    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
                };
                Some(Link::new(path_to_url(&absolute)))
            }
            RequirementSource::Vcs {
                vcs,
                repo_url,
                reference,
                subdirectory,
            } => {
                let mut url = format!("{}+{}", vcs, repo_url);
                if let Some(reference) = reference {
                    url.push_str(&format!("@{}", reference));
                }
                let mut fragment = Vec::new();
                if let Some(name) = &self.name {
                    fragment.push(format!("egg={}", name));
                }
                if let Some(subdirectory) = subdirectory {
                    fragment.push(format!("subdirectory={}", subdirectory));
                }
                if !fragment.is_empty() {
                    url.push('#');
                    url.push_str(&fragment.join("&"));
                }
                Some(Link::new(url))
            }
        };
        InstallRequirement {
            name: self.name.clone(),
            extras: self.extras.clone(),
            specifier: self.specifier.clone(),
            marker: self.marker.clone(),
            link,
            editable: self.editable,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_line())
    }
}

fn parse_specifier(line: &str, spec: &str) -> Result<SpecifierSet, RequirementError> {
    let spec = spec.trim();
    if spec.is_empty() || spec == "*" {
        return Ok(SpecifierSet::default());
    }
    let spec = spec
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(spec);
    SpecifierSet::parse(spec).map_err(|e| RequirementError::invalid(line, e.to_string()))
}

fn parse_extras(extras: Option<&str>) -> BTreeSet<String> {
    extras
        .map(|extras| {
            extras
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn strip_editable(line: &str) -> Option<&str> {
    ["-e ", "-e\t", "--editable ", "--editable="]
        .iter()
        .find_map(|flag| line.strip_prefix(flag))
}

fn looks_like_url(line: &str) -> bool {
    line.contains("://") || VcsKind::from_url(line).is_some()
}

/// Splits `line` into the declaration and the marker text.
///
/// URLs may contain `;`, so direct references only split on `"; "` or
/// `" ;"`.
fn split_marker(line: &str) -> (&str, Option<&str>) {
    let index = if looks_like_url(line) {
        line.find("; ").or_else(|| line.find(" ;"))
    } else {
        line.find(';')
    };
    match index {
        Some(index) => {
            let (body, rest) = line.split_at(index);
            let marker = rest.trim_start_matches([' ', '\t']).trim_start_matches(';');
            (body.trim(), Some(marker.trim_start()))
        }
        None => (line.trim(), None),
    }
}

fn parse_line(line: &str, editable: bool, validate: bool) -> Result<Requirement, RequirementError> {
    let original = line;
    let mut body = line.trim();
    let mut editable = editable;
    if let Some(rest) = strip_editable(body) {
        editable = true;
        body = rest.trim();
    }

    let (body, marker_text) = split_marker(body);
    let marker = match marker_text {
        Some(text) => {
            let trimmed = original.trim_end();
            let byte_offset = trimmed.len().saturating_sub(text.len());
            let offset = trimmed
                .get(..byte_offset)
                .map_or(0, |prefix| prefix.chars().count());
            let marker = Marker::parse(text)
                .map_err(|e| RequirementError::parse(original, offset + e.position, e.reason))?;
            Some(marker)
        }
        None => None,
    };

    if body.is_empty() {
        return Err(RequirementError::invalid(original, "empty requirement"));
    }

    let mut req = parse_body(body, original, validate)?;
    req.marker = marker;
    req.editable = editable;
    req.check_editable(original)?;
    Ok(req)
}

fn parse_body(body: &str, original: &str, validate: bool) -> Result<Requirement, RequirementError> {
    if VcsKind::from_url(body).is_some() {
        return parse_vcs(body, None, BTreeSet::new(), original);
    }

    if let Some((head, locator)) = split_direct_reference(body) {
        let Requirement {
            name,
            extras,
            specifier,
            ..
        } = parse_pep508(head, original)?;
        if !specifier.is_empty() {
            return Err(RequirementError::invalid(
                original,
                "a direct reference takes no version specifier",
            ));
        }
        let name = name.unwrap_or_default();
        if VcsKind::from_url(locator).is_some() {
            return parse_vcs(locator, Some(name), extras, original);
        }
        if !looks_like_url(locator) {
            return parse_path(locator, Some(name), extras, original, validate);
        }
        if !is_file_url(locator) {
            Url::parse(locator).map_err(|e| RequirementError::invalid(original, e.to_string()))?;
        }
        let source = source_for_url(locator);
        if validate && let RequirementSource::LocalPath { path } = &source {
            validate_path(path)?;
        }
        return Ok(Requirement {
            extras,
            source,
            ..Requirement::named(name)
        });
    }

    if looks_like_url(body) {
        let source = source_for_url(body);
        let name = match &source {
            RequirementSource::Url { url } => {
                name_from_fragment(url).or_else(|| Link::new(url.clone()).wheel_name())
            }
            RequirementSource::LocalPath { path } => {
                if validate {
                    validate_path(path)?;
                }
                formats::project_name(Path::new(path))
            }
            _ => None,
        };
        return Ok(Requirement {
            name,
            source,
            ..Requirement::named("")
        });
    }

    if is_path_like(body) {
        return parse_path(body, None, BTreeSet::new(), original, validate);
    }

    parse_pep508(body, original)
}

/// Splits `name[extras] @ locator` into its head and locator.
///
/// Bare URLs and paths containing `@` are left alone.
fn split_direct_reference(body: &str) -> Option<(&str, &str)> {
    let (head, locator) = body.split_once('@')?;
    let head = head.trim();
    let locator = locator.trim();
    if head.is_empty() || locator.is_empty() || head.contains(['/', '\\', ':']) {
        return None;
    }
    Some((head, locator))
}

/// Parses `name[extras] specifiers` through the PEP 508 grammar.
///
/// The name keeps its spelling from the line; extras come back normalized.
fn parse_pep508(body: &str, original: &str) -> Result<Requirement, RequirementError> {
    let parsed: Pep508Requirement = body.parse().map_err(|e: pep508_rs::Pep508Error| {
        let offset = original.find(body).map_or(0, |i| original[..i].chars().count());
        let start = body.get(..e.start).map_or(e.start, |prefix| prefix.chars().count());
        RequirementError::parse(original, offset + start, e.message.to_string())
    })?;

    let mut req = Requirement::named(written_name(body));
    req.extras = parsed.extras.iter().map(ToString::to_string).collect();
    match parsed.version_or_url {
        Some(VersionOrUrl::VersionSpecifier(specifiers)) => {
            req.specifier = parse_specifier(original, &specifiers.to_string())?;
        }
        Some(VersionOrUrl::Url(_)) => {
            return Err(RequirementError::invalid(original, "unexpected direct reference"));
        }
        None => {}
    }
    Ok(req)
}

/// The leading project name of a requirement line, as written.
fn written_name(body: &str) -> &str {
    let end = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(body.len());
    &body[..end]
}

fn is_path_like(value: &str) -> bool {
    value.starts_with('.')
        || value.starts_with('/')
        || value.contains('/')
        || value.contains('\\')
        || has_project_root(value)
        || value.as_bytes().get(1) == Some(&b':')
}

fn is_archive(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    ARCHIVE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Classifies a URL: `file://` URLs to non-archives are local paths.
fn source_for_url(url: &str) -> RequirementSource {
    if is_file_url(url) && !is_archive(Link::new(url.to_string()).url_without_fragment()) {
        if let Ok(path) = url_to_path(url) {
            let mut path = to_posix(&path);
            if let Some(index) = path.find(paths::PROJECT_ROOT_PLACEHOLDER) {
                path = path[index..].to_string();
            }
            return RequirementSource::LocalPath { path };
        }
    }
    RequirementSource::Url {
        url: url.to_string(),
    }
}

/// Checks that a local path exists and holds an installable project or
/// archive. Placeholder paths are checked later against the project root.
fn validate_path(path: &str) -> Result<(), RequirementError> {
    if has_project_root(path) {
        return Ok(());
    }
    let location = Path::new(path);
    if !location.exists() {
        return Err(RequirementError::PathNotFound {
            path: path.to_string(),
        });
    }
    if location.is_dir() && !is_installable_dir(location) {
        return Err(RequirementError::NotInstallable {
            path: path.to_string(),
        });
    }
    if location.is_file() && !is_archive(path) {
        return Err(RequirementError::NotInstallable {
            path: path.to_string(),
        });
    }
    Ok(())
}

/// `true` if `dir` contains one of [`PROJECT_MARKERS`].
pub fn is_installable_dir(dir: &Path) -> bool {
    PROJECT_MARKERS.iter().any(|marker| dir.join(marker).is_file())
}

/// Splits a trailing `[extras]` off a path, as in `./demo[tests]`.
fn split_path_extras(raw: &str) -> (&str, Option<&str>) {
    if let Some(stripped) = raw.strip_suffix(']')
        && let Some(open) = stripped.rfind('[')
    {
        return (stripped[..open].trim_end(), Some(&stripped[open + 1..]));
    }
    (raw, None)
}

fn parse_path(
    raw: &str,
    name: Option<String>,
    mut extras: BTreeSet<String>,
    original: &str,
    validate: bool,
) -> Result<Requirement, RequirementError> {
    let (raw, path_extras) = split_path_extras(raw);
    extras.extend(parse_extras(path_extras));
    let path = raw.replace('\\', "/");
    if validate {
        validate_path(&path)?;
    }

    let location = Path::new(&path);
    let source = if is_archive(&path) && (validate || location.is_absolute() || has_project_root(&path))
    {
        let absolute = if location.is_absolute() || has_project_root(&path) {
            PathBuf::from(&path)
        } else {
            std::path::absolute(location)
                .map_err(|e| RequirementError::invalid(original, e.to_string()))?
        };
        RequirementSource::Url {
            url: path_to_url(&absolute),
        }
    } else {
        RequirementSource::LocalPath { path: path.clone() }
    };

    let name = name.or_else(|| match &source {
        RequirementSource::Url { url } => Link::new(url.clone()).wheel_name(),
        _ if !has_project_root(&path) && location.is_dir() => formats::project_name(location),
        _ => None,
    });

    Ok(Requirement {
        name,
        extras,
        specifier: SpecifierSet::default(),
        marker: None,
        source,
        editable: false,
    })
}

fn parse_vcs(
    url: &str,
    name: Option<String>,
    mut extras: BTreeSet<String>,
    original: &str,
) -> Result<Requirement, RequirementError> {
    let (vcs, rest) = VcsKind::from_url(url)
        .ok_or_else(|| RequirementError::invalid(original, "unknown VCS scheme"))?;
    let (location, fragment) = match rest.split_once('#') {
        Some((location, fragment)) => (location, Some(fragment)),
        None => (rest, None),
    };

    let mut egg = None;
    let mut subdirectory = None;
    for part in fragment.into_iter().flat_map(|f| f.split('&')) {
        match part.split_once('=') {
            Some(("egg", value)) => egg = Some(value.to_string()),
            Some(("subdirectory", value)) => subdirectory = Some(value.to_string()),
            _ => {}
        }
    }

    let path_start = location
        .find("://")
        .map(|i| i + 3)
        .ok_or_else(|| RequirementError::invalid(original, "VCS URL needs a scheme"))?;
    let path_start = location[path_start..]
        .find('/')
        .map_or(location.len(), |i| path_start + i);
    let (repo_url, reference) = match location[path_start..].rfind('@') {
        Some(at) => {
            let at = path_start + at;
            (location[..at].to_string(), Some(location[at + 1..].to_string()))
        }
        None => (location.to_string(), None),
    };

    let name = match (name, egg) {
        (Some(name), _) => Some(name),
        (None, Some(egg)) => {
            let caps = EGG_NAME
                .captures(&egg)
                .ok_or_else(|| RequirementError::invalid(original, "invalid #egg= fragment"))?;
            extras.extend(parse_extras(caps.name("extras").map(|m| m.as_str())));
            Some(caps["name"].to_string())
        }
        (None, None) => None,
    };

    Ok(Requirement {
        name,
        extras,
        specifier: SpecifierSet::default(),
        marker: None,
        source: RequirementSource::Vcs {
            vcs,
            repo_url,
            reference: reference.filter(|r| !r.is_empty()),
            subdirectory,
        },
        editable: false,
    })
}

fn name_from_fragment(url: &str) -> Option<String> {
    let (_, fragment) = url.split_once('#')?;
    fragment
        .split('&')
        .find_map(|part| part.strip_prefix("egg="))
        .map(str::to_string)
}

/// Mapping form of a requirement, as found in manifest files.
///
/// Either a bare version specifier or a table of keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequirementSpec {
    Version(String),
    Detailed(Box<DetailedSpec>),
}

impl RequirementSpec {
    /// Reads the mapping form from a TOML value.
    pub fn from_toml_item(item: &Item) -> Option<Self> {
        if let Some(version) = item.as_str() {
            return Some(Self::Version(version.to_string()));
        }
        let table = item.as_table_like()?;
        let get_str = |key: &str| table.get(key).and_then(Item::as_str).map(str::to_string);

        let mut detailed = DetailedSpec {
            version: get_str("version"),
            marker: get_str("marker"),
            extras: table
                .get("extras")
                .and_then(Item::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            url: get_str("url"),
            path: get_str("path"),
            reference: get_str("ref"),
            editable: table
                .get("editable")
                .and_then(Item::as_bool)
                .unwrap_or(false),
            subdirectory: get_str("subdirectory"),
            ..DetailedSpec::default()
        };
        for vcs in VcsKind::ALL {
            if let Some(url) = get_str(vcs.as_str()) {
                detailed.set_vcs(vcs, url);
            }
        }
        if detailed.version.as_deref() == Some("*") {
            detailed.version = None;
        }
        Some(Self::Detailed(Box::new(detailed)))
    }
}

/// Table form of [`RequirementSpec`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailedSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
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
    #[serde(default, skip_serializing_if = "Not::not")]
    pub editable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdirectory: Option<String>,
}

impl DetailedSpec {
    fn vcs(&self) -> Option<(VcsKind, &str)> {
        [
            (VcsKind::Git, &self.git),
            (VcsKind::Hg, &self.hg),
            (VcsKind::Svn, &self.svn),
            (VcsKind::Bzr, &self.bzr),
        ]
        .into_iter()
        .find_map(|(kind, url)| url.as_deref().map(|url| (kind, url)))
    }

    fn set_vcs(&mut self, vcs: VcsKind, url: String) {
        let slot = match vcs {
            VcsKind::Git => &mut self.git,
            VcsKind::Hg => &mut self.hg,
            VcsKind::Svn => &mut self.svn,
            VcsKind::Bzr => &mut self.bzr,
        };
        *slot = Some(url);
    }
}

/// Location of an artifact: an archive URL, a local file or a VCS URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link {
    url: String,
}

impl Link {
    pub fn new(url: String) -> Self {
        Self { url }
    }

    /// Link to a local file or directory.
    pub fn from_path(path: &Path) -> Self {
        Self::new(path_to_url(path))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn url_without_fragment(&self) -> &str {
        self.url.split('#').next().unwrap_or(&self.url)
    }

    pub fn is_file(&self) -> bool {
        is_file_url(&self.url)
    }

    pub fn is_vcs(&self) -> bool {
        VcsKind::from_url(&self.url).is_some()
    }

    /// Local path of a `file://` link.
    pub fn file_path(&self) -> Option<PathBuf> {
        if !self.is_file() {
            return None;
        }
        url_to_path(self.url_without_fragment()).ok()
    }

    /// Last path segment, percent-decoded.
    pub fn filename(&self) -> String {
        let path = self.url_without_fragment().split('?').next().unwrap_or_default();
        let segment = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
        urlencoding::decode(segment)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| segment.to_string())
    }

    pub fn is_wheel(&self) -> bool {
        self.filename().to_ascii_lowercase().ends_with(".whl")
    }

    pub fn is_sdist(&self) -> bool {
        !self.is_wheel() && is_archive(&self.filename())
    }

    /// Project name encoded in a wheel filename.
    pub fn wheel_name(&self) -> Option<String> {
        if !self.is_wheel() {
            return None;
        }
        self.filename()
            .split('-')
            .next()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }

    /// `(hash name, digest)` from a `#sha256=...`-style fragment.
    pub fn hash(&self) -> Option<(String, String)> {
        let (_, fragment) = self.url.split_once('#')?;
        fragment.split('&').find_map(|part| {
            let (key, value) = part.split_once('=')?;
            matches!(key, "sha256" | "sha384" | "sha512" | "md5")
                .then(|| (key.to_string(), value.to_string()))
        })
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// What the artifact installer needs to know about a requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequirement {
    pub name: Option<String>,
    pub extras: BTreeSet<String>,
    pub specifier: SpecifierSet,
    pub marker: Option<Marker>,
    pub link: Option<Link>,
    pub editable: bool,
}

impl InstallRequirement {
    pub fn is_wheel(&self) -> bool {
        self.link.as_ref().is_some_and(Link::is_wheel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(s: &str) -> Requirement {
        Requirement::from_line(s, false).unwrap()
    }

    #[test]
    fn test_named_requirements() {
        let req = line("requests");
        assert_eq!(req.name.as_deref(), Some("requests"));
        assert!(req.specifier.is_empty());
        assert_eq!(req.as_req_dict(), (Some("requests".into()), RequirementSpec::Version("*".into())));

        let req = line("requests>=2.20.0,<2.21.0");
        assert_eq!(req.as_line(), "requests<2.21.0,>=2.20.0");

        let req = line("requests (>=2.0)");
        assert_eq!(req.as_line(), "requests>=2.0");
    }

    #[test]
    fn test_named_requirement_keeps_spelling() {
        let req = line("Flask_SQLAlchemy[Async]~=2.5");
        assert_eq!(req.name.as_deref(), Some("Flask_SQLAlchemy"));
        assert_eq!(req.extras, BTreeSet::from(["async".to_string()]));
        assert_eq!(req.as_line(), "Flask_SQLAlchemy[async]~=2.5");
    }

    #[test]
    fn test_direct_reference_rejects_specifier() {
        let err = Requirement::from_line("demo>=1.0 @ https://example.com/demo.zip", false);
        assert!(matches!(err, Err(RequirementError::Invalid { .. })));
        assert!(Requirement::from_line("demo @ https://exa mple.com/demo.zip", false).is_err());
    }

    #[test]
    fn test_marker_roundtrip() {
        let req = line(r#"requests==2.19.0; os_name == "nt""#);
        let (name, spec) = req.as_req_dict();
        assert_eq!(name.as_deref(), Some("requests"));
        let RequirementSpec::Detailed(detailed) = spec else {
            panic!("expected a detailed spec");
        };
        assert_eq!(detailed.version.as_deref(), Some("==2.19.0"));
        assert_eq!(detailed.marker.as_deref(), Some(r#"os_name == "nt""#));
    }

    #[test]
    fn test_url_requirement() {
        let req = line("pip @ https://github.com/pypa/pip/archive/1.3.1.zip");
        assert_eq!(
            req.source,
            RequirementSource::Url {
                url: "https://github.com/pypa/pip/archive/1.3.1.zip".into()
            }
        );
        assert_eq!(req.as_line(), "pip @ https://github.com/pypa/pip/archive/1.3.1.zip");

        let bare = line("https://github.com/pypa/pip/archive/1.3.1.zip");
        assert!(bare.name.is_none());
        assert_eq!(bare.as_line(), "https://github.com/pypa/pip/archive/1.3.1.zip");
    }

    #[test]
    fn test_url_name_from_wheel() {
        let req = line("http://fixtures.test/artifacts/demo-0.0.1-py2.py3-none-any.whl");
        assert_eq!(req.name.as_deref(), Some("demo"));
        assert!(req.as_ireq().is_wheel());
    }

    #[test]
    fn test_url_with_marker() {
        let req = line(r#"demo @ https://example.com/demo.zip; os_name == "nt""#);
        assert_eq!(req.marker.as_ref().unwrap().to_string(), r#"os_name == "nt""#);
        assert_eq!(req.as_line(), r#"demo @ https://example.com/demo.zip; os_name == "nt""#);
    }

    #[test]
    fn test_vcs_requirement() {
        let req = line("git+https://github.com/test-root/demo.git@master#egg=demo");
        assert_eq!(req.name.as_deref(), Some("demo"));
        assert_eq!(
            req.source,
            RequirementSource::Vcs {
                vcs: VcsKind::Git,
                repo_url: "https://github.com/test-root/demo.git".into(),
                reference: Some("master".into()),
                subdirectory: None,
            }
        );
        assert_eq!(
            req.as_line(),
            "git+https://github.com/test-root/demo.git@master#egg=demo"
        );
    }

    #[test]
    fn test_vcs_with_user_and_subdirectory() {
        let req = line("git+ssh://git@github.com/org/repo.git@v1.0#egg=pkg-a[tests]&subdirectory=pkg-a");
        let RequirementSource::Vcs {
            repo_url,
            reference,
            subdirectory,
            ..
        } = &req.source
        else {
            panic!("expected a VCS source");
        };
        assert_eq!(repo_url, "ssh://git@github.com/org/repo.git");
        assert_eq!(reference.as_deref(), Some("v1.0"));
        assert_eq!(subdirectory.as_deref(), Some("pkg-a"));
        assert!(req.extras.contains("tests"));
        assert_eq!(
            req.as_line(),
            "git+ssh://git@github.com/org/repo.git@v1.0#egg=pkg-a[tests]&subdirectory=pkg-a"
        );
    }

    #[test]
    fn test_editable_vcs() {
        let req = line("-e git+http://git.example.com/MyProject#egg=MyProject");
        assert!(req.editable);
        let (name, spec) = req.as_req_dict();
        assert_eq!(name.as_deref(), Some("MyProject"));
        let RequirementSpec::Detailed(detailed) = spec else {
            panic!("expected a detailed spec");
        };
        assert!(detailed.editable);
        assert_eq!(detailed.git.as_deref(), Some("http://git.example.com/MyProject"));
        assert_eq!(req.as_line(), "-e git+http://git.example.com/MyProject#egg=MyProject");
    }

    #[test]
    fn test_named_vcs_reference() {
        let req = line("demo @ git+https://github.com/test-root/demo.git@v2");
        assert_eq!(req.name.as_deref(), Some("demo"));
        assert!(req.is_vcs());
        assert_eq!(req.as_line(), "git+https://github.com/test-root/demo.git@v2#egg=demo");
    }

    #[test]
    fn test_editable_url_rejected() {
        let err =
            Requirement::from_line("-e https://github.com/pypa/pip/archive/1.3.1.zip", false)
                .unwrap_err();
        assert!(matches!(err, RequirementError::EditableUnsupported { .. }));
    }

    #[test]
    fn test_marker_parse_error_position() {
        let err = Requirement::from_line("requests; os_name=>'nt'", false).unwrap_err();
        match err {
            RequirementError::Parse { position, snippet, .. } => {
                assert_eq!(position, 17);
                assert_eq!(snippet, "=>'nt'");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_placeholder_path_skips_validation() {
        let req = line("-e ${PROJECT_ROOT}/projects/demo");
        assert!(req.editable);
        assert_eq!(
            req.source,
            RequirementSource::LocalPath {
                path: "${PROJECT_ROOT}/projects/demo".into()
            }
        );
        assert_eq!(req.as_line(), "-e ${PROJECT_ROOT}/projects/demo");
    }

    #[test]
    fn test_placeholder_file_url() {
        let req = line("demo @ file:///${PROJECT_ROOT}/projects/demo");
        assert_eq!(
            req.source,
            RequirementSource::LocalPath {
                path: "${PROJECT_ROOT}/projects/demo".into()
            }
        );
        assert_eq!(req.as_line(), "demo @ file:///${PROJECT_ROOT}/projects/demo");

        let req = line("demo @ file:///${PROJECT_ROOT}/dist/demo-0.0.1.tar.gz");
        assert_eq!(
            req.source,
            RequirementSource::Url {
                url: "file:///${PROJECT_ROOT}/dist/demo-0.0.1.tar.gz".into()
            }
        );
    }

    #[test]
    fn test_invalid_lines() {
        assert!(Requirement::from_line("", false).is_err());
        assert!(Requirement::from_line("requests>=abc", false).is_err());
        assert!(Requirement::from_line("-requests", false).is_err());
    }

    #[test]
    fn test_parse_dependency_does_not_touch_filesystem() {
        let req = Requirement::parse_dependency("./does-not-exist").unwrap();
        assert_eq!(
            req.source,
            RequirementSource::LocalPath {
                path: "./does-not-exist".into()
            }
        );
    }

    #[test]
    fn test_req_dict_roundtrip() {
        for source in [
            "requests",
            "requests<2.21.0,>=2.20.0",
            r#"requests==2.19.0; os_name == "nt""#,
            r#"requests[security,tests]==2.8.*,>=2.8.1; python_version < "2.7""#,
            "pip @ https://github.com/pypa/pip/archive/1.3.1.zip",
            "-e git+http://git.example.com/MyProject#egg=MyProject",
            "git+http://git.example.com/MyProject#egg=MyProject",
            "https://github.com/pypa/pip/archive/1.3.1.zip",
        ] {
            let req = line(source);
            let (name, spec) = req.as_req_dict();
            let back = Requirement::from_req_dict(name.as_deref(), &spec).unwrap();
            assert_eq!(back.as_line(), req.as_line(), "round-tripping {:?}", source);
            assert_eq!(req.as_line(), source);
        }
    }

    #[test]
    fn test_req_dict_serde() {
        let req = line(r#"requests[security]>=2.0; os_name == "nt""#);
        let (_, spec) = req.as_req_dict();
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "version": ">=2.0",
                "marker": "os_name == \"nt\"",
                "extras": ["security"],
            })
        );

        let plain: RequirementSpec = serde_json::from_str("\"*\"").unwrap();
        assert_eq!(plain, RequirementSpec::Version("*".into()));
    }

    #[test]
    fn test_from_toml_item() {
        let doc: toml_edit::DocumentMut = r#"
plain = ">=1.0"
detailed = { git = "https://github.com/a/b.git", ref = "main", editable = true, extras = ["x"] }
"#
        .parse()
        .unwrap();

        let plain = RequirementSpec::from_toml_item(&doc["plain"]).unwrap();
        assert_eq!(plain, RequirementSpec::Version(">=1.0".into()));

        let detailed = RequirementSpec::from_toml_item(&doc["detailed"]).unwrap();
        let req = Requirement::from_req_dict(Some("b"), &detailed).unwrap();
        assert_eq!(req.as_line(), "-e git+https://github.com/a/b.git@main#egg=b[x]");
    }

    #[test]
    fn test_from_req_dict_editable_url_rejected() {
        let spec = RequirementSpec::Detailed(Box::new(DetailedSpec {
            url: Some("https://example.com/a.zip".into()),
            editable: true,
            ..DetailedSpec::default()
        }));
        assert!(matches!(
            Requirement::from_req_dict(Some("a"), &spec),
            Err(RequirementError::EditableUnsupported { .. })
        ));
    }

    #[test]
    fn test_link() {
        let link = Link::new(
            "https://files.example.com/demo-0.0.1-py2.py3-none-any.whl#sha256=abc".into(),
        );
        assert!(link.is_wheel());
        assert!(!link.is_sdist());
        assert_eq!(link.filename(), "demo-0.0.1-py2.py3-none-any.whl");
        assert_eq!(link.wheel_name().as_deref(), Some("demo"));
        assert_eq!(link.hash(), Some(("sha256".into(), "abc".into())));
        assert!(!link.is_file());

        let file = Link::from_path(Path::new("/tmp/my dir/demo-0.0.1.tar.gz"));
        assert!(file.is_file());
        assert!(file.is_sdist());
        assert_eq!(file.filename(), "demo-0.0.1.tar.gz");
        assert_eq!(
            file.file_path(),
            Some(PathBuf::from("/tmp/my dir/demo-0.0.1.tar.gz"))
        );
    }

    #[test]
    fn test_as_ireq() {
        assert!(line("requests>=2").as_ireq().link.is_none());
        let ireq = line("git+https://github.com/a/b.git@main#egg=b").as_ireq();
        assert_eq!(
            ireq.link.unwrap().url(),
            "git+https://github.com/a/b.git@main#egg=b"
        );
    }

    #[test]
    fn test_key_normalization() {
        assert_eq!(line("Django_Rest.Framework").key().as_deref(), Some("django-rest-framework"));
    }
}
