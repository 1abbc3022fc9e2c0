//! Candidates: one requirement resolved to an artifact and its metadata.
//!
//! A [`Candidate`] walks through `Unresolved → Prepared → MetadataExtracted
//! → Built`. Metadata is looked up lazily, in this order, and cached on the
//! instance:
//!
//! 1. a wheel, either the artifact itself or one already in the wheel cache
//! 2. a static `pyproject.toml` dialect in the source tree
//! 3. the project's build backend, falling back to raw metadata files
//!    (`*.egg-info`, `setup.cfg`, `setup.py`) when the build fails

use crate::archive;
use crate::environment::Environment;
use crate::error::{ExtrasError, PypiError, RequirementError, Result};
use crate::formats;
use crate::markers::normalize_name;
use crate::metadata::{self, Metadata};
use crate::requirements::{Link, Requirement, RequirementSource, is_installable_dir};
use pylock_core::paths::{
    absolutize, collapse_project_root_url, expand_project_root, expand_project_root_url,
    has_project_root, relative_to_root, to_posix,
};
use pylock_core::{LockfileEntry, file_hash, link_fingerprint};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Progress of a candidate through the resolution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CandidateState {
    Unresolved,
    /// Source tree or artifact is available locally
    Prepared,
    MetadataExtracted,
    Built,
}

/// A requirement bound to a concrete artifact in a target environment.
pub struct Candidate<'a> {
    req: &'a Requirement,
    env: &'a Environment,
    name: Option<String>,
    version: Option<String>,
    link: Option<Link>,
    state: CandidateState,
    source_dir: Option<PathBuf>,
    artifact: Option<PathBuf>,
    wheel: Option<PathBuf>,
    metadata: Option<Metadata>,
    revision: Option<String>,
    extras_error: Option<ExtrasError>,
    unpacked: Option<TempDir>,
}

impl<'a> Candidate<'a> {
    /// Creates a candidate for a requirement that carries its own location
    /// (URL, path or VCS).
    pub fn new(req: &'a Requirement, env: &'a Environment) -> Self {
        let link = resolve_link(req, env);
        Self {
            req,
            env,
            name: req.name.clone(),
            version: req.specifier.pinned_version().map(str::to_string),
            link,
            state: CandidateState::Unresolved,
            source_dir: None,
            artifact: None,
            wheel: None,
            metadata: None,
            revision: None,
            extras_error: None,
            unpacked: None,
        }
    }

    /// Creates a candidate for a named requirement whose artifact was found
    /// elsewhere, e.g. on a package index.
    pub fn with_link(req: &'a Requirement, env: &'a Environment, link: Link) -> Self {
        let mut candidate = Self::new(req, env);
        candidate.link = Some(link);
        candidate
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn requirement(&self) -> &Requirement {
        self.req
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn link(&self) -> Option<&Link> {
        self.link.as_ref()
    }

    pub fn state(&self) -> CandidateState {
        self.state
    }

    pub fn source_dir(&self) -> Option<&Path> {
        self.source_dir.as_deref()
    }

    pub fn wheel(&self) -> Option<&Path> {
        self.wheel.as_deref()
    }

    /// Symbolic VCS reference requested by the requirement.
    pub fn vcs_ref(&self) -> Option<&str> {
        match &self.req.source {
            RequirementSource::Vcs { reference, .. } => reference.as_deref(),
            _ => None,
        }
    }

    /// Pinned VCS revision, known after preparation.
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// Requested extras the package does not declare, from the last call to
    /// [`get_dependencies_from_metadata`](Self::get_dependencies_from_metadata).
    pub fn extras_error(&self) -> Option<&ExtrasError> {
        self.extras_error.as_ref()
    }

    /// Forgets a located or built wheel so the next step looks it up again.
    pub fn clear_wheel(&mut self) {
        self.wheel = None;
        if self.state == CandidateState::Built {
            self.state = CandidateState::MetadataExtracted;
        }
    }

    fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.link.as_ref().map(|l| l.url().to_string()))
            .unwrap_or_else(|| "<unknown>".to_string())
    }

    /// Makes the source tree or artifact available locally.
    ///
    /// For archives that need building, an existing wheel in the cache is
    /// used instead and nothing is fetched.
    pub fn prepare(&mut self) -> Result<()> {
        if self.state != CandidateState::Unresolved {
            return Ok(());
        }

        let req = self.req;
        if let RequirementSource::Vcs {
            vcs,
            repo_url,
            reference,
            subdirectory,
        } = &req.source
        {
            let dest = self.env.src_dir().join(self.checkout_dir_name());
            fs::create_dir_all(self.env.src_dir())?;
            let revision = self
                .env
                .vcs_backend()
                .checkout(*vcs, repo_url, reference.as_deref(), &dest)?;
            tracing::debug!("checked out {} at {}", repo_url, revision);
            self.revision = Some(revision);
            self.source_dir = Some(match subdirectory {
                Some(sub) => dest.join(sub),
                None => dest,
            });
            if let Some(key) = self.cache_key()
                && let Some(wheel) = self.env.wheel_cache().cached_wheel(&key)
            {
                tracing::debug!("using cached wheel {} for {}", wheel.display(), repo_url);
                self.wheel = Some(wheel);
            }
            self.state = CandidateState::Prepared;
            return Ok(());
        }

        let link = self.link.clone().ok_or_else(|| {
            PypiError::artifact(self.display_name(), "no artifact link to prepare")
        })?;

        if let Some(path) = link.file_path()
            && (path.is_dir() || !path.exists())
        {
            self.source_dir = Some(check_local_dir(&path, req)?);
        } else if !link.is_wheel()
            && let Some(key) = self.cache_key()
            && let Some(wheel) = self.env.wheel_cache().cached_wheel(&key)
        {
            tracing::debug!("using cached wheel {} for {}", wheel.display(), link);
            self.wheel = Some(wheel);
        } else {
            let download_dir = self.env.download_dir();
            fs::create_dir_all(&download_dir)?;
            let artifact = self.env.artifacts().fetch(&link, &download_dir)?;
            if link.is_wheel() {
                self.wheel = Some(artifact.clone());
            } else {
                let unpacked = tempfile::Builder::new()
                    .prefix("unpacked-")
                    .tempdir_in(&download_dir)?;
                self.source_dir = Some(archive::unpack_sdist(&artifact, unpacked.path())?);
                self.unpacked = Some(unpacked);
            }
            self.artifact = Some(artifact);
        }

        self.state = CandidateState::Prepared;
        Ok(())
    }

    /// Key under which a built wheel may be cached. Local trees and
    /// editable sources change under our feet and are never cached.
    fn cache_key(&self) -> Option<String> {
        if self.req.editable {
            return None;
        }
        match &self.req.source {
            RequirementSource::Vcs {
                vcs,
                repo_url,
                subdirectory,
                ..
            } => {
                let revision = self.revision.as_deref()?;
                let mut key = format!("{}+{}@{}", vcs, repo_url, revision);
                if let Some(sub) = subdirectory {
                    key.push_str(&format!("#subdirectory={}", sub));
                }
                Some(key)
            }
            RequirementSource::LocalPath { .. } => None,
            _ => {
                let link = self.link.as_ref()?;
                (!link.is_wheel() && link.is_sdist()).then(|| link.url().to_string())
            }
        }
    }

    fn checkout_dir_name(&self) -> String {
        let url = self
            .link
            .as_ref()
            .map(|l| l.url().to_string())
            .unwrap_or_default();
        let fingerprint = link_fingerprint(&url);
        match self.req.key() {
            Some(key) => format!("{}-{}", key, &fingerprint[..12]),
            None => fingerprint[..16].to_string(),
        }
    }

    /// Returns the candidate's metadata, extracting it on first use.
    pub fn metadata(&mut self) -> Result<&Metadata> {
        if self.metadata.is_none() {
            self.prepare()?;
            let metadata = self.resolve_metadata()?;
            if self.name.is_none() {
                self.name = Some(metadata.name.clone());
            }
            if let Some(version) = &metadata.version {
                self.version = Some(version.clone());
            }
            self.metadata = Some(metadata);
            if self.state < CandidateState::MetadataExtracted {
                self.state = CandidateState::MetadataExtracted;
            }
        }
        self.metadata.as_ref().ok_or_else(|| {
            PypiError::invalid_metadata(self.display_name(), "metadata is unavailable")
        })
    }

    fn resolve_metadata(&self) -> Result<Metadata> {
        if let Some(wheel) = &self.wheel {
            tracing::debug!("reading metadata of {} from wheel", self.display_name());
            return Metadata::from_wheel(wheel);
        }

        let root = self.source_dir.clone().ok_or_else(|| {
            PypiError::artifact(self.display_name(), "candidate has no source tree")
        })?;

        match formats::read_static_metadata(&root) {
            Ok(Some(metadata)) => {
                tracing::debug!("using static metadata of {}", root.display());
                return Ok(metadata);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("ignoring unreadable static metadata in {}: {}", root.display(), e),
        }

        let out = tempfile::tempdir()?;
        match self.env.build_backend().build_metadata(&root, out.path()) {
            Ok(metadata) => Ok(metadata),
            Err(error) => match metadata::read_fallback(&root)? {
                Some(metadata) => {
                    tracing::warn!("{}; using raw project metadata instead", error);
                    Ok(metadata)
                }
                None => Err(error.into()),
            },
        }
    }

    /// Dependencies of this candidate as requirement lines.
    ///
    /// Base dependencies are always included; dependencies of an extra only
    /// when that extra was requested. Dependencies whose marker cannot hold
    /// for the environment's Python range are dropped; other markers are
    /// kept as written. Requested extras the package does not declare are
    /// reported through a warning and [`extras_error`](Self::extras_error).
    pub fn get_dependencies_from_metadata(&mut self) -> Result<Vec<String>> {
        let req = self.req;
        let env = self.env;
        let (dependencies, extras_error) = {
            let metadata = self.metadata()?;
            filter_dependencies(metadata, &req.extras, env)
        };
        if let Some(error) = &extras_error {
            tracing::warn!("{}: {}", self.display_name(), error);
        }
        self.extras_error = extras_error;
        Ok(dependencies)
    }

    /// Builds (or reuses) a wheel for this candidate.
    pub fn build(&mut self) -> Result<PathBuf> {
        if let Some(wheel) = &self.wheel {
            return Ok(wheel.clone());
        }
        self.prepare()?;
        if let Some(wheel) = &self.wheel {
            return Ok(wheel.clone());
        }

        let root = self.source_dir.clone().ok_or_else(|| {
            PypiError::artifact(self.display_name(), "candidate has no source tree")
        })?;
        let backend = self.env.build_backend();
        let editable = self.req.editable;

        let wheel = match self.cache_key() {
            Some(key) => self.env.wheel_cache().get_or_build(&key, |out| {
                backend
                    .build_wheel(&root, out, false)
                    .map_err(PypiError::from)
            })?,
            None => {
                let out = self.env.download_dir().join("builds");
                fs::create_dir_all(&out)?;
                backend.build_wheel(&root, &out, editable)?
            }
        };
        tracing::debug!("built {} into {}", self.display_name(), wheel.display());
        self.wheel = Some(wheel.clone());
        self.state = CandidateState::Built;
        Ok(wheel)
    }

    /// Hash of the artifact: from the link fragment, or computed from the
    /// local archive file.
    pub fn hash(&self) -> Result<Option<String>> {
        if let Some((name, digest)) = self.link.as_ref().and_then(Link::hash) {
            return Ok(Some(format!("{}:{}", name, digest)));
        }
        let file = self
            .artifact
            .clone()
            .or_else(|| self.link.as_ref().and_then(Link::file_path))
            .filter(|path| path.is_file());
        match file {
            Some(path) => Ok(Some(file_hash(&path)?)),
            None => Ok(None),
        }
    }

    /// The pinned record written to the lockfile.
    ///
    /// Requires resolved metadata (name and version).
    pub fn as_lockfile_entry(&self) -> Result<LockfileEntry> {
        let (Some(name), Some(version)) = (&self.name, &self.version) else {
            return Err(PypiError::invalid_metadata(
                self.display_name(),
                "candidate name and version are not resolved",
            ));
        };
        let root = self.env.project_root();

        let mut entry = LockfileEntry::new(normalize_name(name), version.clone())
            .with_marker(self.req.marker.as_ref().map(ToString::to_string));
        entry.extras = self.req.extras.iter().cloned().collect();
        entry.editable = self.req.editable;

        match &self.req.source {
            RequirementSource::Named => {}
            RequirementSource::Url { url } => {
                let url = if has_project_root(url) {
                    url.clone()
                } else {
                    collapse_project_root_url(url, root)
                };
                entry.url = Some(url);
            }
            RequirementSource::LocalPath { path } => {
                let absolute = local_path(path, root);
                entry.path = Some(
                    relative_to_root(&absolute, root).unwrap_or_else(|| to_posix(&absolute)),
                );
            }
            RequirementSource::Vcs {
                vcs,
                repo_url,
                reference,
                subdirectory,
            } => {
                entry.set_vcs_url(vcs.as_str(), repo_url.clone());
                entry.reference = reference.clone();
                entry.subdirectory = subdirectory.clone();
                if !self.req.editable {
                    entry.revision = self.revision.clone();
                }
            }
        }

        if !matches!(self.req.source, RequirementSource::LocalPath { .. } | RequirementSource::Vcs { .. }) {
            entry.hash = self.hash()?;
        }
        Ok(entry)
    }
}

impl fmt::Debug for Candidate<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("requirement", &self.req.as_line())
            .field("name", &self.name)
            .field("version", &self.version)
            .field("link", &self.link)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Candidate<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.display_name(), version),
            None => f.write_str(&self.display_name()),
        }
    }
}

/// Absolute location of a local path requirement.
fn local_path(path: &str, root: &Path) -> PathBuf {
    absolutize(Path::new(&expand_project_root(path, root)), root)
}

/// Link of a requirement with the project root placeholder expanded and
/// relative paths anchored at the project root.
fn resolve_link(req: &Requirement, env: &Environment) -> Option<Link> {
    let root = env.project_root();
    match &req.source {
        RequirementSource::Named => None,
        RequirementSource::Url { url } => Some(Link::new(expand_project_root_url(url, root))),
        RequirementSource::LocalPath { path } => Some(Link::from_path(&local_path(path, root))),
        RequirementSource::Vcs { .. } => req.as_ireq().link,
    }
}

fn check_local_dir(path: &Path, req: &Requirement) -> Result<PathBuf> {
    let shown = match &req.source {
        RequirementSource::LocalPath { path } => path.clone(),
        _ => to_posix(path),
    };
    if !path.exists() {
        return Err(RequirementError::PathNotFound { path: shown }.into());
    }
    if !is_installable_dir(path) {
        return Err(RequirementError::NotInstallable { path: shown }.into());
    }
    Ok(path.to_path_buf())
}

/// Selects the dependency lines that apply for `requested` extras.
fn filter_dependencies(
    metadata: &Metadata,
    requested: &BTreeSet<String>,
    env: &Environment,
) -> (Vec<String>, Option<ExtrasError>) {
    let wanted: BTreeSet<String> = requested.iter().map(|e| normalize_name(e)).collect();
    let mut declared: BTreeSet<String> = metadata
        .provides_extra
        .iter()
        .map(|e| normalize_name(e))
        .collect();

    let mut dependencies = Vec::new();
    for line in &metadata.requires_dist {
        let mut dep = match Requirement::parse_dependency(line) {
            Ok(dep) => dep,
            Err(e) => {
                tracing::warn!("skipping unparsable dependency '{}' of {}: {}", line, metadata.name, e);
                continue;
            }
        };

        if let Some(marker) = dep.marker.take() {
            let (extras, rest) = marker.split_extras();
            let extras: BTreeSet<String> = extras.iter().map(|e| normalize_name(e)).collect();
            declared.extend(extras.iter().cloned());
            if !extras.is_empty() && extras.is_disjoint(&wanted) {
                continue;
            }
            dep.marker = rest;
        }
        if !env.is_applicable(dep.marker.as_ref()) {
            tracing::debug!("dropping {}: not applicable to python {}", line, env.python_requires());
            continue;
        }

        let rendered = dep.as_line();
        if !dependencies.contains(&rendered) {
            dependencies.push(rendered);
        }
    }

    let missing: Vec<String> = requested
        .iter()
        .filter(|extra| !declared.contains(&normalize_name(extra)))
        .cloned()
        .collect();
    let error = (!missing.is_empty()).then(|| ExtrasError::new(missing));
    (dependencies, error)
}
