//! Target environment of a resolution run.

use crate::backend::{ArtifactProvider, BuildBackend, CommandVcs, LocalArtifacts, Pep517Backend, VcsBackend};
use crate::error::Result;
use crate::markers::{Marker, MarkerEnvironment};
use crate::specifiers::{PySpecSet, PyVersion};
use pylock_core::{Config, WheelCache};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a [`Candidate`](crate::Candidate) needs to know about where
/// and for which interpreter dependencies are resolved.
///
/// Cloning is cheap; the wheel cache and collaborators are shared.
#[derive(Clone)]
pub struct Environment {
    project_root: PathBuf,
    python_requires: PySpecSet,
    marker_env: MarkerEnvironment,
    python_executable: Option<PathBuf>,
    cache_dir: PathBuf,
    wheel_cache: Arc<WheelCache>,
    build_backend: Arc<dyn BuildBackend>,
    vcs_backend: Arc<dyn VcsBackend>,
    artifacts: Arc<dyn ArtifactProvider>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("project_root", &self.project_root)
            .field("python_requires", &self.python_requires.to_string())
            .field("python_version", &self.marker_env.python_full_version)
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

impl Environment {
    /// Creates an environment with the default collaborators and a marker
    /// environment for the lowest Python allowed by `python_requires`.
    pub fn new(
        project_root: impl Into<PathBuf>,
        python_requires: PySpecSet,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        let cache_dir = cache_dir.into();
        let python = python_requires
            .lower()
            .filter(|v| *v > PyVersion::MIN)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "3.8".to_string());
        Self {
            project_root: project_root.into(),
            marker_env: MarkerEnvironment::for_python(&python),
            python_requires,
            python_executable: None,
            wheel_cache: Arc::new(WheelCache::new(cache_dir.join("wheels"))),
            cache_dir,
            build_backend: Arc::new(Pep517Backend::new("python3")),
            vcs_backend: Arc::new(CommandVcs),
            artifacts: Arc::new(LocalArtifacts),
        }
    }

    /// Creates an environment from configuration values: `cache_dir`,
    /// `python.path`, `python.version` and `build.isolation`.
    pub fn from_config(
        project_root: impl Into<PathBuf>,
        python_requires: PySpecSet,
        config: &Config,
    ) -> Result<Self> {
        let cache_dir = PathBuf::from(config.get_str("cache_dir")?);
        let python_version = config.get_str("python.version")?;
        let isolation = config.get_bool("build.isolation")?;
        let python_path = config.get_str("python.path").ok().map(PathBuf::from);

        let mut env = Self::new(project_root, python_requires, cache_dir)
            .with_marker_environment(MarkerEnvironment::for_python(&python_version));
        let interpreter = python_path.clone().unwrap_or_else(|| PathBuf::from("python3"));
        env.build_backend = Arc::new(Pep517Backend::new(interpreter).with_isolation(isolation));
        env.python_executable = python_path;
        tracing::debug!(
            "environment for python {} with cache at {}",
            python_version,
            env.cache_dir.display()
        );
        Ok(env)
    }

    pub fn with_marker_environment(mut self, marker_env: MarkerEnvironment) -> Self {
        self.marker_env = marker_env;
        self
    }

    pub fn with_build_backend(mut self, backend: Arc<dyn BuildBackend>) -> Self {
        self.build_backend = backend;
        self
    }

    pub fn with_vcs_backend(mut self, backend: Arc<dyn VcsBackend>) -> Self {
        self.vcs_backend = backend;
        self
    }

    pub fn with_artifact_provider(mut self, provider: Arc<dyn ArtifactProvider>) -> Self {
        self.artifacts = provider;
        self
    }

    /// Shares a wheel cache with other environments.
    pub fn with_wheel_cache(mut self, cache: Arc<WheelCache>) -> Self {
        self.wheel_cache = cache;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn python_requires(&self) -> &PySpecSet {
        &self.python_requires
    }

    pub fn marker_environment(&self) -> &MarkerEnvironment {
        &self.marker_env
    }

    pub fn python_executable(&self) -> Option<&Path> {
        self.python_executable.as_deref()
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn wheel_cache(&self) -> &WheelCache {
        &self.wheel_cache
    }

    pub fn build_backend(&self) -> &dyn BuildBackend {
        self.build_backend.as_ref()
    }

    pub fn vcs_backend(&self) -> &dyn VcsBackend {
        self.vcs_backend.as_ref()
    }

    pub fn artifacts(&self) -> &dyn ArtifactProvider {
        self.artifacts.as_ref()
    }

    /// Where VCS checkouts live.
    pub fn src_dir(&self) -> PathBuf {
        self.cache_dir.join("src")
    }

    /// Where fetched and unpacked artifacts live.
    pub fn download_dir(&self) -> PathBuf {
        self.cache_dir.join("pkgs")
    }

    /// `false` if the marker restricts Python to versions outside
    /// `python_requires`.
    pub fn is_applicable(&self, marker: Option<&Marker>) -> bool {
        marker.is_none_or(|marker| !(&marker.python_spec() & &self.python_requires).is_impossible())
    }
}
