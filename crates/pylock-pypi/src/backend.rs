//! Collaborators the candidate pipeline delegates to.
//!
//! Building, checking out and downloading are not done by the pipeline
//! itself. It talks to them through three narrow, synchronous traits:
//!
//! - [`BuildBackend`] produces metadata or a wheel from a project tree
//! - [`VcsBackend`] checks out a repository and pins its revision
//! - [`ArtifactProvider`] makes an artifact link available as a local file
//!
//! The default implementations shell out to `python`, `git`/`hg`/`svn`/`bzr`
//! and resolve local `file://` links. Tests substitute their own.

use crate::error::{BuildError, PypiError, Result};
use crate::formats;
use crate::metadata::Metadata;
use crate::requirements::{Link, VcsKind};
use std::path::{Path, PathBuf};
use std::process::Command;
use toml_edit::Item;

/// Runs a project's build backend.
pub trait BuildBackend: Send + Sync {
    /// Prepares metadata for the project at `project_root`, writing
    /// intermediate files into `out_dir`.
    fn build_metadata(
        &self,
        project_root: &Path,
        out_dir: &Path,
    ) -> std::result::Result<Metadata, BuildError>;

    /// Builds a wheel into `out_dir` and returns its path.
    fn build_wheel(
        &self,
        project_root: &Path,
        out_dir: &Path,
        editable: bool,
    ) -> std::result::Result<PathBuf, BuildError>;
}

/// Checks out version-controlled sources.
pub trait VcsBackend: Send + Sync {
    /// Checks out `repo_url` at `reference` into `dest` and returns the
    /// pinned revision.
    fn checkout(
        &self,
        vcs: VcsKind,
        repo_url: &str,
        reference: Option<&str>,
        dest: &Path,
    ) -> Result<String>;
}

/// Makes artifacts available on the local filesystem.
pub trait ArtifactProvider: Send + Sync {
    /// Returns a local path holding the artifact behind `link`, downloading
    /// into `dest_dir` if needed.
    fn fetch(&self, link: &Link, dest_dir: &Path) -> Result<PathBuf>;
}

const DEFAULT_BUILD_BACKEND: &str = "setuptools.build_meta:__legacy__";

/// Calls a PEP 517 hook and prints its return value on the last line.
const HOOK_SCRIPT: &str = r#"
import importlib, sys
spec, hook_name, out_dir, backend_path = sys.argv[1:5]
if backend_path:
    sys.path[:0] = backend_path.split("|")
module_name, _, attrs = spec.partition(":")
backend = importlib.import_module(module_name)
for attr in filter(None, attrs.split(".")):
    backend = getattr(backend, attr)
hook = getattr(backend, hook_name, None)
if hook is None:
    sys.exit("build backend has no hook %s" % hook_name)
print(hook(out_dir, {}))
"#;

/// Invokes the project's PEP 517 backend with a Python interpreter.
#[derive(Debug, Clone)]
pub struct Pep517Backend {
    python: PathBuf,
    isolated: bool,
}

impl Pep517Backend {
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
            isolated: true,
        }
    }

    /// Runs the interpreter in isolated mode (`-I`), ignoring user site
    /// packages and `PYTHON*` environment variables.
    pub fn with_isolation(mut self, isolated: bool) -> Self {
        self.isolated = isolated;
        self
    }

    fn backend_spec(project_root: &Path) -> (String, Vec<String>) {
        let doc = formats::read_pyproject(project_root).ok().flatten();
        let build_system = doc
            .as_ref()
            .and_then(|doc| formats::nested_table(doc, &["build-system"]));
        let spec = build_system
            .and_then(|t| t.get("build-backend"))
            .and_then(Item::as_str)
            .unwrap_or(DEFAULT_BUILD_BACKEND)
            .to_string();
        let backend_path = build_system
            .and_then(|t| t.get("backend-path"))
            .and_then(Item::as_array)
            .map(|paths| {
                paths
                    .iter()
                    .filter_map(|p| p.as_str())
                    .map(|p| project_root.join(p).to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        (spec, backend_path)
    }

    fn call_hook(
        &self,
        project_root: &Path,
        hook: &str,
        out_dir: &Path,
    ) -> std::result::Result<String, BuildError> {
        let (spec, backend_path) = Self::backend_spec(project_root);
        std::fs::create_dir_all(out_dir)
            .map_err(|e| BuildError::new(project_root, e.to_string()))?;

        let mut command = Command::new(&self.python);
        if self.isolated {
            command.arg("-I");
        }
        command
            .arg("-c")
            .arg(HOOK_SCRIPT)
            .arg(&spec)
            .arg(hook)
            .arg(out_dir)
            .arg(backend_path.join("|"))
            .current_dir(project_root);

        tracing::debug!("calling {} of {} in {}", hook, spec, project_root.display());
        let output = command
            .output()
            .map_err(|e| BuildError::new(project_root, format!("failed to run {}: {}", self.python.display(), e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            let message = tail.into_iter().rev().collect::<Vec<_>>().join("\n");
            return Err(BuildError::new(project_root, message));
        }
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .last()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .ok_or_else(|| BuildError::new(project_root, format!("{} returned nothing", hook)))
    }
}

impl BuildBackend for Pep517Backend {
    fn build_metadata(
        &self,
        project_root: &Path,
        out_dir: &Path,
    ) -> std::result::Result<Metadata, BuildError> {
        let dist_info = self.call_hook(project_root, "prepare_metadata_for_build_wheel", out_dir)?;
        Metadata::from_dist_info(&out_dir.join(dist_info))
            .map_err(|e| BuildError::new(project_root, e.to_string()))
    }

    fn build_wheel(
        &self,
        project_root: &Path,
        out_dir: &Path,
        editable: bool,
    ) -> std::result::Result<PathBuf, BuildError> {
        let hook = if editable { "build_editable" } else { "build_wheel" };
        let filename = self.call_hook(project_root, hook, out_dir)?;
        Ok(out_dir.join(filename))
    }
}

/// Drives the VCS command line clients.
#[derive(Debug, Clone, Default)]
pub struct CommandVcs;

impl CommandVcs {
    fn run(program: &str, args: &[&str], cwd: Option<&Path>, url: &str) -> Result<String> {
        let mut command = Command::new(program);
        command.args(args);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        tracing::debug!("running {} {}", program, args.join(" "));
        let output = command
            .output()
            .map_err(|e| PypiError::vcs(url, format!("failed to run {}: {}", program, e)))?;
        if !output.status.success() {
            return Err(PypiError::vcs(
                url,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl VcsBackend for CommandVcs {
    fn checkout(
        &self,
        vcs: VcsKind,
        repo_url: &str,
        reference: Option<&str>,
        dest: &Path,
    ) -> Result<String> {
        let dest_str = dest.to_string_lossy();
        let fresh = !dest.exists();
        match vcs {
            VcsKind::Git => {
                if fresh {
                    Self::run("git", &["clone", "--quiet", repo_url, &dest_str], None, repo_url)?;
                } else {
                    Self::run("git", &["fetch", "--quiet", "--tags", "origin"], Some(dest), repo_url)?;
                }
                if let Some(reference) = reference {
                    Self::run("git", &["checkout", "--quiet", reference], Some(dest), repo_url)?;
                }
                Self::run("git", &["rev-parse", "HEAD"], Some(dest), repo_url)
            }
            VcsKind::Hg => {
                if fresh {
                    Self::run("hg", &["clone", "--quiet", repo_url, &dest_str], None, repo_url)?;
                } else {
                    Self::run("hg", &["pull", "--quiet"], Some(dest), repo_url)?;
                }
                let mut update = vec!["update", "--quiet"];
                if let Some(reference) = reference {
                    update.extend(["-r", reference]);
                }
                Self::run("hg", &update, Some(dest), repo_url)?;
                let id = Self::run("hg", &["identify", "--debug", "-i"], Some(dest), repo_url)?;
                Ok(id.trim_end_matches('+').to_string())
            }
            VcsKind::Svn => {
                let mut args = vec![if fresh { "checkout" } else { "update" }, "-q"];
                if let Some(reference) = reference {
                    args.extend(["-r", reference]);
                }
                if fresh {
                    args.extend([repo_url, &*dest_str]);
                    Self::run("svn", &args, None, repo_url)?;
                } else {
                    Self::run("svn", &args, Some(dest), repo_url)?;
                }
                Self::run("svn", &["info", "--show-item", "revision"], Some(dest), repo_url)
            }
            VcsKind::Bzr => {
                if fresh {
                    let mut args = vec!["branch", "-q"];
                    if let Some(reference) = reference {
                        args.extend(["-r", reference]);
                    }
                    args.extend([repo_url, &*dest_str]);
                    Self::run("bzr", &args, None, repo_url)?;
                } else {
                    Self::run("bzr", &["pull", "-q"], Some(dest), repo_url)?;
                }
                Self::run("bzr", &["revno"], Some(dest), repo_url)
            }
        }
    }
}

/// Resolves `file://` links in place. Remote links need a provider with
/// network access.
#[derive(Debug, Clone, Default)]
pub struct LocalArtifacts;

impl ArtifactProvider for LocalArtifacts {
    fn fetch(&self, link: &Link, _dest_dir: &Path) -> Result<PathBuf> {
        let Some(path) = link.file_path() else {
            return Err(PypiError::artifact(
                link.filename(),
                format!("no provider configured for remote link {}", link.url_without_fragment()),
            ));
        };
        if !path.exists() {
            return Err(PypiError::artifact(
                link.filename(),
                format!("{} does not exist", path.display()),
            ));
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let wheel = dir.path().join("demo-0.0.1-py3-none-any.whl");
        std::fs::write(&wheel, b"").unwrap();

        let provider = LocalArtifacts;
        assert_eq!(provider.fetch(&Link::from_path(&wheel), dir.path()).unwrap(), wheel);

        let missing = Link::from_path(&dir.path().join("missing.whl"));
        assert!(matches!(
            provider.fetch(&missing, dir.path()),
            Err(PypiError::Artifact { .. })
        ));

        let remote = Link::new("https://example.com/demo-0.0.1.tar.gz".into());
        let err = provider.fetch(&remote, dir.path()).unwrap_err();
        assert!(err.to_string().contains("demo-0.0.1.tar.gz"));
    }

    #[test]
    fn test_backend_spec() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            Pep517Backend::backend_spec(dir.path()),
            (DEFAULT_BUILD_BACKEND.to_string(), Vec::new())
        );

        std::fs::write(
            dir.path().join("pyproject.toml"),
            "[build-system]\nbuild-backend = \"backend:hooks\"\nbackend-path = [\"_build\"]\n",
        )
        .unwrap();
        let (spec, path) = Pep517Backend::backend_spec(dir.path());
        assert_eq!(spec, "backend:hooks");
        assert_eq!(path.len(), 1);
        assert!(path[0].ends_with("_build"));
    }

    #[test]
    fn test_missing_interpreter_is_build_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Pep517Backend::new(dir.path().join("no-such-python"));
        let err = backend
            .build_metadata(dir.path(), &dir.path().join("out"))
            .unwrap_err();
        assert_eq!(err.root, dir.path());
        assert!(err.message.contains("failed to run"));
    }
}
