//! Shared fixtures for the integration tests.
//!
//! Every test gets a fresh project tree laid out as
//! `<root>/tests/fixtures/{projects,artifacts}` plus a separate cache
//! directory, and an [`Environment`] wired to fake collaborators so nothing
//! touches the network, a VCS client or a Python interpreter.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use pylock_pypi::{
    ArtifactProvider, BuildBackend, BuildError, Environment, Link, Metadata, PySpecSet, PypiError,
    VcsBackend, VcsKind,
};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

pub const REVISION: &str = "1234567890abcdef";
pub const WHEEL_NAME: &str = "demo-0.0.1-py2.py3-none-any.whl";
pub const SDIST_NAME: &str = "demo-0.0.1.tar.gz";
pub const SDIST_XZ_NAME: &str = "demo-0.0.1.tar.xz";
pub const REMOTE_PREFIX: &str = "http://fixtures.test/artifacts/";
pub const BUILD_FAILURE: &str = "This mimics the build error on unmatched platform";

const DEMO_PYPROJECT: &str = r#"[project]
name = "demo"
version = "0.0.1"
requires-python = ">=3.3"
dependencies = ["idna", "chardet; os_name=='nt'"]

[project.optional-dependencies]
tests = ["pytest"]
security = ["requests; python_version>='3.6'"]
"#;

const DEMO_METADATA: &str = r#"Metadata-Version: 2.1
Name: demo
Version: 0.0.1
Requires-Python: >=3.3
Requires-Dist: idna
Requires-Dist: chardet; os_name=='nt'
Requires-Dist: enum34; python_version < "3.4"
Requires-Dist: pytest; extra == 'tests'
Requires-Dist: requests; python_version>='3.6' and extra == 'security'
Provides-Extra: tests
Provides-Extra: security

A demo package.
"#;

const FAILING_SETUP: &str = r#"from setuptools import setup

if True:
    raise RuntimeError("This mimics the build error on unmatched platform")

setup(
    name="demo",
    version="0.0.1",
    description="test demo",
    py_modules=["demo"],
    python_requires=">=3.3",
    install_requires=["idna", "chardet; os_name=='nt'"],
    extras_require={
        "tests": ["pytest"],
        "security": ['requests; python_version>="3.6"'],
    },
)
"#;

const NO_DEP_SETUP: &str = r#"from setuptools import setup

raise RuntimeError("This mimics the build error on unmatched platform")

setup(name="demo", version=open("VERSION").read())
"#;

const POETRY_PYPROJECT: &str = r#"[tool.poetry]
name = "poetry-demo"
version = "0.1.0"
description = ""
authors = ["Someone <someone@example.com>"]

[tool.poetry.dependencies]
python = "^3.6"
requests = "^2.6"

[tool.poetry.dev-dependencies]
pytest = "^5.0"

[build-system]
requires = ["poetry>=0.12"]
build-backend = "poetry.masonry.api"
"#;

const FLIT_PYPROJECT: &str = r#"[build-system]
requires = ["flit_core >=2,<4"]
build-backend = "flit_core.buildapi"

[tool.flit.metadata]
module = "pyflit"
author = "Someone"
requires-python = ">=3.5"
requires = ["requests"]

[tool.flit.metadata.requires-extra]
test = ["pytest"]
dev = ["black"]
"#;

const PACKAGE_A_SETUP: &str = r#"from setuptools import setup

setup(name="package-a", version="0.1.0", install_requires=["flask"])
"#;

const PACKAGE_B_PYPROJECT: &str = r#"[project]
name = "package-b"
version = "0.1.0"
dependencies = ["django"]
"#;

/// A throwaway project tree and cache directory.
pub struct Fixtures {
    project: TempDir,
    cache: TempDir,
    pub artifacts: Arc<FixtureArtifacts>,
}

/// Routes `tracing` output to the test harness; `RUST_LOG` selects levels.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl Fixtures {
    pub fn new() -> Self {
        init_logging();
        let project = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let fixtures = Self {
            artifacts: Arc::new(FixtureArtifacts::new(
                project.path().join("tests/fixtures/artifacts"),
            )),
            project,
            cache,
        };
        fixtures.write_projects();
        fixtures.write_artifacts();
        fixtures
    }

    pub fn root(&self) -> &Path {
        self.project.path()
    }

    pub fn cache_dir(&self) -> &Path {
        self.cache.path()
    }

    pub fn projects(&self) -> PathBuf {
        self.root().join("tests/fixtures/projects")
    }

    pub fn project_dir(&self, name: &str) -> PathBuf {
        self.projects().join(name)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root().join("tests/fixtures/artifacts")
    }

    pub fn wheel(&self) -> PathBuf {
        self.artifacts_dir().join(WHEEL_NAME)
    }

    pub fn sdist(&self) -> PathBuf {
        self.artifacts_dir().join(SDIST_NAME)
    }

    /// The same sdist as [`Fixtures::sdist`], xz-compressed.
    pub fn sdist_xz(&self) -> PathBuf {
        self.artifacts_dir().join(SDIST_XZ_NAME)
    }

    /// Environment targeting Python `>=3.6` whose builds always fail.
    pub fn environment(&self) -> Environment {
        self.environment_with(">=3.6", Arc::new(FakeBuild::failing()))
    }

    pub fn environment_with(&self, python: &str, build: Arc<FakeBuild>) -> Environment {
        Environment::new(
            self.root(),
            PySpecSet::parse(python).unwrap(),
            self.cache_dir(),
        )
        .with_build_backend(build)
        .with_vcs_backend(Arc::new(FixtureVcs::new(self.projects())))
        .with_artifact_provider(self.artifacts.clone())
    }

    fn write_projects(&self) {
        let demo = self.project_dir("demo");
        write(&demo.join("pyproject.toml"), DEMO_PYPROJECT);
        write(&demo.join("demo.py"), "print('hello')\n");

        write(&self.project_dir("demo-failure").join("setup.py"), FAILING_SETUP);

        let no_dep = self.project_dir("demo-failure-no-dep");
        write(&no_dep.join("setup.py"), NO_DEP_SETUP);
        write(
            &no_dep.join("demo.egg-info/PKG-INFO"),
            "Metadata-Version: 1.2\nName: demo\nVersion: 0.0.1\n",
        );

        write(&self.project_dir("poetry-demo").join("pyproject.toml"), POETRY_PYPROJECT);

        let flit = self.project_dir("flit-demo");
        write(&flit.join("pyproject.toml"), FLIT_PYPROJECT);
        write(
            &flit.join("pyflit/__init__.py"),
            "\"\"\"An awesome flit demo\"\"\"\n__version__ = \"0.1.0\"\n",
        );

        let parent = self.project_dir("demo-parent-package");
        write(&parent.join("README.md"), "# parent\n");
        write(&parent.join("package-a/setup.py"), PACKAGE_A_SETUP);
        write(&parent.join("package-b/pyproject.toml"), PACKAGE_B_PYPROJECT);
    }

    fn write_artifacts(&self) {
        fs::create_dir_all(self.artifacts_dir()).unwrap();

        let mut wheel = zip::ZipWriter::new(File::create(self.wheel()).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        wheel.start_file("demo.py", options).unwrap();
        wheel.write_all(b"print('hello')\n").unwrap();
        wheel.start_file("demo-0.0.1.dist-info/METADATA", options).unwrap();
        wheel.write_all(DEMO_METADATA.as_bytes()).unwrap();
        wheel.finish().unwrap();

        let encoder = GzEncoder::new(File::create(self.sdist()).unwrap(), Compression::default());
        write_sdist(encoder).finish().unwrap();

        let encoder = xz2::write::XzEncoder::new(File::create(self.sdist_xz()).unwrap(), 6);
        write_sdist(encoder).finish().unwrap();
    }
}

fn write_sdist<W: Write>(writer: W) -> W {
    let mut sdist = tar::Builder::new(writer);
    for (name, content) in [
        ("demo-0.0.1/pyproject.toml", DEMO_PYPROJECT),
        ("demo-0.0.1/demo.py", "print('hello')\n"),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        sdist.append_data(&mut header, name, content.as_bytes()).unwrap();
    }
    sdist.into_inner().unwrap()
}

pub fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

pub fn copy_dir(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), target).unwrap();
        }
    }
}

/// Checks out repositories by copying the fixture project named after the
/// last URL segment.
pub struct FixtureVcs {
    projects: PathBuf,
    pub checkouts: AtomicUsize,
}

impl FixtureVcs {
    pub fn new(projects: PathBuf) -> Self {
        Self {
            projects,
            checkouts: AtomicUsize::new(0),
        }
    }
}

impl VcsBackend for FixtureVcs {
    fn checkout(
        &self,
        _vcs: VcsKind,
        repo_url: &str,
        _reference: Option<&str>,
        dest: &Path,
    ) -> pylock_pypi::Result<String> {
        let name = repo_url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .trim_end_matches(".git");
        let source = self.projects.join(name);
        if !source.is_dir() {
            return Err(PypiError::vcs(repo_url, "no such fixture repository"));
        }
        copy_dir(&source, dest);
        self.checkouts.fetch_add(1, Ordering::SeqCst);
        Ok(REVISION.to_string())
    }
}

/// Metadata preparation always fails; wheel builds copy a prepared wheel.
pub struct FakeBuild {
    wheel: Option<PathBuf>,
    pub builds: AtomicUsize,
}

impl FakeBuild {
    pub fn failing() -> Self {
        Self {
            wheel: None,
            builds: AtomicUsize::new(0),
        }
    }

    pub fn producing(wheel: PathBuf) -> Self {
        Self {
            wheel: Some(wheel),
            builds: AtomicUsize::new(0),
        }
    }
}

impl BuildBackend for FakeBuild {
    fn build_metadata(&self, project_root: &Path, _out_dir: &Path) -> Result<Metadata, BuildError> {
        Err(BuildError::new(project_root, BUILD_FAILURE))
    }

    fn build_wheel(
        &self,
        project_root: &Path,
        out_dir: &Path,
        _editable: bool,
    ) -> Result<PathBuf, BuildError> {
        let Some(wheel) = &self.wheel else {
            return Err(BuildError::new(project_root, BUILD_FAILURE));
        };
        self.builds.fetch_add(1, Ordering::SeqCst);
        fs::create_dir_all(out_dir).unwrap();
        let target = out_dir.join(wheel.file_name().unwrap());
        fs::copy(wheel, &target).unwrap();
        Ok(target)
    }
}

/// Serves `http://fixtures.test/artifacts/<file>` from the artifacts
/// directory and passes local files through. Counts every fetch.
pub struct FixtureArtifacts {
    dir: PathBuf,
    pub fetches: AtomicUsize,
}

impl FixtureArtifacts {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl ArtifactProvider for FixtureArtifacts {
    fn fetch(&self, link: &Link, dest_dir: &Path) -> pylock_pypi::Result<PathBuf> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(path) = link.file_path() {
            return Ok(path);
        }
        let Some(file) = link.url_without_fragment().strip_prefix(REMOTE_PREFIX) else {
            return Err(PypiError::artifact(link.filename(), "unknown host"));
        };
        let target = dest_dir.join(file);
        fs::copy(self.dir.join(file), &target)?;
        Ok(target)
    }
}
