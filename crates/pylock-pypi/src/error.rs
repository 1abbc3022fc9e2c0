//! Errors specific to Python requirement handling and candidate resolution.
//!
//! [`RequirementError`], [`BuildError`] and [`ExtrasError`] are the failures a
//! caller is expected to distinguish. Everything else funnels into the
//! [`PypiError`] umbrella.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A dependency declaration could not be turned into a requirement.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequirementError {
    /// The declaration does not match any supported grammar
    #[error("invalid requirement '{line}': {reason}")]
    Invalid { line: String, reason: String },

    /// A marker or specifier failed to parse at a known position
    #[error("failed to parse requirement at position {position} near '{snippet}': {reason}")]
    Parse {
        position: usize,
        snippet: String,
        reason: String,
    },

    #[error("local path does not exist: {path}")]
    PathNotFound { path: String },

    #[error("local path is not installable: {path}")]
    NotInstallable { path: String },

    #[error("editable requirement is only supported for VCS and local paths: {line}")]
    EditableUnsupported { line: String },
}

impl RequirementError {
    pub fn invalid(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            line: line.into(),
            reason: reason.into(),
        }
    }

    /// Builds a parse error pointing `position` characters into `line`.
    pub fn parse(line: &str, position: usize, reason: impl Into<String>) -> Self {
        let snippet = line.chars().skip(position).take(8).collect();
        Self::Parse {
            position,
            snippet,
            reason: reason.into(),
        }
    }
}

/// The project's build backend failed to produce metadata or a wheel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to build {path}: {message}", path = .root.display())]
pub struct BuildError {
    pub root: PathBuf,
    pub message: String,
}

impl BuildError {
    pub fn new(root: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            message: message.into(),
        }
    }
}

/// Requested extras that the package does not declare.
///
/// Never returned as `Err`: candidates log it and keep it around so callers
/// can report it.
///
/// # Examples
///
/// ```
/// use pylock_pypi::ExtrasError;
///
/// let error = ExtrasError::new(vec!["foo".into()]);
/// assert_eq!(error.to_string(), "Extras not found: ('foo',)");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ExtrasError {
    pub extras: Vec<String>,
}

impl ExtrasError {
    pub fn new(mut extras: Vec<String>) -> Self {
        extras.sort();
        Self { extras }
    }
}

impl fmt::Display for ExtrasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let quoted: Vec<String> = self.extras.iter().map(|e| format!("'{}'", e)).collect();
        if quoted.len() == 1 {
            write!(f, "Extras not found: ({},)", quoted[0])
        } else {
            write!(f, "Extras not found: ({})", quoted.join(", "))
        }
    }
}

/// A version specifier could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid version specifier '{specifier}': {reason}")]
pub struct SpecifierError {
    pub specifier: String,
    pub reason: String,
}

impl SpecifierError {
    pub fn new(specifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            specifier: specifier.into(),
            reason: reason.into(),
        }
    }
}

/// An environment marker could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid marker at position {position}: {reason}")]
pub struct MarkerError {
    pub position: usize,
    pub reason: String,
}

/// Errors specific to Python dependency handling.
#[derive(Error, Debug)]
pub enum PypiError {
    #[error(transparent)]
    Requirement(#[from] RequirementError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Specifier(#[from] SpecifierError),

    #[error(transparent)]
    Marker(#[from] MarkerError),

    /// Failed to parse a TOML file
    #[error("failed to parse {file}: {source}")]
    TomlParse {
        file: String,
        #[source]
        source: toml_edit::TomlError,
    },

    /// Metadata is missing or malformed
    #[error("invalid metadata in {origin}: {message}")]
    InvalidMetadata { origin: String, message: String },

    /// No known metadata dialect in a project
    #[error("unsupported project format: {0}")]
    UnsupportedFormat(String),

    /// A VCS checkout failed
    #[error("failed to check out {url}: {message}")]
    Vcs { url: String, message: String },

    /// No artifact could be located or fetched
    #[error("failed to obtain artifact for {name}: {message}")]
    Artifact { name: String, message: String },

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Core(#[from] pylock_core::PylockError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Python operations.
pub type Result<T> = std::result::Result<T, PypiError>;

impl PypiError {
    pub fn invalid_metadata(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            origin: origin.into(),
            message: message.into(),
        }
    }

    pub fn unsupported_format(message: impl Into<String>) -> Self {
        Self::UnsupportedFormat(message.into())
    }

    pub fn vcs(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Vcs {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn artifact(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Artifact {
            name: name.into(),
            message: message.into(),
        }
    }
}
