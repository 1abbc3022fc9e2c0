//! Python dependency handling for pylock.
//!
//! This crate turns requirement lines from a project file into pinned,
//! lockable candidates:
//!
//! - **Requirements**: PEP 508 lines, local paths, archive URLs and VCS
//!   references, convertible to and from the TOML mapping form
//! - **Python ranges**: [`PySpecSet`], a set algebra over interpreter
//!   versions with intersection, union and subset checks
//! - **Markers**: environment markers with evaluation, extra splitting and
//!   Python range projection
//! - **Candidates**: artifact preparation, metadata extraction (wheel,
//!   static `pyproject.toml` dialects, build backend, raw metadata
//!   fallback), dependency filtering and lockfile entries
//!
//! # Architecture
//!
//! Building, VCS checkouts and downloads go through the traits in
//! [`backend`]. An [`Environment`] bundles them with the project root, the
//! target Python range and the wheel cache from `pylock-core`.
//!
//! # Examples
//!
//! ## Parsing requirements
//!
//! ```
//! use pylock_pypi::{Requirement, RequirementSource};
//!
//! let req = Requirement::from_line("requests[security]>=2.20; os_name == 'nt'", false).unwrap();
//! assert_eq!(req.key().as_deref(), Some("requests"));
//! assert!(matches!(req.source, RequirementSource::Named));
//! assert_eq!(req.as_line(), r#"requests[security]>=2.20; os_name == "nt""#);
//! ```
//!
//! ## Python version ranges
//!
//! ```
//! use pylock_pypi::PySpecSet;
//!
//! let project = PySpecSet::parse(">=3.6").unwrap();
//! let dependency = PySpecSet::parse("<3.8").unwrap();
//! assert_eq!((&project & &dependency).to_string(), ">=3.6,<3.8");
//! assert!(PySpecSet::parse(">=3.7").unwrap().is_subset(&project));
//! ```
//!
//! ## Poetry constraints
//!
//! ```
//! use pylock_pypi::formats::poetry::convert_constraint;
//!
//! assert_eq!(convert_constraint("^2.6").unwrap(), ">=2.6,<3.0");
//! ```

pub mod archive;
pub mod backend;
pub mod candidates;
pub mod environment;
pub mod error;
pub mod formats;
pub mod markers;
pub mod metadata;
pub mod requirements;
pub mod specifiers;

pub use backend::{ArtifactProvider, BuildBackend, CommandVcs, LocalArtifacts, Pep517Backend, VcsBackend};
pub use candidates::{Candidate, CandidateState};
pub use environment::Environment;
pub use error::{BuildError, ExtrasError, PypiError, RequirementError, Result};
pub use markers::{Marker, MarkerEnvironment, normalize_name};
pub use metadata::Metadata;
pub use requirements::{
    DetailedSpec, InstallRequirement, Link, Requirement, RequirementSource, RequirementSpec,
    VcsKind,
};
pub use specifiers::{PySpecSet, PyVersion, SpecifierSet};
