//! Core plumbing for pylock.
//!
//! This crate holds the pieces that are independent of Python packaging
//! rules:
//! - **Errors**: [`PylockError`] and the crate-wide [`Result`] alias
//! - **Configuration**: dotted-key TOML configuration with env overrides
//! - **Wheel cache**: fingerprint-keyed, single-flight build cache
//! - **Paths**: `${PROJECT_ROOT}` placeholders and `file://` URLs
//! - **Lockfile**: the per-dependency [`LockfileEntry`] record
//!
//! # Examples
//!
//! ```
//! use pylock_core::{WheelCache, paths};
//! use std::path::Path;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let cache = WheelCache::new(dir.path());
//! assert!(cache.cached_wheel("https://example.com/demo-0.1.tar.gz").is_none());
//!
//! let url = paths::path_to_url(Path::new("/work/app/dist/demo-0.1.tar.gz"));
//! assert_eq!(url, "file:///work/app/dist/demo-0.1.tar.gz");
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod lockfile;
pub mod paths;

pub use cache::{WheelCache, file_hash, link_fingerprint};
pub use config::{Config, ConfigItem, ConfigValue};
pub use error::{PylockError, Result};
pub use lockfile::LockfileEntry;
pub use paths::{
    PROJECT_ROOT_PLACEHOLDER, collapse_project_root, expand_project_root, path_to_url,
    relative_to_root, url_to_path,
};
