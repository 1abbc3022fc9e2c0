use thiserror::Error;

/// Core error types for pylock.
///
/// Covers the ecosystem-neutral plumbing: configuration files, the wheel
/// cache and file URL handling. Python-specific failures live in
/// `pylock_pypi::PypiError`, which wraps this type.
///
/// # Examples
///
/// ```
/// use pylock_core::error::{PylockError, Result};
///
/// fn lookup(key: &str) -> Result<()> {
///     if key.is_empty() {
///         return Err(PylockError::Config("empty key".into()));
///     }
///     Ok(())
/// }
///
/// assert!(lookup("").is_err());
/// ```
#[derive(Error, Debug)]
pub enum PylockError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to parse {file}: {source}")]
    TomlParse {
        file: String,
        #[source]
        source: toml_edit::TomlError,
    },

    #[error("cache error: {0}")]
    Cache(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, PylockError>`.
pub type Result<T> = std::result::Result<T, PylockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = PylockError::Cache("lock poisoned".into());
        assert_eq!(error.to_string(), "cache error: lock poisoned");
    }

    #[test]
    fn test_config_error() {
        let error = PylockError::Config("unknown key: foo".into());
        assert_eq!(error.to_string(), "configuration error: unknown key: foo");
    }

    #[test]
    fn test_invalid_url() {
        let error = PylockError::InvalidUrl("https://example.com".into());
        assert_eq!(error.to_string(), "invalid URL: https://example.com");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: PylockError = io_err.into();
        assert!(error.to_string().contains("I/O error"));
    }

    #[test]
    fn test_toml_parse_error() {
        let source = "[broken".parse::<toml_edit::DocumentMut>().unwrap_err();
        let error = PylockError::TomlParse {
            file: "config.toml".into(),
            source,
        };
        assert!(error.to_string().starts_with("failed to parse config.toml"));
    }
}
