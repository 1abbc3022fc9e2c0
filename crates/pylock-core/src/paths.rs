//! Project-root placeholders and local file URLs.
//!
//! Requirements and lockfile entries may reference files inside the project
//! through the `${PROJECT_ROOT}` placeholder. The placeholder is expanded
//! against the owning project's root at use time and restored when a path is
//! written back, so persisted files stay portable across machines.

use crate::error::{PylockError, Result};
use std::path::{Component, Path, PathBuf};
use url::Url;

/// Placeholder token standing for the owning project's root directory.
pub const PROJECT_ROOT_PLACEHOLDER: &str = "${PROJECT_ROOT}";

/// Prefix of local file URLs.
pub const FILE_URL_PREFIX: &str = "file://";

/// Returns `true` if the string references the project root placeholder.
pub fn has_project_root(value: &str) -> bool {
    value.contains(PROJECT_ROOT_PLACEHOLDER)
}

/// Renders a path with forward slashes regardless of platform.
pub fn to_posix(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Expands `${PROJECT_ROOT}` in a plain path string.
///
/// # Examples
///
/// ```
/// use pylock_core::paths::expand_project_root;
/// use std::path::Path;
///
/// let expanded = expand_project_root("${PROJECT_ROOT}/pkgs/demo", Path::new("/work/app"));
/// assert_eq!(expanded, "/work/app/pkgs/demo");
/// ```
pub fn expand_project_root(value: &str, root: &Path) -> String {
    value.replace(PROJECT_ROOT_PLACEHOLDER, &to_posix(root))
}

/// Expands `${PROJECT_ROOT}` inside a URL.
///
/// Handles both `file:///${PROJECT_ROOT}/...` and placeholders embedded
/// elsewhere in the URL.
pub fn expand_project_root_url(url: &str, root: &Path) -> String {
    let marker = format!("{}/{}", FILE_URL_PREFIX, PROJECT_ROOT_PLACEHOLDER);
    if let Some(rest) = url.strip_prefix(&marker) {
        return format!("{}{}", path_to_url(root), rest);
    }
    expand_project_root(url, root)
}

/// Lexically normalizes a path, resolving `.` and `..` components.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Makes a path absolute against `base` without touching the filesystem.
pub fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&base.join(path))
    }
}

/// Converts a path into a `file://` URL.
///
/// Paths starting with the project root placeholder keep it verbatim after
/// `file:///`. Relative paths are made absolute against the working
/// directory first.
///
/// # Examples
///
/// ```
/// use pylock_core::paths::path_to_url;
/// use std::path::Path;
///
/// assert_eq!(path_to_url(Path::new("/tmp/my dir/a.whl")), "file:///tmp/my%20dir/a.whl");
/// assert_eq!(
///     path_to_url(Path::new("${PROJECT_ROOT}/dist/a.whl")),
///     "file:///${PROJECT_ROOT}/dist/a.whl"
/// );
/// ```
pub fn path_to_url(path: &Path) -> String {
    let posix = to_posix(path);
    if let Some(rest) = posix.strip_prefix(PROJECT_ROOT_PLACEHOLDER) {
        return format!(
            "{}/{}{}",
            FILE_URL_PREFIX,
            PROJECT_ROOT_PLACEHOLDER,
            encode_segments(rest)
        );
    }
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match Url::from_file_path(&absolute) {
        Ok(url) => url.into(),
        Err(()) => format!("{}/{}", FILE_URL_PREFIX, posix.trim_start_matches('/')),
    }
}

/// Percent-encodes the segments of a `/`-separated path.
fn encode_segments(relative: &str) -> String {
    let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return String::new();
    }
    let Ok(mut url) = Url::parse("file:///") else {
        return relative.to_string();
    };
    if let Ok(mut path) = url.path_segments_mut() {
        path.extend(segments);
    }
    url.path().to_string()
}

/// Converts a `file://` URL back into a local path.
///
/// Query and fragment are ignored. A `file:///${PROJECT_ROOT}/...` URL maps
/// to a `${PROJECT_ROOT}/...` path.
pub fn url_to_path(url: &str) -> Result<PathBuf> {
    let invalid = || PylockError::InvalidUrl(url.to_string());
    if !is_file_url(url) {
        return Err(invalid());
    }

    let placeholder = format!("{}/{}", FILE_URL_PREFIX, PROJECT_ROOT_PLACEHOLDER);
    if let Some(rest) = url.strip_prefix(&placeholder) {
        let rest = rest.split(['#', '?']).next().unwrap_or_default();
        let decoded = urlencoding::decode(rest).map_err(|_| invalid())?;
        return Ok(PathBuf::from(format!(
            "{}{}",
            PROJECT_ROOT_PLACEHOLDER, decoded
        )));
    }

    Url::parse(url)
        .map_err(|_| invalid())?
        .to_file_path()
        .map_err(|()| invalid())
}

/// Returns `true` for `file://` URLs.
pub fn is_file_url(url: &str) -> bool {
    url.starts_with(FILE_URL_PREFIX)
}

/// Renders `path` relative to `root` with a leading `./`, if it lies inside.
///
/// # Examples
///
/// ```
/// use pylock_core::paths::relative_to_root;
/// use std::path::Path;
///
/// let root = Path::new("/work/app");
/// assert_eq!(relative_to_root(Path::new("/work/app/libs/a"), root).as_deref(), Some("./libs/a"));
/// assert_eq!(relative_to_root(Path::new("/elsewhere"), root), None);
/// ```
pub fn relative_to_root(path: &Path, root: &Path) -> Option<String> {
    let path = normalize_path(path);
    let root = normalize_path(root);
    let relative = path.strip_prefix(&root).ok()?;
    if relative.as_os_str().is_empty() {
        return Some(".".to_string());
    }
    Some(format!("./{}", to_posix(relative)))
}

/// Rewrites a path inside `root` to its `${PROJECT_ROOT}` form.
///
/// Paths outside the project are returned unchanged in posix form.
pub fn collapse_project_root(path: &Path, root: &Path) -> String {
    let normalized = normalize_path(path);
    match normalized.strip_prefix(normalize_path(root)) {
        Ok(relative) if relative.as_os_str().is_empty() => PROJECT_ROOT_PLACEHOLDER.to_string(),
        Ok(relative) => format!("{}/{}", PROJECT_ROOT_PLACEHOLDER, to_posix(relative)),
        Err(_) => to_posix(&normalized),
    }
}

/// Rewrites a `file://` URL inside `root` to `file:///${PROJECT_ROOT}/...`.
pub fn collapse_project_root_url(url: &str, root: &Path) -> String {
    if !is_file_url(url) || has_project_root(url) {
        return url.to_string();
    }
    match url_to_path(url) {
        Ok(path) => {
            let collapsed = collapse_project_root(&path, root);
            if has_project_root(&collapsed) {
                format!("{}/{}", FILE_URL_PREFIX, collapsed)
            } else {
                url.to_string()
            }
        }
        Err(_) => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_project_root() {
        let root = Path::new("/home/dev/project");
        assert_eq!(
            expand_project_root("${PROJECT_ROOT}/libs/demo", root),
            "/home/dev/project/libs/demo"
        );
        assert_eq!(expand_project_root("libs/demo", root), "libs/demo");
    }

    #[test]
    fn test_expand_project_root_url() {
        let root = Path::new("/home/dev/project");
        assert_eq!(
            expand_project_root_url("file:///${PROJECT_ROOT}/dist/demo.whl", root),
            "file:///home/dev/project/dist/demo.whl"
        );
    }

    #[test]
    fn test_path_url_roundtrip() {
        let path = Path::new("/tmp/some dir/demo-0.0.1.tar.gz");
        let url = path_to_url(path);
        assert_eq!(url, "file:///tmp/some%20dir/demo-0.0.1.tar.gz");
        assert_eq!(url_to_path(&url).unwrap(), path);
    }

    #[test]
    fn test_path_to_url_keeps_placeholder() {
        let url = path_to_url(Path::new("${PROJECT_ROOT}/dist/demo.whl"));
        assert_eq!(url, "file:///${PROJECT_ROOT}/dist/demo.whl");
    }

    #[test]
    fn test_placeholder_url_roundtrip() {
        let url = path_to_url(Path::new("${PROJECT_ROOT}/dist/my pkg/demo.whl"));
        assert_eq!(url, "file:///${PROJECT_ROOT}/dist/my%20pkg/demo.whl");
        assert_eq!(
            url_to_path(&url).unwrap(),
            PathBuf::from("${PROJECT_ROOT}/dist/my pkg/demo.whl")
        );
    }

    #[test]
    fn test_url_to_path_ignores_fragment_and_localhost() {
        assert_eq!(
            url_to_path("file:///tmp/demo.whl#sha256=abc").unwrap(),
            PathBuf::from("/tmp/demo.whl")
        );
        assert_eq!(
            url_to_path("file://localhost/tmp/demo.whl").unwrap(),
            PathBuf::from("/tmp/demo.whl")
        );
    }

    #[cfg(windows)]
    #[test]
    fn test_url_to_path_windows_drive() {
        assert_eq!(
            url_to_path("file:///C:/work/demo.whl").unwrap(),
            PathBuf::from(r"C:\work\demo.whl")
        );
        assert_eq!(
            path_to_url(Path::new(r"C:\work\demo.whl")),
            "file:///C:/work/demo.whl"
        );
    }

    #[test]
    fn test_url_to_path_rejects_remote() {
        assert!(matches!(
            url_to_path("https://example.com/a.whl"),
            Err(PylockError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
    }

    #[test]
    fn test_relative_to_root() {
        let root = Path::new("/work/app");
        assert_eq!(
            relative_to_root(Path::new("/work/app/./pkgs/../pkgs/a"), root).as_deref(),
            Some("./pkgs/a")
        );
        assert_eq!(relative_to_root(Path::new("/work/other"), root), None);
    }

    #[test]
    fn test_collapse_project_root() {
        let root = Path::new("/work/app");
        assert_eq!(
            collapse_project_root(Path::new("/work/app/dist/a.whl"), root),
            "${PROJECT_ROOT}/dist/a.whl"
        );
        assert_eq!(
            collapse_project_root(Path::new("/opt/a.whl"), root),
            "/opt/a.whl"
        );
    }

    #[test]
    fn test_collapse_project_root_url() {
        let root = Path::new("/work/app");
        assert_eq!(
            collapse_project_root_url("file:///work/app/dist/a.whl", root),
            "file:///${PROJECT_ROOT}/dist/a.whl"
        );
        assert_eq!(
            collapse_project_root_url("https://example.com/a.whl", root),
            "https://example.com/a.whl"
        );
    }
}
