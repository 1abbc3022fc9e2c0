use crate::error::{PylockError, Result};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Hash names accepted in a link fragment as part of the cache fingerprint.
const HASH_NAMES: &[&str] = &["sha256", "sha384", "sha512", "md5"];

/// Computes the stable fingerprint of an artifact URL.
///
/// The fragment is dropped except for a `<hash-name>=<digest>` entry, so
/// `#egg=` or `#subdirectory=` fragments never split the cache.
///
/// # Examples
///
/// ```
/// use pylock_core::cache::link_fingerprint;
///
/// let a = link_fingerprint("https://example.com/demo-0.1.tar.gz#egg=demo");
/// let b = link_fingerprint("https://example.com/demo-0.1.tar.gz");
/// assert_eq!(a, b);
/// ```
pub fn link_fingerprint(url: &str) -> String {
    let canonical = canonical_url(url);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn canonical_url(url: &str) -> String {
    let Some((base, fragment)) = url.split_once('#') else {
        return url.to_string();
    };
    let hash = fragment.split('&').find(|part| {
        part.split_once('=')
            .is_some_and(|(key, _)| HASH_NAMES.contains(&key))
    });
    match hash {
        Some(hash) => format!("{}#{}", base, hash),
        None => base.to_string(),
    }
}

/// Read-through cache of wheels built from non-wheel artifacts.
///
/// Entries are keyed by the fingerprint of the artifact link. Lookups are
/// lock-free via `DashMap`; builds for the same key are serialized through a
/// per-key mutex so at most one build runs per fingerprint, and later callers
/// reuse the wheel the first one produced.
///
/// # Examples
///
/// ```
/// use pylock_core::cache::WheelCache;
///
/// let dir = tempfile::tempdir().unwrap();
/// let cache = WheelCache::new(dir.path());
///
/// let wheel = cache
///     .get_or_build("https://example.com/demo-0.1.tar.gz", |out| {
///         let path = out.join("demo-0.1-py3-none-any.whl");
///         std::fs::write(&path, b"wheel")?;
///         Ok::<_, pylock_core::PylockError>(path)
///     })
///     .unwrap();
///
/// assert!(wheel.ends_with("demo-0.1-py3-none-any.whl"));
/// assert_eq!(cache.cached_wheel("https://example.com/demo-0.1.tar.gz"), Some(wheel));
/// ```
#[derive(Debug)]
pub struct WheelCache {
    root: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
    entries: DashMap<String, PathBuf>,
}

impl WheelCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: DashMap::new(),
            entries: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory where the wheel built for `url` lives.
    ///
    /// The fingerprint is split into nested prefixes to keep directories small.
    pub fn get_path_for_link(&self, url: &str) -> PathBuf {
        let key = link_fingerprint(url);
        self.root
            .join(&key[..2])
            .join(&key[2..4])
            .join(&key[4..6])
            .join(&key[6..])
    }

    /// Returns the cached wheel for `url`, if one was built before.
    pub fn cached_wheel(&self, url: &str) -> Option<PathBuf> {
        let key = link_fingerprint(url);
        if let Some(entry) = self.entries.get(&key)
            && entry.value().is_file()
        {
            return Some(entry.value().clone());
        }

        let wheel = find_wheel(&self.get_path_for_link(url))?;
        self.entries.insert(key, wheel.clone());
        Some(wheel)
    }

    /// Returns the cached wheel for `url` or builds it with `build`.
    ///
    /// `build` receives the cache directory for the link and returns the path
    /// of the wheel it wrote there. Concurrent callers with the same link wait
    /// for the first build and then reuse its result.
    pub fn get_or_build<F, E>(&self, url: &str, build: F) -> std::result::Result<PathBuf, E>
    where
        F: FnOnce(&Path) -> std::result::Result<PathBuf, E>,
        E: From<PylockError>,
    {
        if let Some(wheel) = self.cached_wheel(url) {
            tracing::debug!("wheel cache hit for {}", url);
            return Ok(wheel);
        }

        let key = link_fingerprint(url);
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock
            .lock()
            .map_err(|_| PylockError::Cache(format!("build lock poisoned for {}", url)))?;

        // Another caller may have finished while we waited.
        if let Some(wheel) = self.cached_wheel(url) {
            tracing::debug!("wheel cache filled concurrently for {}", url);
            return Ok(wheel);
        }

        let dir = self.get_path_for_link(url);
        fs::create_dir_all(&dir).map_err(PylockError::from)?;
        tracing::debug!("wheel cache miss for {}, building into {}", url, dir.display());
        let wheel = build(&dir)?;
        self.entries.insert(key, wheel.clone());
        Ok(wheel)
    }

    /// Drops the in-memory index; wheels on disk are kept.
    pub fn clear(&self) {
        self.entries.clear();
        self.locks.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn find_wheel(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut wheels: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "whl"))
        .collect();
    wheels.sort();
    wheels.into_iter().next()
}

/// Computes the `sha256:<hex>` digest of a local file.
pub fn file_hash(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}
