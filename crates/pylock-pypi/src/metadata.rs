//! Core metadata readers.
//!
//! [`Metadata`] is what the candidate pipeline needs from a distribution:
//! its name, version, `Requires-Python`, `Requires-Dist` lines and declared
//! extras. It is read from wheel `METADATA` files, from `PKG-INFO`, or
//! reconstructed from raw project files when the build backend fails.

use crate::error::{PypiError, Result};
use crate::formats::setup_py;
use crate::markers::Marker;
use crate::requirements::Requirement;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Distribution metadata relevant to dependency resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    pub version: Option<String>,
    pub requires_python: Option<String>,
    /// `Requires-Dist` lines; extra dependencies carry an `extra == "..."` marker
    pub requires_dist: Vec<String>,
    pub provides_extra: Vec<String>,
}

impl Metadata {
    /// Parses an RFC 822 style `METADATA` or `PKG-INFO` document.
    ///
    /// Only headers are read; the message body is ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use pylock_pypi::Metadata;
    ///
    /// let content = "Metadata-Version: 2.1\nName: demo\nVersion: 0.0.1\nRequires-Dist: idna\n";
    /// let metadata = Metadata::parse(content, "demo/METADATA").unwrap();
    /// assert_eq!(metadata.name, "demo");
    /// assert_eq!(metadata.requires_dist, ["idna"]);
    /// ```
    pub fn parse(content: &str, origin: &str) -> Result<Self> {
        let mut headers: Vec<(String, String)> = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                break;
            }
            if line.starts_with([' ', '\t']) {
                if let Some((_, value)) = headers.last_mut() {
                    value.push('\n');
                    value.push_str(line.trim());
                }
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                headers.push((key.trim().to_ascii_lowercase(), value.trim().to_string()));
            }
        }

        let mut metadata = Self::default();
        for (key, value) in headers {
            match key.as_str() {
                "name" => metadata.name = value,
                "version" => metadata.version = Some(value),
                "requires-python" if !value.is_empty() => metadata.requires_python = Some(value),
                "requires-dist" => metadata.requires_dist.push(value),
                "provides-extra" => metadata.provides_extra.push(value),
                _ => {}
            }
        }

        if metadata.name.is_empty() {
            return Err(PypiError::invalid_metadata(origin, "missing Name header"));
        }
        Ok(metadata)
    }

    /// Reads the `*.dist-info/METADATA` member of a wheel.
    pub fn from_wheel(path: &Path) -> Result<Self> {
        let origin = path.display().to_string();
        let file = fs::File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)?;

        let member = archive
            .file_names()
            .find(|name| {
                let mut parts = name.split('/');
                matches!(
                    (parts.next(), parts.next(), parts.next()),
                    (Some(dir), Some("METADATA"), None) if dir.ends_with(".dist-info")
                )
            })
            .map(str::to_string)
            .ok_or_else(|| PypiError::invalid_metadata(&origin, "no .dist-info/METADATA member"))?;

        let mut content = String::new();
        archive.by_name(&member)?.read_to_string(&mut content)?;
        tracing::debug!("read wheel metadata from {}!{}", origin, member);
        Self::parse(&content, &origin)
    }

    /// Reads `METADATA` from an unpacked `.dist-info` directory.
    pub fn from_dist_info(dir: &Path) -> Result<Self> {
        let path = dir.join("METADATA");
        let content = fs::read_to_string(&path)?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Builds metadata from base dependencies and per-extra groups.
    ///
    /// Extra dependencies get an `extra == "<name>"` clause appended to their
    /// marker.
    pub fn from_groups(
        name: String,
        version: Option<String>,
        requires_python: Option<String>,
        dependencies: Vec<String>,
        extras: &BTreeMap<String, Vec<String>>,
    ) -> Result<Self> {
        let mut requires_dist = dependencies;
        for (extra, lines) in extras {
            for line in lines {
                requires_dist.push(with_extra_marker(line, extra)?);
            }
        }
        Ok(Self {
            name,
            version,
            requires_python,
            requires_dist,
            provides_extra: extras.keys().cloned().collect(),
        })
    }
}

/// Appends `extra == "<extra>"` to the marker of a dependency line.
pub fn with_extra_marker(line: &str, extra: &str) -> Result<String> {
    let mut req = Requirement::parse_dependency(line)?;
    let extra_marker = Marker::extra(extra)?;
    req.marker = Some(match req.marker.take() {
        Some(marker) => marker.and(extra_marker),
        None => extra_marker,
    });
    Ok(req.as_line())
}

/// Reads raw project files left behind by a failed build.
///
/// Sources are tried in order: an `*.egg-info` directory, `setup.cfg`, and a
/// static scan of `setup.py`. Returns `Ok(None)` when none yields a name.
pub fn read_fallback(root: &Path) -> Result<Option<Metadata>> {
    if let Some(egg_info) = find_egg_info(root) {
        tracing::debug!("reading fallback metadata from {}", egg_info.display());
        return read_egg_info(&egg_info).map(Some);
    }

    let setup_cfg = root.join("setup.cfg");
    if setup_cfg.is_file()
        && let Some(metadata) = read_setup_cfg(&fs::read_to_string(&setup_cfg)?)?
    {
        tracing::debug!("reading fallback metadata from {}", setup_cfg.display());
        return Ok(Some(metadata));
    }

    let setup_py = root.join("setup.py");
    if setup_py.is_file() {
        let content = fs::read_to_string(&setup_py)?;
        if let Some(metadata) = setup_py::scan(&content)? {
            tracing::debug!("reading fallback metadata from {}", setup_py.display());
            return Ok(Some(metadata));
        }
    }

    Ok(None)
}

fn find_egg_info(root: &Path) -> Option<PathBuf> {
    [root.to_path_buf(), root.join("src")]
        .into_iter()
        .filter_map(|dir| fs::read_dir(dir).ok())
        .flat_map(|entries| entries.filter_map(|entry| entry.ok()))
        .map(|entry| entry.path())
        .find(|path| {
            path.is_dir()
                && path
                    .extension()
                    .is_some_and(|ext| ext == "egg-info")
        })
}

/// Reads `PKG-INFO` plus `requires.txt` from an egg-info directory.
pub fn read_egg_info(dir: &Path) -> Result<Metadata> {
    let pkg_info = dir.join("PKG-INFO");
    let mut metadata = Metadata::parse(
        &fs::read_to_string(&pkg_info)?,
        &pkg_info.display().to_string(),
    )?;

    let requires = dir.join("requires.txt");
    if requires.is_file() {
        let (base, extras) = parse_requires_txt(&fs::read_to_string(&requires)?)?;
        let parsed = Metadata::from_groups(String::new(), None, None, base, &extras)?;
        if metadata.requires_dist.is_empty() {
            metadata.requires_dist = parsed.requires_dist;
        }
        for extra in parsed.provides_extra {
            if !metadata.provides_extra.contains(&extra) {
                metadata.provides_extra.push(extra);
            }
        }
    }
    Ok(metadata)
}

/// Parses a setuptools `requires.txt`.
///
/// Sections look like `[extra]`, `[extra:marker]` or `[:marker]`; the
/// section marker is combined with each line's own marker.
fn parse_requires_txt(content: &str) -> Result<(Vec<String>, BTreeMap<String, Vec<String>>)> {
    let mut base = Vec::new();
    let mut extras: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut section: (Option<String>, Option<Marker>) = (None, None);

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let (extra, marker) = match header.split_once(':') {
                Some((extra, marker)) => (extra.trim(), Some(marker.trim())),
                None => (header.trim(), None),
            };
            let marker = marker
                .filter(|m| !m.is_empty())
                .map(Marker::parse)
                .transpose()?;
            section = ((!extra.is_empty()).then(|| extra.to_string()), marker);
            if let Some(extra) = &section.0 {
                extras.entry(extra.clone()).or_default();
            }
            continue;
        }

        let mut req = Requirement::parse_dependency(line)?;
        if let Some(section_marker) = &section.1 {
            req.marker = Some(match req.marker.take() {
                Some(marker) => marker.and(section_marker.clone()),
                None => section_marker.clone(),
            });
        }
        match &section.0 {
            Some(extra) => extras.entry(extra.clone()).or_default().push(req.as_line()),
            None => base.push(req.as_line()),
        }
    }
    Ok((base, extras))
}

/// Reads the declarative parts of a `setup.cfg`.
pub fn read_setup_cfg(content: &str) -> Result<Option<Metadata>> {
    let sections = parse_ini(content);
    let get = |section: &str, key: &str| {
        sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let Some(name) = get("metadata", "name") else {
        return Ok(None);
    };

    let dependencies = get("options", "install_requires")
        .map(|value| split_multiline(&value))
        .unwrap_or_default();
    let extras = sections
        .get("options.extras_require")
        .map(|section| {
            section
                .iter()
                .map(|(extra, value)| (extra.clone(), split_multiline(value)))
                .collect::<BTreeMap<_, _>>()
        })
        .unwrap_or_default();

    Metadata::from_groups(
        name,
        get("metadata", "version"),
        get("options", "python_requires"),
        canonical_lines(dependencies)?,
        &extras
            .into_iter()
            .map(|(extra, lines)| Ok((extra, canonical_lines(lines)?)))
            .collect::<Result<BTreeMap<_, _>>>()?,
    )
    .map(Some)
}

fn canonical_lines(lines: Vec<String>) -> Result<Vec<String>> {
    lines
        .iter()
        .map(|line| Ok(Requirement::parse_dependency(line)?.as_line()))
        .collect()
}

fn split_multiline(value: &str) -> Vec<String> {
    value
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Minimal INI reader: sections, `key = value` or `key: value`, indented
/// continuation lines.
fn parse_ini(content: &str) -> BTreeMap<String, BTreeMap<String, String>> {
    let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut current = String::new();
    let mut last_key: Option<String> = None;

    for raw in content.lines() {
        let trimmed = raw.trim();
        if trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }
        if raw.starts_with([' ', '\t']) {
            if let Some(key) = &last_key
                && let Some(value) = sections.get_mut(&current).and_then(|s| s.get_mut(key))
            {
                value.push('\n');
                value.push_str(trimmed);
            }
            continue;
        }
        if let Some(name) = trimmed.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            current = name.trim().to_string();
            sections.entry(current.clone()).or_default();
            last_key = None;
            continue;
        }
        let split = trimmed
            .find(['=', ':'])
            .map(|index| (&trimmed[..index], &trimmed[index + 1..]));
        if let Some((key, value)) = split {
            let key = key.trim().to_string();
            sections
                .entry(current.clone())
                .or_default()
                .insert(key.clone(), value.trim().to_string());
            last_key = Some(key);
        }
    }
    sections
}
