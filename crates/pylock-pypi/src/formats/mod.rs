//! Static metadata dialects.
//!
//! A project directory may describe itself in several `pyproject.toml`
//! schemas. Each schema has a [`MetaConverter`] that turns its table into a
//! [`ProjectMetadata`]. Converters are consulted in the fixed order of
//! [`CONVERTERS`]; the first one that recognizes the document wins.
//!
//! Every converter is driven by a rule table: an ordered list of
//! `(source key, transform)` pairs applied with [`apply_rules`].

pub mod flit;
pub mod legacy;
pub mod pep621;
pub mod poetry;
pub mod setup_py;

use crate::error::{PypiError, Result};
use crate::metadata::{self, Metadata};
use crate::requirements::{Requirement, RequirementSpec};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use toml_edit::{DocumentMut, Item, TableLike};

pub use flit::FlitConverter;
pub use legacy::LegacyConverter;
pub use pep621::Pep621Converter;
pub use poetry::PoetryConverter;

/// Tool settings carried alongside metadata (sources, scripts, ...).
pub type Settings = toml_edit::Table;

/// Metadata declared statically by a project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectMetadata {
    pub name: Option<String>,
    pub version: Option<String>,
    pub requires_python: Option<String>,
    pub dependencies: Vec<String>,
    pub optional_dependencies: BTreeMap<String, Vec<String>>,
    pub dev_dependencies: Vec<String>,
    /// Fields the build backend computes at build time
    pub dynamic: Vec<String>,
}

impl ProjectMetadata {
    /// `true` if name, version and dependencies are all known without
    /// running the build backend.
    pub fn is_complete(&self) -> bool {
        self.name.is_some()
            && self.version.is_some()
            && !["version", "dependencies", "optional-dependencies"]
                .iter()
                .any(|field| self.dynamic.iter().any(|d| d == field))
    }

    pub fn into_metadata(self) -> Result<Metadata> {
        let name = self
            .name
            .ok_or_else(|| PypiError::invalid_metadata("pyproject.toml", "missing project name"))?;
        Metadata::from_groups(
            name,
            self.version,
            self.requires_python,
            self.dependencies,
            &self.optional_dependencies,
        )
    }
}

/// State threaded through a converter's rules.
pub struct Conversion<'a> {
    pub metadata: ProjectMetadata,
    pub settings: Settings,
    pub root: &'a Path,
}

impl<'a> Conversion<'a> {
    pub fn new(root: &'a Path) -> Self {
        Self {
            metadata: ProjectMetadata::default(),
            settings: Settings::new(),
            root,
        }
    }

    pub fn finish(self) -> (ProjectMetadata, Settings) {
        (self.metadata, self.settings)
    }
}

/// Transform applied to the value of one source key. Receives the whole
/// source table for rules that consult sibling keys.
pub type Transform = fn(&Item, &dyn TableLike, &mut Conversion<'_>) -> Result<()>;

/// One `(source key, transform)` entry of a converter's rule table.
pub type Rule = (&'static str, Transform);

/// Applies `rules` in order to the keys present in `table`.
pub fn apply_rules(
    table: &dyn TableLike,
    rules: &[Rule],
    conversion: &mut Conversion<'_>,
) -> Result<()> {
    for (key, transform) in rules {
        if let Some(item) = table.get(key) {
            transform(item, table, conversion)?;
        }
    }
    Ok(())
}

/// A pluggable reader for one `pyproject.toml` schema.
pub trait MetaConverter: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// `true` if the document uses this schema.
    fn matches(&self, doc: &DocumentMut) -> bool;

    /// `true` if the project at `root` uses this schema.
    fn detect(&self, root: &Path) -> bool {
        read_pyproject(root)
            .ok()
            .flatten()
            .is_some_and(|doc| self.matches(&doc))
    }

    /// Converts the schema's table into project metadata and tool settings.
    ///
    /// Fails when the table is absent or malformed.
    fn convert(&self, doc: &DocumentMut, root: &Path) -> Result<(ProjectMetadata, Settings)>;
}

/// Recognized dialects, in priority order.
pub static CONVERTERS: &[&dyn MetaConverter] = &[
    &Pep621Converter,
    &LegacyConverter,
    &PoetryConverter,
    &FlitConverter,
];

/// Reads `pyproject.toml` from `root`, if present.
pub fn read_pyproject(root: &Path) -> Result<Option<DocumentMut>> {
    let path = root.join("pyproject.toml");
    if !path.is_file() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)?;
    content
        .parse::<DocumentMut>()
        .map(Some)
        .map_err(|source| PypiError::TomlParse {
            file: path.display().to_string(),
            source,
        })
}

/// First converter recognizing `doc`.
pub fn find_converter(doc: &DocumentMut) -> Option<&'static dyn MetaConverter> {
    CONVERTERS.iter().copied().find(|c| c.matches(doc))
}

/// Converts the project's `pyproject.toml` with the first matching dialect.
pub fn convert_project(root: &Path) -> Result<Option<(ProjectMetadata, Settings)>> {
    let Some(doc) = read_pyproject(root)? else {
        return Ok(None);
    };
    let Some(converter) = find_converter(&doc) else {
        tracing::debug!("no known metadata dialect in {}", root.display());
        return Ok(None);
    };
    tracing::debug!("reading {} metadata from {}", converter.name(), root.display());
    converter.convert(&doc, root).map(Some)
}

/// Static metadata of a project, when every field needed for resolution is
/// declared.
pub fn read_static_metadata(root: &Path) -> Result<Option<Metadata>> {
    match convert_project(root)? {
        Some((project, _)) if project.is_complete() => project.into_metadata().map(Some),
        Some(_) => {
            tracing::debug!("static metadata of {} is incomplete", root.display());
            Ok(None)
        }
        None => Ok(None),
    }
}

/// Best-effort project name of a local directory, without building it.
pub fn project_name(root: &Path) -> Option<String> {
    if let Ok(Some((project, _))) = convert_project(root)
        && project.name.is_some()
    {
        return project.name;
    }
    if let Ok(content) = fs::read_to_string(root.join("setup.cfg"))
        && let Ok(Some(metadata)) = metadata::read_setup_cfg(&content)
    {
        return Some(metadata.name);
    }
    fs::read_to_string(root.join("setup.py"))
        .ok()
        .and_then(|content| setup_py::scan(&content).ok().flatten())
        .map(|metadata| metadata.name)
}

/// Looks up a nested table such as `tool.poetry`.
pub fn nested_table<'a>(doc: &'a DocumentMut, path: &[&str]) -> Option<&'a dyn TableLike> {
    let mut current: &dyn TableLike = doc.as_table();
    for key in path {
        current = current.get(key)?.as_table_like()?;
    }
    Some(current)
}

pub(crate) fn expect_str(item: &Item, key: &str) -> Result<String> {
    item.as_str()
        .map(str::to_string)
        .ok_or_else(|| PypiError::invalid_metadata("pyproject.toml", format!("'{}' must be a string", key)))
}

pub(crate) fn expect_str_array(item: &Item, key: &str) -> Result<Vec<String>> {
    let array = item.as_array().ok_or_else(|| {
        PypiError::invalid_metadata("pyproject.toml", format!("'{}' must be an array", key))
    })?;
    array
        .iter()
        .map(|value| {
            value.as_str().map(str::to_string).ok_or_else(|| {
                PypiError::invalid_metadata(
                    "pyproject.toml",
                    format!("'{}' must contain only strings", key),
                )
            })
        })
        .collect()
}

/// Parses an array of dependency strings into canonical lines.
pub(crate) fn requirement_lines(item: &Item, key: &str) -> Result<Vec<String>> {
    expect_str_array(item, key)?
        .iter()
        .map(|line| Ok(Requirement::parse_dependency(line)?.as_line()))
        .collect()
}

/// Parses a `name = spec` mapping into canonical lines.
pub(crate) fn requirement_table_lines(item: &Item, key: &str) -> Result<Vec<String>> {
    let table = item.as_table_like().ok_or_else(|| {
        PypiError::invalid_metadata("pyproject.toml", format!("'{}' must be a table", key))
    })?;
    table
        .iter()
        .map(|(name, value)| {
            let spec = RequirementSpec::from_toml_item(value).ok_or_else(|| {
                PypiError::invalid_metadata(
                    "pyproject.toml",
                    format!("unsupported dependency entry '{}'", name),
                )
            })?;
            Ok(Requirement::from_req_dict(Some(name), &spec)?.as_line())
        })
        .collect()
}
