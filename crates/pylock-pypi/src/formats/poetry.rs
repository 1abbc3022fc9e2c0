//! The `[tool.poetry]` schema.
//!
//! Poetry writes constraints with its own operators: `^1.2` (caret),
//! `~1.2` (tilde) and bare versions. They are rewritten into standard
//! specifiers before building requirements.

use super::{
    Conversion, MetaConverter, ProjectMetadata, Rule, Settings, apply_rules, expect_str,
    expect_str_array, nested_table,
};
use crate::error::{PypiError, Result};
use crate::markers::{Marker, normalize_name};
use crate::requirements::{DetailedSpec, Requirement, RequirementSpec};
use std::path::Path;
use toml_edit::{DocumentMut, Item, TableLike};

pub struct PoetryConverter;

const RULES: &[Rule] = &[
    ("name", name),
    ("version", version),
    ("dependencies", dependencies),
    ("dev-dependencies", dev_dependencies),
    ("extras", extras),
];

const SETTINGS_KEYS: &[&str] = &["source", "scripts"];

fn name(item: &Item, _: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    c.metadata.name = Some(expect_str(item, "name")?);
    Ok(())
}

fn version(item: &Item, _: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    c.metadata.version = Some(expect_str(item, "version")?);
    Ok(())
}

/// Base dependencies. `python` becomes `requires-python`; optional entries
/// are left for the `extras` rule.
fn dependencies(item: &Item, _: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    let table = as_table(item, "dependencies")?;
    for (name, value) in table.iter() {
        if name == "python" {
            let constraint = expect_str(value, "python")?;
            c.metadata.requires_python = Some(convert_constraint(&constraint)?);
            continue;
        }
        if is_optional(value) {
            continue;
        }
        c.metadata.dependencies.extend(convert_dependency(name, value)?);
    }
    Ok(())
}

fn dev_dependencies(item: &Item, _: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    let table = as_table(item, "dev-dependencies")?;
    for (name, value) in table.iter() {
        c.metadata.dev_dependencies.extend(convert_dependency(name, value)?);
    }
    Ok(())
}

/// `[tool.poetry.extras]` maps each extra to names of optional dependencies.
fn extras(item: &Item, source: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    let table = as_table(item, "extras")?;
    let deps = source.get("dependencies").and_then(Item::as_table_like);
    for (extra, members) in table.iter() {
        let mut lines = Vec::new();
        for member in expect_str_array(members, extra)? {
            let key = normalize_name(&member);
            let found = deps.and_then(|deps| {
                deps.iter()
                    .find(|(name, _)| normalize_name(name) == key)
            });
            match found {
                Some((name, value)) => lines.extend(convert_dependency(name, value)?),
                None => {
                    return Err(PypiError::invalid_metadata(
                        "pyproject.toml",
                        format!("extra '{}' references unknown dependency '{}'", extra, member),
                    ));
                }
            }
        }
        c.metadata.optional_dependencies.insert(extra.to_string(), lines);
    }
    Ok(())
}

fn as_table<'a>(item: &'a Item, key: &str) -> Result<&'a dyn TableLike> {
    item.as_table_like().ok_or_else(|| {
        PypiError::invalid_metadata("pyproject.toml", format!("'{}' must be a table", key))
    })
}

fn is_optional(value: &Item) -> bool {
    value
        .as_table_like()
        .and_then(|t| t.get("optional"))
        .and_then(Item::as_bool)
        .unwrap_or(false)
}

/// Converts one dependency entry. An array of constraint tables yields one
/// line per entry.
fn convert_dependency(name: &str, value: &Item) -> Result<Vec<String>> {
    if let Some(constraint) = value.as_str() {
        let spec = RequirementSpec::Version(convert_constraint(constraint)?);
        return Ok(vec![Requirement::from_req_dict(Some(name), &spec)?.as_line()]);
    }
    if let Some(array) = value.as_array() {
        return array
            .iter()
            .map(|entry| {
                let table = entry.as_inline_table().ok_or_else(|| {
                    PypiError::invalid_metadata(
                        "pyproject.toml",
                        format!("unsupported constraint list for '{}'", name),
                    )
                })?;
                convert_table(name, table)
            })
            .collect();
    }
    if let Some(table) = value.as_table_like() {
        return Ok(vec![convert_table(name, table)?]);
    }
    Err(PypiError::unsupported_format(format!(
        "Unsupported Poetry dependency format for '{}'",
        name
    )))
}

fn convert_table(name: &str, table: &dyn TableLike) -> Result<String> {
    let get_str = |key: &str| table.get(key).and_then(Item::as_str).map(str::to_string);

    let mut spec = DetailedSpec {
        version: get_str("version")
            .map(|v| convert_constraint(&v))
            .transpose()?
            .filter(|v| !v.is_empty()),
        extras: table
            .get("extras")
            .and_then(Item::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
        url: get_str("url"),
        path: get_str("path"),
        git: get_str("git"),
        reference: get_str("rev")
            .or_else(|| get_str("tag"))
            .or_else(|| get_str("branch")),
        editable: table.get("develop").and_then(Item::as_bool).unwrap_or(false),
        subdirectory: get_str("subdirectory"),
        ..DetailedSpec::default()
    };

    let mut marker = get_str("markers").map(|m| Marker::parse(&m)).transpose()?;
    if let Some(python) = get_str("python") {
        let python_marker = python_marker(&convert_constraint(&python)?)?;
        marker = match (marker, python_marker) {
            (Some(existing), Some(python)) => Some(existing.and(python)),
            (existing, python) => existing.or(python),
        };
    }
    spec.marker = marker.map(|m| m.to_string());

    let req = Requirement::from_req_dict(Some(name), &RequirementSpec::Detailed(Box::new(spec)))?;
    Ok(req.as_line())
}

/// Rewrites a specifier set over the interpreter into a `python_version`
/// marker.
fn python_marker(specifier: &str) -> Result<Option<Marker>> {
    let clauses: Vec<String> = specifier
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|clause| {
            let split = clause
                .find(|ch: char| ch.is_ascii_digit())
                .unwrap_or(clause.len());
            let (op, version) = clause.split_at(split);
            format!("python_version {} \"{}\"", op.trim(), version.trim())
        })
        .collect();
    if clauses.is_empty() {
        return Ok(None);
    }
    Ok(Some(Marker::parse(&clauses.join(" and "))?))
}

/// Rewrites a Poetry constraint into standard specifier syntax.
///
/// # Examples
///
/// ```
/// use pylock_pypi::formats::poetry::convert_constraint;
///
/// assert_eq!(convert_constraint("^2.6").unwrap(), ">=2.6,<3.0");
/// assert_eq!(convert_constraint("^0.2.3").unwrap(), ">=0.2.3,<0.3.0");
/// assert_eq!(convert_constraint("~1.2").unwrap(), ">=1.2,<1.3");
/// assert_eq!(convert_constraint("1.0").unwrap(), "==1.0");
/// assert_eq!(convert_constraint("*").unwrap(), "");
/// ```
pub fn convert_constraint(constraint: &str) -> Result<String> {
    let mut parts = Vec::new();
    for clause in constraint.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        if clause == "*" {
            continue;
        }
        if let Some(version) = clause.strip_prefix('^') {
            let release = release_numbers(version.trim(), clause)?;
            let pivot = release.iter().position(|&n| n != 0).unwrap_or(release.len() - 1);
            parts.push(format!(">={}", version.trim()));
            parts.push(format!("<{}", bump(&release, pivot)));
        } else if let Some(version) = clause.strip_prefix('~').filter(|v| !v.starts_with('=')) {
            let release = release_numbers(version.trim(), clause)?;
            let pivot = if release.len() >= 2 { 1 } else { 0 };
            parts.push(format!(">={}", version.trim()));
            parts.push(format!("<{}", bump(&release, pivot)));
        } else if clause.starts_with(|c: char| c.is_ascii_digit()) {
            parts.push(format!("=={}", clause));
        } else {
            parts.push(clause.replace(' ', ""));
        }
    }
    Ok(parts.join(","))
}

fn release_numbers(version: &str, clause: &str) -> Result<Vec<u64>> {
    version
        .split('.')
        .map(|part| {
            part.parse::<u64>().map_err(|_| {
                PypiError::invalid_metadata(
                    "pyproject.toml",
                    format!("unsupported constraint '{}'", clause),
                )
            })
        })
        .collect()
}

/// Increments `release[pivot]`, zeroing later parts; keeps the part count.
fn bump(release: &[u64], pivot: usize) -> String {
    release
        .iter()
        .enumerate()
        .map(|(i, &n)| match i.cmp(&pivot) {
            std::cmp::Ordering::Less => n.to_string(),
            std::cmp::Ordering::Equal => (n + 1).to_string(),
            std::cmp::Ordering::Greater => "0".to_string(),
        })
        .collect::<Vec<_>>()
        .join(".")
}

impl MetaConverter for PoetryConverter {
    fn name(&self) -> &'static str {
        "poetry"
    }

    fn matches(&self, doc: &DocumentMut) -> bool {
        nested_table(doc, &["tool", "poetry"]).is_some()
    }

    fn convert(&self, doc: &DocumentMut, root: &Path) -> Result<(ProjectMetadata, Settings)> {
        let table = nested_table(doc, &["tool", "poetry"]).ok_or_else(|| {
            PypiError::invalid_metadata("pyproject.toml", "no [tool.poetry] table")
        })?;
        let mut conversion = Conversion::new(root);
        apply_rules(table, RULES, &mut conversion)?;
        for key in SETTINGS_KEYS {
            if let Some(value) = table.get(key) {
                conversion.settings.insert(key, value.clone());
            }
        }
        Ok(conversion.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(content: &str) -> ProjectMetadata {
        let doc: DocumentMut = content.parse().unwrap();
        PoetryConverter.convert(&doc, Path::new(".")).unwrap().0
    }

    #[test]
    fn test_convert_poetry_table() {
        let metadata = convert(
            r#"
[tool.poetry]
name = "poetry-demo"
version = "0.1.0"

[tool.poetry.dependencies]
python = "^3.6"
requests = "^2.6"
"#,
        );
        assert_eq!(metadata.name.as_deref(), Some("poetry-demo"));
        assert_eq!(metadata.requires_python.as_deref(), Some(">=3.6,<4.0"));
        assert_eq!(metadata.dependencies, ["requests<3.0,>=2.6"]);
        assert!(metadata.is_complete());
    }

    #[test]
    fn test_optional_dependencies_through_extras() {
        let metadata = convert(
            r#"
[tool.poetry]
name = "demo"
version = "1.0.0"

[tool.poetry.dependencies]
click = "~7.0"
pendulum = { version = "^2.0", optional = true, python = ">=3.6" }
mysqlclient = { version = "1.3", optional = true, markers = "os_name == 'posix'" }

[tool.poetry.dev-dependencies]
pytest = "*"

[tool.poetry.extras]
time = ["pendulum"]
mysql = ["MySQLClient"]
"#,
        );
        assert_eq!(metadata.dependencies, ["click<7.1,>=7.0"]);
        assert_eq!(metadata.dev_dependencies, ["pytest"]);
        assert_eq!(
            metadata.optional_dependencies["time"],
            [r#"pendulum<3.0,>=2.0; python_version >= "3.6""#]
        );
        assert_eq!(
            metadata.optional_dependencies["mysql"],
            [r#"mysqlclient==1.3; os_name == "posix""#]
        );
    }

    #[test]
    fn test_git_dependency() {
        let metadata = convert(
            r#"
[tool.poetry]
name = "demo"
version = "1.0.0"

[tool.poetry.dependencies]
flask = { git = "https://github.com/pallets/flask.git", branch = "main" }
"#,
        );
        assert_eq!(
            metadata.dependencies,
            ["git+https://github.com/pallets/flask.git@main#egg=flask"]
        );
    }

    #[test]
    fn test_unknown_extra_member() {
        let doc: DocumentMut = r#"
[tool.poetry]
name = "demo"

[tool.poetry.dependencies]

[tool.poetry.extras]
time = ["pendulum"]
"#
        .parse()
        .unwrap();
        assert!(PoetryConverter.convert(&doc, Path::new(".")).is_err());
    }

    #[test]
    fn test_constraint_conversion() {
        assert_eq!(convert_constraint("^0.0.3").unwrap(), ">=0.0.3,<0.0.4");
        assert_eq!(convert_constraint("~1").unwrap(), ">=1,<2");
        assert_eq!(convert_constraint(">= 1.2, < 2").unwrap(), ">=1.2,<2");
        assert_eq!(convert_constraint("~=1.4").unwrap(), "~=1.4");
        assert!(convert_constraint("^abc").is_err());
    }
}
