//! The `[tool.flit.metadata]` schema.
//!
//! Flit does not declare the version in `pyproject.toml`; it reads
//! `__version__` from the distributed module.

use super::{
    Conversion, MetaConverter, ProjectMetadata, Rule, Settings, apply_rules, expect_str,
    nested_table, requirement_lines,
};
use crate::error::{PypiError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use toml_edit::{DocumentMut, Item, TableLike};

static VERSION_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^__version__\s*=\s*['"]([^'"]+)['"]"#).unwrap()
});

pub struct FlitConverter;

const RULES: &[Rule] = &[
    ("module", module),
    ("dist-name", dist_name),
    ("requires-python", requires_python),
    ("requires", requires),
    ("requires-extra", requires_extra),
];

/// The module name doubles as the distribution name unless `dist-name` is set.
fn module(item: &Item, _: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    let module = expect_str(item, "module")?;
    match read_module_version(c.root, &module) {
        Some(version) => c.metadata.version = Some(version),
        None => {
            tracing::debug!("no __version__ found for flit module '{}'", module);
            c.metadata.dynamic.push("version".to_string());
        }
    }
    c.metadata.name = Some(module);
    Ok(())
}

fn dist_name(item: &Item, _: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    c.metadata.name = Some(expect_str(item, "dist-name")?);
    Ok(())
}

fn requires_python(item: &Item, _: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    c.metadata.requires_python = Some(expect_str(item, "requires-python")?);
    Ok(())
}

fn requires(item: &Item, _: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    c.metadata.dependencies = requirement_lines(item, "requires")?;
    Ok(())
}

/// The `dev` extra holds development dependencies.
fn requires_extra(item: &Item, _: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    let table = item.as_table_like().ok_or_else(|| {
        PypiError::invalid_metadata("pyproject.toml", "'requires-extra' must be a table")
    })?;
    for (extra, deps) in table.iter() {
        let lines = requirement_lines(deps, extra)?;
        if extra == "dev" {
            c.metadata.dev_dependencies = lines;
        } else {
            c.metadata.optional_dependencies.insert(extra.to_string(), lines);
        }
    }
    Ok(())
}

fn module_candidates(root: &Path, module: &str) -> [PathBuf; 4] {
    [
        root.join(module).join("__init__.py"),
        root.join(format!("{}.py", module)),
        root.join("src").join(module).join("__init__.py"),
        root.join("src").join(format!("{}.py", module)),
    ]
}

fn read_module_version(root: &Path, module: &str) -> Option<String> {
    module_candidates(root, module)
        .iter()
        .filter_map(|path| fs::read_to_string(path).ok())
        .find_map(|content| {
            VERSION_ASSIGNMENT
                .captures(&content)
                .map(|caps| caps[1].to_string())
        })
}

impl MetaConverter for FlitConverter {
    fn name(&self) -> &'static str {
        "flit"
    }

    fn matches(&self, doc: &DocumentMut) -> bool {
        nested_table(doc, &["tool", "flit", "metadata"]).is_some()
    }

    fn convert(&self, doc: &DocumentMut, root: &Path) -> Result<(ProjectMetadata, Settings)> {
        let table = nested_table(doc, &["tool", "flit", "metadata"]).ok_or_else(|| {
            PypiError::invalid_metadata("pyproject.toml", "no [tool.flit.metadata] table")
        })?;
        let mut conversion = Conversion::new(root);
        apply_rules(table, RULES, &mut conversion)?;
        if let Some(scripts) = nested_table(doc, &["tool", "flit", "scripts"]) {
            let mut entries = toml_edit::Table::new();
            for (key, value) in scripts.iter() {
                entries.insert(key, value.clone());
            }
            conversion.settings.insert("scripts", Item::Table(entries));
        }
        Ok(conversion.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYPROJECT: &str = r#"
[tool.flit.metadata]
module = "flit"
dist-name = "pyflit"
requires-python = ">=3.5"
requires = ["requests>=2.6", "configparser; python_version == '2.7'"]

[tool.flit.metadata.requires-extra]
test = ["pytest >=2.7.3"]
dev = ["flake8"]

[tool.flit.scripts]
flit = "flit:main"
"#;

    #[test]
    fn test_convert_flit_table() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("flit")).unwrap();
        fs::write(
            dir.path().join("flit/__init__.py"),
            "\"\"\"A demo.\"\"\"\n\n__version__ = '0.1.0'\n",
        )
        .unwrap();

        let doc: DocumentMut = PYPROJECT.parse().unwrap();
        let (metadata, settings) = FlitConverter.convert(&doc, dir.path()).unwrap();
        assert_eq!(metadata.name.as_deref(), Some("pyflit"));
        assert_eq!(metadata.version.as_deref(), Some("0.1.0"));
        assert_eq!(
            metadata.dependencies,
            ["requests>=2.6", r#"configparser; python_version == "2.7""#]
        );
        assert_eq!(metadata.optional_dependencies["test"], ["pytest>=2.7.3"]);
        assert_eq!(metadata.dev_dependencies, ["flake8"]);
        assert!(settings.contains_key("scripts"));
        assert!(metadata.is_complete());
    }

    #[test]
    fn test_missing_module_version() {
        let dir = tempfile::tempdir().unwrap();
        let doc: DocumentMut = PYPROJECT.parse().unwrap();
        let (metadata, _) = FlitConverter.convert(&doc, dir.path()).unwrap();
        assert!(metadata.version.is_none());
        assert!(!metadata.is_complete());
    }
}
