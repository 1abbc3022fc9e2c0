//! The legacy `[tool.pdm]` schema, which declares dependencies as a
//! `name = spec` mapping.

use super::{
    Conversion, MetaConverter, ProjectMetadata, Rule, Settings, apply_rules, expect_str,
    expect_str_array, nested_table, requirement_table_lines,
};
use crate::error::{PypiError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use toml_edit::{DocumentMut, Item, TableLike};

pub struct LegacyConverter;

const RULES: &[Rule] = &[
    ("name", name),
    ("version", version),
    ("python_requires", python_requires),
    ("dependencies", dependencies),
    ("dev-dependencies", dev_dependencies),
    ("extras", extras),
];

/// Keys copied verbatim into the tool settings.
const SETTINGS_KEYS: &[&str] = &["source", "scripts", "allow_prereleases"];

fn name(item: &Item, _: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    c.metadata.name = Some(expect_str(item, "name")?);
    Ok(())
}

/// A non-string version (`{ use_scm = true }`, `{ from = ".." }`) is
/// computed at build time.
fn version(item: &Item, _: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    match item.as_str() {
        Some(version) => c.metadata.version = Some(version.to_string()),
        None => c.metadata.dynamic.push("version".to_string()),
    }
    Ok(())
}

fn python_requires(item: &Item, _: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    c.metadata.requires_python = Some(expect_str(item, "python_requires")?);
    Ok(())
}

fn dependencies(item: &Item, _: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    c.metadata.dependencies = requirement_table_lines(item, "dependencies")?;
    Ok(())
}

fn dev_dependencies(item: &Item, _: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    c.metadata.dev_dependencies = requirement_table_lines(item, "dev-dependencies")?;
    Ok(())
}

/// `<group>-dependencies` tables become extras; the `extras` list may also
/// define aliases as `alias=group1|group2`.
fn extras(item: &Item, source: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in source.iter() {
        if key == "dev-dependencies" {
            continue;
        }
        if let Some(group) = key.strip_suffix("-dependencies") {
            groups.insert(group.to_string(), requirement_table_lines(value, key)?);
        }
    }

    for entry in expect_str_array(item, "extras")? {
        if groups.contains_key(&entry) {
            continue;
        }
        let Some((alias, members)) = entry.split_once('=') else {
            tracing::warn!("extra '{}' has no matching '{}-dependencies' table", entry, entry);
            continue;
        };
        let mut union = BTreeSet::new();
        for member in members.split('|').map(str::trim) {
            let deps = groups.get(member).ok_or_else(|| {
                PypiError::invalid_metadata(
                    "pyproject.toml",
                    format!("extra alias '{}' references unknown group '{}'", alias, member),
                )
            })?;
            union.extend(deps.iter().cloned());
        }
        groups.insert(alias.trim().to_string(), union.into_iter().collect());
    }

    c.metadata.optional_dependencies = groups;
    Ok(())
}

impl MetaConverter for LegacyConverter {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn matches(&self, doc: &DocumentMut) -> bool {
        nested_table(doc, &["tool", "pdm"])
            .and_then(|pdm| pdm.get("dependencies"))
            .is_some_and(Item::is_table_like)
    }

    fn convert(&self, doc: &DocumentMut, root: &Path) -> Result<(ProjectMetadata, Settings)> {
        let table = nested_table(doc, &["tool", "pdm"])
            .ok_or_else(|| PypiError::invalid_metadata("pyproject.toml", "no [tool.pdm] table"))?;
        let mut conversion = Conversion::new(root);
        apply_rules(table, RULES, &mut conversion)?;

        if table.get("extras").is_none() {
            // Groups still count as extras without an explicit list.
            let empty = Item::Value(toml_edit::Value::Array(toml_edit::Array::new()));
            extras(&empty, table, &mut conversion)?;
        }
        for key in SETTINGS_KEYS {
            if let Some(value) = table.get(key) {
                conversion.settings.insert(key, value.clone());
            }
        }
        Ok(conversion.finish())
    }
}
