//! The native `[project]` table.

use super::{
    Conversion, MetaConverter, ProjectMetadata, Rule, Settings, apply_rules, expect_str,
    expect_str_array, nested_table, requirement_lines,
};
use crate::error::{PypiError, Result};
use std::path::Path;
use toml_edit::{DocumentMut, Item, TableLike};

pub struct Pep621Converter;

const RULES: &[Rule] = &[
    ("name", name),
    ("version", version),
    ("requires-python", requires_python),
    ("dependencies", dependencies),
    ("optional-dependencies", optional_dependencies),
    ("dynamic", dynamic),
];

fn name(item: &Item, _: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    c.metadata.name = Some(expect_str(item, "name")?);
    Ok(())
}

fn version(item: &Item, _: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    c.metadata.version = Some(expect_str(item, "version")?);
    Ok(())
}

fn requires_python(item: &Item, _: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    c.metadata.requires_python = Some(expect_str(item, "requires-python")?);
    Ok(())
}

fn dependencies(item: &Item, _: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    c.metadata.dependencies = requirement_lines(item, "dependencies")?;
    Ok(())
}

fn optional_dependencies(item: &Item, _: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    let table = item.as_table_like().ok_or_else(|| {
        PypiError::invalid_metadata("pyproject.toml", "'optional-dependencies' must be a table")
    })?;
    for (group, deps) in table.iter() {
        c.metadata
            .optional_dependencies
            .insert(group.to_string(), requirement_lines(deps, group)?);
    }
    Ok(())
}

fn dynamic(item: &Item, _: &dyn TableLike, c: &mut Conversion<'_>) -> Result<()> {
    c.metadata.dynamic = expect_str_array(item, "dynamic")?;
    Ok(())
}

impl MetaConverter for Pep621Converter {
    fn name(&self) -> &'static str {
        "pep621"
    }

    fn matches(&self, doc: &DocumentMut) -> bool {
        doc.get("project").is_some_and(Item::is_table_like)
    }

    fn convert(&self, doc: &DocumentMut, root: &Path) -> Result<(ProjectMetadata, Settings)> {
        let project = nested_table(doc, &["project"])
            .ok_or_else(|| PypiError::invalid_metadata("pyproject.toml", "no [project] table"))?;
        let mut conversion = Conversion::new(root);
        apply_rules(project, RULES, &mut conversion)?;

        if let Some(tool) = nested_table(doc, &["tool", "pylock"]) {
            if let Some(dev) = tool.get("dev-dependencies").and_then(Item::as_table_like) {
                for (group, deps) in dev.iter() {
                    conversion
                        .metadata
                        .dev_dependencies
                        .extend(requirement_lines(deps, group)?);
                }
            }
            for (key, value) in tool.iter() {
                if key != "dev-dependencies" {
                    conversion.settings.insert(key, value.clone());
                }
            }
        }
        Ok(conversion.finish())
    }
}
