//! Deps command - show the resolved closure and link set of a target

use anyhow::{Context, Result};
use std::path::Path;
use strata_build::Builder;

/// Run the deps command
pub fn run(project_dir: &Path, target: &str, json: bool) -> Result<()> {
    let mut builder = Builder::new(project_dir).context("Failed to load project configuration")?;
    let deps = builder.dependencies(target)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&deps)?);
        return Ok(());
    }

    for (i, unit) in deps.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("{} ({}, {})", unit.unit, unit.kind, unit.path.display());
        println!("  imports: {}", list(&unit.imports));
        println!("  closure: {}", list(&unit.closure));
        if !unit.link_units.is_empty() {
            println!("  links:   {}", unit.link_units.join(" "));
        }
    }
    Ok(())
}

fn list(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}
