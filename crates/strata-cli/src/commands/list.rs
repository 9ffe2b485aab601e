//! List command - show discovered and rejected units

use anyhow::{Context, Result};
use std::path::Path;
use strata_build::Builder;

/// Run the list command
pub fn run(project_dir: &Path, json: bool) -> Result<()> {
    let mut builder = Builder::new(project_dir).context("Failed to load project configuration")?;
    let analysis = builder.analyze().context("Failed to analyze sources")?;
    let catalog = &analysis.catalog;

    if json {
        let rejected: Vec<_> = catalog
            .rejected()
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.id,
                    "kind": r.kind,
                    "path": r.rel_path.display().to_string(),
                    "error": r.error.to_string(),
                })
            })
            .collect();
        let units: Vec<_> = catalog
            .units()
            .iter()
            .map(|u| {
                serde_json::json!({
                    "id": u.id,
                    "kind": u.kind,
                    "path": u.display_path(),
                    "imports": analysis.resolution.imports(&u.id),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "units": units,
                "rejected": rejected,
            }))?
        );
        return Ok(());
    }

    for unit in catalog.units() {
        println!("{:<10} {:<24} {}", unit.kind, unit.id, unit.display_path());
    }
    if !catalog.rejected().is_empty() {
        println!();
        for rejected in catalog.rejected() {
            println!(
                "{:<10} {:<24} {}\n           {}",
                "rejected",
                rejected.id,
                rejected.rel_path.display(),
                rejected.error
            );
        }
    }
    Ok(())
}
