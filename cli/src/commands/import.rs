use std::path::Path;

use anyhow::{Context, Result};

use cmv_core::service::CmvService;

use super::helpers::{print_alerts, print_cascade};
use crate::notify;

pub(crate) fn cmd_import_prices(
    service: &CmvService,
    file: &Path,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let csv_data = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read CSV file: {}", file.display()))?;

    let outcome = service.import_prices(&csv_data, dry_run)?;

    if !dry_run {
        notify::deliver_alerts(service, &outcome.alerts);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let s = &outcome.summary;
    if dry_run {
        println!("Dry run; nothing was written.");
    }
    println!(
        "Parsed {} row(s): {} created, {} updated, {} unchanged, {} skipped.",
        s.rows_parsed, s.created, s.updated, s.unchanged, s.skipped
    );
    print_alerts(&outcome.alerts);
    if !dry_run {
        print_cascade(&outcome.cascade);
    }
    Ok(())
}
