use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use cmv_core::models::ReceiptDetail;
use cmv_core::service::CmvService;

use super::helpers::{money, print_alerts, print_cascade, print_ingredient_table, truncate};
use crate::notify;

fn read_receipt_text(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read receipt file: {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read receipt text from stdin")?;
            Ok(text)
        }
    }
}

fn print_receipt_detail(detail: &ReceiptDetail) {
    let r = &detail.receipt;
    println!(
        "Receipt {} [{}] market: {}, total: {}",
        r.id,
        r.status,
        r.market.as_deref().unwrap_or("?"),
        money(r.total)
    );

    if detail.items.is_empty() {
        println!("  No line items recognized.");
        return;
    }

    #[derive(Tabled)]
    struct ItemRow {
        #[tabled(rename = "Item")]
        id: i64,
        #[tabled(rename = "Product")]
        raw_name: String,
        #[tabled(rename = "Qty")]
        quantity: String,
        #[tabled(rename = "Unit price")]
        unit_price: String,
        #[tabled(rename = "Matched")]
        matched: String,
    }

    let rows: Vec<ItemRow> = detail
        .items
        .iter()
        .map(|item| ItemRow {
            id: item.id,
            raw_name: truncate(&item.raw_name, 35),
            quantity: item
                .quantity
                .map_or("-".to_string(), |q| format!("{q:.3}")),
            unit_price: format!("{:.2}", item.unit_price),
            matched: match (&item.matched_ingredient_name, item.matched_ingredient_id) {
                (Some(name), _) => truncate(name, 25),
                (None, Some(id)) => format!("#{id}"),
                (None, None) => "-".to_string(),
            },
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    let unmatched = detail
        .items
        .iter()
        .filter(|i| i.matched_ingredient_id.is_none())
        .count();
    if unmatched > 0 {
        println!("{unmatched} item(s) unmatched. Use `cmv receipt match` before validating.");
    }
}

pub(crate) fn cmd_receipt_import(
    service: &CmvService,
    file: Option<&Path>,
    json: bool,
) -> Result<()> {
    let text = read_receipt_text(file)?;
    let detail = service.stage_receipt(&text)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
    } else {
        println!("Staged receipt {} for review.", detail.receipt.id);
        print_receipt_detail(&detail);
    }
    Ok(())
}

pub(crate) fn cmd_receipt_pending(service: &CmvService, json: bool) -> Result<()> {
    let receipts = service.list_pending_receipts()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&receipts)?);
    } else if receipts.is_empty() {
        println!("No receipts waiting for review.");
    } else {
        #[derive(Tabled)]
        struct ReceiptRow {
            #[tabled(rename = "ID")]
            id: i64,
            #[tabled(rename = "Market")]
            market: String,
            #[tabled(rename = "Total")]
            total: String,
            #[tabled(rename = "Created")]
            created_at: String,
        }

        let rows: Vec<ReceiptRow> = receipts
            .iter()
            .map(|r| ReceiptRow {
                id: r.id,
                market: r.market.clone().unwrap_or_else(|| "?".to_string()),
                total: money(r.total),
                created_at: r.created_at.chars().take(19).collect(),
            })
            .collect();

        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::new(2..3)).with(Alignment::right()))
            .to_string();
        println!("{table}");
    }
    Ok(())
}

pub(crate) fn cmd_receipt_show(service: &CmvService, id: i64, json: bool) -> Result<()> {
    let detail = service.get_receipt_detail(id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
    } else {
        print_receipt_detail(&detail);
    }
    Ok(())
}

pub(crate) fn cmd_receipt_match(
    service: &CmvService,
    item_id: i64,
    ingredient_selector: &str,
    json: bool,
) -> Result<()> {
    let ingredient = service.resolve_ingredient(ingredient_selector)?;
    service.match_receipt_item(item_id, ingredient.id)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "item_id": item_id, "ingredient_id": ingredient.id })
        );
    } else {
        println!("Matched item {item_id} to '{}'", ingredient.name);
    }
    Ok(())
}

pub(crate) fn cmd_receipt_validate(service: &CmvService, id: i64, json: bool) -> Result<()> {
    let outcome = service.validate_receipt(id)?;

    notify::deliver_alerts(service, &outcome.alerts);

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!(
            "Validated receipt {}. {} ingredient(s) repriced.",
            outcome.receipt.receipt.id,
            outcome.updated_ingredients.len()
        );
        if !outcome.updated_ingredients.is_empty() {
            print_ingredient_table(&outcome.updated_ingredients);
        }
        print_alerts(&outcome.alerts);
        print_cascade(&outcome.cascade);
    }
    Ok(())
}

pub(crate) fn cmd_receipt_reject(service: &CmvService, id: i64, json: bool) -> Result<()> {
    let receipt = service.reject_receipt(id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&receipt)?);
    } else {
        println!("Rejected receipt {}. No prices were changed.", receipt.id);
    }
    Ok(())
}
