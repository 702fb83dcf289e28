use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use cmv_core::models::{NewIngredient, UpdateIngredient};
use cmv_core::service::CmvService;

use super::helpers::{money, print_alerts, print_cascade, print_ingredient_table};
use crate::notify;

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_ingredient_add(
    service: &CmvService,
    name: &str,
    category: &str,
    unit: &str,
    price: Option<f64>,
    yield_coefficient: f64,
    json: bool,
) -> Result<()> {
    let ingredient = service.create_ingredient(&NewIngredient {
        name: name.to_string(),
        category: category.to_string(),
        unit: unit.to_string(),
        current_price: price,
        yield_coefficient,
        source: "manual".to_string(),
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ingredient)?);
    } else {
        println!(
            "Added ingredient {} '{}' ({}, {})",
            ingredient.id, ingredient.name, ingredient.category, ingredient.unit
        );
        match ingredient.current_price {
            Some(price) => println!("  Price: {price:.2}/{}", ingredient.unit),
            None => println!("  No price yet; set one with `cmv ingredient set-price`"),
        }
    }

    Ok(())
}

pub(crate) fn cmd_ingredient_list(
    service: &CmvService,
    search: Option<&str>,
    category: Option<&str>,
    json: bool,
) -> Result<()> {
    let ingredients = service.list_ingredients(search, category)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ingredients)?);
    } else if ingredients.is_empty() {
        eprintln!("No ingredients found. Use `cmv ingredient add` to register one.");
    } else {
        print_ingredient_table(&ingredients);
    }

    Ok(())
}

pub(crate) fn cmd_ingredient_show(service: &CmvService, selector: &str, json: bool) -> Result<()> {
    let ingredient = service.resolve_ingredient(selector)?;
    let nutrition = service.ingredient_nutrition(ingredient.id)?;

    if json {
        let value = serde_json::json!({
            "ingredient": ingredient,
            "nutrition": nutrition,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{} (id {})", ingredient.name, ingredient.id);
        println!("  Category: {}", ingredient.category);
        println!("  Unit: {}", ingredient.unit);
        println!(
            "  Price: {}/{}",
            money(ingredient.current_price),
            ingredient.unit
        );
        println!("  Yield coefficient: {:.2}", ingredient.yield_coefficient);
        println!("  Source: {}", ingredient.source);
        if let Some(n) = nutrition {
            println!(
                "  Nutrition per 100g: {:.0} kcal, P {}, C {}, F {}{}",
                n.calories_per_100g,
                money(n.protein_per_100g),
                money(n.carbs_per_100g),
                money(n.fat_per_100g),
                if n.partial { " (partial)" } else { "" }
            );
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_ingredient_update(
    service: &CmvService,
    selector: &str,
    name: Option<String>,
    category: Option<String>,
    unit: Option<String>,
    yield_coefficient: Option<f64>,
    json: bool,
) -> Result<()> {
    let ingredient = service.resolve_ingredient(selector)?;
    let (updated, cascade) = service.update_ingredient(
        ingredient.id,
        &UpdateIngredient {
            name,
            category,
            unit,
            yield_coefficient,
        },
    )?;

    if json {
        let value = serde_json::json!({
            "ingredient": updated,
            "cascade": cascade,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Updated ingredient '{}'", updated.name);
        print_cascade(&cascade);
    }

    Ok(())
}

pub(crate) fn cmd_ingredient_set_price(
    service: &CmvService,
    selector: &str,
    price: f64,
    json: bool,
) -> Result<()> {
    let ingredient = service.resolve_ingredient(selector)?;
    let outcome = service.set_ingredient_price(ingredient.id, price)?;

    if let Some(alert) = &outcome.alert {
        notify::deliver_alerts(service, std::slice::from_ref(alert));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!(
            "{}: new price {:.2}/{}",
            outcome.ingredient.name, price, outcome.ingredient.unit
        );
        if let Some(alert) = &outcome.alert {
            print_alerts(std::slice::from_ref(alert));
        }
        print_cascade(&outcome.cascade);
    }

    Ok(())
}

pub(crate) fn cmd_ingredient_prices(
    service: &CmvService,
    selector: &str,
    limit: i64,
    json: bool,
) -> Result<()> {
    let ingredient = service.resolve_ingredient(selector)?;
    let points = service.price_history(ingredient.id, limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&points)?);
    } else if points.is_empty() {
        eprintln!("No recorded prices for '{}'.", ingredient.name);
    } else {
        #[derive(Tabled)]
        struct PriceRow {
            #[tabled(rename = "Recorded")]
            recorded_at: String,
            #[tabled(rename = "Price")]
            price: String,
        }

        let rows: Vec<PriceRow> = points
            .iter()
            .map(|p| PriceRow {
                recorded_at: p.recorded_at.chars().take(19).collect(),
                price: format!("{:.2}", p.price),
            })
            .collect();

        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::new(1..2)).with(Alignment::right()))
            .to_string();
        println!("{table}");
    }

    Ok(())
}

pub(crate) fn cmd_ingredient_pending(service: &CmvService, json: bool) -> Result<()> {
    let pending = service.pending_ingredients()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&pending)?);
    } else if pending.is_empty() {
        println!("No pending ingredients; everything is priced and categorized.");
    } else {
        println!("Ingredients awaiting a price or a confirmed category:");
        print_ingredient_table(&pending);
    }

    Ok(())
}

pub(crate) fn cmd_ingredient_delete(service: &CmvService, selector: &str, json: bool) -> Result<()> {
    let ingredient = service.resolve_ingredient(selector)?;
    service.delete_ingredient(ingredient.id)?;

    if json {
        println!("{}", serde_json::json!({ "deleted": ingredient.id }));
    } else {
        println!("Deleted ingredient '{}'", ingredient.name);
    }

    Ok(())
}
