use anyhow::{Context, Result, bail};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use cmv_core::models::{EdgeInput, NewRecipe, RecipeDetail};
use cmv_core::service::{CmvService, RecipeSaveOutcome};

use super::helpers::{money, print_cascade, print_recipe_table, truncate};

/// Parse an `--ingredient` spec of the form `selector:quantity`, where the
/// selector is an ingredient id or name. Names may themselves contain
/// colons, so the split happens at the last one.
fn parse_edge_spec(service: &CmvService, spec: &str) -> Result<EdgeInput> {
    let Some((selector, qty)) = spec.rsplit_once(':') else {
        bail!("Invalid ingredient spec '{spec}'. Expected 'name-or-id:quantity', e.g. 'Farinha:1.5'");
    };
    let quantity: f64 = qty
        .trim()
        .parse()
        .with_context(|| format!("Invalid quantity '{}' in spec '{spec}'", qty.trim()))?;
    let ingredient = service.resolve_ingredient(selector.trim())?;
    Ok(EdgeInput {
        ingredient_id: ingredient.id,
        quantity,
    })
}

/// Turn a stored recipe back into the full definition that `save_recipe`
/// expects. Edits always resubmit the whole recipe.
fn to_new_recipe(detail: &RecipeDetail) -> NewRecipe {
    NewRecipe {
        name: detail.recipe.name.clone(),
        sku: detail.recipe.sku.clone(),
        yield_units: detail.recipe.yield_units,
        total_weight_kg: detail.recipe.total_weight_kg,
        labor_minutes: detail.recipe.labor_minutes,
        is_pre_preparo: detail.recipe.is_pre_preparo,
        production_unit: detail.recipe.production_unit.clone(),
        ingredients: detail
            .ingredients
            .iter()
            .map(|e| EdgeInput {
                ingredient_id: e.ingredient_id,
                quantity: e.quantity,
            })
            .collect(),
    }
}

fn print_save_outcome(outcome: &RecipeSaveOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    } else {
        print_detail(&outcome.recipe);
        print_cascade(&outcome.cascade);
    }
    Ok(())
}

fn print_detail(detail: &RecipeDetail) {
    let r = &detail.recipe;
    println!("{} (id {})", r.name, r.id);
    if let Some(sku) = &r.sku {
        println!("  SKU: {sku}");
    }
    println!(
        "  Yield: {} un, {:.2} kg, {:.0} min labor",
        r.yield_units, r.total_weight_kg, r.labor_minutes
    );
    if r.is_pre_preparo {
        println!("  Pre-preparo, priced per {}", r.production_unit);
        if let Some(did) = r.derived_ingredient_id {
            println!("  Derived ingredient: {did}");
        }
    }

    if detail.ingredients.is_empty() {
        println!("  No ingredients yet.");
    } else {
        #[derive(Tabled)]
        struct EdgeRow {
            #[tabled(rename = "ID")]
            id: i64,
            #[tabled(rename = "Ingredient")]
            name: String,
            #[tabled(rename = "Qty")]
            quantity: String,
            #[tabled(rename = "Unit")]
            unit: String,
            #[tabled(rename = "Price")]
            price: String,
        }

        let rows: Vec<EdgeRow> = detail
            .ingredients
            .iter()
            .map(|e| EdgeRow {
                id: e.ingredient_id,
                name: truncate(e.ingredient_name.as_deref().unwrap_or("?"), 35),
                quantity: format!("{:.3}", e.quantity),
                unit: e.ingredient_unit.clone().unwrap_or_default(),
                price: money(e.ingredient_price),
            })
            .collect();

        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::new(2..3)).with(Alignment::right()))
            .with(Modify::new(Columns::new(4..5)).with(Alignment::right()))
            .to_string();
        println!("{table}");
    }

    match &detail.cost {
        Some(cost) => {
            println!("  Food cost: {:.2}", cost.food_cost);
            if cost.packaging_cost_per_unit > 0.0 {
                println!("  Packaging: {:.2}/un", cost.packaging_cost_per_unit);
            }
            println!("  Labor: {:.2}", cost.labor_cost);
            println!("  Batch cost: {:.2}", cost.total_batch_cost);
            println!(
                "  CMV: {:.2}/un, {:.2}/kg",
                cost.cost_per_unit, cost.cost_per_kg
            );
        }
        None => println!("  Cost: unavailable (an ingredient is missing a price)"),
    }

    if let Some(n) = &detail.nutrition {
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

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_recipe_create(
    service: &CmvService,
    name: &str,
    sku: Option<String>,
    yield_units: i64,
    weight: f64,
    labor_minutes: f64,
    pre_preparo: bool,
    production_unit: &str,
    ingredient_specs: &[String],
    json: bool,
) -> Result<()> {
    let mut edges = Vec::with_capacity(ingredient_specs.len());
    for spec in ingredient_specs {
        edges.push(parse_edge_spec(service, spec)?);
    }

    let outcome = service.save_recipe(
        None,
        &NewRecipe {
            name: name.to_string(),
            sku,
            yield_units,
            total_weight_kg: weight,
            labor_minutes,
            is_pre_preparo: pre_preparo,
            production_unit: production_unit.to_string(),
            ingredients: edges,
        },
    )?;

    if !json {
        println!("Created recipe {}.", outcome.recipe.recipe.id);
    }
    print_save_outcome(&outcome, json)
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_recipe_update(
    service: &CmvService,
    selector: &str,
    name: Option<String>,
    sku: Option<String>,
    yield_units: Option<i64>,
    weight: Option<f64>,
    labor_minutes: Option<f64>,
    pre_preparo: Option<bool>,
    production_unit: Option<String>,
    json: bool,
) -> Result<()> {
    let recipe = service.resolve_recipe(selector)?;
    let detail = service.recipe_detail(recipe.id)?;
    let mut input = to_new_recipe(&detail);

    if let Some(name) = name {
        input.name = name;
    }
    if let Some(sku) = sku {
        // An explicit empty string clears the SKU.
        input.sku = if sku.is_empty() { None } else { Some(sku) };
    }
    if let Some(yield_units) = yield_units {
        input.yield_units = yield_units;
    }
    if let Some(weight) = weight {
        input.total_weight_kg = weight;
    }
    if let Some(labor_minutes) = labor_minutes {
        input.labor_minutes = labor_minutes;
    }
    if let Some(pre_preparo) = pre_preparo {
        input.is_pre_preparo = pre_preparo;
    }
    if let Some(production_unit) = production_unit {
        input.production_unit = production_unit;
    }

    let outcome = service.save_recipe(Some(recipe.id), &input)?;
    print_save_outcome(&outcome, json)
}

pub(crate) fn cmd_recipe_ingredients(
    service: &CmvService,
    selector: &str,
    json: bool,
) -> Result<()> {
    let recipe = service.resolve_recipe(selector)?;
    let detail = service.recipe_detail(recipe.id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detail.ingredients)?);
    } else {
        print_detail(&detail);
    }
    Ok(())
}

pub(crate) fn cmd_recipe_add_ingredient(
    service: &CmvService,
    selector: &str,
    ingredient_selector: &str,
    quantity: f64,
    json: bool,
) -> Result<()> {
    let recipe = service.resolve_recipe(selector)?;
    let ingredient = service.resolve_ingredient(ingredient_selector)?;
    let detail = service.recipe_detail(recipe.id)?;
    let mut input = to_new_recipe(&detail);

    // Adding an ingredient that is already in the recipe replaces its
    // quantity instead of duplicating the edge.
    if let Some(edge) = input
        .ingredients
        .iter_mut()
        .find(|e| e.ingredient_id == ingredient.id)
    {
        edge.quantity = quantity;
    } else {
        input.ingredients.push(EdgeInput {
            ingredient_id: ingredient.id,
            quantity,
        });
    }

    let outcome = service.save_recipe(Some(recipe.id), &input)?;
    print_save_outcome(&outcome, json)
}

pub(crate) fn cmd_recipe_remove_ingredient(
    service: &CmvService,
    selector: &str,
    ingredient_selector: &str,
    json: bool,
) -> Result<()> {
    let recipe = service.resolve_recipe(selector)?;
    let ingredient = service.resolve_ingredient(ingredient_selector)?;
    let detail = service.recipe_detail(recipe.id)?;
    let mut input = to_new_recipe(&detail);

    let before = input.ingredients.len();
    input
        .ingredients
        .retain(|e| e.ingredient_id != ingredient.id);
    if input.ingredients.len() == before {
        bail!(
            "'{}' is not an ingredient of '{}'",
            ingredient.name,
            recipe.name
        );
    }

    let outcome = service.save_recipe(Some(recipe.id), &input)?;
    print_save_outcome(&outcome, json)
}

pub(crate) fn cmd_recipe_show(service: &CmvService, selector: &str, json: bool) -> Result<()> {
    let recipe = service.resolve_recipe(selector)?;
    let detail = service.recipe_detail(recipe.id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
    } else {
        print_detail(&detail);
    }
    Ok(())
}

pub(crate) fn cmd_recipe_list(service: &CmvService, json: bool) -> Result<()> {
    let recipes = service.list_recipes()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recipes)?);
    } else if recipes.is_empty() {
        eprintln!("No recipes yet. Use `cmv recipe create` to add one.");
    } else {
        print_recipe_table(&recipes);
    }
    Ok(())
}

pub(crate) fn cmd_recipe_delete(service: &CmvService, selector: &str, json: bool) -> Result<()> {
    let recipe = service.resolve_recipe(selector)?;
    service.delete_recipe(recipe.id)?;

    if json {
        println!("{}", serde_json::json!({ "deleted": recipe.id }));
    } else {
        println!("Deleted recipe '{}'", recipe.name);
    }
    Ok(())
}

pub(crate) fn cmd_recipe_history(
    service: &CmvService,
    selector: &str,
    limit: i64,
    json: bool,
) -> Result<()> {
    let recipe = service.resolve_recipe(selector)?;
    let entries = service.cmv_history(recipe.id, limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        eprintln!("No cost history for '{}' yet.", recipe.name);
    } else {
        #[derive(Tabled)]
        struct HistoryRow {
            #[tabled(rename = "Recorded")]
            recorded_at: String,
            #[tabled(rename = "Batch cost")]
            cost: String,
        }

        let rows: Vec<HistoryRow> = entries
            .iter()
            .map(|e| HistoryRow {
                recorded_at: e.recorded_at.chars().take(19).collect(),
                cost: format!("{:.2}", e.cost),
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
