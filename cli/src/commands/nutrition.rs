use anyhow::{Result, bail};

use cmv_core::models::{NewNutritionRef, NutritionRef};
use cmv_core::service::CmvService;

use super::helpers::money;
use crate::openfoodfacts::OpenFoodFactsClient;

fn print_nutrition(nref: &NutritionRef) {
    println!("{} ({})", nref.name, nref.source);
    println!("  Calories: {:.0} kcal/100g", nref.calories_per_100g);
    println!("  Protein: {} g/100g", money(nref.protein_per_100g));
    println!("  Carbs: {} g/100g", money(nref.carbs_per_100g));
    println!("  Fat: {} g/100g", money(nref.fat_per_100g));
    if nref.partial {
        println!("  Incomplete macro data; recipe totals using it are marked partial.");
    }
}

pub(crate) fn cmd_nutrition_attach(
    service: &CmvService,
    selector: &str,
    search: Option<&str>,
    barcode: Option<&str>,
    json: bool,
) -> Result<()> {
    let ingredient = service.resolve_ingredient(selector)?;
    let client = OpenFoodFactsClient::new();

    let nref = match (search, barcode) {
        (Some(query), None) => {
            service.attach_nutrition_by_search(&client, ingredient.id, query)?
        }
        (None, Some(code)) => service.attach_nutrition_by_barcode(&client, ingredient.id, code)?,
        _ => bail!("Provide exactly one of --search or --barcode"),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&nref)?);
    } else {
        println!("Attached nutrition to '{}':", ingredient.name);
        print_nutrition(&nref);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_nutrition_set(
    service: &CmvService,
    selector: &str,
    calories: f64,
    protein: Option<f64>,
    carbs: Option<f64>,
    fat: Option<f64>,
    json: bool,
) -> Result<()> {
    let ingredient = service.resolve_ingredient(selector)?;
    let nref = service.set_ingredient_nutrition(
        ingredient.id,
        &NewNutritionRef {
            name: ingredient.name.clone(),
            calories_per_100g: calories,
            protein_per_100g: protein,
            carbs_per_100g: carbs,
            fat_per_100g: fat,
            source: "manual".to_string(),
        },
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&nref)?);
    } else {
        println!("Set nutrition for '{}':", ingredient.name);
        print_nutrition(&nref);
    }
    Ok(())
}

pub(crate) fn cmd_nutrition_show(service: &CmvService, selector: &str, json: bool) -> Result<()> {
    let ingredient = service.resolve_ingredient(selector)?;
    let nutrition = service.ingredient_nutrition(ingredient.id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&nutrition)?);
    } else {
        match nutrition {
            Some(nref) => print_nutrition(&nref),
            None => eprintln!(
                "No nutrition attached to '{}'. Use `cmv nutrition attach` or `cmv nutrition set`.",
                ingredient.name
            ),
        }
    }
    Ok(())
}
