use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use cmv_core::alert::PriceAlert;
use cmv_core::cascade::CascadeReport;
use cmv_core::models::{Ingredient, Recipe};

pub(crate) fn money(value: Option<f64>) -> String {
    value.map_or("-".into(), |v| format!("{v:.2}"))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

pub(crate) fn print_ingredient_table(ingredients: &[Ingredient]) {
    #[derive(Tabled)]
    struct IngredientRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Category")]
        category: String,
        #[tabled(rename = "Unit")]
        unit: String,
        #[tabled(rename = "Price")]
        price: String,
        #[tabled(rename = "Yield")]
        yield_coefficient: String,
        #[tabled(rename = "Source")]
        source: String,
    }

    let rows: Vec<IngredientRow> = ingredients
        .iter()
        .map(|i| IngredientRow {
            id: i.id,
            name: truncate(&i.name, 35),
            category: i.category.clone(),
            unit: i.unit.clone(),
            price: money(i.current_price),
            yield_coefficient: format!("{:.2}", i.yield_coefficient),
            source: i.source.clone(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(4..6)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_recipe_table(recipes: &[Recipe]) {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Yield")]
        yield_units: i64,
        #[tabled(rename = "Weight (kg)")]
        weight: String,
        #[tabled(rename = "Cost")]
        cost: String,
        #[tabled(rename = "CMV/un")]
        cmv_per_unit: String,
        #[tabled(rename = "CMV/kg")]
        cmv_per_kg: String,
        #[tabled(rename = "Pre-preparo")]
        pre_preparo: String,
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: r.id,
            name: truncate(&r.name, 35),
            yield_units: r.yield_units,
            weight: format!("{:.2}", r.total_weight_kg),
            cost: money(r.current_cost),
            cmv_per_unit: money(r.cmv_per_unit),
            cmv_per_kg: money(r.cmv_per_kg),
            pre_preparo: if r.is_pre_preparo {
                format!("yes ({})", r.production_unit)
            } else {
                "no".to_string()
            },
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..7)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_cascade(report: &CascadeReport) {
    if report.is_empty() {
        println!("No recipe costs changed.");
        return;
    }
    if !report.updated.is_empty() {
        println!("Recomputed {} recipe(s).", report.updated.len());
    }
    for failure in &report.failed {
        eprintln!(
            "Warning: '{}' (recipe {}) not recomputed: {}",
            failure.recipe_name, failure.recipe_id, failure.reason
        );
    }
}

pub(crate) fn print_alerts(alerts: &[PriceAlert]) {
    for alert in alerts {
        let arrow = if alert.is_increase() { "↑" } else { "↓" };
        println!(
            "{arrow} Price alert: {} moved {:+.1}% (30d avg {:.2} -> {:.2})",
            alert.ingredient_name, alert.delta_pct, alert.average_price, alert.new_price
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money() {
        assert_eq!(money(Some(3.756)), "3.76");
        assert_eq!(money(Some(0.0)), "0.00");
        assert_eq!(money(None), "-");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world this is long", 10), "hello w...");
    }

    #[test]
    fn test_truncate_utf8() {
        // Should not panic on multi-byte characters
        assert_eq!(truncate("Pão de Queijo Mineiro", 10), "Pão de ...");
        assert_eq!(truncate("Açaí", 10), "Açaí");
    }
}
