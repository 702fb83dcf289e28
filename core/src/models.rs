use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::cost::CostBreakdown;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: i64,
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    pub category: String,
    pub unit: String,
    /// None until the ingredient has been priced at least once.
    pub current_price: Option<f64>,
    pub yield_coefficient: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nutrition_ref_id: Option<i64>,
    pub source: String,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Ingredient {
    #[must_use]
    pub fn is_packaging(&self) -> bool {
        self.category == PACKAGING_CATEGORY
    }
}

#[derive(Debug, Clone)]
pub struct NewIngredient {
    pub name: String,
    pub category: String,
    pub unit: String,
    pub current_price: Option<f64>,
    pub yield_coefficient: f64,
    pub source: String,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateIngredient {
    pub name: Option<String>,
    pub category: Option<String>,
    pub unit: Option<String>,
    pub yield_coefficient: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recipe {
    pub id: i64,
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub yield_units: i64,
    pub total_weight_kg: f64,
    pub labor_minutes: f64,
    pub is_pre_preparo: bool,
    pub production_unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derived_ingredient_id: Option<i64>,
    pub current_cost: Option<f64>,
    pub cmv_per_unit: Option<f64>,
    pub cmv_per_kg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_calculated: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// One recipe -> ingredient edge, with ingredient fields joined in so the
/// cost engine and display code never need a second lookup.
#[derive(Debug, Clone, Serialize)]
pub struct RecipeIngredient {
    pub id: i64,
    pub recipe_id: i64,
    pub ingredient_id: i64,
    pub quantity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingredient_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingredient_unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingredient_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingredient_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yield_coefficient: Option<f64>,
}

/// Recipe with edges, cost breakdown, and materialized nutrition joined
/// in. The breakdown is computed on read and is absent while an edge
/// ingredient is missing a price.
#[derive(Debug, Clone, Serialize)]
pub struct RecipeDetail {
    pub recipe: Recipe,
    pub ingredients: Vec<RecipeIngredient>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostBreakdown>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nutrition: Option<NutritionRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EdgeInput {
    pub ingredient_id: i64,
    pub quantity: f64,
}

/// Full recipe definition as submitted by an edit. Saving always replaces
/// the entire edge set, never patches it.
#[derive(Debug, Clone)]
pub struct NewRecipe {
    pub name: String,
    pub sku: Option<String>,
    pub yield_units: i64,
    pub total_weight_kg: f64,
    pub labor_minutes: f64,
    pub is_pre_preparo: bool,
    pub production_unit: String,
    pub ingredients: Vec<EdgeInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NutritionRef {
    pub id: i64,
    pub name: String,
    pub calories_per_100g: f64,
    pub protein_per_100g: Option<f64>,
    pub carbs_per_100g: Option<f64>,
    pub fat_per_100g: Option<f64>,
    pub partial: bool,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe_id: Option<i64>,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewNutritionRef {
    pub name: String,
    pub calories_per_100g: f64,
    pub protein_per_100g: Option<f64>,
    pub carbs_per_100g: Option<f64>,
    pub fat_per_100g: Option<f64>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CmvHistoryEntry {
    pub id: i64,
    pub recipe_id: i64,
    pub cost: f64,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PricePoint {
    pub id: i64,
    pub ingredient_id: i64,
    pub price: f64,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Receipt {
    pub id: i64,
    #[serde(default)]
    pub uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiptItem {
    pub id: i64,
    pub receipt_id: i64,
    pub raw_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    pub unit_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_ingredient_id: Option<i64>,
    pub applied: bool,
    // Joined field for display
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_ingredient_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiptDetail {
    pub receipt: Receipt,
    pub items: Vec<ReceiptItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductMapping {
    pub id: i64,
    pub raw_name: String,
    pub ingredient_id: i64,
    pub confidence: f64,
    pub updated_at: String,
}

pub const CATEGORIES: &[&str] = &[
    "mercado",
    "hortifruti",
    "acougue",
    "laticinios",
    "embalagem",
    "outros",
];

/// Ingredients in this category price the batch per produced unit instead
/// of per edge quantity.
pub const PACKAGING_CATEGORY: &str = "embalagem";

pub const UNITS: &[&str] = &["kg", "g", "l", "ml", "un"];

pub const PRODUCTION_UNITS: &[&str] = &["kg", "un"];

pub const RECEIPT_STATUSES: &[&str] = &["pending", "validated", "rejected"];

pub fn validate_category(category: &str) -> Result<String> {
    let lower = category.to_lowercase();
    if CATEGORIES.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        bail!(
            "Invalid category '{category}'. Must be one of: {}",
            CATEGORIES.join(", ")
        )
    }
}

pub fn validate_unit(unit: &str) -> Result<String> {
    let lower = unit.to_lowercase();
    if UNITS.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        bail!(
            "Invalid unit '{unit}'. Must be one of: {}",
            UNITS.join(", ")
        )
    }
}

pub fn validate_production_unit(unit: &str) -> Result<String> {
    let lower = unit.to_lowercase();
    if PRODUCTION_UNITS.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        bail!(
            "Invalid production unit '{unit}'. Must be one of: {}",
            PRODUCTION_UNITS.join(", ")
        )
    }
}

/// Validate ingredient fields shared by create and update paths.
pub fn validate_ingredient_data(
    name: &str,
    price: Option<f64>,
    yield_coefficient: f64,
) -> Result<()> {
    if name.trim().is_empty() {
        bail!("Ingredient name must not be empty");
    }
    if price.is_some_and(|p| p < 0.0) {
        bail!("current_price must not be negative");
    }
    if yield_coefficient <= 0.0 {
        bail!("yield_coefficient must be greater than 0");
    }
    Ok(())
}

/// Validate a full recipe definition before anything is persisted.
pub fn validate_recipe_data(recipe: &NewRecipe) -> Result<()> {
    if recipe.name.trim().is_empty() {
        bail!("Recipe name must not be empty");
    }
    if recipe.yield_units <= 0 {
        bail!("yield_units must be greater than 0");
    }
    if recipe.total_weight_kg <= 0.0 {
        bail!("total_weight_kg must be greater than 0");
    }
    if recipe.labor_minutes < 0.0 {
        bail!("labor_minutes must not be negative");
    }
    validate_production_unit(&recipe.production_unit)?;
    let mut seen = std::collections::HashSet::new();
    for edge in &recipe.ingredients {
        if edge.quantity <= 0.0 {
            bail!("Ingredient quantity must be greater than 0");
        }
        if !seen.insert(edge.ingredient_id) {
            bail!(
                "Ingredient {} appears more than once in the recipe",
                edge.ingredient_id
            );
        }
    }
    Ok(())
}

/// Convert a quantity with a unit to grams.
/// Volume-based conversions assume water density (1 ml = 1 g).
/// Unit-count quantities ("un") have no mass and return None.
#[must_use]
pub fn quantity_to_grams(quantity: f64, unit: &str) -> Option<f64> {
    let lower = unit.to_lowercase();
    match lower.as_str() {
        "g" | "grama" | "gramas" => Some(quantity),
        "kg" | "kilo" | "kilos" | "quilo" | "quilos" => Some(quantity * 1000.0),
        "ml" => Some(quantity),
        "l" | "lt" | "litro" | "litros" => Some(quantity * 1000.0),
        _ => None,
    }
}

/// Parse a number in Brazilian receipt notation: comma decimal separator,
/// optional dot thousands separator ("1.234,56" -> 1234.56). Plain dotted
/// decimals are accepted too.
#[must_use]
pub fn parse_decimal_br(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let normalized = if trimmed.contains(',') {
        trimmed.replace('.', "").replace(',', ".")
    } else {
        trimmed.to_string()
    };
    normalized.parse().ok().filter(|v: &f64| v.is_finite())
}

/// Normalize a raw receipt product name for product-map keying:
/// lowercase, collapsed whitespace.
#[must_use]
pub fn normalize_product_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_categories() {
        assert_eq!(validate_category("mercado").unwrap(), "mercado");
        assert_eq!(validate_category("embalagem").unwrap(), "embalagem");
        assert_eq!(validate_category("outros").unwrap(), "outros");
    }

    #[test]
    fn test_invalid_category() {
        assert!(validate_category("padaria").is_err());
        assert!(validate_category("").is_err());
    }

    #[test]
    fn test_category_case_insensitive() {
        assert_eq!(validate_category("Mercado").unwrap(), "mercado");
        assert_eq!(validate_category("HORTIFRUTI").unwrap(), "hortifruti");
    }

    #[test]
    fn test_valid_units() {
        assert_eq!(validate_unit("kg").unwrap(), "kg");
        assert_eq!(validate_unit("UN").unwrap(), "un");
    }

    #[test]
    fn test_invalid_unit() {
        assert!(validate_unit("caixa").is_err());
        assert!(validate_unit("").is_err());
    }

    #[test]
    fn test_production_units() {
        assert_eq!(validate_production_unit("kg").unwrap(), "kg");
        assert_eq!(validate_production_unit("Un").unwrap(), "un");
        assert!(validate_production_unit("l").is_err());
    }

    #[test]
    fn test_validate_ingredient_data() {
        assert!(validate_ingredient_data("Farinha", Some(4.5), 1.0).is_ok());
        assert!(validate_ingredient_data("Farinha", None, 1.0).is_ok());
        assert!(validate_ingredient_data("", Some(4.5), 1.0).is_err());
        assert!(validate_ingredient_data("   ", Some(4.5), 1.0).is_err());
        assert!(validate_ingredient_data("Farinha", Some(-0.01), 1.0).is_err());
        assert!(validate_ingredient_data("Farinha", Some(4.5), 0.0).is_err());
        assert!(validate_ingredient_data("Farinha", Some(4.5), -0.8).is_err());
    }

    fn sample_recipe() -> NewRecipe {
        NewRecipe {
            name: "Massa de Pastel".to_string(),
            sku: None,
            yield_units: 10,
            total_weight_kg: 2.5,
            labor_minutes: 0.0,
            is_pre_preparo: false,
            production_unit: "un".to_string(),
            ingredients: vec![
                EdgeInput {
                    ingredient_id: 1,
                    quantity: 1.5,
                },
                EdgeInput {
                    ingredient_id: 2,
                    quantity: 0.5,
                },
            ],
        }
    }

    #[test]
    fn test_validate_recipe_data_ok() {
        assert!(validate_recipe_data(&sample_recipe()).is_ok());
    }

    #[test]
    fn test_validate_recipe_data_rejects_bad_fields() {
        let mut r = sample_recipe();
        r.yield_units = 0;
        assert!(validate_recipe_data(&r).is_err());

        let mut r = sample_recipe();
        r.total_weight_kg = 0.0;
        assert!(validate_recipe_data(&r).is_err());

        let mut r = sample_recipe();
        r.labor_minutes = -1.0;
        assert!(validate_recipe_data(&r).is_err());

        let mut r = sample_recipe();
        r.name = "  ".to_string();
        assert!(validate_recipe_data(&r).is_err());

        let mut r = sample_recipe();
        r.production_unit = "litros".to_string();
        assert!(validate_recipe_data(&r).is_err());
    }

    #[test]
    fn test_validate_recipe_data_rejects_bad_edges() {
        let mut r = sample_recipe();
        r.ingredients[0].quantity = 0.0;
        assert!(validate_recipe_data(&r).is_err());

        let mut r = sample_recipe();
        r.ingredients[1].ingredient_id = 1;
        assert!(validate_recipe_data(&r).is_err());
    }

    #[test]
    fn test_quantity_to_grams_mass_units() {
        assert!((quantity_to_grams(1.0, "g").unwrap() - 1.0).abs() < f64::EPSILON);
        assert!((quantity_to_grams(2.0, "kg").unwrap() - 2000.0).abs() < f64::EPSILON);
        assert!((quantity_to_grams(0.5, "Kg").unwrap() - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_quantity_to_grams_volume_units() {
        assert!((quantity_to_grams(500.0, "ml").unwrap() - 500.0).abs() < f64::EPSILON);
        assert!((quantity_to_grams(1.0, "l").unwrap() - 1000.0).abs() < f64::EPSILON);
        assert!((quantity_to_grams(2.0, "lt").unwrap() - 2000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_quantity_to_grams_unit_counts_have_no_mass() {
        assert!(quantity_to_grams(3.0, "un").is_none());
        assert!(quantity_to_grams(1.0, "pacote").is_none());
        assert!(quantity_to_grams(1.0, "").is_none());
    }

    #[test]
    fn test_parse_decimal_br() {
        assert!((parse_decimal_br("2,50").unwrap() - 2.5).abs() < f64::EPSILON);
        assert!((parse_decimal_br("1.234,56").unwrap() - 1234.56).abs() < f64::EPSILON);
        assert!((parse_decimal_br("109,91").unwrap() - 109.91).abs() < f64::EPSILON);
        assert!((parse_decimal_br("4.086").unwrap() - 4.086).abs() < f64::EPSILON);
        assert!((parse_decimal_br(" 10 ").unwrap() - 10.0).abs() < f64::EPSILON);
        assert!(parse_decimal_br("").is_none());
        assert!(parse_decimal_br("abc").is_none());
    }

    #[test]
    fn test_normalize_product_name() {
        assert_eq!(normalize_product_name("  FILE  DE  FRANGO "), "file de frango");
        assert_eq!(normalize_product_name("Tomate Italiano"), "tomate italiano");
        assert_eq!(normalize_product_name(""), "");
    }

    #[test]
    fn test_ingredient_is_packaging() {
        let mut ing = Ingredient {
            id: 1,
            uuid: String::new(),
            name: "Caixa".to_string(),
            category: "embalagem".to_string(),
            unit: "un".to_string(),
            current_price: Some(0.9),
            yield_coefficient: 1.0,
            nutrition_ref_id: None,
            source: "manual".to_string(),
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert!(ing.is_packaging());
        ing.category = "mercado".to_string();
        assert!(!ing.is_packaging());
    }
}
