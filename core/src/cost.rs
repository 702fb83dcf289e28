use serde::Serialize;
use thiserror::Error;

use crate::models::{PACKAGING_CATEGORY, Recipe, RecipeIngredient};

/// Per-recipe compute failure. Inside a cascade these mark the recipe as
/// failed in the report instead of aborting the run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CostError {
    #[error("ingredient '{name}' has no price")]
    MissingPrice { name: String },

    #[error("ingredient '{name}' has invalid yield coefficient {coefficient}")]
    InvalidCoefficient { name: String, coefficient: f64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct CostBreakdown {
    pub food_cost: f64,
    pub packaging_cost_per_unit: f64,
    pub labor_cost: f64,
    pub total_batch_cost: f64,
    pub cost_per_unit: f64,
    pub cost_per_kg: f64,
}

/// Effective unit price of an edge: purchase price corrected by the yield
/// coefficient (waste fraction or unit-conversion multiplier).
fn effective_unit_price(edge: &RecipeIngredient) -> Result<f64, CostError> {
    let name = edge
        .ingredient_name
        .clone()
        .unwrap_or_else(|| format!("#{}", edge.ingredient_id));
    // Coefficients are validated at write time; stale rows are still
    // rejected here rather than dividing by zero.
    let coefficient = edge.yield_coefficient.unwrap_or(1.0);
    if coefficient <= 0.0 {
        return Err(CostError::InvalidCoefficient { name, coefficient });
    }
    let Some(price) = edge.ingredient_price else {
        return Err(CostError::MissingPrice { name });
    };
    Ok(price / coefficient)
}

/// Compute a recipe's full cost breakdown from its edge set.
///
/// Packaging-category edges contribute their effective price once per
/// produced unit; every other edge contributes effective price times its
/// quantity. Labor is `labor_minutes / 60 * labor_rate`. Pure: reads only
/// its arguments, writes nothing.
#[allow(clippy::cast_precision_loss)]
pub fn compute_cost(
    recipe: &Recipe,
    edges: &[RecipeIngredient],
    labor_rate: f64,
) -> Result<CostBreakdown, CostError> {
    let mut food_cost = 0.0;
    let mut packaging_cost_per_unit = 0.0;

    for edge in edges {
        let effective = effective_unit_price(edge)?;
        if edge.ingredient_category.as_deref() == Some(PACKAGING_CATEGORY) {
            packaging_cost_per_unit += effective;
        } else {
            food_cost += effective * edge.quantity;
        }
    }

    let labor_cost = recipe.labor_minutes / 60.0 * labor_rate;
    let yield_units = recipe.yield_units as f64;
    let total_batch_cost = food_cost + labor_cost + packaging_cost_per_unit * yield_units;

    Ok(CostBreakdown {
        food_cost,
        packaging_cost_per_unit,
        labor_cost,
        total_batch_cost,
        cost_per_unit: total_batch_cost / yield_units,
        cost_per_kg: total_batch_cost / recipe.total_weight_kg,
    })
}
