use serde::Serialize;

use crate::models::quantity_to_grams;

/// Per-100g nutrient values of one ingredient, as joined from its linked
/// nutrition ref.
#[derive(Debug, Clone)]
pub struct NutrientValues {
    pub calories_per_100g: f64,
    pub protein_per_100g: Option<f64>,
    pub carbs_per_100g: Option<f64>,
    pub fat_per_100g: Option<f64>,
}

/// One edge of a pre-preparation as seen by the materializer: the consumed
/// quantity plus the ingredient's nutrition ref, when it has one.
#[derive(Debug, Clone)]
pub struct EdgeNutrition {
    pub quantity: f64,
    pub unit: String,
    pub values: Option<NutrientValues>,
}

/// Normalized per-100g nutrition of a finished pre-preparation batch.
/// `partial` records that at least one edge contributed nothing (no linked
/// ref, or a unit-count quantity with no gram equivalent).
#[derive(Debug, Clone, Serialize)]
pub struct MaterializedNutrition {
    pub calories_per_100g: f64,
    pub protein_per_100g: f64,
    pub carbs_per_100g: f64,
    pub fat_per_100g: f64,
    pub partial: bool,
}

/// Aggregate edge nutrition into per-100g values of the finished batch.
///
/// Each edge contributes `grams x per_100g / 100` to the batch totals;
/// totals are then normalized by `total_weight_kg * 10` (the number of
/// 100g portions in the batch). Callers guarantee `total_weight_kg > 0`,
/// which recipe validation enforces at write time.
#[must_use]
pub fn aggregate_per_100g(total_weight_kg: f64, items: &[EdgeNutrition]) -> MaterializedNutrition {
    let mut calories = 0.0;
    let mut protein = 0.0;
    let mut carbs = 0.0;
    let mut fat = 0.0;
    let mut partial = false;

    for item in items {
        let Some(grams) = quantity_to_grams(item.quantity, &item.unit) else {
            partial = true;
            continue;
        };
        let Some(values) = &item.values else {
            partial = true;
            continue;
        };
        let factor = grams / 100.0;
        calories += values.calories_per_100g * factor;
        protein += values.protein_per_100g.unwrap_or(0.0) * factor;
        carbs += values.carbs_per_100g.unwrap_or(0.0) * factor;
        fat += values.fat_per_100g.unwrap_or(0.0) * factor;
    }

    let portions = total_weight_kg * 10.0;
    MaterializedNutrition {
        calories_per_100g: calories / portions,
        protein_per_100g: protein / portions,
        carbs_per_100g: carbs / portions,
        fat_per_100g: fat / portions,
        partial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(calories: f64, protein: Option<f64>) -> NutrientValues {
        NutrientValues {
            calories_per_100g: calories,
            protein_per_100g: protein,
            carbs_per_100g: None,
            fat_per_100g: None,
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_aggregates_and_normalizes_per_100g() {
        let items = vec![
            EdgeNutrition {
                quantity: 1.0,
                unit: "kg".to_string(),
                values: Some(values(100.0, Some(10.0))),
            },
            EdgeNutrition {
                quantity: 0.5,
                unit: "kg".to_string(),
                values: Some(values(200.0, None)),
            },
        ];

        let out = aggregate_per_100g(2.0, &items);
        // Batch totals: 1000g*1.0 + 500g*2.0 = 2000 kcal over 20 portions.
        assert!(close(out.calories_per_100g, 100.0));
        assert!(close(out.protein_per_100g, 5.0));
        assert!(close(out.carbs_per_100g, 0.0));
        assert!(!out.partial);
    }

    #[test]
    fn test_missing_ref_contributes_zero_and_flags_partial() {
        let items = vec![
            EdgeNutrition {
                quantity: 1.0,
                unit: "kg".to_string(),
                values: Some(values(100.0, None)),
            },
            EdgeNutrition {
                quantity: 1.0,
                unit: "kg".to_string(),
                values: None,
            },
        ];

        let out = aggregate_per_100g(1.0, &items);
        assert!(close(out.calories_per_100g, 100.0));
        assert!(out.partial);
    }

    #[test]
    fn test_unit_count_quantity_flags_partial() {
        let items = vec![EdgeNutrition {
            quantity: 3.0,
            unit: "un".to_string(),
            values: Some(values(50.0, None)),
        }];

        let out = aggregate_per_100g(1.0, &items);
        assert!(close(out.calories_per_100g, 0.0));
        assert!(out.partial);
    }

    #[test]
    fn test_volume_units_assume_water_density() {
        let items = vec![EdgeNutrition {
            quantity: 500.0,
            unit: "ml".to_string(),
            values: Some(values(40.0, None)),
        }];

        let out = aggregate_per_100g(0.5, &items);
        // 500g at 40 kcal/100g = 200 kcal over 5 portions.
        assert!(close(out.calories_per_100g, 40.0));
        assert!(!out.partial);
    }

    #[test]
    fn test_empty_edges_yield_zero_vector() {
        let out = aggregate_per_100g(1.0, &[]);
        assert!(close(out.calories_per_100g, 0.0));
        assert!(!out.partial);
    }
}
