use std::collections::{HashSet, VecDeque};

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cost::{self, CostBreakdown};
use crate::db::Database;
use crate::models::Recipe;
use crate::nutrition;

/// A recomputed cost within this distance of the stored one is treated as
/// unchanged: nothing is persisted and the cascade stops at that recipe.
/// Half a cent, so float noise never produces history churn.
pub const COST_EPSILON: f64 = 0.005;

#[derive(Debug, Clone, Serialize)]
pub struct CascadeFailure {
    pub recipe_id: i64,
    pub recipe_name: String,
    pub reason: String,
}

/// Outcome of one propagation run: which recipes were recomputed and
/// persisted, and which were skipped with the reason.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CascadeReport {
    pub updated: Vec<i64>,
    pub failed: Vec<CascadeFailure>,
}

impl CascadeReport {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.failed.is_empty()
    }
}

enum Outcome {
    Updated { derived_ingredient: Option<i64> },
    Unchanged,
    Failed { name: String, reason: String },
}

/// Recompute every recipe reachable from the given ingredients, breadth
/// first. Each recipe is visited at most once per run, so diamonds in the
/// graph do not double-count and the run terminates even if a cycle slips
/// past the save-time check.
pub fn run_cascade(
    db: &Database,
    labor_rate: f64,
    seed_ingredients: &[i64],
) -> Result<CascadeReport> {
    let mut report = CascadeReport::default();
    let queue: VecDeque<i64> = seed_ingredients.iter().copied().collect();
    let visited = HashSet::new();
    drain(db, labor_rate, queue, visited, &mut report)?;
    Ok(report)
}

/// Cascade entry point for a single repriced ingredient.
pub fn propagate_price_change(
    db: &Database,
    labor_rate: f64,
    ingredient_id: i64,
) -> Result<CascadeReport> {
    run_cascade(db, labor_rate, &[ingredient_id])
}

/// Cascade entry point for a structural edit: the edited recipe is
/// recomputed and persisted unconditionally, then the change flows to
/// consumers of its output.
pub fn propagate_recipe_change(
    db: &Database,
    labor_rate: f64,
    recipe_id: i64,
) -> Result<CascadeReport> {
    let mut report = CascadeReport::default();
    let Some(recipe) = db.get_recipe(recipe_id)? else {
        return Ok(report);
    };

    let mut queue = VecDeque::new();
    let mut visited = HashSet::new();
    visited.insert(recipe_id);

    // Nutrition tracks the edge set, not prices, so the edited recipe is
    // re-materialized even when a price problem blocks the cost recompute.
    if recipe.is_pre_preparo {
        materialize_nutrition(db, &recipe)?;
    }

    let edges = db.get_recipe_ingredients(recipe_id)?;
    match cost::compute_cost(&recipe, &edges, labor_rate) {
        Ok(breakdown) => {
            db.persist_recipe_cost(recipe_id, &breakdown)?;
            report.updated.push(recipe_id);
            if let Some(ingredient_id) = recipe.derived_ingredient_id {
                db.set_derived_ingredient_price(
                    ingredient_id,
                    derived_price(&recipe, &breakdown),
                )?;
                queue.push_back(ingredient_id);
            }
        }
        Err(err) => {
            warn!(recipe = %recipe.name, error = %err, "recompute failed after edit");
            report.failed.push(CascadeFailure {
                recipe_id,
                recipe_name: recipe.name.clone(),
                reason: err.to_string(),
            });
        }
    }

    drain(db, labor_rate, queue, visited, &mut report)?;
    Ok(report)
}

fn drain(
    db: &Database,
    labor_rate: f64,
    mut queue: VecDeque<i64>,
    mut visited: HashSet<i64>,
    report: &mut CascadeReport,
) -> Result<()> {
    while let Some(ingredient_id) = queue.pop_front() {
        for recipe_id in db.consumer_recipe_ids(ingredient_id)? {
            if !visited.insert(recipe_id) {
                continue;
            }
            match recompute_one(db, recipe_id, labor_rate)? {
                Outcome::Updated { derived_ingredient } => {
                    report.updated.push(recipe_id);
                    if let Some(ingredient_id) = derived_ingredient {
                        queue.push_back(ingredient_id);
                    }
                }
                Outcome::Unchanged => {}
                Outcome::Failed { name, reason } => {
                    report.failed.push(CascadeFailure {
                        recipe_id,
                        recipe_name: name,
                        reason,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Recompute a single recipe inside a cascade. Cost errors are contained
/// here so one broken recipe never stops its siblings; only storage errors
/// abort the run.
fn recompute_one(db: &Database, recipe_id: i64, labor_rate: f64) -> Result<Outcome> {
    let Some(recipe) = db.get_recipe(recipe_id)? else {
        return Ok(Outcome::Unchanged);
    };
    let edges = db.get_recipe_ingredients(recipe_id)?;
    let breakdown = match cost::compute_cost(&recipe, &edges, labor_rate) {
        Ok(breakdown) => breakdown,
        Err(err) => {
            warn!(recipe = %recipe.name, error = %err, "skipping recipe in cascade");
            return Ok(Outcome::Failed {
                name: recipe.name,
                reason: err.to_string(),
            });
        }
    };

    if let Some(previous) = recipe.current_cost {
        if (breakdown.total_batch_cost - previous).abs() <= COST_EPSILON {
            debug!(recipe = %recipe.name, "cost unchanged, propagation stops here");
            return Ok(Outcome::Unchanged);
        }
    }

    db.persist_recipe_cost(recipe_id, &breakdown)?;

    let mut derived_ingredient = None;
    if recipe.is_pre_preparo {
        if let Some(ingredient_id) = recipe.derived_ingredient_id {
            db.set_derived_ingredient_price(ingredient_id, derived_price(&recipe, &breakdown))?;
            materialize_nutrition(db, &recipe)?;
            derived_ingredient = Some(ingredient_id);
        }
    }
    Ok(Outcome::Updated { derived_ingredient })
}

/// What one unit of a pre-preparation's output costs downstream recipes:
/// per kilogram for bulk outputs, per piece otherwise.
fn derived_price(recipe: &Recipe, breakdown: &CostBreakdown) -> f64 {
    if recipe.production_unit == "kg" {
        breakdown.cost_per_kg
    } else {
        breakdown.cost_per_unit
    }
}

/// Aggregate a pre-preparation's edge nutrition and store it as the
/// derived ingredient's reference.
pub(crate) fn materialize_nutrition(db: &Database, recipe: &Recipe) -> Result<()> {
    let Some(ingredient_id) = recipe.derived_ingredient_id else {
        return Ok(());
    };
    let inputs = db.get_recipe_nutrition_inputs(recipe.id)?;
    let materialized = nutrition::aggregate_per_100g(recipe.total_weight_kg, &inputs);
    db.save_recipe_nutrition(recipe.id, &recipe.name, ingredient_id, &materialized)?;
    Ok(())
}

/// Re-materialize nutrition for every pre-preparation reachable from an
/// ingredient whose nutrition reference changed. Prices are untouched, so
/// the cost cascade would stop at its unchanged gate and never get here.
pub fn refresh_nutrition(db: &Database, ingredient_id: i64) -> Result<()> {
    let mut queue: VecDeque<i64> = VecDeque::from([ingredient_id]);
    let mut visited: HashSet<i64> = HashSet::new();
    while let Some(current) = queue.pop_front() {
        for recipe_id in db.consumer_recipe_ids(current)? {
            if !visited.insert(recipe_id) {
                continue;
            }
            let Some(recipe) = db.get_recipe(recipe_id)? else {
                continue;
            };
            if recipe.is_pre_preparo {
                materialize_nutrition(db, &recipe)?;
                if let Some(derived) = recipe.derived_ingredient_id {
                    queue.push_back(derived);
                }
            }
        }
    }
    Ok(())
}

/// Would a recipe with this edge set be able to reach its own output by
/// walking up through producing pre-preparations? Checked before a save is
/// committed; the visited set above is only the runtime safety net.
pub fn would_create_cycle(
    db: &Database,
    recipe_id: i64,
    edge_ingredient_ids: &[i64],
) -> Result<bool> {
    let mut queue: VecDeque<i64> = VecDeque::new();
    let mut seen: HashSet<i64> = HashSet::new();
    for &ingredient_id in edge_ingredient_ids {
        if let Some(producer) = db.producing_recipe_id(ingredient_id)? {
            if seen.insert(producer) {
                queue.push_back(producer);
            }
        }
    }
    while let Some(current) = queue.pop_front() {
        if current == recipe_id {
            return Ok(true);
        }
        for ingredient_id in db.edge_ingredient_ids(current)? {
            if let Some(producer) = db.producing_recipe_id(ingredient_id)? {
                if seen.insert(producer) {
                    queue.push_back(producer);
                }
            }
        }
    }
    Ok(false)
}
