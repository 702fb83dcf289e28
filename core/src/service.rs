use std::path::Path;

use chrono::Local;
use serde::Serialize;
use tracing::warn;

use crate::alert::{self, PriceAlert};
use crate::cascade::{self, CascadeReport};
use crate::cost;
use crate::db::Database;
use crate::error::{CmvError, CmvResult};
use crate::models::{
    CmvHistoryEntry, Ingredient, NewIngredient, NewNutritionRef, NewRecipe, NutritionRef,
    PricePoint, Receipt, ReceiptDetail, Recipe, RecipeDetail, UpdateIngredient, validate_category,
    validate_ingredient_data, validate_production_unit, validate_recipe_data, validate_unit,
};
use crate::openfoodfacts::{NutritionLookupProvider, product_to_nutrition_ref};
use crate::price_import::{self, PriceImportSummary};
use crate::receipt;

pub const LABOR_RATE_KEY: &str = "labor_rate";
pub const WEBHOOK_URL_KEY: &str = "webhook_url";

/// Result of accepting one new price: the repriced ingredient, the alert
/// the move raised (if any), and what the cascade touched.
#[derive(Debug, Serialize)]
pub struct PriceChangeOutcome {
    pub ingredient: Ingredient,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<PriceAlert>,
    pub cascade: CascadeReport,
}

#[derive(Debug, Serialize)]
pub struct RecipeSaveOutcome {
    pub recipe: RecipeDetail,
    pub cascade: CascadeReport,
}

#[derive(Debug, Serialize)]
pub struct ReceiptValidationOutcome {
    pub receipt: ReceiptDetail,
    pub updated_ingredients: Vec<Ingredient>,
    pub alerts: Vec<PriceAlert>,
    pub cascade: CascadeReport,
}

#[derive(Debug, Serialize)]
pub struct PriceImportOutcome {
    pub summary: PriceImportSummary,
    pub alerts: Vec<PriceAlert>,
    pub cascade: CascadeReport,
}

/// Orchestration facade over the database and the cost engine. CLI and
/// HTTP layers both talk to this; neither touches the database directly.
///
/// Alerts are returned in outcomes, never delivered from here. Callers
/// own webhook delivery so no network call happens while a service lock
/// is held.
pub struct CmvService {
    db: Database,
}

impl CmvService {
    pub fn new(db_path: &Path) -> CmvResult<Self> {
        let db = Database::open(db_path)?;
        Ok(Self { db })
    }

    pub fn new_in_memory() -> CmvResult<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self { db })
    }

    // --- Settings ---

    pub fn labor_rate(&self) -> CmvResult<f64> {
        match self.db.get_setting(LABOR_RATE_KEY)? {
            Some(v) => v.parse::<f64>().map_err(|_| {
                CmvError::Validation(format!("Stored labor rate '{v}' is not a number"))
            }),
            None => Ok(0.0),
        }
    }

    pub fn set_labor_rate(&self, rate: f64) -> CmvResult<()> {
        if !rate.is_finite() || rate < 0.0 {
            return Err(CmvError::Validation(
                "Labor rate must be a non-negative number".to_string(),
            ));
        }
        self.db.set_setting(LABOR_RATE_KEY, &rate.to_string())?;
        Ok(())
    }

    pub fn webhook_url(&self) -> CmvResult<Option<String>> {
        Ok(self.db.get_setting(WEBHOOK_URL_KEY)?)
    }

    pub fn set_webhook(&self, url: &str) -> CmvResult<()> {
        if !url.starts_with("http") {
            return Err(CmvError::Validation(
                "Webhook URL must start with http(s)".to_string(),
            ));
        }
        self.db.set_setting(WEBHOOK_URL_KEY, url)?;
        Ok(())
    }

    pub fn clear_webhook(&self) -> CmvResult<bool> {
        Ok(self.db.delete_setting(WEBHOOK_URL_KEY)?)
    }

    // --- Ingredients ---

    pub fn create_ingredient(&self, new: &NewIngredient) -> CmvResult<Ingredient> {
        let mut new = new.clone();
        new.category = validate_category(&new.category).map_err(|e| CmvError::validation(&e))?;
        new.unit = validate_unit(&new.unit).map_err(|e| CmvError::validation(&e))?;
        validate_ingredient_data(&new.name, new.current_price, new.yield_coefficient)
            .map_err(|e| CmvError::validation(&e))?;
        if new.source == "recipe" {
            return Err(CmvError::Validation(
                "Derived ingredients are created by saving a pre-preparo recipe".to_string(),
            ));
        }
        if self.db.get_ingredient_by_name(&new.name)?.is_some() {
            return Err(CmvError::Validation(format!(
                "Ingredient '{}' already exists",
                new.name
            )));
        }
        let ingredient = self.db.create_ingredient(&new)?;
        if let Some(price) = ingredient.current_price {
            self.db
                .append_price_point(ingredient.id, price, &Local::now().to_rfc3339())?;
        }
        Ok(ingredient)
    }

    pub fn get_ingredient(&self, id: i64) -> CmvResult<Ingredient> {
        self.db
            .get_ingredient(id)?
            .ok_or_else(|| CmvError::not_found("Ingredient", &id.to_string()))
    }

    /// Resolve a CLI-style selector: a numeric id, or a name looked up
    /// case-insensitively.
    pub fn resolve_ingredient(&self, selector: &str) -> CmvResult<Ingredient> {
        if let Ok(id) = selector.parse::<i64>() {
            if let Some(ingredient) = self.db.get_ingredient(id)? {
                return Ok(ingredient);
            }
        }
        self.db
            .get_ingredient_by_name(selector)?
            .ok_or_else(|| CmvError::not_found("Ingredient", selector))
    }

    pub fn list_ingredients(
        &self,
        search: Option<&str>,
        category: Option<&str>,
    ) -> CmvResult<Vec<Ingredient>> {
        let category = match category {
            Some(c) => Some(validate_category(c).map_err(|e| CmvError::validation(&e))?),
            None => None,
        };
        Ok(self.db.list_ingredients(search, category.as_deref())?)
    }

    pub fn pending_ingredients(&self) -> CmvResult<Vec<Ingredient>> {
        Ok(self.db.list_pending_ingredients()?)
    }

    /// Update ingredient metadata. Repricing goes through
    /// [`Self::set_ingredient_price`]; a coefficient or category change
    /// still recomputes consumers because both feed the cost formula.
    pub fn update_ingredient(
        &self,
        id: i64,
        update: &UpdateIngredient,
    ) -> CmvResult<(Ingredient, CascadeReport)> {
        let existing = self.get_ingredient(id)?;
        if existing.source == "recipe" {
            return Err(CmvError::Validation(format!(
                "'{}' is produced by a recipe; edit the recipe instead",
                existing.name
            )));
        }

        let mut update = update.clone();
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(CmvError::Validation(
                    "Ingredient name must not be empty".to_string(),
                ));
            }
            if let Some(other) = self.db.get_ingredient_by_name(name)? {
                if other.id != id {
                    return Err(CmvError::Validation(format!(
                        "Ingredient '{name}' already exists"
                    )));
                }
            }
        }
        if let Some(category) = &update.category {
            update.category =
                Some(validate_category(category).map_err(|e| CmvError::validation(&e))?);
        }
        if let Some(unit) = &update.unit {
            update.unit = Some(validate_unit(unit).map_err(|e| CmvError::validation(&e))?);
        }
        if let Some(coefficient) = update.yield_coefficient {
            if coefficient <= 0.0 {
                return Err(CmvError::Validation(
                    "yield_coefficient must be greater than 0".to_string(),
                ));
            }
        }

        let updated = self.db.update_ingredient(id, &update)?;

        let cost_relevant = update
            .yield_coefficient
            .is_some_and(|c| (c - existing.yield_coefficient).abs() > f64::EPSILON)
            || update
                .category
                .as_deref()
                .is_some_and(|c| c != existing.category);
        let cascade = if cost_relevant && updated.current_price.is_some() {
            cascade::propagate_price_change(&self.db, self.labor_rate()?, id)?
        } else {
            CascadeReport::default()
        };
        Ok((updated, cascade))
    }

    /// Accept a new market price and push it through the recipe graph.
    ///
    /// The alert comparison runs against the trailing average as it was
    /// before this price is recorded.
    pub fn set_ingredient_price(&self, id: i64, price: f64) -> CmvResult<PriceChangeOutcome> {
        if !price.is_finite() || price < 0.0 {
            return Err(CmvError::Validation(
                "Price must be a non-negative number".to_string(),
            ));
        }
        let ingredient = self.get_ingredient(id)?;
        if ingredient.source == "recipe" {
            return Err(CmvError::Validation(format!(
                "'{}' is produced by a recipe; its price follows the recipe cost",
                ingredient.name
            )));
        }

        let trailing = self
            .db
            .trailing_average_price(id, alert::TRAILING_WINDOW_DAYS)?;
        let alert = alert::evaluate(&ingredient, trailing, price);

        self.db.set_ingredient_price(id, price)?;
        self.db
            .append_price_point(id, price, &Local::now().to_rfc3339())?;
        let cascade = cascade::propagate_price_change(&self.db, self.labor_rate()?, id)?;

        let ingredient = self.get_ingredient(id)?;
        Ok(PriceChangeOutcome {
            ingredient,
            alert,
            cascade,
        })
    }

    pub fn delete_ingredient(&self, id: i64) -> CmvResult<()> {
        let ingredient = self.get_ingredient(id)?;
        if ingredient.source == "recipe" {
            return Err(CmvError::Validation(format!(
                "'{}' is produced by a recipe; delete the recipe instead",
                ingredient.name
            )));
        }
        let consumers = self.db.consumer_recipe_ids(id)?;
        if !consumers.is_empty() {
            return Err(CmvError::Validation(format!(
                "'{}' is used by {} recipe(s); remove it from them first",
                ingredient.name,
                consumers.len()
            )));
        }
        self.db.delete_ingredient(id)?;
        Ok(())
    }

    pub fn price_history(&self, ingredient_id: i64, limit: i64) -> CmvResult<Vec<PricePoint>> {
        self.get_ingredient(ingredient_id)?;
        Ok(self.db.get_price_history(ingredient_id, limit)?)
    }

    // --- Recipes ---

    /// Create or fully replace a recipe definition, then recompute it and
    /// everything downstream of its output.
    pub fn save_recipe(&self, id: Option<i64>, input: &NewRecipe) -> CmvResult<RecipeSaveOutcome> {
        let mut input = input.clone();
        input.production_unit =
            validate_production_unit(&input.production_unit).map_err(|e| CmvError::validation(&e))?;
        validate_recipe_data(&input).map_err(|e| CmvError::validation(&e))?;

        let existing = match id {
            Some(recipe_id) => Some(
                self.db
                    .get_recipe(recipe_id)?
                    .ok_or_else(|| CmvError::not_found("Recipe", &recipe_id.to_string()))?,
            ),
            None => None,
        };

        if let Some(other) = self.db.get_recipe_by_name(&input.name)? {
            if existing.as_ref().is_none_or(|r| r.id != other.id) {
                return Err(CmvError::Validation(format!(
                    "Recipe '{}' already exists",
                    input.name
                )));
            }
        }

        // A pre-preparo's derived ingredient takes the recipe's name.
        if input.is_pre_preparo {
            if let Some(conflict) = self.db.get_ingredient_by_name(&input.name)? {
                let own_output = existing
                    .as_ref()
                    .and_then(|r| r.derived_ingredient_id)
                    .is_some_and(|derived| derived == conflict.id);
                if !own_output {
                    return Err(CmvError::Validation(format!(
                        "An ingredient named '{}' already exists",
                        input.name
                    )));
                }
            }
        }

        if let Some(recipe) = &existing {
            if recipe.is_pre_preparo && !input.is_pre_preparo {
                if let Some(derived) = recipe.derived_ingredient_id {
                    let consumers = self.db.consumer_recipe_ids(derived)?;
                    if !consumers.is_empty() {
                        return Err(CmvError::Validation(format!(
                            "'{}' is used as an ingredient by {} recipe(s); remove it from them first",
                            recipe.name,
                            consumers.len()
                        )));
                    }
                }
            }
            let edge_ids: Vec<i64> = input.ingredients.iter().map(|e| e.ingredient_id).collect();
            if cascade::would_create_cycle(&self.db, recipe.id, &edge_ids)? {
                return Err(CmvError::CycleDetected(format!(
                    "recipe '{}' would consume its own output",
                    input.name
                )));
            }
        }

        for edge in &input.ingredients {
            if self.db.get_ingredient(edge.ingredient_id)?.is_none() {
                return Err(CmvError::not_found(
                    "Ingredient",
                    &edge.ingredient_id.to_string(),
                ));
            }
        }

        let recipe = self.db.save_recipe_definition(id, &input)?;
        let cascade = cascade::propagate_recipe_change(&self.db, self.labor_rate()?, recipe.id)?;
        let recipe = self.recipe_detail(recipe.id)?;
        Ok(RecipeSaveOutcome { recipe, cascade })
    }

    pub fn get_recipe(&self, id: i64) -> CmvResult<Recipe> {
        self.db
            .get_recipe(id)?
            .ok_or_else(|| CmvError::not_found("Recipe", &id.to_string()))
    }

    pub fn resolve_recipe(&self, selector: &str) -> CmvResult<Recipe> {
        if let Ok(id) = selector.parse::<i64>() {
            if let Some(recipe) = self.db.get_recipe(id)? {
                return Ok(recipe);
            }
        }
        self.db
            .get_recipe_by_name(selector)?
            .ok_or_else(|| CmvError::not_found("Recipe", selector))
    }

    /// Recipe with edges, a breakdown computed from current prices, and
    /// materialized nutrition when the recipe is a pre-preparo.
    pub fn recipe_detail(&self, id: i64) -> CmvResult<RecipeDetail> {
        let recipe = self.get_recipe(id)?;
        let ingredients = self.db.get_recipe_ingredients(id)?;
        let cost = cost::compute_cost(&recipe, &ingredients, self.labor_rate()?).ok();
        let nutrition = self.db.get_recipe_nutrition(id)?;
        Ok(RecipeDetail {
            recipe,
            ingredients,
            cost,
            nutrition,
        })
    }

    pub fn list_recipes(&self) -> CmvResult<Vec<Recipe>> {
        Ok(self.db.list_recipes()?)
    }

    pub fn delete_recipe(&self, id: i64) -> CmvResult<()> {
        let recipe = self.get_recipe(id)?;
        if let Some(derived) = recipe.derived_ingredient_id {
            let consumers = self.db.consumer_recipe_ids(derived)?;
            if !consumers.is_empty() {
                return Err(CmvError::Validation(format!(
                    "'{}' is used as an ingredient by {} recipe(s); remove it from them first",
                    recipe.name,
                    consumers.len()
                )));
            }
        }
        self.db.delete_recipe(id)?;
        Ok(())
    }

    pub fn cmv_history(&self, recipe_id: i64, limit: i64) -> CmvResult<Vec<CmvHistoryEntry>> {
        self.get_recipe(recipe_id)?;
        Ok(self.db.get_cmv_history(recipe_id, limit)?)
    }

    /// Recompute every recipe from scratch. Safe to run at any time; the
    /// unchanged gate keeps already-correct recipes untouched.
    pub fn recalc_all(&self) -> CmvResult<CascadeReport> {
        let seeds = self.db.all_priced_ingredient_ids()?;
        Ok(cascade::run_cascade(&self.db, self.labor_rate()?, &seeds)?)
    }

    // --- Nutrition ---

    /// Attach a nutrition reference to an ingredient and re-materialize
    /// every pre-preparo downstream of it.
    pub fn set_ingredient_nutrition(
        &self,
        ingredient_id: i64,
        new_ref: &NewNutritionRef,
    ) -> CmvResult<NutritionRef> {
        let ingredient = self.get_ingredient(ingredient_id)?;
        if ingredient.source == "recipe" {
            return Err(CmvError::Validation(format!(
                "'{}' is produced by a recipe; its nutrition follows the recipe",
                ingredient.name
            )));
        }
        if !new_ref.calories_per_100g.is_finite() || new_ref.calories_per_100g < 0.0 {
            return Err(CmvError::Validation(
                "calories_per_100g must be a non-negative number".to_string(),
            ));
        }
        let nref = self.db.create_nutrition_ref(new_ref)?;
        self.db.link_ingredient_nutrition(ingredient_id, nref.id)?;
        cascade::refresh_nutrition(&self.db, ingredient_id)?;
        Ok(nref)
    }

    pub fn ingredient_nutrition(&self, ingredient_id: i64) -> CmvResult<Option<NutritionRef>> {
        self.get_ingredient(ingredient_id)?;
        Ok(self.db.get_nutrition_for_ingredient(ingredient_id)?)
    }

    /// Search the provider and attach the first product that carries usable
    /// per-100g data.
    pub fn attach_nutrition_by_search(
        &self,
        provider: &dyn NutritionLookupProvider,
        ingredient_id: i64,
        query: &str,
    ) -> CmvResult<NutritionRef> {
        let products = provider.search_nutrition(query, 5)?;
        let Some(new_ref) = products.into_iter().find_map(product_to_nutrition_ref) else {
            return Err(CmvError::not_found("Nutrition data", query));
        };
        self.set_ingredient_nutrition(ingredient_id, &new_ref)
    }

    pub fn attach_nutrition_by_barcode(
        &self,
        provider: &dyn NutritionLookupProvider,
        ingredient_id: i64,
        barcode: &str,
    ) -> CmvResult<NutritionRef> {
        let Some(product) = provider.fetch_barcode(barcode)? else {
            return Err(CmvError::not_found("Product", barcode));
        };
        let Some(new_ref) = product_to_nutrition_ref(product) else {
            return Err(CmvError::Validation(format!(
                "Product {barcode} has no usable per-100g nutrition data"
            )));
        };
        self.set_ingredient_nutrition(ingredient_id, &new_ref)
    }

    // --- Receipts ---

    /// Parse raw receipt text and stage it for review. Items are matched
    /// against learned mappings first, then by exact ingredient name.
    /// Nothing is priced until the receipt is validated.
    pub fn stage_receipt(&self, text: &str) -> CmvResult<ReceiptDetail> {
        let parsed = receipt::parse_receipt(text);
        if parsed.items.is_empty() {
            return Err(CmvError::Validation(
                "No items recognized in the receipt text".to_string(),
            ));
        }
        let mut matches = Vec::with_capacity(parsed.items.len());
        for item in &parsed.items {
            matches.push(self.match_ingredient_for(&item.raw_name)?);
        }
        Ok(self.db.insert_receipt(&parsed, text, &matches)?)
    }

    fn match_ingredient_for(&self, raw_name: &str) -> CmvResult<Option<i64>> {
        if let Some(mapping) = self.db.match_product(raw_name)? {
            return Ok(Some(mapping.ingredient_id));
        }
        if let Some(ingredient) = self.db.get_ingredient_by_name(raw_name)? {
            if ingredient.source != "recipe" {
                return Ok(Some(ingredient.id));
            }
        }
        Ok(None)
    }

    pub fn get_receipt_detail(&self, id: i64) -> CmvResult<ReceiptDetail> {
        self.db
            .get_receipt(id)?
            .ok_or_else(|| CmvError::not_found("Receipt", &id.to_string()))
    }

    pub fn list_pending_receipts(&self) -> CmvResult<Vec<Receipt>> {
        Ok(self.db.list_pending_receipts()?)
    }

    pub fn match_receipt_item(&self, item_id: i64, ingredient_id: i64) -> CmvResult<()> {
        let ingredient = self.get_ingredient(ingredient_id)?;
        if ingredient.source == "recipe" {
            return Err(CmvError::Validation(format!(
                "'{}' is produced by a recipe; its price follows the recipe cost",
                ingredient.name
            )));
        }
        if !self.db.set_receipt_item_match(item_id, ingredient_id)? {
            return Err(CmvError::not_found("Receipt item", &item_id.to_string()));
        }
        Ok(())
    }

    /// Apply every matched item of a pending receipt as a new price, learn
    /// the name mappings, and run one cascade over all touched ingredients.
    /// Unmatched items are skipped and stay visible on the receipt.
    pub fn validate_receipt(&self, id: i64) -> CmvResult<ReceiptValidationOutcome> {
        let detail = self.get_receipt_detail(id)?;
        if detail.receipt.status != "pending" {
            return Err(CmvError::Validation(format!(
                "Receipt {id} is already {}",
                detail.receipt.status
            )));
        }

        let mut alerts = Vec::new();
        let mut touched: Vec<i64> = Vec::new();

        for item in &detail.items {
            let Some(ingredient_id) = item.matched_ingredient_id else {
                continue;
            };
            if item.applied {
                continue;
            }
            let Some(ingredient) = self.db.get_ingredient(ingredient_id)? else {
                warn!(item = %item.raw_name, "Matched ingredient no longer exists; skipping");
                continue;
            };
            if ingredient.source == "recipe" {
                warn!(item = %item.raw_name, "Item matched to a derived ingredient; skipping");
                continue;
            }

            let trailing = self
                .db
                .trailing_average_price(ingredient_id, alert::TRAILING_WINDOW_DAYS)?;
            if let Some(alert) = alert::evaluate(&ingredient, trailing, item.unit_price) {
                alerts.push(alert);
            }
            self.db.set_ingredient_price(ingredient_id, item.unit_price)?;
            self.db.append_price_point(
                ingredient_id,
                item.unit_price,
                &Local::now().to_rfc3339(),
            )?;
            self.db.learn_product_mapping(&item.raw_name, ingredient_id)?;
            self.db.mark_receipt_item_applied(item.id)?;
            if !touched.contains(&ingredient_id) {
                touched.push(ingredient_id);
            }
        }

        let cascade = cascade::run_cascade(&self.db, self.labor_rate()?, &touched)?;
        self.db.set_receipt_status(id, "validated")?;

        let receipt = self.get_receipt_detail(id)?;
        let mut updated_ingredients = Vec::with_capacity(touched.len());
        for ingredient_id in touched {
            if let Some(ingredient) = self.db.get_ingredient(ingredient_id)? {
                updated_ingredients.push(ingredient);
            }
        }
        Ok(ReceiptValidationOutcome {
            receipt,
            updated_ingredients,
            alerts,
            cascade,
        })
    }

    pub fn reject_receipt(&self, id: i64) -> CmvResult<Receipt> {
        let detail = self.get_receipt_detail(id)?;
        if detail.receipt.status != "pending" {
            return Err(CmvError::Validation(format!(
                "Receipt {id} is already {}",
                detail.receipt.status
            )));
        }
        self.db.set_receipt_status(id, "rejected")?;
        Ok(self.get_receipt_detail(id)?.receipt)
    }

    // --- Price list import ---

    /// Import a supplier price list CSV. Alerts are evaluated against each
    /// ingredient's trailing average as captured before its new point was
    /// written.
    pub fn import_prices(&self, csv_data: &str, dry_run: bool) -> CmvResult<PriceImportOutcome> {
        let rows =
            price_import::parse_price_csv(csv_data.as_bytes()).map_err(|e| CmvError::validation(&e))?;
        let (summary, touched) = price_import::import_prices(&self.db, &rows, dry_run)?;

        let mut alerts = Vec::new();
        let mut seeds = Vec::with_capacity(touched.len());
        for t in &touched {
            if let Some(ingredient) = self.db.get_ingredient(t.ingredient_id)? {
                if let Some(alert) = alert::evaluate(&ingredient, t.trailing_average, t.new_price) {
                    alerts.push(alert);
                }
            }
            seeds.push(t.ingredient_id);
        }
        let cascade = if dry_run {
            CascadeReport::default()
        } else {
            cascade::run_cascade(&self.db, self.labor_rate()?, &seeds)?
        };
        Ok(PriceImportOutcome {
            summary,
            alerts,
            cascade,
        })
    }
}
