use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{Duration, Local};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::cost::CostBreakdown;
use crate::models::{
    CmvHistoryEntry, Ingredient, NewIngredient, NewNutritionRef, NewRecipe, NutritionRef,
    PricePoint, ProductMapping, Receipt, ReceiptDetail, ReceiptItem, Recipe, RecipeIngredient,
    UpdateIngredient, normalize_product_name,
};
use crate::nutrition::{EdgeNutrition, MaterializedNutrition, NutrientValues};
use crate::receipt::ParsedReceipt;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL UNIQUE,
                    category TEXT NOT NULL,
                    unit TEXT NOT NULL,
                    current_price REAL,
                    yield_coefficient REAL NOT NULL DEFAULT 1.0,
                    nutrition_ref_id INTEGER REFERENCES nutrition_refs(id),
                    source TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS nutrition_refs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    calories_per_100g REAL NOT NULL,
                    protein_per_100g REAL,
                    carbs_per_100g REAL,
                    fat_per_100g REAL,
                    partial INTEGER NOT NULL DEFAULT 0,
                    source TEXT NOT NULL,
                    recipe_id INTEGER UNIQUE REFERENCES recipes(id),
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL UNIQUE,
                    sku TEXT,
                    yield_units INTEGER NOT NULL,
                    total_weight_kg REAL NOT NULL,
                    labor_minutes REAL NOT NULL DEFAULT 0,
                    is_pre_preparo INTEGER NOT NULL DEFAULT 0,
                    production_unit TEXT NOT NULL DEFAULT 'kg',
                    derived_ingredient_id INTEGER REFERENCES ingredients(id),
                    current_cost REAL,
                    cmv_per_unit REAL,
                    cmv_per_kg REAL,
                    last_calculated TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipe_ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    ingredient_id INTEGER NOT NULL REFERENCES ingredients(id),
                    quantity REAL NOT NULL
                );

                CREATE TABLE IF NOT EXISTS cmv_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    cost REAL NOT NULL,
                    recorded_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_ingredients_name ON ingredients(name);
                CREATE INDEX IF NOT EXISTS idx_recipe_ingredients_recipe ON recipe_ingredients(recipe_id);
                CREATE INDEX IF NOT EXISTS idx_recipe_ingredients_ingredient ON recipe_ingredients(ingredient_id);
                CREATE INDEX IF NOT EXISTS idx_cmv_history_recipe ON cmv_history(recipe_id);

                PRAGMA user_version = 1;",
            )?;
        }

        if version < 2 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS price_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ingredient_id INTEGER NOT NULL REFERENCES ingredients(id) ON DELETE CASCADE,
                    price REAL NOT NULL,
                    recorded_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS receipts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    market TEXT,
                    total REAL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    raw_text TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS receipt_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    receipt_id INTEGER NOT NULL REFERENCES receipts(id) ON DELETE CASCADE,
                    raw_name TEXT NOT NULL,
                    quantity REAL,
                    unit_price REAL NOT NULL,
                    matched_ingredient_id INTEGER REFERENCES ingredients(id),
                    applied INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS product_map (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    raw_name TEXT NOT NULL UNIQUE,
                    ingredient_id INTEGER NOT NULL REFERENCES ingredients(id),
                    confidence REAL NOT NULL DEFAULT 1.0,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_price_history_ingredient ON price_history(ingredient_id);
                CREATE INDEX IF NOT EXISTS idx_receipt_items_receipt ON receipt_items(receipt_id);

                PRAGMA user_version = 2;",
            )?;
        }

        if version < 3 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY NOT NULL,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
                );

                PRAGMA user_version = 3;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn ingredient_from_row(row: &rusqlite::Row) -> rusqlite::Result<Ingredient> {
        Ok(Ingredient {
            id: row.get(0)?,
            uuid: row.get(1)?,
            name: row.get(2)?,
            category: row.get(3)?,
            unit: row.get(4)?,
            current_price: row.get(5)?,
            yield_coefficient: row.get(6)?,
            nutrition_ref_id: row.get(7)?,
            source: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<Recipe> {
        Ok(Recipe {
            id: row.get(0)?,
            uuid: row.get(1)?,
            name: row.get(2)?,
            sku: row.get(3)?,
            yield_units: row.get(4)?,
            total_weight_kg: row.get(5)?,
            labor_minutes: row.get(6)?,
            is_pre_preparo: row.get(7)?,
            production_unit: row.get(8)?,
            derived_ingredient_id: row.get(9)?,
            current_cost: row.get(10)?,
            cmv_per_unit: row.get(11)?,
            cmv_per_kg: row.get(12)?,
            last_calculated: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }

    fn nutrition_ref_from_row(row: &rusqlite::Row) -> rusqlite::Result<NutritionRef> {
        Ok(NutritionRef {
            id: row.get(0)?,
            name: row.get(1)?,
            calories_per_100g: row.get(2)?,
            protein_per_100g: row.get(3)?,
            carbs_per_100g: row.get(4)?,
            fat_per_100g: row.get(5)?,
            partial: row.get(6)?,
            source: row.get(7)?,
            recipe_id: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn receipt_from_row(row: &rusqlite::Row) -> rusqlite::Result<Receipt> {
        Ok(Receipt {
            id: row.get(0)?,
            uuid: row.get(1)?,
            market: row.get(2)?,
            total: row.get(3)?,
            status: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn product_mapping_from_row(row: &rusqlite::Row) -> rusqlite::Result<ProductMapping> {
        Ok(ProductMapping {
            id: row.get(0)?,
            raw_name: row.get(1)?,
            ingredient_id: row.get(2)?,
            confidence: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    const INGREDIENT_COLS: &'static str = "id, uuid, name, category, unit, current_price, \
         yield_coefficient, nutrition_ref_id, source, created_at, updated_at";

    const RECIPE_COLS: &'static str = "id, uuid, name, sku, yield_units, total_weight_kg, \
         labor_minutes, is_pre_preparo, production_unit, derived_ingredient_id, current_cost, \
         cmv_per_unit, cmv_per_kg, last_calculated, created_at, updated_at";

    const NUTRITION_REF_COLS: &'static str = "id, name, calories_per_100g, protein_per_100g, \
         carbs_per_100g, fat_per_100g, partial, source, recipe_id, updated_at";

    // --- Ingredients ---

    pub fn create_ingredient(&self, new: &NewIngredient) -> Result<Ingredient> {
        let now = Local::now().to_rfc3339();
        let uuid = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO ingredients (uuid, name, category, unit, current_price, yield_coefficient, source, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                uuid,
                new.name,
                new.category,
                new.unit,
                new.current_price,
                new.yield_coefficient,
                new.source,
                now
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_ingredient(id)?
            .context("Ingredient vanished after insert")
    }

    pub fn get_ingredient(&self, id: i64) -> Result<Option<Ingredient>> {
        let sql = format!(
            "SELECT {} FROM ingredients WHERE id = ?1",
            Self::INGREDIENT_COLS
        );
        let ingredient = self
            .conn
            .query_row(&sql, params![id], Self::ingredient_from_row)
            .optional()?;
        Ok(ingredient)
    }

    pub fn get_ingredient_by_name(&self, name: &str) -> Result<Option<Ingredient>> {
        let sql = format!(
            "SELECT {} FROM ingredients WHERE name = ?1 COLLATE NOCASE",
            Self::INGREDIENT_COLS
        );
        let ingredient = self
            .conn
            .query_row(&sql, params![name], Self::ingredient_from_row)
            .optional()?;
        Ok(ingredient)
    }

    pub fn list_ingredients(
        &self,
        search: Option<&str>,
        category: Option<&str>,
    ) -> Result<Vec<Ingredient>> {
        let sql = format!(
            "SELECT {} FROM ingredients
             WHERE (?1 IS NULL OR name LIKE '%' || ?1 || '%')
               AND (?2 IS NULL OR category = ?2)
             ORDER BY name COLLATE NOCASE",
            Self::INGREDIENT_COLS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![search, category], Self::ingredient_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Ingredients whose registration is incomplete: never priced, or
    /// auto-created from a receipt/import with an unconfirmed category.
    pub fn list_pending_ingredients(&self) -> Result<Vec<Ingredient>> {
        let sql = format!(
            "SELECT {} FROM ingredients
             WHERE source != 'recipe'
               AND (current_price IS NULL OR (category = 'outros' AND source != 'manual'))
             ORDER BY name COLLATE NOCASE",
            Self::INGREDIENT_COLS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::ingredient_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn update_ingredient(&self, id: i64, update: &UpdateIngredient) -> Result<Ingredient> {
        let Some(existing) = self.get_ingredient(id)? else {
            bail!("Ingredient {id} not found");
        };
        let name = update.name.clone().unwrap_or(existing.name);
        let category = update.category.clone().unwrap_or(existing.category);
        let unit = update.unit.clone().unwrap_or(existing.unit);
        let yield_coefficient = update
            .yield_coefficient
            .unwrap_or(existing.yield_coefficient);
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "UPDATE ingredients
             SET name = ?1, category = ?2, unit = ?3, yield_coefficient = ?4, updated_at = ?5
             WHERE id = ?6",
            params![name, category, unit, yield_coefficient, now, id],
        )?;
        self.get_ingredient(id)?
            .context("Ingredient vanished after update")
    }

    /// Write a purchased price. History rows are appended separately by the
    /// service so the trailing average can be read first.
    pub fn set_ingredient_price(&self, id: i64, price: f64) -> Result<()> {
        let now = Local::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE ingredients SET current_price = ?1, updated_at = ?2 WHERE id = ?3",
            params![price, now, id],
        )?;
        if changed == 0 {
            bail!("Ingredient {id} not found");
        }
        Ok(())
    }

    /// Price write for a pre-preparation's output, done by the cascade after
    /// each recompute. Not recorded in price history.
    pub fn set_derived_ingredient_price(&self, id: i64, price: f64) -> Result<()> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "UPDATE ingredients SET current_price = ?1, updated_at = ?2 WHERE id = ?3",
            params![price, now, id],
        )?;
        Ok(())
    }

    pub fn delete_ingredient(&self, id: i64) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM product_map WHERE ingredient_id = ?1",
            params![id],
        )?;
        tx.execute(
            "DELETE FROM price_history WHERE ingredient_id = ?1",
            params![id],
        )?;
        let deleted = tx.execute("DELETE FROM ingredients WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    // --- Recipes ---

    pub fn get_recipe(&self, id: i64) -> Result<Option<Recipe>> {
        let sql = format!("SELECT {} FROM recipes WHERE id = ?1", Self::RECIPE_COLS);
        let recipe = self
            .conn
            .query_row(&sql, params![id], Self::recipe_from_row)
            .optional()?;
        Ok(recipe)
    }

    pub fn get_recipe_by_name(&self, name: &str) -> Result<Option<Recipe>> {
        let sql = format!(
            "SELECT {} FROM recipes WHERE name = ?1 COLLATE NOCASE",
            Self::RECIPE_COLS
        );
        let recipe = self
            .conn
            .query_row(&sql, params![name], Self::recipe_from_row)
            .optional()?;
        Ok(recipe)
    }

    pub fn list_recipes(&self) -> Result<Vec<Recipe>> {
        let sql = format!(
            "SELECT {} FROM recipes ORDER BY name COLLATE NOCASE",
            Self::RECIPE_COLS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::recipe_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Create or fully replace a recipe definition in one transaction:
    /// recipe row, complete edge set, and the derived ingredient for
    /// pre-preparations. A failed save leaves the previous state intact.
    pub fn save_recipe_definition(&self, id: Option<i64>, input: &NewRecipe) -> Result<Recipe> {
        let now = Local::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;

        let (recipe_id, mut derived_id) = match id {
            Some(recipe_id) => {
                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT derived_ingredient_id FROM recipes WHERE id = ?1",
                        params![recipe_id],
                        |row| row.get(0),
                    )
                    .optional()?
                    .flatten();
                (recipe_id, existing)
            }
            None => {
                let uuid = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO recipes (uuid, name, sku, yield_units, total_weight_kg, labor_minutes,
                                          is_pre_preparo, production_unit, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                    params![
                        uuid,
                        input.name,
                        input.sku,
                        input.yield_units,
                        input.total_weight_kg,
                        input.labor_minutes,
                        input.is_pre_preparo,
                        input.production_unit,
                        now
                    ],
                )?;
                (tx.last_insert_rowid(), None)
            }
        };

        if input.is_pre_preparo {
            match derived_id {
                Some(ingredient_id) => {
                    // Keep the output ingredient in sync with the recipe.
                    tx.execute(
                        "UPDATE ingredients SET name = ?1, unit = ?2, updated_at = ?3 WHERE id = ?4",
                        params![input.name, input.production_unit, now, ingredient_id],
                    )?;
                    tx.execute(
                        "UPDATE nutrition_refs SET name = ?1, updated_at = ?2 WHERE recipe_id = ?3",
                        params![input.name, now, recipe_id],
                    )?;
                }
                None => {
                    let uuid = Uuid::new_v4().to_string();
                    tx.execute(
                        "INSERT INTO ingredients (uuid, name, category, unit, yield_coefficient, source, created_at, updated_at)
                         VALUES (?1, ?2, 'outros', ?3, 1.0, 'recipe', ?4, ?4)",
                        params![uuid, input.name, input.production_unit, now],
                    )?;
                    derived_id = Some(tx.last_insert_rowid());
                }
            }
        } else if let Some(ingredient_id) = derived_id.take() {
            let consumers: i64 = tx.query_row(
                "SELECT COUNT(*) FROM recipe_ingredients WHERE ingredient_id = ?1",
                params![ingredient_id],
                |row| row.get(0),
            )?;
            if consumers > 0 {
                bail!(
                    "Cannot disable pre-preparo: its output is used by {consumers} recipe edge(s)"
                );
            }
            tx.execute(
                "UPDATE ingredients SET nutrition_ref_id = NULL
                 WHERE nutrition_ref_id IN (SELECT id FROM nutrition_refs WHERE recipe_id = ?1)",
                params![recipe_id],
            )?;
            tx.execute(
                "DELETE FROM nutrition_refs WHERE recipe_id = ?1",
                params![recipe_id],
            )?;
            tx.execute(
                "DELETE FROM ingredients WHERE id = ?1",
                params![ingredient_id],
            )?;
        }

        tx.execute(
            "UPDATE recipes
             SET name = ?1, sku = ?2, yield_units = ?3, total_weight_kg = ?4, labor_minutes = ?5,
                 is_pre_preparo = ?6, production_unit = ?7, derived_ingredient_id = ?8, updated_at = ?9
             WHERE id = ?10",
            params![
                input.name,
                input.sku,
                input.yield_units,
                input.total_weight_kg,
                input.labor_minutes,
                input.is_pre_preparo,
                input.production_unit,
                derived_id,
                now,
                recipe_id
            ],
        )?;

        // Full edge replace: delete all, then insert the submitted set.
        tx.execute(
            "DELETE FROM recipe_ingredients WHERE recipe_id = ?1",
            params![recipe_id],
        )?;
        for edge in &input.ingredients {
            let known: i64 = tx.query_row(
                "SELECT COUNT(*) FROM ingredients WHERE id = ?1",
                params![edge.ingredient_id],
                |row| row.get(0),
            )?;
            if known == 0 {
                bail!("Ingredient {} not found", edge.ingredient_id);
            }
            tx.execute(
                "INSERT INTO recipe_ingredients (recipe_id, ingredient_id, quantity)
                 VALUES (?1, ?2, ?3)",
                params![recipe_id, edge.ingredient_id, edge.quantity],
            )?;
        }

        tx.commit()?;
        self.get_recipe(recipe_id)?
            .context("Recipe vanished after save")
    }

    pub fn delete_recipe(&self, id: i64) -> Result<bool> {
        let Some(recipe) = self.get_recipe(id)? else {
            return Ok(false);
        };
        if let Some(ingredient_id) = recipe.derived_ingredient_id {
            let consumers: i64 = self.conn.query_row(
                "SELECT COUNT(*) FROM recipe_ingredients WHERE ingredient_id = ?1",
                params![ingredient_id],
                |row| row.get(0),
            )?;
            if consumers > 0 {
                bail!(
                    "Cannot delete '{}': its output is used by {consumers} recipe edge(s)",
                    recipe.name
                );
            }
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM recipe_ingredients WHERE recipe_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM cmv_history WHERE recipe_id = ?1", params![id])?;
        tx.execute(
            "UPDATE ingredients SET nutrition_ref_id = NULL
             WHERE nutrition_ref_id IN (SELECT id FROM nutrition_refs WHERE recipe_id = ?1)",
            params![id],
        )?;
        tx.execute(
            "DELETE FROM nutrition_refs WHERE recipe_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM recipes WHERE id = ?1", params![id])?;
        if let Some(ingredient_id) = recipe.derived_ingredient_id {
            tx.execute(
                "DELETE FROM ingredients WHERE id = ?1",
                params![ingredient_id],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    // --- Edges and graph adjacency ---

    pub fn get_recipe_ingredients(&self, recipe_id: i64) -> Result<Vec<RecipeIngredient>> {
        let mut stmt = self.conn.prepare(
            "SELECT ri.id, ri.recipe_id, ri.ingredient_id, ri.quantity,
                    i.name, i.unit, i.category, i.current_price, i.yield_coefficient
             FROM recipe_ingredients ri
             JOIN ingredients i ON i.id = ri.ingredient_id
             WHERE ri.recipe_id = ?1
             ORDER BY ri.id",
        )?;
        let rows = stmt.query_map(params![recipe_id], |row| {
            Ok(RecipeIngredient {
                id: row.get(0)?,
                recipe_id: row.get(1)?,
                ingredient_id: row.get(2)?,
                quantity: row.get(3)?,
                ingredient_name: row.get(4)?,
                ingredient_unit: row.get(5)?,
                ingredient_category: row.get(6)?,
                ingredient_price: row.get(7)?,
                yield_coefficient: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Ids of every recipe with an edge consuming the given ingredient.
    pub fn consumer_recipe_ids(&self, ingredient_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT recipe_id FROM recipe_ingredients
             WHERE ingredient_id = ?1 ORDER BY recipe_id",
        )?;
        let rows = stmt.query_map(params![ingredient_id], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The pre-preparation that produces the given ingredient, if any.
    pub fn producing_recipe_id(&self, ingredient_id: i64) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM recipes WHERE derived_ingredient_id = ?1",
                params![ingredient_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn edge_ingredient_ids(&self, recipe_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT ingredient_id FROM recipe_ingredients WHERE recipe_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![recipe_id], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn all_priced_ingredient_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM ingredients WHERE current_price IS NOT NULL ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // --- Engine writes ---

    /// Persist a recompute result: cost and cmv fields plus the history row,
    /// in one transaction so they can never drift apart.
    pub fn persist_recipe_cost(&self, recipe_id: i64, cost: &CostBreakdown) -> Result<()> {
        let now = Local::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE recipes
             SET current_cost = ?1, cmv_per_unit = ?2, cmv_per_kg = ?3,
                 last_calculated = ?4, updated_at = ?4
             WHERE id = ?5",
            params![
                cost.total_batch_cost,
                cost.cost_per_unit,
                cost.cost_per_kg,
                now,
                recipe_id
            ],
        )?;
        tx.execute(
            "INSERT INTO cmv_history (recipe_id, cost, recorded_at) VALUES (?1, ?2, ?3)",
            params![recipe_id, cost.total_batch_cost, now],
        )?;
        tx.commit()?;
        Ok(())
    }

    // --- Nutrition refs ---

    pub fn create_nutrition_ref(&self, new: &NewNutritionRef) -> Result<NutritionRef> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO nutrition_refs (name, calories_per_100g, protein_per_100g, carbs_per_100g, fat_per_100g, partial, source, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
            params![
                new.name,
                new.calories_per_100g,
                new.protein_per_100g,
                new.carbs_per_100g,
                new.fat_per_100g,
                new.source,
                now
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_nutrition_ref(id)?
            .context("Nutrition ref vanished after insert")
    }

    pub fn get_nutrition_ref(&self, id: i64) -> Result<Option<NutritionRef>> {
        let sql = format!(
            "SELECT {} FROM nutrition_refs WHERE id = ?1",
            Self::NUTRITION_REF_COLS
        );
        let nref = self
            .conn
            .query_row(&sql, params![id], Self::nutrition_ref_from_row)
            .optional()?;
        Ok(nref)
    }

    pub fn link_ingredient_nutrition(&self, ingredient_id: i64, ref_id: i64) -> Result<()> {
        let now = Local::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE ingredients SET nutrition_ref_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![ref_id, now, ingredient_id],
        )?;
        if changed == 0 {
            bail!("Ingredient {ingredient_id} not found");
        }
        Ok(())
    }

    pub fn get_nutrition_for_ingredient(&self, ingredient_id: i64) -> Result<Option<NutritionRef>> {
        let cols = Self::NUTRITION_REF_COLS
            .split(", ")
            .map(|c| format!("n.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {cols} FROM nutrition_refs n
             JOIN ingredients i ON i.nutrition_ref_id = n.id
             WHERE i.id = ?1"
        );
        let nref = self
            .conn
            .query_row(&sql, params![ingredient_id], Self::nutrition_ref_from_row)
            .optional()?;
        Ok(nref)
    }

    /// Edges of a pre-preparation with each ingredient's nutrition joined
    /// in, shaped for the materializer.
    pub fn get_recipe_nutrition_inputs(&self, recipe_id: i64) -> Result<Vec<EdgeNutrition>> {
        let mut stmt = self.conn.prepare(
            "SELECT ri.quantity, i.unit,
                    n.calories_per_100g, n.protein_per_100g, n.carbs_per_100g, n.fat_per_100g
             FROM recipe_ingredients ri
             JOIN ingredients i ON i.id = ri.ingredient_id
             LEFT JOIN nutrition_refs n ON n.id = i.nutrition_ref_id
             WHERE ri.recipe_id = ?1
             ORDER BY ri.id",
        )?;
        let rows = stmt.query_map(params![recipe_id], |row| {
            let calories: Option<f64> = row.get(2)?;
            let values = calories.map(|calories_per_100g| NutrientValues {
                calories_per_100g,
                protein_per_100g: row.get(3).unwrap_or(None),
                carbs_per_100g: row.get(4).unwrap_or(None),
                fat_per_100g: row.get(5).unwrap_or(None),
            });
            Ok(EdgeNutrition {
                quantity: row.get(0)?,
                unit: row.get(1)?,
                values,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Upsert a pre-preparation's materialized nutrition, keyed by the
    /// recipe's id so renames never orphan the ref, and link the derived
    /// ingredient to it.
    pub fn save_recipe_nutrition(
        &self,
        recipe_id: i64,
        recipe_name: &str,
        derived_ingredient_id: i64,
        nutrition: &MaterializedNutrition,
    ) -> Result<i64> {
        let now = Local::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO nutrition_refs (name, calories_per_100g, protein_per_100g, carbs_per_100g, fat_per_100g, partial, source, recipe_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'recipe', ?7, ?8)
             ON CONFLICT(recipe_id) DO UPDATE SET
                 name = excluded.name,
                 calories_per_100g = excluded.calories_per_100g,
                 protein_per_100g = excluded.protein_per_100g,
                 carbs_per_100g = excluded.carbs_per_100g,
                 fat_per_100g = excluded.fat_per_100g,
                 partial = excluded.partial,
                 updated_at = excluded.updated_at",
            params![
                recipe_name,
                nutrition.calories_per_100g,
                nutrition.protein_per_100g,
                nutrition.carbs_per_100g,
                nutrition.fat_per_100g,
                nutrition.partial,
                recipe_id,
                now
            ],
        )?;
        let ref_id: i64 = tx.query_row(
            "SELECT id FROM nutrition_refs WHERE recipe_id = ?1",
            params![recipe_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "UPDATE ingredients SET nutrition_ref_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![ref_id, now, derived_ingredient_id],
        )?;
        tx.commit()?;
        Ok(ref_id)
    }

    pub fn get_recipe_nutrition(&self, recipe_id: i64) -> Result<Option<NutritionRef>> {
        let sql = format!(
            "SELECT {} FROM nutrition_refs WHERE recipe_id = ?1",
            Self::NUTRITION_REF_COLS
        );
        let nref = self
            .conn
            .query_row(&sql, params![recipe_id], Self::nutrition_ref_from_row)
            .optional()?;
        Ok(nref)
    }

    // --- History ---

    pub fn get_cmv_history(&self, recipe_id: i64, limit: i64) -> Result<Vec<CmvHistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, recipe_id, cost, recorded_at FROM cmv_history
             WHERE recipe_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![recipe_id, limit], |row| {
            Ok(CmvHistoryEntry {
                id: row.get(0)?,
                recipe_id: row.get(1)?,
                cost: row.get(2)?,
                recorded_at: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count_cmv_history(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM cmv_history", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn append_price_point(
        &self,
        ingredient_id: i64,
        price: f64,
        recorded_at: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO price_history (ingredient_id, price, recorded_at) VALUES (?1, ?2, ?3)",
            params![ingredient_id, price, recorded_at],
        )?;
        Ok(())
    }

    pub fn get_price_history(&self, ingredient_id: i64, limit: i64) -> Result<Vec<PricePoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ingredient_id, price, recorded_at FROM price_history
             WHERE ingredient_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![ingredient_id, limit], |row| {
            Ok(PricePoint {
                id: row.get(0)?,
                ingredient_id: row.get(1)?,
                price: row.get(2)?,
                recorded_at: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Average recorded price over the trailing window, None when the window
    /// holds no points. RFC 3339 timestamps from one local clock order
    /// lexicographically.
    pub fn trailing_average_price(&self, ingredient_id: i64, days: i64) -> Result<Option<f64>> {
        let cutoff = (Local::now() - Duration::days(days)).to_rfc3339();
        let avg = self.conn.query_row(
            "SELECT AVG(price) FROM price_history
             WHERE ingredient_id = ?1 AND recorded_at >= ?2",
            params![ingredient_id, cutoff],
            |row| row.get(0),
        )?;
        Ok(avg)
    }

    // --- Receipts ---

    /// Persist a parsed receipt and its items in one transaction.
    /// `matches[i]` is the pre-resolved ingredient for item i, if any.
    pub fn insert_receipt(
        &self,
        parsed: &ParsedReceipt,
        raw_text: &str,
        matches: &[Option<i64>],
    ) -> Result<ReceiptDetail> {
        let now = Local::now().to_rfc3339();
        let uuid = Uuid::new_v4().to_string();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO receipts (uuid, market, total, status, raw_text, created_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5)",
            params![uuid, parsed.market, parsed.total, raw_text, now],
        )?;
        let receipt_id = tx.last_insert_rowid();
        for (item, matched) in parsed.items.iter().zip(matches) {
            tx.execute(
                "INSERT INTO receipt_items (receipt_id, raw_name, quantity, unit_price, matched_ingredient_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![receipt_id, item.raw_name, item.quantity, item.unit_price, matched],
            )?;
        }
        tx.commit()?;
        self.get_receipt(receipt_id)?
            .context("Receipt vanished after insert")
    }

    pub fn get_receipt(&self, id: i64) -> Result<Option<ReceiptDetail>> {
        let receipt = self
            .conn
            .query_row(
                "SELECT id, uuid, market, total, status, created_at FROM receipts WHERE id = ?1",
                params![id],
                Self::receipt_from_row,
            )
            .optional()?;
        let Some(receipt) = receipt else {
            return Ok(None);
        };
        let items = self.get_receipt_items(id)?;
        Ok(Some(ReceiptDetail { receipt, items }))
    }

    pub fn get_receipt_items(&self, receipt_id: i64) -> Result<Vec<ReceiptItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT ri.id, ri.receipt_id, ri.raw_name, ri.quantity, ri.unit_price,
                    ri.matched_ingredient_id, ri.applied, i.name
             FROM receipt_items ri
             LEFT JOIN ingredients i ON i.id = ri.matched_ingredient_id
             WHERE ri.receipt_id = ?1
             ORDER BY ri.id",
        )?;
        let rows = stmt.query_map(params![receipt_id], |row| {
            Ok(ReceiptItem {
                id: row.get(0)?,
                receipt_id: row.get(1)?,
                raw_name: row.get(2)?,
                quantity: row.get(3)?,
                unit_price: row.get(4)?,
                matched_ingredient_id: row.get(5)?,
                applied: row.get(6)?,
                matched_ingredient_name: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn list_pending_receipts(&self) -> Result<Vec<Receipt>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, market, total, status, created_at FROM receipts
             WHERE status = 'pending' ORDER BY id",
        )?;
        let rows = stmt.query_map([], Self::receipt_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_receipt_status(&self, id: i64, status: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE receipts SET status = ?1 WHERE id = ?2",
            params![status, id],
        )?;
        if changed == 0 {
            bail!("Receipt {id} not found");
        }
        Ok(())
    }

    pub fn set_receipt_item_match(&self, item_id: i64, ingredient_id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE receipt_items SET matched_ingredient_id = ?1 WHERE id = ?2",
            params![ingredient_id, item_id],
        )?;
        Ok(changed > 0)
    }

    pub fn mark_receipt_item_applied(&self, item_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE receipt_items SET applied = 1 WHERE id = ?1",
            params![item_id],
        )?;
        Ok(())
    }

    // --- Product map ---

    /// Resolve a raw receipt name to a learned ingredient: exact normalized
    /// match first, then a substring fallback with highest confidence winning.
    pub fn match_product(&self, raw_name: &str) -> Result<Option<ProductMapping>> {
        let normalized = normalize_product_name(raw_name);
        if normalized.is_empty() {
            return Ok(None);
        }
        let exact = self
            .conn
            .query_row(
                "SELECT id, raw_name, ingredient_id, confidence, updated_at
                 FROM product_map WHERE raw_name = ?1",
                params![normalized],
                Self::product_mapping_from_row,
            )
            .optional()?;
        if exact.is_some() {
            return Ok(exact);
        }
        let fuzzy = self
            .conn
            .query_row(
                "SELECT id, raw_name, ingredient_id, confidence, updated_at
                 FROM product_map
                 WHERE ?1 LIKE '%' || raw_name || '%' OR raw_name LIKE '%' || ?1 || '%'
                 ORDER BY confidence DESC, length(raw_name) DESC
                 LIMIT 1",
                params![normalized],
                Self::product_mapping_from_row,
            )
            .optional()?;
        Ok(fuzzy)
    }

    /// Learn or reinforce a raw-name mapping. Re-confirming the same
    /// ingredient bumps confidence; pointing the name at a different
    /// ingredient starts over at 1.0.
    pub fn learn_product_mapping(&self, raw_name: &str, ingredient_id: i64) -> Result<()> {
        let normalized = normalize_product_name(raw_name);
        if normalized.is_empty() {
            bail!("Cannot learn a mapping for an empty product name");
        }
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO product_map (raw_name, ingredient_id, confidence, updated_at)
             VALUES (?1, ?2, 1.0, ?3)
             ON CONFLICT(raw_name) DO UPDATE SET
                 confidence = CASE
                     WHEN product_map.ingredient_id = excluded.ingredient_id
                     THEN product_map.confidence + 1.0
                     ELSE 1.0
                 END,
                 ingredient_id = excluded.ingredient_id,
                 updated_at = excluded.updated_at",
            params![normalized, ingredient_id, now],
        )?;
        Ok(())
    }

    // --- Settings ---

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO settings (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM settings WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    pub fn delete_setting(&self, key: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EdgeInput;
    use crate::receipt::ParsedItem;

    fn sample_ingredient(name: &str, price: Option<f64>) -> NewIngredient {
        NewIngredient {
            name: name.to_string(),
            category: "mercado".to_string(),
            unit: "kg".to_string(),
            current_price: price,
            yield_coefficient: 1.0,
            source: "manual".to_string(),
        }
    }

    fn sample_recipe_input(name: &str, edges: Vec<EdgeInput>) -> NewRecipe {
        NewRecipe {
            name: name.to_string(),
            sku: None,
            yield_units: 10,
            total_weight_kg: 2.5,
            labor_minutes: 0.0,
            is_pre_preparo: false,
            production_unit: "un".to_string(),
            ingredients: edges,
        }
    }

    #[test]
    fn test_ingredient_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let created = db
            .create_ingredient(&sample_ingredient("Farinha", Some(4.5)))
            .unwrap();
        assert!(created.id > 0);
        assert!(!created.uuid.is_empty());
        assert_eq!(created.current_price, Some(4.5));

        let by_name = db.get_ingredient_by_name("farinha").unwrap().unwrap();
        assert_eq!(by_name.id, created.id);
    }

    #[test]
    fn test_list_ingredients_filters() {
        let db = Database::open_in_memory().unwrap();
        db.create_ingredient(&sample_ingredient("Farinha", Some(4.5)))
            .unwrap();
        let mut packaging = sample_ingredient("Caixa", Some(0.9));
        packaging.category = "embalagem".to_string();
        packaging.unit = "un".to_string();
        db.create_ingredient(&packaging).unwrap();

        assert_eq!(db.list_ingredients(None, None).unwrap().len(), 2);
        assert_eq!(db.list_ingredients(Some("Fari"), None).unwrap().len(), 1);
        assert_eq!(
            db.list_ingredients(None, Some("embalagem")).unwrap().len(),
            1
        );
        assert!(
            db.list_ingredients(Some("queijo"), None)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_pending_ingredients() {
        let db = Database::open_in_memory().unwrap();
        db.create_ingredient(&sample_ingredient("Farinha", Some(4.5)))
            .unwrap();
        let unpriced = db
            .create_ingredient(&sample_ingredient("Tomate", None))
            .unwrap();
        let mut from_receipt = sample_ingredient("File de Frango", Some(26.9));
        from_receipt.category = "outros".to_string();
        from_receipt.source = "receipt".to_string();
        db.create_ingredient(&from_receipt).unwrap();

        let pending = db.list_pending_ingredients().unwrap();
        let names: Vec<&str> = pending.iter().map(|i| i.name.as_str()).collect();
        assert!(names.contains(&"Tomate"));
        assert!(names.contains(&"File de Frango"));
        assert!(!names.contains(&"Farinha"));
        assert!(pending.iter().any(|i| i.id == unpriced.id));
    }

    #[test]
    fn test_update_ingredient_partial() {
        let db = Database::open_in_memory().unwrap();
        let ing = db
            .create_ingredient(&sample_ingredient("Abacaxi", Some(5.0)))
            .unwrap();
        let updated = db
            .update_ingredient(
                ing.id,
                &UpdateIngredient {
                    yield_coefficient: Some(0.8),
                    ..UpdateIngredient::default()
                },
            )
            .unwrap();
        assert!((updated.yield_coefficient - 0.8).abs() < f64::EPSILON);
        assert_eq!(updated.name, "Abacaxi");
        assert_eq!(updated.current_price, Some(5.0));
    }

    #[test]
    fn test_save_recipe_creates_row_and_edges() {
        let db = Database::open_in_memory().unwrap();
        let flour = db
            .create_ingredient(&sample_ingredient("Farinha", Some(2.0)))
            .unwrap();
        let recipe = db
            .save_recipe_definition(
                None,
                &sample_recipe_input(
                    "Massa",
                    vec![EdgeInput {
                        ingredient_id: flour.id,
                        quantity: 1.5,
                    }],
                ),
            )
            .unwrap();

        assert!(recipe.id > 0);
        assert!(recipe.current_cost.is_none());
        let edges = db.get_recipe_ingredients(recipe.id).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].ingredient_name.as_deref(), Some("Farinha"));
        assert_eq!(edges[0].ingredient_price, Some(2.0));
    }

    #[test]
    fn test_save_recipe_replaces_edge_set() {
        let db = Database::open_in_memory().unwrap();
        let flour = db
            .create_ingredient(&sample_ingredient("Farinha", Some(2.0)))
            .unwrap();
        let sugar = db
            .create_ingredient(&sample_ingredient("Acucar", Some(3.0)))
            .unwrap();
        let recipe = db
            .save_recipe_definition(
                None,
                &sample_recipe_input(
                    "Massa",
                    vec![EdgeInput {
                        ingredient_id: flour.id,
                        quantity: 1.5,
                    }],
                ),
            )
            .unwrap();

        db.save_recipe_definition(
            Some(recipe.id),
            &sample_recipe_input(
                "Massa",
                vec![EdgeInput {
                    ingredient_id: sugar.id,
                    quantity: 0.5,
                }],
            ),
        )
        .unwrap();

        let edges = db.get_recipe_ingredients(recipe.id).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].ingredient_id, sugar.id);
    }

    #[test]
    fn test_save_recipe_failure_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let flour = db
            .create_ingredient(&sample_ingredient("Farinha", Some(2.0)))
            .unwrap();
        let recipe = db
            .save_recipe_definition(
                None,
                &sample_recipe_input(
                    "Massa",
                    vec![EdgeInput {
                        ingredient_id: flour.id,
                        quantity: 1.5,
                    }],
                ),
            )
            .unwrap();

        // Unknown ingredient id aborts the save; the old edge set survives.
        let result = db.save_recipe_definition(
            Some(recipe.id),
            &sample_recipe_input(
                "Massa",
                vec![EdgeInput {
                    ingredient_id: 9999,
                    quantity: 1.0,
                }],
            ),
        );
        assert!(result.is_err());

        let edges = db.get_recipe_ingredients(recipe.id).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].ingredient_id, flour.id);
    }

    #[test]
    fn test_pre_preparo_creates_and_syncs_derived_ingredient() {
        let db = Database::open_in_memory().unwrap();
        let flour = db
            .create_ingredient(&sample_ingredient("Farinha", Some(2.0)))
            .unwrap();
        let mut input = sample_recipe_input(
            "Molho Base",
            vec![EdgeInput {
                ingredient_id: flour.id,
                quantity: 1.0,
            }],
        );
        input.is_pre_preparo = true;
        input.production_unit = "kg".to_string();

        let recipe = db.save_recipe_definition(None, &input).unwrap();
        let derived_id = recipe.derived_ingredient_id.unwrap();
        let derived = db.get_ingredient(derived_id).unwrap().unwrap();
        assert_eq!(derived.name, "Molho Base");
        assert_eq!(derived.unit, "kg");
        assert_eq!(derived.source, "recipe");
        assert!(derived.current_price.is_none());
        assert_eq!(db.producing_recipe_id(derived_id).unwrap(), Some(recipe.id));

        // Renaming the recipe renames its output ingredient.
        input.name = "Molho Novo".to_string();
        let saved = db.save_recipe_definition(Some(recipe.id), &input).unwrap();
        assert_eq!(saved.derived_ingredient_id, Some(derived_id));
        let derived = db.get_ingredient(derived_id).unwrap().unwrap();
        assert_eq!(derived.name, "Molho Novo");
    }

    #[test]
    fn test_disable_pre_preparo_blocked_while_consumed() {
        let db = Database::open_in_memory().unwrap();
        let flour = db
            .create_ingredient(&sample_ingredient("Farinha", Some(2.0)))
            .unwrap();
        let mut base = sample_recipe_input(
            "Molho Base",
            vec![EdgeInput {
                ingredient_id: flour.id,
                quantity: 1.0,
            }],
        );
        base.is_pre_preparo = true;
        let base_recipe = db.save_recipe_definition(None, &base).unwrap();
        let derived_id = base_recipe.derived_ingredient_id.unwrap();

        db.save_recipe_definition(
            None,
            &sample_recipe_input(
                "Pizza",
                vec![EdgeInput {
                    ingredient_id: derived_id,
                    quantity: 0.3,
                }],
            ),
        )
        .unwrap();

        base.is_pre_preparo = false;
        assert!(
            db.save_recipe_definition(Some(base_recipe.id), &base)
                .is_err()
        );
        // Still a pre-preparo with its output intact.
        let reread = db.get_recipe(base_recipe.id).unwrap().unwrap();
        assert!(reread.is_pre_preparo);
        assert!(db.get_ingredient(derived_id).unwrap().is_some());
    }

    #[test]
    fn test_persist_recipe_cost_writes_history_atomically() {
        let db = Database::open_in_memory().unwrap();
        let flour = db
            .create_ingredient(&sample_ingredient("Farinha", Some(2.0)))
            .unwrap();
        let recipe = db
            .save_recipe_definition(
                None,
                &sample_recipe_input(
                    "Massa",
                    vec![EdgeInput {
                        ingredient_id: flour.id,
                        quantity: 1.5,
                    }],
                ),
            )
            .unwrap();

        let cost = CostBreakdown {
            food_cost: 3.0,
            packaging_cost_per_unit: 0.0,
            labor_cost: 0.0,
            total_batch_cost: 3.0,
            cost_per_unit: 0.3,
            cost_per_kg: 1.2,
        };
        db.persist_recipe_cost(recipe.id, &cost).unwrap();

        let reread = db.get_recipe(recipe.id).unwrap().unwrap();
        assert_eq!(reread.current_cost, Some(3.0));
        assert_eq!(reread.cmv_per_unit, Some(0.3));
        assert_eq!(reread.cmv_per_kg, Some(1.2));
        assert!(reread.last_calculated.is_some());

        let history = db.get_cmv_history(recipe.id, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert!((history[0].cost - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_consumer_and_producer_adjacency() {
        let db = Database::open_in_memory().unwrap();
        let flour = db
            .create_ingredient(&sample_ingredient("Farinha", Some(2.0)))
            .unwrap();
        let a = db
            .save_recipe_definition(
                None,
                &sample_recipe_input(
                    "Massa A",
                    vec![EdgeInput {
                        ingredient_id: flour.id,
                        quantity: 1.0,
                    }],
                ),
            )
            .unwrap();
        let b = db
            .save_recipe_definition(
                None,
                &sample_recipe_input(
                    "Massa B",
                    vec![EdgeInput {
                        ingredient_id: flour.id,
                        quantity: 2.0,
                    }],
                ),
            )
            .unwrap();

        assert_eq!(db.consumer_recipe_ids(flour.id).unwrap(), vec![a.id, b.id]);
        assert_eq!(db.producing_recipe_id(flour.id).unwrap(), None);
    }

    #[test]
    fn test_trailing_average_ignores_old_points() {
        let db = Database::open_in_memory().unwrap();
        let ing = db
            .create_ingredient(&sample_ingredient("Farinha", Some(2.0)))
            .unwrap();

        let recent = Local::now().to_rfc3339();
        let old = (Local::now() - Duration::days(45)).to_rfc3339();
        db.append_price_point(ing.id, 100.0, &old).unwrap();
        db.append_price_point(ing.id, 2.0, &recent).unwrap();
        db.append_price_point(ing.id, 4.0, &recent).unwrap();

        let avg = db.trailing_average_price(ing.id, 30).unwrap().unwrap();
        assert!((avg - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_trailing_average_none_without_history() {
        let db = Database::open_in_memory().unwrap();
        let ing = db
            .create_ingredient(&sample_ingredient("Farinha", Some(2.0)))
            .unwrap();
        assert!(db.trailing_average_price(ing.id, 30).unwrap().is_none());
    }

    #[test]
    fn test_receipt_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let ing = db
            .create_ingredient(&sample_ingredient("File de Frango", Some(24.0)))
            .unwrap();
        let parsed = ParsedReceipt {
            market: Some("Supermercado Azul".to_string()),
            total: Some(130.81),
            items: vec![
                ParsedItem {
                    raw_name: "FILE DE FRANGO".to_string(),
                    quantity: Some(4.086),
                    unit_price: 26.9,
                },
                ParsedItem {
                    raw_name: "TOMATE ITALIANO".to_string(),
                    quantity: Some(2.5),
                    unit_price: 8.4,
                },
            ],
        };

        let detail = db
            .insert_receipt(&parsed, "raw text", &[Some(ing.id), None])
            .unwrap();
        assert_eq!(detail.receipt.status, "pending");
        assert_eq!(detail.items.len(), 2);
        assert_eq!(detail.items[0].matched_ingredient_id, Some(ing.id));
        assert_eq!(
            detail.items[0].matched_ingredient_name.as_deref(),
            Some("File de Frango")
        );
        assert_eq!(detail.items[1].matched_ingredient_id, None);

        assert_eq!(db.list_pending_receipts().unwrap().len(), 1);
        db.set_receipt_status(detail.receipt.id, "validated")
            .unwrap();
        assert!(db.list_pending_receipts().unwrap().is_empty());
    }

    #[test]
    fn test_product_map_learning_and_matching() {
        let db = Database::open_in_memory().unwrap();
        let chicken = db
            .create_ingredient(&sample_ingredient("File de Frango", Some(24.0)))
            .unwrap();
        let tomato = db
            .create_ingredient(&sample_ingredient("Tomate", Some(8.0)))
            .unwrap();

        db.learn_product_mapping("FILE DE FRANGO", chicken.id)
            .unwrap();
        let m = db.match_product("file de frango").unwrap().unwrap();
        assert_eq!(m.ingredient_id, chicken.id);
        assert!((m.confidence - 1.0).abs() < f64::EPSILON);

        // Reconfirming bumps confidence.
        db.learn_product_mapping("FILE DE FRANGO", chicken.id)
            .unwrap();
        let m = db.match_product("FILE  DE  FRANGO").unwrap().unwrap();
        assert!((m.confidence - 2.0).abs() < f64::EPSILON);

        // Re-learning to a different ingredient starts over.
        db.learn_product_mapping("FILE DE FRANGO", tomato.id)
            .unwrap();
        let m = db.match_product("file de frango").unwrap().unwrap();
        assert_eq!(m.ingredient_id, tomato.id);
        assert!((m.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_product_map_substring_fallback() {
        let db = Database::open_in_memory().unwrap();
        let chicken = db
            .create_ingredient(&sample_ingredient("File de Frango", Some(24.0)))
            .unwrap();
        db.learn_product_mapping("file de frango", chicken.id)
            .unwrap();

        let m = db.match_product("FILE DE FRANGO KG").unwrap().unwrap();
        assert_eq!(m.ingredient_id, chicken.id);
        assert!(db.match_product("queijo minas").unwrap().is_none());
    }

    #[test]
    fn test_recipe_nutrition_upsert_keyed_by_recipe() {
        let db = Database::open_in_memory().unwrap();
        let flour = db
            .create_ingredient(&sample_ingredient("Farinha", Some(2.0)))
            .unwrap();
        let mut input = sample_recipe_input(
            "Molho Base",
            vec![EdgeInput {
                ingredient_id: flour.id,
                quantity: 1.0,
            }],
        );
        input.is_pre_preparo = true;
        let recipe = db.save_recipe_definition(None, &input).unwrap();
        let derived_id = recipe.derived_ingredient_id.unwrap();

        let first = MaterializedNutrition {
            calories_per_100g: 120.0,
            protein_per_100g: 4.0,
            carbs_per_100g: 20.0,
            fat_per_100g: 1.0,
            partial: false,
        };
        let ref_id = db
            .save_recipe_nutrition(recipe.id, &recipe.name, derived_id, &first)
            .unwrap();

        let derived = db.get_ingredient(derived_id).unwrap().unwrap();
        assert_eq!(derived.nutrition_ref_id, Some(ref_id));

        // A second materialization updates the same row.
        let second = MaterializedNutrition {
            calories_per_100g: 150.0,
            protein_per_100g: 5.0,
            carbs_per_100g: 22.0,
            fat_per_100g: 2.0,
            partial: true,
        };
        let ref_id_again = db
            .save_recipe_nutrition(recipe.id, "Molho Renomeado", derived_id, &second)
            .unwrap();
        assert_eq!(ref_id, ref_id_again);

        let nref = db.get_recipe_nutrition(recipe.id).unwrap().unwrap();
        assert_eq!(nref.name, "Molho Renomeado");
        assert!((nref.calories_per_100g - 150.0).abs() < f64::EPSILON);
        assert!(nref.partial);
    }

    #[test]
    fn test_nutrition_inputs_join() {
        let db = Database::open_in_memory().unwrap();
        let flour = db
            .create_ingredient(&sample_ingredient("Farinha", Some(2.0)))
            .unwrap();
        let nref = db
            .create_nutrition_ref(&NewNutritionRef {
                name: "Farinha de trigo".to_string(),
                calories_per_100g: 364.0,
                protein_per_100g: Some(10.0),
                carbs_per_100g: Some(76.0),
                fat_per_100g: Some(1.0),
                source: "manual".to_string(),
            })
            .unwrap();
        db.link_ingredient_nutrition(flour.id, nref.id).unwrap();
        let water = db
            .create_ingredient(&sample_ingredient("Agua", Some(0.0)))
            .unwrap();

        let recipe = db
            .save_recipe_definition(
                None,
                &sample_recipe_input(
                    "Massa",
                    vec![
                        EdgeInput {
                            ingredient_id: flour.id,
                            quantity: 1.0,
                        },
                        EdgeInput {
                            ingredient_id: water.id,
                            quantity: 0.5,
                        },
                    ],
                ),
            )
            .unwrap();

        let inputs = db.get_recipe_nutrition_inputs(recipe.id).unwrap();
        assert_eq!(inputs.len(), 2);
        assert!(inputs[0].values.is_some());
        assert!(inputs[1].values.is_none());
        assert!(
            (inputs[0].values.as_ref().unwrap().calories_per_100g - 364.0).abs() < f64::EPSILON
        );
    }

    #[test]
    fn test_delete_recipe_cleans_up() {
        let db = Database::open_in_memory().unwrap();
        let flour = db
            .create_ingredient(&sample_ingredient("Farinha", Some(2.0)))
            .unwrap();
        let mut input = sample_recipe_input(
            "Molho Base",
            vec![EdgeInput {
                ingredient_id: flour.id,
                quantity: 1.0,
            }],
        );
        input.is_pre_preparo = true;
        let recipe = db.save_recipe_definition(None, &input).unwrap();
        let derived_id = recipe.derived_ingredient_id.unwrap();
        let cost = CostBreakdown {
            food_cost: 2.0,
            packaging_cost_per_unit: 0.0,
            labor_cost: 0.0,
            total_batch_cost: 2.0,
            cost_per_unit: 0.2,
            cost_per_kg: 0.8,
        };
        db.persist_recipe_cost(recipe.id, &cost).unwrap();

        assert!(db.delete_recipe(recipe.id).unwrap());
        assert!(db.get_recipe(recipe.id).unwrap().is_none());
        assert!(db.get_ingredient(derived_id).unwrap().is_none());
        assert_eq!(db.count_cmv_history().unwrap(), 0);
        assert!(db.get_recipe_nutrition(recipe.id).unwrap().is_none());
        assert!(!db.delete_recipe(recipe.id).unwrap());
    }

    #[test]
    fn test_settings_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_setting("labor_rate").unwrap().is_none());
        db.set_setting("labor_rate", "18.5").unwrap();
        assert_eq!(db.get_setting("labor_rate").unwrap().unwrap(), "18.5");
        db.set_setting("labor_rate", "20.0").unwrap();
        assert_eq!(db.get_setting("labor_rate").unwrap().unwrap(), "20.0");
        assert!(db.delete_setting("labor_rate").unwrap());
        assert!(!db.delete_setting("labor_rate").unwrap());
    }
}
