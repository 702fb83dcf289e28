mod commands;
mod config;
mod notify;
mod openfoodfacts;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    cmd_config_clear_webhook, cmd_config_set_labor_rate, cmd_config_set_webhook, cmd_config_show,
    cmd_import_prices, cmd_ingredient_add, cmd_ingredient_delete, cmd_ingredient_list,
    cmd_ingredient_pending, cmd_ingredient_prices, cmd_ingredient_set_price, cmd_ingredient_show,
    cmd_ingredient_update, cmd_nutrition_attach, cmd_nutrition_set, cmd_nutrition_show,
    cmd_recalc, cmd_receipt_import, cmd_receipt_match, cmd_receipt_pending, cmd_receipt_reject,
    cmd_receipt_show, cmd_receipt_validate, cmd_recipe_add_ingredient, cmd_recipe_create,
    cmd_recipe_delete, cmd_recipe_history, cmd_recipe_ingredients, cmd_recipe_list,
    cmd_recipe_remove_ingredient, cmd_recipe_show, cmd_recipe_update,
};
use crate::config::Config;
use cmv_core::error::CmvError;
use cmv_core::service::CmvService;

#[derive(Parser)]
#[command(
    name = "cmv",
    version,
    about = "Recipe cost and CMV tracker for small food producers"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage ingredients and their prices
    Ingredient {
        #[command(subcommand)]
        command: IngredientCommands,
    },
    /// Manage recipes and their cost breakdowns
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Stage and validate supermarket receipts
    Receipt {
        #[command(subcommand)]
        command: ReceiptCommands,
    },
    /// Bulk-import data
    Import {
        #[command(subcommand)]
        command: ImportCommands,
    },
    /// Attach nutrition references to ingredients
    Nutrition {
        #[command(subcommand)]
        command: NutritionCommands,
    },
    /// Recompute every recipe cost from current prices
    Recalc {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// View and change settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
}

#[derive(Subcommand)]
enum IngredientCommands {
    /// Add an ingredient
    Add {
        /// Ingredient name
        name: String,
        /// Category: mercado, hortifruti, acougue, laticinios, embalagem, outros
        #[arg(short, long)]
        category: String,
        /// Purchase unit: kg, g, l, ml, un
        #[arg(short, long)]
        unit: String,
        /// Current price per unit (omit to price later)
        #[arg(short, long)]
        price: Option<f64>,
        /// Yield coefficient (waste correction, e.g. 1.2 for 20% trim loss)
        #[arg(short, long, default_value = "1.0")]
        yield_coefficient: f64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List ingredients
    List {
        /// Filter by name substring
        #[arg(short, long)]
        search: Option<String>,
        /// Filter by category
        #[arg(short, long)]
        category: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one ingredient
    Show {
        /// Ingredient ID or name
        ingredient: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update ingredient metadata
    Update {
        /// Ingredient ID or name
        ingredient: String,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// New category
        #[arg(long)]
        category: Option<String>,
        /// New unit
        #[arg(long)]
        unit: Option<String>,
        /// New yield coefficient
        #[arg(long)]
        yield_coefficient: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set the current price, recording history and recomputing recipes
    SetPrice {
        /// Ingredient ID or name
        ingredient: String,
        /// New price per unit
        price: f64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recorded price history
    Prices {
        /// Ingredient ID or name
        ingredient: String,
        /// Number of price points to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List ingredients missing a price or a confirmed category
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an ingredient (refused while any recipe uses it)
    Delete {
        /// Ingredient ID or name
        ingredient: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// Create a recipe
    Create {
        /// Recipe name
        name: String,
        /// Product SKU
        #[arg(long)]
        sku: Option<String>,
        /// Units produced per batch
        #[arg(short = 'y', long, default_value = "1")]
        yield_units: i64,
        /// Total batch weight in kg
        #[arg(short, long)]
        weight: f64,
        /// Labor minutes per batch
        #[arg(short, long, default_value = "0")]
        labor_minutes: f64,
        /// Mark as pre-preparo (its output becomes a derived ingredient)
        #[arg(long)]
        pre_preparo: bool,
        /// How the batch is consumed downstream: kg or un
        #[arg(long, default_value = "un")]
        production_unit: String,
        /// Ingredient edge as 'name-or-id:quantity' (repeatable)
        #[arg(short, long = "ingredient", value_name = "SPEC")]
        ingredients: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a recipe's ingredient list
    Ingredients {
        /// Recipe ID or name
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add an ingredient to a recipe (or change its quantity)
    Add {
        /// Recipe ID or name
        recipe: String,
        /// Ingredient ID or name
        ingredient: String,
        /// Quantity in the ingredient's unit
        quantity: f64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove an ingredient from a recipe
    Remove {
        /// Recipe ID or name
        recipe: String,
        /// Ingredient ID or name
        ingredient: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update recipe fields
    Update {
        /// Recipe ID or name
        recipe: String,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// New SKU (empty string clears it)
        #[arg(long)]
        sku: Option<String>,
        /// New units per batch
        #[arg(long)]
        yield_units: Option<i64>,
        /// New batch weight in kg
        #[arg(long)]
        weight: Option<f64>,
        /// New labor minutes per batch
        #[arg(long)]
        labor_minutes: Option<f64>,
        /// Mark or unmark as pre-preparo
        #[arg(long)]
        pre_preparo: Option<bool>,
        /// New production unit: kg or un
        #[arg(long)]
        production_unit: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a recipe with cost breakdown and nutrition
    Show {
        /// Recipe ID or name
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List all recipes
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a recipe (refused while its output is consumed elsewhere)
    Delete {
        /// Recipe ID or name
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show batch cost history
    History {
        /// Recipe ID or name
        recipe: String,
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ReceiptCommands {
    /// Parse receipt text and stage it for review
    Import {
        /// Path to a text file (omit to read stdin)
        file: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List receipts waiting for review
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a staged receipt with its line items
    Show {
        /// Receipt ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Match a receipt line item to an ingredient
    Match {
        /// Receipt item ID
        item_id: i64,
        /// Ingredient ID or name
        ingredient: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Apply a receipt's matched prices
    Validate {
        /// Receipt ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Discard a staged receipt without touching prices
    Reject {
        /// Receipt ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ImportCommands {
    /// Import ingredient prices from a CSV file
    Prices {
        /// Path to the CSV file (columns: name, category, unit, price, yield)
        file: PathBuf,
        /// Preview import without making changes
        #[arg(long)]
        dry_run: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum NutritionCommands {
    /// Attach nutrition from OpenFoodFacts
    Attach {
        /// Ingredient ID or name
        ingredient: String,
        /// Search OpenFoodFacts and attach the first usable product
        #[arg(long, conflicts_with = "barcode")]
        search: Option<String>,
        /// Look up a product barcode
        #[arg(long)]
        barcode: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set nutrition per 100g manually
    Set {
        /// Ingredient ID or name
        ingredient: String,
        /// Calories per 100g
        #[arg(long)]
        calories: f64,
        /// Protein per 100g
        #[arg(long)]
        protein: Option<f64>,
        /// Carbs per 100g
        #[arg(long)]
        carbs: Option<f64>,
        /// Fat per 100g
        #[arg(long)]
        fat: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the nutrition attached to an ingredient
    Show {
        /// Ingredient ID or name
        ingredient: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set the hourly labor rate and recompute all recipes
    SetLaborRate {
        /// Rate per hour
        rate: f64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set the price-alert webhook URL
    SetWebhook {
        /// Webhook URL (Discord-compatible)
        url: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove the configured webhook
    ClearWebhook {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        // Lookup misses get their own exit code so scripts can tell
        // "no such ingredient" from a real failure.
        let code = match e.downcast_ref::<CmvError>() {
            Some(CmvError::NotFound(_)) => 2,
            _ => 1,
        };
        process::exit(code);
    }
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let service = CmvService::new(&config.db_path)?;

    match cli.command {
        Commands::Ingredient { command } => match command {
            IngredientCommands::Add {
                name,
                category,
                unit,
                price,
                yield_coefficient,
                json,
            } => cmd_ingredient_add(&service, &name, &category, &unit, price, yield_coefficient, json),
            IngredientCommands::List {
                search,
                category,
                json,
            } => cmd_ingredient_list(&service, search.as_deref(), category.as_deref(), json),
            IngredientCommands::Show { ingredient, json } => {
                cmd_ingredient_show(&service, &ingredient, json)
            }
            IngredientCommands::Update {
                ingredient,
                name,
                category,
                unit,
                yield_coefficient,
                json,
            } => cmd_ingredient_update(
                &service,
                &ingredient,
                name,
                category,
                unit,
                yield_coefficient,
                json,
            ),
            IngredientCommands::SetPrice {
                ingredient,
                price,
                json,
            } => cmd_ingredient_set_price(&service, &ingredient, price, json),
            IngredientCommands::Prices {
                ingredient,
                limit,
                json,
            } => cmd_ingredient_prices(&service, &ingredient, limit, json),
            IngredientCommands::Pending { json } => cmd_ingredient_pending(&service, json),
            IngredientCommands::Delete { ingredient, json } => {
                cmd_ingredient_delete(&service, &ingredient, json)
            }
        },
        Commands::Recipe { command } => match command {
            RecipeCommands::Create {
                name,
                sku,
                yield_units,
                weight,
                labor_minutes,
                pre_preparo,
                production_unit,
                ingredients,
                json,
            } => cmd_recipe_create(
                &service,
                &name,
                sku,
                yield_units,
                weight,
                labor_minutes,
                pre_preparo,
                &production_unit,
                &ingredients,
                json,
            ),
            RecipeCommands::Ingredients { recipe, json } => {
                cmd_recipe_ingredients(&service, &recipe, json)
            }
            RecipeCommands::Add {
                recipe,
                ingredient,
                quantity,
                json,
            } => cmd_recipe_add_ingredient(&service, &recipe, &ingredient, quantity, json),
            RecipeCommands::Remove {
                recipe,
                ingredient,
                json,
            } => cmd_recipe_remove_ingredient(&service, &recipe, &ingredient, json),
            RecipeCommands::Update {
                recipe,
                name,
                sku,
                yield_units,
                weight,
                labor_minutes,
                pre_preparo,
                production_unit,
                json,
            } => cmd_recipe_update(
                &service,
                &recipe,
                name,
                sku,
                yield_units,
                weight,
                labor_minutes,
                pre_preparo,
                production_unit,
                json,
            ),
            RecipeCommands::Show { recipe, json } => cmd_recipe_show(&service, &recipe, json),
            RecipeCommands::List { json } => cmd_recipe_list(&service, json),
            RecipeCommands::Delete { recipe, json } => cmd_recipe_delete(&service, &recipe, json),
            RecipeCommands::History {
                recipe,
                limit,
                json,
            } => cmd_recipe_history(&service, &recipe, limit, json),
        },
        Commands::Receipt { command } => match command {
            ReceiptCommands::Import { file, json } => {
                cmd_receipt_import(&service, file.as_deref(), json)
            }
            ReceiptCommands::Pending { json } => cmd_receipt_pending(&service, json),
            ReceiptCommands::Show { id, json } => cmd_receipt_show(&service, id, json),
            ReceiptCommands::Match {
                item_id,
                ingredient,
                json,
            } => cmd_receipt_match(&service, item_id, &ingredient, json),
            ReceiptCommands::Validate { id, json } => cmd_receipt_validate(&service, id, json),
            ReceiptCommands::Reject { id, json } => cmd_receipt_reject(&service, id, json),
        },
        Commands::Import { command } => match command {
            ImportCommands::Prices {
                file,
                dry_run,
                json,
            } => cmd_import_prices(&service, &file, dry_run, json),
        },
        Commands::Nutrition { command } => match command {
            NutritionCommands::Attach {
                ingredient,
                search,
                barcode,
                json,
            } => cmd_nutrition_attach(
                &service,
                &ingredient,
                search.as_deref(),
                barcode.as_deref(),
                json,
            ),
            NutritionCommands::Set {
                ingredient,
                calories,
                protein,
                carbs,
                fat,
                json,
            } => cmd_nutrition_set(&service, &ingredient, calories, protein, carbs, fat, json),
            NutritionCommands::Show { ingredient, json } => {
                cmd_nutrition_show(&service, &ingredient, json)
            }
        },
        Commands::Recalc { json } => cmd_recalc(&service, json),
        Commands::Config { command } => match command {
            ConfigCommands::Show { json } => cmd_config_show(&service, json),
            ConfigCommands::SetLaborRate { rate, json } => {
                cmd_config_set_labor_rate(&service, rate, json)
            }
            ConfigCommands::SetWebhook { url, json } => {
                cmd_config_set_webhook(&service, &url, json)
            }
            ConfigCommands::ClearWebhook { json } => cmd_config_clear_webhook(&service, json),
        },
        Commands::Serve { port, bind } => server::start_server(service, port, &bind).await,
    }
}
