mod config;
mod helpers;
mod import;
mod ingredient;
mod nutrition;
mod receipt;
mod recipe;

pub(crate) use config::{
    cmd_config_clear_webhook, cmd_config_set_labor_rate, cmd_config_set_webhook, cmd_config_show,
    cmd_recalc,
};
pub(crate) use import::cmd_import_prices;
pub(crate) use ingredient::{
    cmd_ingredient_add, cmd_ingredient_delete, cmd_ingredient_list, cmd_ingredient_pending,
    cmd_ingredient_prices, cmd_ingredient_set_price, cmd_ingredient_show, cmd_ingredient_update,
};
pub(crate) use nutrition::{cmd_nutrition_attach, cmd_nutrition_set, cmd_nutrition_show};
pub(crate) use receipt::{
    cmd_receipt_import, cmd_receipt_match, cmd_receipt_pending, cmd_receipt_reject,
    cmd_receipt_show, cmd_receipt_validate,
};
pub(crate) use recipe::{
    cmd_recipe_add_ingredient, cmd_recipe_create, cmd_recipe_delete, cmd_recipe_history,
    cmd_recipe_ingredients, cmd_recipe_list, cmd_recipe_remove_ingredient, cmd_recipe_show,
    cmd_recipe_update,
};
