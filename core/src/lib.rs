//! Core library for the cmv price radar: ingredient and recipe storage,
//! the cost engine, and the propagation cascade that keeps every recipe's
//! CMV current as market prices move.

pub mod alert;
pub mod cascade;
pub mod cost;
pub mod db;
pub mod error;
pub mod models;
pub mod nutrition;
pub mod openfoodfacts;
pub mod price_import;
pub mod receipt;
pub mod service;
