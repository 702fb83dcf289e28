use std::io::Read;

use anyhow::{Context, Result, bail};
use chrono::Local;
use serde::Serialize;
use tracing::warn;

use crate::alert::TRAILING_WINDOW_DAYS;
use crate::db::Database;
use crate::models::{NewIngredient, parse_decimal_br, validate_category, validate_unit};

/// A single row parsed from a price list CSV.
#[derive(Debug, Clone)]
pub struct PriceRow {
    pub name: String,
    pub price: f64,
    pub category: Option<String>,
    pub unit: Option<String>,
}

/// Summary of what a price import would do / did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PriceImportSummary {
    pub rows_parsed: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

/// An ingredient whose price was written by an import, with the trailing
/// average captured before the write so alerts compare against the old
/// history.
#[derive(Debug, Clone)]
pub struct TouchedPrice {
    pub ingredient_id: i64,
    pub trailing_average: Option<f64>,
    pub new_price: f64,
}

/// Parse a price list CSV from any reader.
///
/// Expected header: `name,price` with optional `category` and `unit`
/// columns. Portuguese header names (`nome`, `preco`, `categoria`,
/// `unidade`) are accepted too. Prices may use either decimal separator.
pub fn parse_price_csv<R: Read>(reader: R) -> Result<Vec<PriceRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().context("Failed to read CSV headers")?.clone();

    // Build column index map (case-insensitive, with pt-BR aliases)
    let col = |names: &[&str]| -> Option<usize> {
        headers
            .iter()
            .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
    };

    let idx_name = col(&["name", "nome", "ingrediente"]);
    let idx_price = col(&["price", "preco", "preço"]);
    let idx_category = col(&["category", "categoria"]);
    let idx_unit = col(&["unit", "unidade"]);

    let Some(idx_name) = idx_name else {
        bail!("Missing required column: name");
    };
    let Some(idx_price) = idx_price else {
        bail!("Missing required column: price");
    };

    let mut rows = Vec::new();

    for (line_num, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to parse CSV row {}", line_num + 2))?;

        let name = record.get(idx_name).unwrap_or("").trim().to_string();
        if name.is_empty() {
            continue; // skip blank rows
        }

        let price_text = record.get(idx_price).unwrap_or("").trim();
        let Some(price) = parse_decimal_br(price_text) else {
            bail!(
                "Invalid price '{price_text}' for '{name}' on CSV row {}",
                line_num + 2
            );
        };
        if price < 0.0 {
            bail!("Negative price for '{name}' on CSV row {}", line_num + 2);
        }

        let opt_cell = |idx: Option<usize>| -> Option<String> {
            idx.and_then(|i| record.get(i))
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        rows.push(PriceRow {
            name,
            price,
            category: opt_cell(idx_category),
            unit: opt_cell(idx_unit),
        });
    }

    Ok(rows)
}

/// Import parsed price rows into the database.
///
/// Existing ingredients are matched by name (case-insensitive) and have
/// their price updated with a new price history point; unknown names are
/// created with source `import`. Derived ingredients and rows with an
/// invalid category/unit are skipped. When `dry_run` is true, nothing is
/// written and the returned touched list is empty.
pub fn import_prices(
    db: &Database,
    rows: &[PriceRow],
    dry_run: bool,
) -> Result<(PriceImportSummary, Vec<TouchedPrice>)> {
    let mut summary = PriceImportSummary {
        rows_parsed: rows.len(),
        ..Default::default()
    };
    let mut touched = Vec::new();

    for row in rows {
        let category = match &row.category {
            Some(c) => match validate_category(c) {
                Ok(c) => c,
                Err(err) => {
                    warn!(name = %row.name, error = %err, "Skipping row with bad category");
                    summary.skipped += 1;
                    continue;
                }
            },
            None => "outros".to_string(),
        };
        let unit = match &row.unit {
            Some(u) => match validate_unit(u) {
                Ok(u) => u,
                Err(err) => {
                    warn!(name = %row.name, error = %err, "Skipping row with bad unit");
                    summary.skipped += 1;
                    continue;
                }
            },
            None => "kg".to_string(),
        };

        match db.get_ingredient_by_name(&row.name)? {
            Some(existing) => {
                if existing.source == "recipe" {
                    warn!(name = %row.name, "Skipping derived ingredient; its price follows the recipe cost");
                    summary.skipped += 1;
                    continue;
                }
                let same = existing
                    .current_price
                    .is_some_and(|p| (p - row.price).abs() < f64::EPSILON);
                if same {
                    summary.unchanged += 1;
                    continue;
                }
                summary.updated += 1;
                if dry_run {
                    continue;
                }
                let trailing_average =
                    db.trailing_average_price(existing.id, TRAILING_WINDOW_DAYS)?;
                db.set_ingredient_price(existing.id, row.price)?;
                db.append_price_point(existing.id, row.price, &Local::now().to_rfc3339())?;
                touched.push(TouchedPrice {
                    ingredient_id: existing.id,
                    trailing_average,
                    new_price: row.price,
                });
            }
            None => {
                summary.created += 1;
                if dry_run {
                    continue;
                }
                let ingredient = db.create_ingredient(&NewIngredient {
                    name: row.name.clone(),
                    category,
                    unit,
                    current_price: Some(row.price),
                    yield_coefficient: 1.0,
                    source: "import".to_string(),
                })?;
                db.append_price_point(ingredient.id, row.price, &Local::now().to_rfc3339())?;
                touched.push(TouchedPrice {
                    ingredient_id: ingredient.id,
                    trailing_average: None,
                    new_price: row.price,
                });
            }
        }
    }

    Ok((summary, touched))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CSV: &str = "\
name,price,category,unit
Tomate Italiano,8.50,hortifruti,kg
Farinha de Trigo,\"4,50\",mercado,kg
Embalagem Marmita,1.20,embalagem,un
";

    fn seed_ingredient(db: &Database, name: &str, price: Option<f64>) -> i64 {
        db.create_ingredient(&NewIngredient {
            name: name.to_string(),
            category: "mercado".to_string(),
            unit: "kg".to_string(),
            current_price: price,
            yield_coefficient: 1.0,
            source: "manual".to_string(),
        })
        .unwrap()
        .id
    }

    #[test]
    fn test_parse_price_csv_basic() {
        let rows = parse_price_csv(SAMPLE_CSV.as_bytes()).unwrap();
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0].name, "Tomate Italiano");
        assert!((rows[0].price - 8.5).abs() < f64::EPSILON);
        assert_eq!(rows[0].category.as_deref(), Some("hortifruti"));
        assert_eq!(rows[0].unit.as_deref(), Some("kg"));

        // Brazilian decimal comma
        assert!((rows[1].price - 4.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_price_csv_portuguese_headers() {
        let csv = "nome,preco,categoria,unidade\nQueijo Minas,32.00,laticinios,kg\n";
        let rows = parse_price_csv(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Queijo Minas");
        assert!((rows[0].price - 32.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_price_csv_minimal_columns() {
        let csv = "name,price\nSal,3.20\n";
        let rows = parse_price_csv(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].category.is_none());
        assert!(rows[0].unit.is_none());
    }

    #[test]
    fn test_parse_price_csv_missing_required_column() {
        let csv = "name,category\nSal,mercado\n";
        let result = parse_price_csv(csv.as_bytes());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("price"));
    }

    #[test]
    fn test_parse_price_csv_skips_blank_rows() {
        let csv = "name,price\nSal,3.20\n,\nAcucar,5.00\n";
        let rows = parse_price_csv(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_parse_price_csv_rejects_bad_price() {
        let csv = "name,price\nSal,abc\n";
        let result = parse_price_csv(csv.as_bytes());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("row 2"));
    }

    #[test]
    fn test_parse_price_csv_rejects_negative_price() {
        let csv = "name,price\nSal,-1.00\n";
        let result = parse_price_csv(csv.as_bytes());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Negative"));
    }

    #[test]
    fn test_import_creates_and_updates() {
        let db = Database::open_in_memory().unwrap();
        let existing = seed_ingredient(&db, "Tomate Italiano", Some(6.0));

        let rows = parse_price_csv(SAMPLE_CSV.as_bytes()).unwrap();
        let (summary, touched) = import_prices(&db, &rows, false).unwrap();

        assert_eq!(summary.rows_parsed, 3);
        assert_eq!(summary.created, 2);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.unchanged, 0);
        assert_eq!(summary.skipped, 0);

        let tomato = db.get_ingredient(existing).unwrap().unwrap();
        assert_eq!(tomato.current_price, Some(8.5));

        let flour = db.get_ingredient_by_name("Farinha de Trigo").unwrap().unwrap();
        assert_eq!(flour.source, "import");
        assert_eq!(flour.current_price, Some(4.5));
        assert_eq!(db.get_price_history(flour.id, 10).unwrap().len(), 1);

        assert_eq!(touched.len(), 3);
        assert!(touched.iter().any(|t| t.ingredient_id == existing));
    }

    #[test]
    fn test_import_unchanged_skips_history() {
        let db = Database::open_in_memory().unwrap();
        seed_ingredient(&db, "Sal", Some(3.2));

        let csv = "name,price\nSal,3.20\n";
        let rows = parse_price_csv(csv.as_bytes()).unwrap();
        let (summary, touched) = import_prices(&db, &rows, false).unwrap();

        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.updated, 0);
        assert!(touched.is_empty());

        let id = db.get_ingredient_by_name("Sal").unwrap().unwrap().id;
        assert!(db.get_price_history(id, 10).unwrap().is_empty());
    }

    #[test]
    fn test_import_captures_average_before_write() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_ingredient(&db, "Tomate", Some(10.0));
        db.append_price_point(id, 10.0, &Local::now().to_rfc3339())
            .unwrap();

        let csv = "name,price\nTomate,13.00\n";
        let rows = parse_price_csv(csv.as_bytes()).unwrap();
        let (_, touched) = import_prices(&db, &rows, false).unwrap();

        assert_eq!(touched.len(), 1);
        // The 13.00 point must not pollute the comparison baseline.
        assert!((touched[0].trailing_average.unwrap() - 10.0).abs() < f64::EPSILON);
        assert!((touched[0].new_price - 13.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_import_skips_bad_category_and_derived() {
        let db = Database::open_in_memory().unwrap();
        db.create_ingredient(&NewIngredient {
            name: "Molho Base".to_string(),
            category: "outros".to_string(),
            unit: "kg".to_string(),
            current_price: Some(5.0),
            yield_coefficient: 1.0,
            source: "recipe".to_string(),
        })
        .unwrap();

        let csv = "name,price,category\nMolho Base,9.00,\nNovo Item,2.00,frutaria\n";
        let rows = parse_price_csv(csv.as_bytes()).unwrap();
        let (summary, touched) = import_prices(&db, &rows, false).unwrap();

        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.created, 0);
        assert_eq!(summary.updated, 0);
        assert!(touched.is_empty());

        let derived = db.get_ingredient_by_name("Molho Base").unwrap().unwrap();
        assert_eq!(derived.current_price, Some(5.0));
    }

    #[test]
    fn test_import_dry_run_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        seed_ingredient(&db, "Tomate Italiano", Some(6.0));

        let rows = parse_price_csv(SAMPLE_CSV.as_bytes()).unwrap();
        let (summary, touched) = import_prices(&db, &rows, true).unwrap();

        assert_eq!(summary.created, 2);
        assert_eq!(summary.updated, 1);
        assert!(touched.is_empty());

        let tomato = db.get_ingredient_by_name("Tomate Italiano").unwrap().unwrap();
        assert_eq!(tomato.current_price, Some(6.0));
        assert!(db.get_ingredient_by_name("Farinha de Trigo").unwrap().is_none());
    }
}
