use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::models::parse_decimal_br;

/// Item and quantity on separate lines, the common Brazilian cupom layout:
/// a product name line followed by "4,086 Kg x 26,90 109,91".
static QUANTITY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?P<qty>[\d.,]+)\s*(?:kg|g|un|und|lt?|ml|pc|pct)?\s*[x×]\s*(?P<price>[\d.,]+)(?:\s+[\d.,]+)?\s*$",
    )
    .expect("valid regex")
});

/// Fallback for single-line items: a name with letters and a trailing price.
static SINGLE_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<name>\S.*?\p{L}{2,}\S*)\s+R?\$?\s*(?P<price>\d[\d.,]*)\s*$")
        .expect("valid regex")
});

static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d[\d.,]*").expect("valid regex"));

const NOISE_KEYWORDS: &[&str] = &[
    "total",
    "troco",
    "cpf",
    "cnpj",
    "cupom fiscal",
    "forma de pagamento",
    "valor pago",
];

#[derive(Debug, Clone, Serialize)]
pub struct ParsedItem {
    pub raw_name: String,
    /// Weight or count when the receipt prints one; single-line items omit it.
    pub quantity: Option<f64>,
    pub unit_price: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ParsedReceipt {
    pub market: Option<String>,
    pub total: Option<f64>,
    pub items: Vec<ParsedItem>,
}

/// Extract market, line items, and total from OCR'd receipt text.
/// Unrecognized lines are dropped rather than failing the whole receipt;
/// a human reviews the staged result before any price is applied.
pub fn parse_receipt(text: &str) -> ParsedReceipt {
    let mut parsed = ParsedReceipt::default();
    let mut pending_name: Option<String> = None;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_lowercase();

        if is_noise(&lower) {
            // Total lines are noise for item extraction but carry the sum.
            if lower.contains("total") {
                if let Some(value) = last_number(line) {
                    parsed.total = Some(value);
                }
            }
            pending_name = None;
            continue;
        }

        if let Some(caps) = QUANTITY_LINE.captures(line) {
            if let Some(raw_name) = pending_name.take() {
                let quantity = parse_decimal_br(&caps["qty"]);
                if let Some(unit_price) = parse_price(&caps["price"]) {
                    parsed.items.push(ParsedItem {
                        raw_name,
                        quantity,
                        unit_price,
                    });
                }
            }
            continue;
        }

        if let Some(caps) = SINGLE_ITEM.captures(line) {
            if let Some(unit_price) = parse_price(&caps["price"]) {
                parsed.items.push(ParsedItem {
                    raw_name: caps["name"].trim().to_string(),
                    quantity: None,
                    unit_price,
                });
            }
            pending_name = None;
            continue;
        }

        if looks_like_name(line) {
            if parsed.market.is_none() && parsed.items.is_empty() && pending_name.is_none() {
                parsed.market = Some(line.to_string());
            } else {
                pending_name = Some(line.to_string());
            }
        }
    }

    parsed
}

fn is_noise(lower: &str) -> bool {
    NOISE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

fn looks_like_name(line: &str) -> bool {
    line.chars().filter(|c| c.is_alphabetic()).count() >= 3
}

/// Parse a price token, repairing the common OCR failure of a dropped
/// decimal separator: "2690" reads as 26.90, not two thousand reais.
fn parse_price(token: &str) -> Option<f64> {
    let value = parse_decimal_br(token)?;
    if !token.contains([',', '.']) && value >= 1000.0 {
        let repaired = value / 100.0;
        if repaired < 1000.0 {
            return Some(repaired);
        }
    }
    Some(value)
}

fn last_number(line: &str) -> Option<f64> {
    NUMBER
        .find_iter(line)
        .last()
        .and_then(|m| parse_price(m.as_str()))
}
