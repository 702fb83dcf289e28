use anyhow::Result;
use serde::Serialize;
use serde_json::{Value, json};

use crate::models::Ingredient;

/// Relative movement against the trailing average that triggers an alert.
pub const ALERT_THRESHOLD: f64 = 0.10;

/// Days of price history considered when computing the trailing average.
pub const TRAILING_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize)]
pub struct PriceAlert {
    pub ingredient_id: i64,
    pub ingredient_name: String,
    pub average_price: f64,
    pub new_price: f64,
    /// Signed percentage: positive for an increase, negative for a drop.
    pub delta_pct: f64,
}

/// Compare a newly accepted price against the trailing average. Returns
/// None when the movement stays inside the threshold, or when there is no
/// usable history to compare against (first purchase, zero average).
pub fn evaluate(
    ingredient: &Ingredient,
    trailing_average: Option<f64>,
    new_price: f64,
) -> Option<PriceAlert> {
    let average = trailing_average?;
    if average <= 0.0 {
        return None;
    }
    let delta = (new_price - average) / average;
    if delta.abs() <= ALERT_THRESHOLD {
        return None;
    }
    Some(PriceAlert {
        ingredient_id: ingredient.id,
        ingredient_name: ingredient.name.clone(),
        average_price: average,
        new_price,
        delta_pct: delta * 100.0,
    })
}

impl PriceAlert {
    pub fn is_increase(&self) -> bool {
        self.delta_pct > 0.0
    }

    /// Discord webhook body: red embed for increases, green for drops.
    pub fn webhook_payload(&self) -> Value {
        let (emoji, color) = if self.is_increase() {
            ("\u{1f4c8}", 15_158_332)
        } else {
            ("\u{1f4c9}", 3_066_993)
        };
        json!({
            "embeds": [{
                "title": format!("{emoji} Alerta de preço: {}", self.ingredient_name),
                "color": color,
                "fields": [
                    {
                        "name": "Média 30 dias",
                        "value": format!("R$ {:.2}", self.average_price),
                        "inline": true,
                    },
                    {
                        "name": "Novo preço",
                        "value": format!("R$ {:.2}", self.new_price),
                        "inline": true,
                    },
                    {
                        "name": "Variação",
                        "value": format!("{:+.1}%", self.delta_pct),
                        "inline": true,
                    },
                ],
            }]
        })
    }
}

/// Outbound channel for price alerts. The CLI wires a Discord webhook in;
/// tests and offline runs use the no-op.
pub trait AlertNotifier {
    fn notify(&self, alert: &PriceAlert) -> Result<()>;
}

pub struct NoopNotifier;

impl AlertNotifier for NoopNotifier {
    fn notify(&self, _alert: &PriceAlert) -> Result<()> {
        Ok(())
    }
}
