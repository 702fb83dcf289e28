use anyhow::Result;
use serde::Deserialize;

use crate::models::NewNutritionRef;

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub products: Vec<ProductData>,
}

#[derive(Debug, Deserialize)]
pub struct ProductResponse {
    pub status: i32,
    pub product: Option<ProductData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductData {
    pub product_name: Option<String>,
    pub brands: Option<String>,
    pub code: Option<String>,
    pub nutriments: Option<Nutriments>,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(clippy::struct_field_names)]
pub struct Nutriments {
    #[serde(rename = "energy-kcal_100g")]
    pub energy_kcal_100g: Option<f64>,
    pub proteins_100g: Option<f64>,
    pub carbohydrates_100g: Option<f64>,
    pub fat_100g: Option<f64>,
}

/// Source of per-100g nutrition data for ingredients.
///
/// The HTTP client lives in the CLI crate; tests substitute a stub.
pub trait NutritionLookupProvider {
    fn search_nutrition(&self, query: &str, limit: usize) -> Result<Vec<ProductData>>;
    fn fetch_barcode(&self, barcode: &str) -> Result<Option<ProductData>>;
}

impl ProductData {
    /// Name with brand appended, for pick lists.
    #[must_use]
    pub fn display_name(&self) -> String {
        let name = self.product_name.as_deref().unwrap_or("(sem nome)");
        match self.brands.as_deref().filter(|b| !b.is_empty()) {
            Some(brands) => format!("{name} ({brands})"),
            None => name.to_string(),
        }
    }
}

/// Convert an Open Food Facts product into a nutrition reference.
///
/// Returns `None` when the product has no usable name or no per-100g
/// calorie figure.
#[must_use]
pub fn product_to_nutrition_ref(p: ProductData) -> Option<NewNutritionRef> {
    let name = p.product_name.filter(|n| !n.is_empty())?;
    let nutriments = p.nutriments?;
    let calories = nutriments.energy_kcal_100g?;

    Some(NewNutritionRef {
        name,
        calories_per_100g: calories,
        protein_per_100g: nutriments.proteins_100g,
        carbs_per_100g: nutriments.carbohydrates_100g,
        fat_per_100g: nutriments.fat_100g,
        source: "openfoodfacts".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_product() -> ProductData {
        ProductData {
            product_name: Some("Molho de Tomate".to_string()),
            brands: Some("Fugini".to_string()),
            code: Some("7891234560013".to_string()),
            nutriments: Some(Nutriments {
                energy_kcal_100g: Some(32.0),
                proteins_100g: Some(1.3),
                carbohydrates_100g: Some(6.2),
                fat_100g: Some(0.2),
            }),
        }
    }

    #[test]
    fn test_product_to_nutrition_ref_complete() {
        let nref = product_to_nutrition_ref(full_product()).unwrap();
        assert_eq!(nref.name, "Molho de Tomate");
        assert_eq!(nref.calories_per_100g, 32.0);
        assert_eq!(nref.protein_per_100g, Some(1.3));
        assert_eq!(nref.carbs_per_100g, Some(6.2));
        assert_eq!(nref.fat_per_100g, Some(0.2));
        assert_eq!(nref.source, "openfoodfacts");
    }

    #[test]
    fn test_product_to_nutrition_ref_missing_name() {
        let mut p = full_product();
        p.product_name = None;
        assert!(product_to_nutrition_ref(p).is_none());

        // Empty name should also return None
        let mut p2 = full_product();
        p2.product_name = Some("".to_string());
        assert!(product_to_nutrition_ref(p2).is_none());
    }

    #[test]
    fn test_product_to_nutrition_ref_missing_calories() {
        let mut p = full_product();
        p.nutriments.as_mut().unwrap().energy_kcal_100g = None;
        assert!(product_to_nutrition_ref(p).is_none());

        // Missing nutriments entirely
        let mut p2 = full_product();
        p2.nutriments = None;
        assert!(product_to_nutrition_ref(p2).is_none());
    }

    #[test]
    fn test_display_name() {
        assert_eq!(full_product().display_name(), "Molho de Tomate (Fugini)");

        let mut p = full_product();
        p.brands = None;
        assert_eq!(p.display_name(), "Molho de Tomate");
    }

    #[test]
    fn test_search_response_deserializes_off_payload() {
        let json = r#"{
            "count": 1,
            "products": [{
                "product_name": "Farinha de Trigo Tipo 1",
                "brands": "Dona Benta",
                "code": "7896005800001",
                "nutriments": {
                    "energy-kcal_100g": 360,
                    "proteins_100g": 9.8,
                    "carbohydrates_100g": 75,
                    "fat_100g": 1.4
                }
            }]
        }"#;
        let resp: SearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.products.len(), 1);
        let n = resp.products[0].nutriments.as_ref().unwrap();
        assert_eq!(n.energy_kcal_100g, Some(360.0));
    }

    #[test]
    fn test_product_response_not_found() {
        let json = r#"{"status": 0, "status_verbose": "product not found", "product": null}"#;
        let resp: ProductResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.status, 0);
        assert!(resp.product.is_none());
    }
}
