use anyhow::{Context, Result};

use cmv_core::openfoodfacts::{
    NutritionLookupProvider, ProductData, ProductResponse, SearchResponse,
};

const SEARCH_URL: &str = "https://world.openfoodfacts.org/cgi/search.pl";
const PRODUCT_URL: &str = "https://world.openfoodfacts.org/api/v0/product";

pub struct OpenFoodFactsClient {
    client: reqwest::Client,
    rt: tokio::runtime::Handle,
}

impl OpenFoodFactsClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "cmv-cli/{} (recipe cost tracker)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(std::time::Duration::from_secs(10))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            rt: tokio::runtime::Handle::current(),
        }
    }

    pub async fn search_async(&self, query: &str, limit: usize) -> Result<Vec<ProductData>> {
        let resp = self
            .client
            .get(SEARCH_URL)
            .query(&[
                ("search_terms", query),
                ("json", "1"),
                ("page_size", &limit.to_string()),
            ])
            .send()
            .await
            .context("Failed to reach OpenFoodFacts API")?;

        let data: SearchResponse = resp
            .json()
            .await
            .context("Failed to parse OpenFoodFacts search response")?;

        Ok(data.products)
    }

    pub async fn fetch_barcode_async(&self, barcode: &str) -> Result<Option<ProductData>> {
        let url = format!("{PRODUCT_URL}/{barcode}.json");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to reach OpenFoodFacts API")?;

        let data: ProductResponse = resp
            .json()
            .await
            .context("Failed to parse OpenFoodFacts barcode response")?;

        if data.status != 1 {
            return Ok(None);
        }

        Ok(data.product)
    }
}

// The core trait is synchronous; bridge onto the runtime without
// blocking its driver thread.
impl NutritionLookupProvider for OpenFoodFactsClient {
    fn search_nutrition(&self, query: &str, limit: usize) -> Result<Vec<ProductData>> {
        tokio::task::block_in_place(|| self.rt.block_on(self.search_async(query, limit)))
    }

    fn fetch_barcode(&self, barcode: &str) -> Result<Option<ProductData>> {
        tokio::task::block_in_place(|| self.rt.block_on(self.fetch_barcode_async(barcode)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmv_core::openfoodfacts::product_to_nutrition_ref;

    // --- Integration tests (hit real OpenFoodFacts API) ---

    #[tokio::test]
    #[ignore = "hits OpenFoodFacts API"]
    async fn test_fetch_barcode_known_product() {
        let client = OpenFoodFactsClient::new();
        let result = client.fetch_barcode_async("3017620422003").await.unwrap();
        let product = result.expect("Nutella should exist in OpenFoodFacts");
        let nref = product_to_nutrition_ref(product).expect("should carry per-100g data");
        assert!(nref.name.to_lowercase().contains("nutella"));
        assert!(nref.calories_per_100g > 0.0);
    }

    #[tokio::test]
    #[ignore = "hits OpenFoodFacts API"]
    async fn test_fetch_barcode_not_found() {
        let client = OpenFoodFactsClient::new();
        let result = client.fetch_barcode_async("0000000000000").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    #[ignore = "hits OpenFoodFacts API"]
    async fn test_search_returns_results() {
        let client = OpenFoodFactsClient::new();
        let results = client.search_async("farinha de trigo", 5).await.unwrap();
        assert!(!results.is_empty());
        assert!(results.len() <= 5);
    }
}
