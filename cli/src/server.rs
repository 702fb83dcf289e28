use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;

use cmv_core::alert::PriceAlert;
use cmv_core::error::CmvError;
use cmv_core::models::{
    CATEGORIES, EdgeInput, Ingredient, NewIngredient, NewRecipe, PricePoint, Receipt,
    ReceiptDetail, Recipe, UpdateIngredient,
};
use cmv_core::service::CmvService;

// Receipts come in as plain text; even a long one is a few KB.
const BODY_LIMIT: usize = 2 * 1024 * 1024; // 2 MB

#[derive(Clone)]
struct AppState {
    service: Arc<Mutex<CmvService>>,
}

impl AppState {
    fn service(&self) -> std::sync::MutexGuard<'_, CmvService> {
        self.service
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct ListIngredientsQuery {
    search: Option<String>,
    category: Option<String>,
    #[serde(default)]
    pending: bool,
}

#[derive(Deserialize)]
struct CreateIngredientRequest {
    name: String,
    category: String,
    unit: String,
    current_price: Option<f64>,
    #[serde(default = "default_yield")]
    yield_coefficient: f64,
    #[serde(default = "default_source")]
    source: String,
}

fn default_yield() -> f64 {
    1.0
}

fn default_source() -> String {
    "manual".to_string()
}

/// Metadata and price updates share one endpoint; a present
/// `current_price` triggers the same history/alert/cascade path as the
/// CLI's set-price.
#[derive(Deserialize)]
struct UpdateIngredientRequest {
    name: Option<String>,
    category: Option<String>,
    unit: Option<String>,
    yield_coefficient: Option<f64>,
    current_price: Option<f64>,
}

#[derive(Deserialize)]
struct RecipeIngredientRequest {
    ingredient_id: i64,
    quantity: f64,
}

#[derive(Deserialize)]
struct SaveRecipeRequest {
    name: String,
    sku: Option<String>,
    #[serde(default = "default_yield_units")]
    yield_units: i64,
    total_weight_kg: f64,
    #[serde(default)]
    labor_minutes: f64,
    #[serde(default)]
    is_pre_preparo: bool,
    #[serde(default = "default_production_unit")]
    production_unit: String,
    #[serde(default)]
    ingredients: Vec<RecipeIngredientRequest>,
}

fn default_yield_units() -> i64 {
    1
}

fn default_production_unit() -> String {
    "un".to_string()
}

impl SaveRecipeRequest {
    fn into_new_recipe(self) -> NewRecipe {
        NewRecipe {
            name: self.name,
            sku: self.sku,
            yield_units: self.yield_units,
            total_weight_kg: self.total_weight_kg,
            labor_minutes: self.labor_minutes,
            is_pre_preparo: self.is_pre_preparo,
            production_unit: self.production_unit,
            ingredients: self
                .ingredients
                .into_iter()
                .map(|e| EdgeInput {
                    ingredient_id: e.ingredient_id,
                    quantity: e.quantity,
                })
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct StageReceiptRequest {
    text: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                tracing::error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<CmvError> for ApiError {
    fn from(err: CmvError) -> Self {
        match err {
            CmvError::Validation(msg) => Self::BadRequest(msg),
            CmvError::CycleDetected(msg) => Self::BadRequest(format!("Cycle detected: {msg}")),
            CmvError::NotFound(msg) => Self::NotFound(msg),
            CmvError::Internal(err) => Self::Internal(err),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

// --- Middleware ---

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Alert delivery ---

/// Post alerts to the webhook off the request path. The service lock is
/// released before this runs; a slow or dead webhook never delays a
/// response or fails a price write.
fn spawn_alert_delivery(webhook: Option<String>, alerts: Vec<PriceAlert>) {
    let Some(url) = webhook else { return };
    if alerts.is_empty() {
        return;
    }
    tokio::spawn(async move {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build();
        let Ok(client) = client else { return };
        for alert in alerts {
            let result = client.post(&url).json(&alert.webhook_payload()).send().await;
            match result.and_then(reqwest::Response::error_for_status) {
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(ingredient = %alert.ingredient_name, error = %e, "alert delivery failed");
                }
            }
        }
    });
}

// --- Handlers ---

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_categories() -> Json<Vec<&'static str>> {
    Json(CATEGORIES.to_vec())
}

async fn list_ingredients(
    State(state): State<AppState>,
    Query(params): Query<ListIngredientsQuery>,
) -> Result<Json<Vec<Ingredient>>, ApiError> {
    let service = state.service();
    let ingredients = if params.pending {
        service.pending_ingredients()?
    } else {
        service.list_ingredients(params.search.as_deref(), params.category.as_deref())?
    };
    Ok(Json(ingredients))
}

async fn create_ingredient(
    State(state): State<AppState>,
    Json(req): Json<CreateIngredientRequest>,
) -> Result<(StatusCode, Json<Ingredient>), ApiError> {
    let ingredient = state.service().create_ingredient(&NewIngredient {
        name: req.name,
        category: req.category,
        unit: req.unit,
        current_price: req.current_price,
        yield_coefficient: req.yield_coefficient,
        source: req.source,
    })?;
    Ok((StatusCode::CREATED, Json(ingredient)))
}

async fn get_ingredient(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Ingredient>, ApiError> {
    Ok(Json(state.service().get_ingredient(id)?))
}

async fn update_ingredient(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateIngredientRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.name.is_none()
        && req.category.is_none()
        && req.unit.is_none()
        && req.yield_coefficient.is_none()
        && req.current_price.is_none()
    {
        return Err(ApiError::BadRequest(
            "At least one field must be provided".to_string(),
        ));
    }

    let (value, webhook, alerts) = {
        let service = state.service();

        let has_metadata = req.name.is_some()
            || req.category.is_some()
            || req.unit.is_some()
            || req.yield_coefficient.is_some();

        let mut alerts = Vec::new();
        let mut cascade = cmv_core::cascade::CascadeReport::default();

        let ingredient = if has_metadata {
            let (ingredient, report) = service.update_ingredient(
                id,
                &UpdateIngredient {
                    name: req.name,
                    category: req.category,
                    unit: req.unit,
                    yield_coefficient: req.yield_coefficient,
                },
            )?;
            cascade = report;
            ingredient
        } else {
            service.get_ingredient(id)?
        };

        let ingredient = if let Some(price) = req.current_price {
            let outcome = service.set_ingredient_price(ingredient.id, price)?;
            alerts.extend(outcome.alert.clone());
            cascade.updated.extend(outcome.cascade.updated);
            cascade.failed.extend(outcome.cascade.failed);
            outcome.ingredient
        } else {
            ingredient
        };

        let value = serde_json::json!({
            "ingredient": ingredient,
            "alerts": alerts,
            "cascade": cascade,
        });
        (value, service.webhook_url()?, alerts)
    };

    spawn_alert_delivery(webhook, alerts);
    Ok(Json(value))
}

async fn get_ingredient_prices(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<PricePoint>>, ApiError> {
    Ok(Json(state.service().price_history(id, 50)?))
}

async fn list_recipes(State(state): State<AppState>) -> Result<Json<Vec<Recipe>>, ApiError> {
    Ok(Json(state.service().list_recipes()?))
}

async fn create_recipe(
    State(state): State<AppState>,
    Json(req): Json<SaveRecipeRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let outcome = state.service().save_recipe(None, &req.into_new_recipe())?;
    let value = serde_json::to_value(outcome).map_err(anyhow::Error::from)?;
    Ok((StatusCode::CREATED, Json(value)))
}

async fn get_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let detail = state.service().recipe_detail(id)?;
    let value = serde_json::to_value(detail).map_err(anyhow::Error::from)?;
    Ok(Json(value))
}

async fn update_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SaveRecipeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state
        .service()
        .save_recipe(Some(id), &req.into_new_recipe())?;
    let value = serde_json::to_value(outcome).map_err(anyhow::Error::from)?;
    Ok(Json(value))
}

async fn delete_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.service().delete_recipe(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_recipe_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entries = state.service().cmv_history(id, 50)?;
    let value = serde_json::to_value(entries).map_err(anyhow::Error::from)?;
    Ok(Json(value))
}

async fn stage_receipt(
    State(state): State<AppState>,
    Json(req): Json<StageReceiptRequest>,
) -> Result<(StatusCode, Json<ReceiptDetail>), ApiError> {
    let detail = state.service().stage_receipt(&req.text)?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn list_pending_receipts(
    State(state): State<AppState>,
) -> Result<Json<Vec<Receipt>>, ApiError> {
    Ok(Json(state.service().list_pending_receipts()?))
}

async fn get_receipt(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ReceiptDetail>, ApiError> {
    Ok(Json(state.service().get_receipt_detail(id)?))
}

async fn validate_receipt(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (value, webhook, alerts) = {
        let service = state.service();
        let outcome = service.validate_receipt(id)?;
        let alerts = outcome.alerts.clone();
        let value = serde_json::to_value(outcome).map_err(anyhow::Error::from)?;
        (value, service.webhook_url()?, alerts)
    };

    spawn_alert_delivery(webhook, alerts);
    Ok(Json(value))
}

async fn reject_receipt(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Receipt>, ApiError> {
    Ok(Json(state.service().reject_receipt(id)?))
}

async fn recalc(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let report = state.service().recalc_all()?;
    let value = serde_json::to_value(report).map_err(anyhow::Error::from)?;
    Ok(Json(value))
}

// --- Router ---

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/categories", get(list_categories))
        .route(
            "/api/ingredients",
            get(list_ingredients).post(create_ingredient),
        )
        .route(
            "/api/ingredients/{id}",
            get(get_ingredient).put(update_ingredient),
        )
        .route("/api/ingredients/{id}/prices", get(get_ingredient_prices))
        .route("/api/recipes", get(list_recipes).post(create_recipe))
        .route(
            "/api/recipes/{id}",
            get(get_recipe).put(update_recipe).delete(delete_recipe),
        )
        .route("/api/recipes/{id}/history", get(get_recipe_history))
        .route("/api/receipts", post(stage_receipt))
        .route("/api/receipts/pending", get(list_pending_receipts))
        .route("/api/receipts/{id}", get(get_receipt))
        .route("/api/receipts/{id}/validate", post(validate_receipt))
        .route("/api/receipts/{id}/reject", post(reject_receipt))
        .route("/api/recalc", post(recalc))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(service: CmvService, port: u16, bind: &str) -> anyhow::Result<()> {
    let state = AppState {
        service: Arc::new(Mutex::new(service)),
    };

    let app = build_router(state);

    if bind != "127.0.0.1" && bind != "localhost" {
        eprintln!(
            "Warning: Listening on {bind}. Any device on your network can change prices and recipes."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    eprintln!("Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let state = AppState {
            service: Arc::new(Mutex::new(CmvService::new_in_memory().unwrap())),
        };
        build_router(state)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn create_test_ingredient(app: &Router, name: &str, price: f64) -> i64 {
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/ingredients",
                serde_json::json!({
                    "name": name,
                    "category": "mercado",
                    "unit": "kg",
                    "current_price": price,
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = test_app();

        let response = app
            .oneshot(
                axum::http::Request::get("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn ingredient_create_and_get() {
        let app = test_app();
        let id = create_test_ingredient(&app, "Farinha de Trigo", 4.5).await;

        let response = app
            .oneshot(
                axum::http::Request::get(format!("/api/ingredients/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["name"], "Farinha de Trigo");
        assert_eq!(json["current_price"], 4.5);
    }

    #[tokio::test]
    async fn ingredient_invalid_category_returns_400() {
        let app = test_app();

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/ingredients",
                serde_json::json!({
                    "name": "Farinha",
                    "category": "padaria",
                    "unit": "kg",
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("category"));
    }

    #[tokio::test]
    async fn missing_ingredient_returns_404() {
        let app = test_app();

        let response = app
            .oneshot(
                axum::http::Request::get("/api/ingredients/9999")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn pending_filter_lists_unpriced() {
        let app = test_app();
        create_test_ingredient(&app, "Farinha", 4.5).await;

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/ingredients",
                serde_json::json!({
                    "name": "Fermento",
                    "category": "mercado",
                    "unit": "un",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .oneshot(
                axum::http::Request::get("/api/ingredients?pending=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let json = body_json(response).await;
        let names: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"Fermento"));
        assert!(!names.contains(&"Farinha"));
    }

    #[tokio::test]
    async fn recipe_create_computes_cost() {
        let app = test_app();
        let farinha = create_test_ingredient(&app, "Farinha", 4.0).await;

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/recipes",
                serde_json::json!({
                    "name": "Massa de Pastel",
                    "yield_units": 10,
                    "total_weight_kg": 2.0,
                    "ingredients": [{"ingredient_id": farinha, "quantity": 1.5}],
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        let cost = &json["recipe"]["cost"];
        assert!((cost["food_cost"].as_f64().unwrap() - 6.0).abs() < 1e-9);
        assert!((cost["cost_per_unit"].as_f64().unwrap() - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn recipe_rejects_zero_yield() {
        let app = test_app();

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/recipes",
                serde_json::json!({
                    "name": "Broken",
                    "yield_units": 0,
                    "total_weight_kg": 1.0,
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn price_update_cascades_to_recipe() {
        let app = test_app();
        let farinha = create_test_ingredient(&app, "Farinha", 4.0).await;

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/recipes",
                serde_json::json!({
                    "name": "Massa",
                    "yield_units": 10,
                    "total_weight_kg": 2.0,
                    "ingredients": [{"ingredient_id": farinha, "quantity": 1.0}],
                }),
            ))
            .await
            .unwrap();
        let recipe_id = body_json(response).await["recipe"]["recipe"]["id"]
            .as_i64()
            .unwrap();

        let response = app
            .oneshot(json_request(
                "PUT",
                &format!("/api/ingredients/{farinha}"),
                serde_json::json!({ "current_price": 6.0 }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let updated: Vec<i64> = json["cascade"]["updated"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_i64().unwrap())
            .collect();
        assert!(updated.contains(&recipe_id));
    }

    #[tokio::test]
    async fn update_with_no_fields_returns_400() {
        let app = test_app();
        let id = create_test_ingredient(&app, "Farinha", 4.0).await;

        let response = app
            .oneshot(json_request(
                "PUT",
                &format!("/api/ingredients/{id}"),
                serde_json::json!({}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn self_referencing_recipe_returns_400() {
        let app = test_app();
        let farinha = create_test_ingredient(&app, "Farinha", 4.0).await;

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/recipes",
                serde_json::json!({
                    "name": "Massa Base",
                    "yield_units": 1,
                    "total_weight_kg": 2.0,
                    "is_pre_preparo": true,
                    "production_unit": "kg",
                    "ingredients": [{"ingredient_id": farinha, "quantity": 1.0}],
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        let recipe_id = json["recipe"]["recipe"]["id"].as_i64().unwrap();
        let derived = json["recipe"]["recipe"]["derived_ingredient_id"]
            .as_i64()
            .unwrap();

        // Feeding the derived ingredient back into its own recipe is a cycle.
        let response = app
            .oneshot(json_request(
                "PUT",
                &format!("/api/recipes/{recipe_id}"),
                serde_json::json!({
                    "name": "Massa Base",
                    "yield_units": 1,
                    "total_weight_kg": 2.0,
                    "is_pre_preparo": true,
                    "production_unit": "kg",
                    "ingredients": [
                        {"ingredient_id": farinha, "quantity": 1.0},
                        {"ingredient_id": derived, "quantity": 0.5},
                    ],
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("Cycle"));
    }

    #[tokio::test]
    async fn receipt_stage_and_reject() {
        let app = test_app();

        let text = "SUPERMERCADO BOM PRECO\nFARINHA DE TRIGO 1kg 4,50\nTOTAL 4,50";
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/receipts",
                serde_json::json!({ "text": text }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = body_json(response).await["receipt"]["id"].as_i64().unwrap();

        let response = app
            .clone()
            .oneshot(
                axum::http::Request::post(format!("/api/receipts/{id}/reject"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "rejected");

        // Rejected receipts leave the pending queue.
        let response = app
            .oneshot(
                axum::http::Request::get("/api/receipts/pending")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert!(json.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn recalc_returns_report() {
        let app = test_app();

        let response = app
            .oneshot(
                axum::http::Request::post("/api/recalc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["updated"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn security_headers_present() {
        let app = test_app();

        let response = app
            .oneshot(
                axum::http::Request::get("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
        assert_eq!(
            response.headers().get("content-security-policy").unwrap(),
            "default-src 'none'"
        );
    }

    #[tokio::test]
    async fn body_size_limit_rejects_oversized() {
        let app = test_app();

        let big_body = vec![0u8; BODY_LIMIT + 1];
        let response = app
            .oneshot(
                axum::http::Request::post("/api/receipts")
                    .header("content-type", "application/json")
                    .body(Body::from(big_body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn internal_error_does_not_leak_details() {
        let error = ApiError::Internal(anyhow::anyhow!("secret database path /home/user/cmv.db"));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["error"], "Internal server error");
        assert!(!json["error"].as_str().unwrap().contains("secret"));
    }
}
