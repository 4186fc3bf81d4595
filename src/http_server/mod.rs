mod api;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::{Json, Router, extract::State, http::StatusCode};
use fastrace::local::LocalSpan;
use fastrace::prelude::*;
use log::{error, info};
use tokio::sync::Mutex;

use crate::service::LabelEngine;
use api::{ModelStatus, PredictRequest, PredictResponse};

struct AppState {
    engine: Mutex<Box<dyn LabelEngine>>,
}

async fn predict(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PredictRequest>,
) -> Result<Json<PredictResponse>, StatusCode> {
    let ingredients_len = req.ingredients.len();
    info!(
        "Received request: ingredients_len={}, max_tokens={:?}",
        ingredients_len, req.max_tokens
    );

    let request_start = Instant::now();
    let state_clone = state.clone();
    // Generation blocks for the whole decode; one request holds the engine at a time.
    let response = tokio::task::spawn_blocking(move || {
        let root = Span::root("request", SpanContext::random());
        let _guard = root.set_local_parent();
        LocalSpan::add_property(|| ("ingredients_len", ingredients_len.to_string()));

        let mut engine = state_clone.engine.blocking_lock();
        let result = engine.predict(&req.ingredients, req.max_tokens);
        PredictResponse::from_result(engine.model_name(), &result)
    })
    .await
    .map_err(|e| {
        error!("Task join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    info!(
        "Request completed: total_time={:.2}ms",
        request_start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(Json(response))
}

async fn model_status(State(state): State<Arc<AppState>>) -> Json<ModelStatus> {
    let engine = state.engine.lock().await;
    Json(ModelStatus {
        model: engine.model_name(),
        healthy: engine.is_healthy(),
        info: engine.model_info(),
    })
}

pub fn build_app(engine: Box<dyn LabelEngine>) -> Router {
    let state = Arc::new(AppState {
        engine: Mutex::new(engine),
    });

    Router::new()
        .route("/v1/allergens", post(predict))
        .route("/v1/model", get(model_status))
        .with_state(state)
}
