// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Model listing and manual load/unload.
//!
//! Load and unload run on their own task, so a client that hangs up does not cut a
//! transition short.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::Method,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::Instrument;

use super::error::HttpError;
use super::{service_v2, RouteDoc};
use crate::protocols::unix_timestamp;
use crate::router::ModelStatus;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelStatusValue {
    pub value: ModelStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelListing {
    pub id: String,
    pub object: String,
    pub owned_by: String,
    pub created: u64,
    pub path: String,
    pub status: ModelStatusValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListModelsResponse {
    pub object: String,
    pub data: Vec<ModelListing>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelRequest {
    pub model: String,
}

pub fn models_router(state: Arc<service_v2::State>) -> (Vec<RouteDoc>, Router) {
    let docs = vec![
        RouteDoc::new(Method::GET, "/models"),
        RouteDoc::new(Method::GET, "/v1/models"),
        RouteDoc::new(Method::POST, "/models/load"),
        RouteDoc::new(Method::POST, "/models/unload"),
    ];
    let router = Router::new()
        .route("/models", get(list_models))
        .route("/v1/models", get(list_models))
        .route("/models/load", post(load_model))
        .route("/models/unload", post(unload_model))
        .with_state(state);
    (docs, router)
}

#[tracing::instrument(skip_all)]
async fn list_models(State(state): State<Arc<service_v2::State>>) -> impl IntoResponse {
    let created = unix_timestamp();
    let data = state
        .router()
        .list()
        .into_iter()
        .map(|model| ModelListing {
            id: model.id,
            object: "model".to_string(),
            owned_by: "slotrouter".to_string(),
            created,
            path: model.path.display().to_string(),
            status: ModelStatusValue {
                value: model.status,
            },
        })
        .collect();

    Json(ListModelsResponse {
        object: "list".to_string(),
        data,
    })
}

#[tracing::instrument(skip_all)]
async fn load_model(
    State(state): State<Arc<service_v2::State>>,
    request: Result<Json<ModelRequest>, JsonRejection>,
) -> Result<impl IntoResponse, HttpError> {
    let Json(request) = request?;
    let router = state.router().clone();
    tokio::spawn(async move { router.load(&request.model).await }.in_current_span())
        .await
        .map_err(|e| anyhow::anyhow!("model load task failed: {e}"))??;
    Ok(Json(json!({ "success": true })))
}

#[tracing::instrument(skip_all)]
async fn unload_model(
    State(state): State<Arc<service_v2::State>>,
    request: Result<Json<ModelRequest>, JsonRejection>,
) -> Result<impl IntoResponse, HttpError> {
    let Json(request) = request?;
    let router = state.router().clone();
    tokio::spawn(async move { router.unload(&request.model).await }.in_current_span())
        .await
        .map_err(|e| anyhow::anyhow!("model unload task failed: {e}"))??;
    Ok(Json(json!({ "success": true })))
}
