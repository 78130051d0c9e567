// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use super::RouteDoc;
use axum::{http::Method, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;

pub fn health_check_router(path: Option<String>) -> (Vec<RouteDoc>, Router) {
    probe_router(path.unwrap_or_else(|| "/health".to_string()))
}

pub fn live_check_router(path: Option<String>) -> (Vec<RouteDoc>, Router) {
    probe_router(path.unwrap_or_else(|| "/live".to_string()))
}

// The process answering is the whole check; models load on demand.
fn probe_router(path: String) -> (Vec<RouteDoc>, Router) {
    let docs = vec![RouteDoc::new(Method::GET, &path)];
    let router = Router::new().route(&path, get(probe_handler));
    (docs, router)
}

async fn probe_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}
