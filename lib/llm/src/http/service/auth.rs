// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Optional API key check, applied as a middleware layer over every route.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::error::HttpError;

const API_KEY_HEADER: &str = "x-api-key";

/// Routes that answer without a key: the probes and the model listing.
fn is_public(method: &Method, path: &str) -> bool {
    match path {
        "/health" | "/live" => true,
        "/models" | "/v1/models" => method == Method::GET,
        _ => false,
    }
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        return value.strip_prefix("Bearer ").map(str::trim);
    }
    headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok())
}

pub(crate) async fn require_api_key(
    State(api_key): State<Arc<str>>,
    request: Request,
    next: Next,
) -> Response {
    if is_public(request.method(), request.uri().path()) {
        return next.run(request).await;
    }
    match presented_key(request.headers()) {
        Some(key) if key == api_key.as_ref() => next.run(request).await,
        _ => {
            tracing::debug!(path = request.uri().path(), "rejected request without a valid api key");
            HttpError::unauthorized().into_response()
        }
    }
}
