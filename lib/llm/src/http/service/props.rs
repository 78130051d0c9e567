// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::Method,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::error::HttpError;
use super::{service_v2, RouteDoc};
use crate::router::AUTO_MODEL;
use crate::slots::SlotLifecycleMode;

#[derive(Debug, Default, Deserialize)]
pub struct ModelQuery {
    #[serde(default)]
    pub model: Option<String>,
}

impl ModelQuery {
    pub fn model_or_auto(&self) -> &str {
        match self.model.as_deref() {
            Some(model) if !model.is_empty() => model,
            _ => AUTO_MODEL,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    pub seed: u64,
    pub n_predict: i64,
    pub temperature: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GenerationSettings {
    pub n_ctx: usize,
    pub params: GenerationParams,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropsResponse {
    pub model_path: String,
    pub model_alias: String,
    pub total_slots: usize,
    pub default_generation_settings: GenerationSettings,
    pub slot_lifecycle_mode: SlotLifecycleMode,
}

pub fn props_router(state: Arc<service_v2::State>) -> (Vec<RouteDoc>, Router) {
    let docs = vec![RouteDoc::new(Method::GET, "/props")];
    let router = Router::new()
        .route("/props", get(handler_props))
        .with_state(state);
    (docs, router)
}

/// Server properties for one model. Does not load the model.
#[tracing::instrument(skip_all)]
async fn handler_props(
    State(state): State<Arc<service_v2::State>>,
    query: Result<Query<ModelQuery>, QueryRejection>,
) -> Result<Json<PropsResponse>, HttpError> {
    let config = state.config();
    if !config.endpoint_props {
        return Err(HttpError::not_supported(
            "This server does not support props endpoint.",
        ));
    }
    let Query(query) = query?;
    let spec = state.router().spec(query.model_or_auto())?;

    Ok(Json(PropsResponse {
        model_path: spec.path.display().to_string(),
        model_alias: spec.id.clone(),
        total_slots: config.n_slots,
        default_generation_settings: GenerationSettings {
            n_ctx: config.n_ctx_per_slot(),
            params: GenerationParams {
                seed: config.seed,
                n_predict: config.n_predict,
                temperature: config.temperature,
            },
        },
        slot_lifecycle_mode: state.router().policy().mode(),
    }))
}
