// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Slot introspection and manual slot management.
//!
//! `GET /slots` lists the slots of one model; `POST /slots/{id}?action=` saves, restores or
//! erases one of them. Both resolve the model like a completion does, so they may load it
//! when autoload is enabled. Manual save and restore take the slot exactly like a
//! request, a busy slot is a conflict.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::Method,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use super::error::HttpError;
use super::props::GenerationParams;
use super::{service_v2, RouteDoc};
use crate::router::{ModelHandle, AUTO_MODEL};
use crate::slots::{CheckpointStore, RestoreQuality, Slot, SlotLifecycle, SlotLifecycleMode};

#[derive(Debug, Default, Deserialize)]
pub struct SlotsQuery {
    #[serde(default)]
    pub model: Option<String>,
    /// `1` or `true` adds the counter block
    #[serde(default)]
    pub diagnostics: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SlotActionQuery {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SlotActionBody {
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotLifecycleInfo {
    pub mode: SlotLifecycleMode,
    pub enabled: bool,
    /// The record of the last request served on this slot
    pub last: Option<SlotLifecycle>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotInfo {
    pub id: usize,
    pub n_ctx: usize,
    pub is_processing: bool,
    pub n_past: usize,
    pub model: String,
    pub lifecycle: SlotLifecycleInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<GenerationParams>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotDiagnostics {
    pub n_slot_restore_total: u64,
    pub n_slot_save_total: u64,
    pub n_slots_processing: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotsWithDiagnostics {
    pub slots: Vec<SlotInfo>,
    pub diagnostics: SlotDiagnostics,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SaveTimings {
    pub save_ms: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RestoreTimings {
    pub restore_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotSaveResponse {
    pub id_slot: usize,
    pub filename: String,
    pub n_saved: usize,
    pub n_written: u64,
    pub n_checkpoints: usize,
    pub timings: SaveTimings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotRestoreResponse {
    pub id_slot: usize,
    pub filename: String,
    pub n_restored: usize,
    pub n_read: u64,
    pub n_checkpoints: usize,
    pub restore_quality: RestoreQuality,
    pub timings: RestoreTimings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotEraseResponse {
    pub id_slot: usize,
    pub n_erased: usize,
}

pub fn slots_router(state: Arc<service_v2::State>) -> (Vec<RouteDoc>, Router) {
    let docs = vec![
        RouteDoc::new(Method::GET, "/slots"),
        RouteDoc::new(Method::POST, "/slots/{id_slot}"),
    ];
    let router = Router::new()
        .route("/slots", get(list_slots))
        .route("/slots/{id_slot}", post(slot_action))
        .with_state(state);
    (docs, router)
}

fn ensure_enabled(state: &service_v2::State) -> Result<(), HttpError> {
    if state.config().endpoint_slots {
        Ok(())
    } else {
        Err(HttpError::not_supported(
            "This server does not support slots endpoint.",
        ))
    }
}

fn model_or_auto(model: Option<&str>) -> &str {
    match model {
        Some(model) if !model.is_empty() => model,
        _ => AUTO_MODEL,
    }
}

fn slot_info(state: &service_v2::State, slot: &Slot) -> SlotInfo {
    let policy = state.router().policy();
    let config = state.config();
    SlotInfo {
        id: slot.id(),
        n_ctx: slot.n_ctx(),
        is_processing: slot.is_processing(),
        n_past: slot.n_past(),
        model: slot.model().to_string(),
        lifecycle: SlotLifecycleInfo {
            mode: policy.mode(),
            enabled: policy.enabled(),
            last: slot.last_lifecycle(),
        },
        params: config.slots_expose_params.then_some(GenerationParams {
            seed: config.seed,
            n_predict: config.n_predict,
            temperature: config.temperature,
        }),
    }
}

#[tracing::instrument(skip_all)]
async fn list_slots(
    State(state): State<Arc<service_v2::State>>,
    query: Result<Query<SlotsQuery>, QueryRejection>,
) -> Result<Response, HttpError> {
    ensure_enabled(&state)?;
    let Query(query) = query?;

    let router = state.router().clone();
    let model = model_or_auto(query.model.as_deref()).to_string();
    let handle = tokio::spawn(async move { router.resolve(&model).await }.in_current_span())
        .await
        .map_err(|e| anyhow::anyhow!("model resolve task failed: {e}"))??;
    let pool = handle.pool();
    let slots: Vec<SlotInfo> = pool
        .slots()
        .iter()
        .map(|slot| slot_info(&state, slot))
        .collect();

    let diagnostics = matches!(query.diagnostics.as_deref(), Some("1") | Some("true"));
    if !diagnostics {
        return Ok(Json(slots).into_response());
    }
    Ok(Json(SlotsWithDiagnostics {
        slots,
        diagnostics: SlotDiagnostics {
            n_slot_restore_total: pool.n_restore_total(),
            n_slot_save_total: pool.n_save_total(),
            n_slots_processing: pool.n_processing(),
        },
    })
    .into_response())
}

#[tracing::instrument(skip_all)]
async fn slot_action(
    State(state): State<Arc<service_v2::State>>,
    Path(id_slot): Path<usize>,
    query: Result<Query<SlotActionQuery>, QueryRejection>,
    body: Bytes,
) -> Result<Response, HttpError> {
    ensure_enabled(&state)?;
    let Query(query) = query?;
    tokio::spawn(run_slot_action(state, id_slot, query, body).in_current_span())
        .await
        .map_err(|e| anyhow::anyhow!("slot action task failed: {e}"))?
}

/// Runs detached from the request so a disconnect cannot interrupt a load or a save.
async fn run_slot_action(
    state: Arc<service_v2::State>,
    id_slot: usize,
    query: SlotActionQuery,
    body: Bytes,
) -> Result<Response, HttpError> {
    let body: SlotActionBody = if body.is_empty() {
        SlotActionBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| HttpError::invalid_request(format!("invalid request body: {e}")))?
    };

    let action = query.action.as_deref().unwrap_or_default();
    let model = model_or_auto(query.model.as_deref());
    match action {
        "save" | "restore" => {
            let store = state.router().policy().store().cloned().ok_or_else(|| {
                HttpError::not_supported(
                    "This server does not support slot save/restore. Start it with `--slot-save-path`",
                )
            })?;
            let handle = state.router().resolve(model).await?;
            if action == "save" {
                save_slot(&handle, &store, id_slot, body.filename).await
            } else {
                restore_slot(&handle, &store, id_slot, body.filename).await
            }
        }
        "erase" => {
            let handle = state.router().resolve(model).await?;
            let n_erased = handle.pool().erase(id_slot)?;
            Ok(Json(SlotEraseResponse { id_slot, n_erased }).into_response())
        }
        other => Err(HttpError::invalid_request(format!(
            "invalid slot action '{other}', expected save, restore or erase"
        ))),
    }
}

async fn save_slot(
    handle: &ModelHandle,
    store: &Arc<CheckpointStore>,
    id_slot: usize,
    filename: Option<String>,
) -> Result<Response, HttpError> {
    let pool = handle.pool();
    let filename =
        filename.unwrap_or_else(|| CheckpointStore::canonical_filename(pool.model(), id_slot));
    let path = store.resolve(&filename)?;
    let guard = pool.assign(Some(id_slot))?;

    let start = Instant::now();
    let outcome = pool.save(&guard, store, path).await?;
    let save_ms = start.elapsed().as_secs_f64() * 1e3;
    tracing::info!(
        model = pool.model(),
        id_slot,
        %filename,
        n_saved = outcome.n_saved,
        "slot saved"
    );

    Ok(Json(SlotSaveResponse {
        id_slot,
        filename,
        n_saved: outcome.n_saved,
        n_written: outcome.n_written,
        n_checkpoints: outcome.n_checkpoints,
        timings: SaveTimings { save_ms },
    })
    .into_response())
}

async fn restore_slot(
    handle: &ModelHandle,
    store: &Arc<CheckpointStore>,
    id_slot: usize,
    filename: Option<String>,
) -> Result<Response, HttpError> {
    let pool = handle.pool();
    let filename =
        filename.unwrap_or_else(|| CheckpointStore::canonical_filename(pool.model(), id_slot));
    let path = store.resolve(&filename)?;
    let guard = pool.assign(Some(id_slot))?;

    let start = Instant::now();
    let outcome = pool.restore(&guard, store, path).await?;
    let restore_ms = start.elapsed().as_secs_f64() * 1e3;
    tracing::info!(
        model = pool.model(),
        id_slot,
        %filename,
        n_restored = outcome.n_restored(),
        quality = outcome.quality.as_str(),
        "slot restored"
    );

    Ok(Json(SlotRestoreResponse {
        id_slot,
        filename,
        n_restored: outcome.n_restored(),
        n_read: outcome.n_read,
        n_checkpoints: outcome.n_checkpoints,
        restore_quality: outcome.quality,
        timings: RestoreTimings { restore_ms },
    })
    .into_response())
}
