// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::checkpoint::{CheckpointError, CheckpointStore, LoadOutcome, RestoreQuality, SaveOutcome};
use super::metrics::SlotMetrics;
use super::slot::{Slot, SlotGuard, SlotId};
use super::SlotError;

/// The fixed set of slots belonging to one loaded model.
#[derive(Debug)]
pub struct SlotPool {
    model: String,
    n_ctx_total: usize,
    slots: Vec<Arc<Slot>>,
    n_save_total: AtomicU64,
    n_restore_total: AtomicU64,
    metrics: SlotMetrics,
}

impl SlotPool {
    /// Each slot gets `n_ctx_total / n_slots` tokens of context.
    pub fn new(
        model: impl Into<String>,
        n_slots: usize,
        n_ctx_total: usize,
        metrics: SlotMetrics,
    ) -> Self {
        let model = model.into();
        let n_slots = n_slots.max(1);
        let n_ctx = n_ctx_total / n_slots;
        let slots = (0..n_slots)
            .map(|id| Arc::new(Slot::new(id, n_ctx, model.clone())))
            .collect();
        Self {
            model,
            n_ctx_total,
            slots,
            n_save_total: AtomicU64::new(0),
            n_restore_total: AtomicU64::new(0),
            metrics,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn n_ctx_total(&self) -> usize {
        self.n_ctx_total
    }

    pub fn n_ctx_per_slot(&self) -> usize {
        self.n_ctx_total / self.slots.len()
    }

    pub fn slots(&self) -> &[Arc<Slot>] {
        &self.slots
    }

    pub fn get(&self, id: SlotId) -> Result<&Arc<Slot>, SlotError> {
        self.slots.get(id).ok_or(SlotError::InvalidId {
            id,
            n_slots: self.slots.len(),
        })
    }

    /// Take the requested slot, or the lowest-index free slot.
    pub fn assign(&self, id: Option<SlotId>) -> Result<SlotGuard, SlotError> {
        match id {
            Some(id) => self.get(id)?.try_acquire(),
            None => self
                .slots
                .iter()
                .find_map(|slot| slot.try_acquire().ok())
                .ok_or(SlotError::NoneAvailable),
        }
    }

    /// Clear a free slot's cached state.
    pub fn erase(&self, id: SlotId) -> Result<usize, SlotError> {
        let guard = self.get(id)?.try_acquire()?;
        let n_erased = guard.erase();
        tracing::debug!(model = %self.model, id_slot = id, n_erased, "slot erased");
        Ok(n_erased)
    }

    pub fn n_processing(&self) -> usize {
        self.slots.iter().filter(|s| s.is_processing()).count()
    }

    pub fn n_save_total(&self) -> u64 {
        self.n_save_total.load(Ordering::Relaxed)
    }

    pub fn n_restore_total(&self) -> u64 {
        self.n_restore_total.load(Ordering::Relaxed)
    }

    /// Persist the held slot's state to `path`.
    pub async fn save(
        &self,
        guard: &SlotGuard,
        store: &Arc<CheckpointStore>,
        path: PathBuf,
    ) -> Result<SaveOutcome, CheckpointError> {
        let state = guard.state();
        let store = store.clone();
        let model = self.model.clone();
        let id = guard.id();
        let outcome = run_blocking(path.clone(), move || store.save(&path, id, &model, &state))
            .await?;

        self.n_save_total.fetch_add(1, Ordering::Relaxed);
        self.metrics.inc_save();
        Ok(outcome)
    }

    /// Replace the held slot's state with the checkpoint at `path`.
    ///
    /// All or nothing: on error the slot keeps its current state.
    pub async fn restore(
        &self,
        guard: &SlotGuard,
        store: &Arc<CheckpointStore>,
        path: PathBuf,
    ) -> Result<LoadOutcome, CheckpointError> {
        let store = store.clone();
        let model = self.model.clone();
        let n_ctx = guard.n_ctx();
        let outcome =
            run_blocking(path.clone(), move || store.load(&path, &model, n_ctx)).await?;

        guard.replace_state(outcome.state.clone());
        self.n_restore_total.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .inc_restore(outcome.quality == RestoreQuality::Full);
        tracing::debug!(
            model = %self.model,
            id_slot = guard.id(),
            n_restored = outcome.n_restored(),
            quality = outcome.quality.as_str(),
            "slot restored"
        );
        Ok(outcome)
    }

    pub fn metrics(&self) -> &SlotMetrics {
        &self.metrics
    }
}

async fn run_blocking<T, F>(path: PathBuf, f: F) -> Result<T, CheckpointError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CheckpointError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CheckpointError::Io {
            path,
            source: std::io::Error::other(e),
        })?
}
