// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Automatic restore before serving and save after serving.
//!
//! | mode           | cold slot, no file        | cold slot, file   | after serving             |
//! |----------------|---------------------------|-------------------|---------------------------|
//! | `off`          | nothing                   | nothing           | `skipped_disabled`        |
//! | `conservative` | bootstrap (`missing`)     | restore           | save unless guarded       |
//! | `strict`       | request fails             | restore           | save unless guarded       |
//!
//! A slot is cold when it holds no cached tokens; warm slots are never overwritten by a
//! restore. The reuse guard skips a save when the turn reused less than
//! `save_min_ratio` of its prompt, or when a restore brought back fewer than
//! `save_min_restored_tokens`. A turn that bootstrapped from a missing checkpoint always
//! saves.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::checkpoint::{CheckpointError, CheckpointStore, RestoreQuality};
use super::pool::SlotPool;
use super::prefix::PrefixPlan;
use super::slot::SlotGuard;
use crate::error::{ErrorKind, HasErrorKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotLifecycleMode {
    Off,
    #[default]
    Conservative,
    Strict,
}

impl SlotLifecycleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotLifecycleMode::Off => "off",
            SlotLifecycleMode::Conservative => "conservative",
            SlotLifecycleMode::Strict => "strict",
        }
    }
}

impl std::fmt::Display for SlotLifecycleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotLifecycleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(SlotLifecycleMode::Off),
            "conservative" => Ok(SlotLifecycleMode::Conservative),
            "strict" => Ok(SlotLifecycleMode::Strict),
            other => Err(format!(
                "unknown slot lifecycle mode '{other}', expected off, conservative or strict"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveDecision {
    SaveSucceeded,
    SkippedGuardLowReuse,
    SkippedDisabled,
    /// The request was cancelled before it finished
    SkippedCancelled,
    SaveFailed,
}

/// Per-request lifecycle facts, returned with the final response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotLifecycle {
    pub enabled: bool,
    pub mode: SlotLifecycleMode,
    pub restore_attempted: bool,
    pub restore_success: bool,
    pub restore_quality: Option<RestoreQuality>,
    pub restore_effective: bool,
    pub n_restored: usize,
    pub cache_reused_tokens: usize,
    pub reuse_ratio: f64,
    pub save_decision: SaveDecision,
    pub n_saved: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("slot lifecycle is strict and no checkpoint exists at {}", path.display())]
    RestoreRequired { path: PathBuf, status_code: u16 },

    #[error("slot lifecycle is strict and restoring {} failed: {source}", path.display())]
    RestoreFailed {
        path: PathBuf,
        status_code: u16,
        #[source]
        source: CheckpointError,
    },
}

impl HasErrorKind for LifecycleError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Unavailable
    }

    fn status_code(&self) -> Option<u16> {
        match self {
            LifecycleError::RestoreRequired { status_code, .. }
            | LifecycleError::RestoreFailed { status_code, .. } => Some(*status_code),
        }
    }
}

/// Outcome of [`LifecyclePolicy::before_serve`], carried to [`LifecyclePolicy::after_serve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestoreReport {
    pub attempted: bool,
    pub success: bool,
    pub quality: Option<RestoreQuality>,
    pub n_restored: usize,
}

impl RestoreReport {
    fn missing() -> Self {
        RestoreReport {
            attempted: true,
            success: false,
            quality: Some(RestoreQuality::Missing),
            n_restored: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    mode: SlotLifecycleMode,
    save_min_ratio: f64,
    save_min_restored_tokens: usize,
    strict_status_code: u16,
    store: Option<Arc<CheckpointStore>>,
}

impl LifecyclePolicy {
    pub fn new(
        mode: SlotLifecycleMode,
        save_min_ratio: f64,
        save_min_restored_tokens: usize,
        strict_status_code: u16,
        store: Option<Arc<CheckpointStore>>,
    ) -> Self {
        Self {
            mode,
            save_min_ratio,
            save_min_restored_tokens,
            strict_status_code,
            store,
        }
    }

    pub fn disabled() -> Self {
        Self::new(SlotLifecycleMode::Off, 0.0, 0, 503, None)
    }

    pub fn mode(&self) -> SlotLifecycleMode {
        self.mode
    }

    /// Automatic restore and save need both a mode and somewhere to write.
    pub fn enabled(&self) -> bool {
        self.mode != SlotLifecycleMode::Off && self.store.is_some()
    }

    pub fn store(&self) -> Option<&Arc<CheckpointStore>> {
        self.store.as_ref()
    }

    /// Restore a cold slot from its canonical checkpoint.
    ///
    /// Only strict mode turns a missing or unreadable checkpoint into an error.
    pub async fn before_serve(
        &self,
        pool: &SlotPool,
        guard: &SlotGuard,
    ) -> Result<RestoreReport, LifecycleError> {
        let store = match (&self.store, self.enabled()) {
            (Some(store), true) => store,
            _ => return Ok(RestoreReport::default()),
        };
        if guard.n_past() > 0 {
            return Ok(RestoreReport::default());
        }

        let path = store.canonical_path(pool.model(), guard.id());
        match pool.restore(guard, store, path.clone()).await {
            Ok(outcome) => {
                tracing::info!(
                    model = %pool.model(),
                    id_slot = guard.id(),
                    n_restored = outcome.n_restored(),
                    quality = outcome.quality.as_str(),
                    "slot lifecycle restore"
                );
                Ok(RestoreReport {
                    attempted: true,
                    success: true,
                    quality: Some(outcome.quality),
                    n_restored: outcome.n_restored(),
                })
            }
            Err(CheckpointError::NotFound(_)) => match self.mode {
                SlotLifecycleMode::Strict => Err(LifecycleError::RestoreRequired {
                    path,
                    status_code: self.strict_status_code,
                }),
                _ => {
                    tracing::debug!(
                        model = %pool.model(),
                        id_slot = guard.id(),
                        "no slot checkpoint, bootstrapping"
                    );
                    Ok(RestoreReport::missing())
                }
            },
            Err(source) => match self.mode {
                SlotLifecycleMode::Strict => Err(LifecycleError::RestoreFailed {
                    path,
                    status_code: self.strict_status_code,
                    source,
                }),
                _ => {
                    tracing::warn!(
                        model = %pool.model(),
                        id_slot = guard.id(),
                        error = %source,
                        "slot lifecycle restore failed, continuing with an empty slot"
                    );
                    Ok(RestoreReport::missing())
                }
            },
        }
    }

    /// Decide whether to persist the slot after a completed turn, and do it.
    pub async fn after_serve(
        &self,
        pool: &SlotPool,
        guard: &SlotGuard,
        restore: RestoreReport,
        plan: &PrefixPlan,
    ) -> SlotLifecycle {
        let mut record = self.record(restore, plan, SaveDecision::SkippedDisabled);

        let store = match (&self.store, self.enabled()) {
            (Some(store), true) => store,
            _ => {
                guard.record_lifecycle(record.clone());
                return record;
            }
        };

        if self.guard_skips(&restore, plan) {
            tracing::debug!(
                model = %pool.model(),
                id_slot = guard.id(),
                reuse_ratio = record.reuse_ratio,
                n_restored = restore.n_restored,
                "slot lifecycle save skipped by reuse guard"
            );
            pool.metrics().inc_save_skipped();
            record.save_decision = SaveDecision::SkippedGuardLowReuse;
            guard.record_lifecycle(record.clone());
            return record;
        }

        let path = store.canonical_path(pool.model(), guard.id());
        match pool.save(guard, store, path).await {
            Ok(outcome) => {
                record.save_decision = SaveDecision::SaveSucceeded;
                record.n_saved = outcome.n_saved;
            }
            Err(e) => {
                tracing::warn!(
                    model = %pool.model(),
                    id_slot = guard.id(),
                    error = %e,
                    "slot lifecycle save failed"
                );
                record.save_decision = SaveDecision::SaveFailed;
            }
        }
        guard.record_lifecycle(record.clone());
        record
    }

    /// The record for a turn that ended early; nothing is saved.
    pub fn cancelled(
        &self,
        guard: &SlotGuard,
        restore: RestoreReport,
        plan: &PrefixPlan,
    ) -> SlotLifecycle {
        let decision = if self.enabled() {
            SaveDecision::SkippedCancelled
        } else {
            SaveDecision::SkippedDisabled
        };
        let record = self.record(restore, plan, decision);
        guard.record_lifecycle(record.clone());
        record
    }

    /// Save every slot that holds state, before the pool is dropped.
    ///
    /// Each slot is held while it is written, so a late request waits for the save.
    /// Returns the number of slots saved.
    pub async fn persist_pool(&self, pool: &SlotPool) -> usize {
        let store = match (&self.store, self.enabled()) {
            (Some(store), true) => store,
            _ => return 0,
        };

        let mut n_saved = 0;
        for slot in pool.slots() {
            let guard = slot.acquire().await;
            if guard.n_past() == 0 {
                continue;
            }
            let path = store.canonical_path(pool.model(), guard.id());
            match pool.save(&guard, store, path).await {
                Ok(outcome) => {
                    n_saved += 1;
                    tracing::info!(
                        model = %pool.model(),
                        id_slot = guard.id(),
                        n_saved = outcome.n_saved,
                        "slot saved before unload"
                    );
                }
                Err(e) => tracing::warn!(
                    model = %pool.model(),
                    id_slot = guard.id(),
                    error = %e,
                    "failed to save slot before unload"
                ),
            }
        }
        n_saved
    }

    fn guard_skips(&self, restore: &RestoreReport, plan: &PrefixPlan) -> bool {
        let low_ratio = plan.reuse_ratio() < self.save_min_ratio;
        if restore.success {
            low_ratio || restore.n_restored < self.save_min_restored_tokens
        } else if restore.attempted {
            // bootstrap the checkpoint for the next cold start
            false
        } else {
            low_ratio
        }
    }

    fn record(
        &self,
        restore: RestoreReport,
        plan: &PrefixPlan,
        save_decision: SaveDecision,
    ) -> SlotLifecycle {
        SlotLifecycle {
            enabled: self.enabled(),
            mode: self.mode,
            restore_attempted: restore.attempted,
            restore_success: restore.success,
            restore_quality: restore.quality,
            restore_effective: restore.success && plan.n_reused > 0,
            n_restored: restore.n_restored,
            cache_reused_tokens: plan.n_reused,
            reuse_ratio: plan.reuse_ratio(),
            save_decision,
            n_saved: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::metrics::SlotMetrics;
    use crate::tokens::root_cell;
    use crate::tokens::Token;

    const MODEL: &str = "tiny";

    fn setup(
        mode: SlotLifecycleMode,
        min_ratio: f64,
        min_restored: usize,
    ) -> (tempfile::TempDir, LifecyclePolicy, SlotPool) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path(), 8));
        let policy = LifecyclePolicy::new(mode, min_ratio, min_restored, 503, Some(store));
        let pool = SlotPool::new(MODEL, 2, 512, SlotMetrics::default());
        (dir, policy, pool)
    }

    /// One served turn: restore, plan against `prompt`, evaluate, decide.
    async fn serve(
        policy: &LifecyclePolicy,
        pool: &SlotPool,
        id: usize,
        prompt: &[Token],
    ) -> Result<SlotLifecycle, LifecycleError> {
        let guard = pool.assign(Some(id)).unwrap();
        let restore = policy.before_serve(pool, &guard).await?;
        let plan = PrefixPlan::compute(guard.state().tokens(), prompt, true);
        guard.with_state(|s| {
            s.truncate(plan.n_reused);
            s.evaluate(root_cell(MODEL), plan.suffix(prompt));
        });
        Ok(policy.after_serve(pool, &guard, restore, &plan).await)
    }

    #[tokio::test]
    async fn test_conservative_bootstraps_missing_checkpoint() {
        let (dir, policy, pool) = setup(SlotLifecycleMode::Conservative, 0.5, 1);

        let record = serve(&policy, &pool, 0, &[1, 2, 3, 4]).await.unwrap();
        assert!(record.enabled);
        assert!(record.restore_attempted);
        assert!(!record.restore_success);
        assert_eq!(record.restore_quality, Some(RestoreQuality::Missing));
        assert!(!record.restore_effective);
        assert_eq!(record.save_decision, SaveDecision::SaveSucceeded);
        assert_eq!(record.n_saved, 4);
        assert!(dir.path().join("tiny.slot-0.bin").exists());
        assert_eq!(pool.slots()[0].last_lifecycle(), Some(record));
    }

    #[tokio::test]
    async fn test_conservative_restore_then_low_reuse_skips_save() {
        let (_dir, policy, pool) = setup(SlotLifecycleMode::Conservative, 0.5, 1);
        let long: Vec<Token> = (1..=20).collect();
        serve(&policy, &pool, 0, &long).await.unwrap();
        pool.erase(0).unwrap();

        // shares only the first token with the restored state
        let record = serve(&policy, &pool, 0, &[1, 99, 98]).await.unwrap();
        assert!(record.restore_success);
        assert_eq!(record.n_restored, 20);
        assert_eq!(record.cache_reused_tokens, 1);
        assert!(record.restore_effective);
        assert_eq!(record.save_decision, SaveDecision::SkippedGuardLowReuse);
    }

    #[tokio::test]
    async fn test_restore_below_min_tokens_skips_save() {
        let (_dir, policy, pool) = setup(SlotLifecycleMode::Conservative, 0.0, 10);
        serve(&policy, &pool, 0, &[1, 2, 3]).await.unwrap();
        pool.erase(0).unwrap();

        let record = serve(&policy, &pool, 0, &[1, 2, 3, 4]).await.unwrap();
        assert!(record.restore_success);
        assert_eq!(record.n_restored, 3);
        assert_eq!(record.save_decision, SaveDecision::SkippedGuardLowReuse);
    }

    #[tokio::test]
    async fn test_warm_slot_is_not_restored() {
        let (_dir, policy, pool) = setup(SlotLifecycleMode::Conservative, 0.5, 1);
        serve(&policy, &pool, 0, &[1, 2, 3, 4]).await.unwrap();

        let record = serve(&policy, &pool, 0, &[1, 2, 3, 4, 5]).await.unwrap();
        assert!(!record.restore_attempted);
        assert_eq!(record.restore_quality, None);
        assert_eq!(record.cache_reused_tokens, 4);
        assert_eq!(record.save_decision, SaveDecision::SaveSucceeded);

        let record = serve(&policy, &pool, 0, &[9, 9, 9, 9]).await.unwrap();
        assert_eq!(record.save_decision, SaveDecision::SkippedGuardLowReuse);
    }

    #[tokio::test]
    async fn test_strict_requires_checkpoint() {
        let (_dir, policy, pool) = setup(SlotLifecycleMode::Strict, 0.5, 1);
        let err = serve(&policy, &pool, 0, &[1, 2]).await.unwrap_err();
        assert!(matches!(err, LifecycleError::RestoreRequired { status_code: 503, .. }));
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(!pool.slots()[0].is_processing());
    }

    #[tokio::test]
    async fn test_strict_fails_on_corrupt_checkpoint() {
        let (dir, policy, pool) = setup(SlotLifecycleMode::Strict, 0.5, 1);
        std::fs::write(dir.path().join("tiny.slot-1.bin"), b"garbage").unwrap();
        let err = serve(&policy, &pool, 1, &[1, 2]).await.unwrap_err();
        assert!(matches!(err, LifecycleError::RestoreFailed { .. }));
    }

    #[tokio::test]
    async fn test_conservative_tolerates_corrupt_checkpoint() {
        let (dir, policy, pool) = setup(SlotLifecycleMode::Conservative, 0.5, 1);
        std::fs::write(dir.path().join("tiny.slot-1.bin"), b"garbage").unwrap();
        let record = serve(&policy, &pool, 1, &[1, 2]).await.unwrap();
        assert!(!record.restore_success);
        assert_eq!(record.restore_quality, Some(RestoreQuality::Missing));
        // the bootstrap save replaces the corrupt file
        assert_eq!(record.save_decision, SaveDecision::SaveSucceeded);
    }

    #[tokio::test]
    async fn test_off_and_missing_store_are_disabled() {
        let pool = SlotPool::new(MODEL, 1, 512, SlotMetrics::default());
        for policy in [
            LifecyclePolicy::disabled(),
            LifecyclePolicy::new(SlotLifecycleMode::Conservative, 0.5, 1, 503, None),
        ] {
            pool.erase(0).unwrap();
            let record = serve(&policy, &pool, 0, &[1, 2, 3]).await.unwrap();
            assert!(!record.enabled);
            assert!(!record.restore_attempted);
            assert_eq!(record.save_decision, SaveDecision::SkippedDisabled);
        }
    }

    #[tokio::test]
    async fn test_save_failure_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let missing_dir = dir.path().join("does-not-exist");
        let store = Arc::new(CheckpointStore::new(&missing_dir, 8));
        let policy =
            LifecyclePolicy::new(SlotLifecycleMode::Conservative, 0.5, 1, 503, Some(store));
        let pool = SlotPool::new(MODEL, 1, 512, SlotMetrics::default());

        let record = serve(&policy, &pool, 0, &[1, 2, 3]).await.unwrap();
        assert_eq!(record.save_decision, SaveDecision::SaveFailed);
    }

    #[tokio::test]
    async fn test_persist_pool_saves_warm_slots() {
        let (dir, policy, pool) = setup(SlotLifecycleMode::Conservative, 0.5, 1);
        {
            let guard = pool.assign(Some(1)).unwrap();
            guard.with_state(|s| s.evaluate(root_cell(MODEL), &[4, 5, 6]));
        }
        assert_eq!(policy.persist_pool(&pool).await, 1);
        assert!(dir.path().join("tiny.slot-1.bin").exists());
        assert!(!dir.path().join("tiny.slot-0.bin").exists());
    }

    #[test]
    fn test_record_serialization() {
        let policy = LifecyclePolicy::disabled();
        let plan = PrefixPlan::compute(&[], &[1, 2], true);
        let record = policy.record(RestoreReport::missing(), &plan, SaveDecision::SaveSucceeded);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["restore_quality"], "missing");
        assert_eq!(json["save_decision"], "save_succeeded");
        assert_eq!(json["mode"], "off");
        assert_eq!(json["restore_effective"], false);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(
            "Strict".parse::<SlotLifecycleMode>().unwrap(),
            SlotLifecycleMode::Strict
        );
        assert!("sometimes".parse::<SlotLifecycleMode>().is_err());
        assert_eq!(SlotLifecycleMode::default(), SlotLifecycleMode::Conservative);
    }
}
