// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Model Router
//!
//! The router owns one [`ModelEntry`] per configured model for the life of the process.
//! Entries move through `unloaded -> loading -> loaded -> unloading -> unloaded`; only the
//! status and the loaded resources change, the entry itself is never removed.
//!
//! Loads of one model are single-flight: concurrent callers queue on the entry's op lock and
//! find the model loaded when they get it. The capacity check ("count resident models,
//! pick an eviction victim, mark loading") runs under one router-wide lock so concurrent
//! loads of different models can never jointly exceed `models_max`.
//!
//! Whoever moves an entry from `loaded` to `unloading` owns the rest of the unload: wait for
//! in-flight requests to drain, persist the slots under the lifecycle policy, release.
//! Transitions run on their own tasks; callers only await them, so dropping a caller
//! never leaves an entry stuck in `loading` or `unloading`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use derive_getters::Getters;
use prometheus::{IntCounterVec, IntGauge, Opts, Registry};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tracing::Instrument;

use slotrouter_runtime::metrics::prometheus_names::{model_router, name_prefix};
use slotrouter_runtime::metrics::sanitize_prometheus_prefix;

use crate::error::{ErrorKind, HasErrorKind};
use crate::protocols::common::ExecutionContext;
use crate::slots::{LifecyclePolicy, SlotPool};
use crate::tokenizers::Tokenizer;

pub mod idle;
pub mod loader;

pub use idle::spawn_idle_watchdog;
pub use loader::{MockModelLoader, ModelLoader};

/// Model id that selects the first registered model.
pub const AUTO_MODEL: &str = "__AUTO__";

/// A configured model: its id and the file backing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub path: PathBuf,
}

impl ModelSpec {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        ModelSpec {
            id: id.into(),
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Unloaded => "unloaded",
            ModelStatus::Loading => "loading",
            ModelStatus::Loaded => "loaded",
            ModelStatus::Unloading => "unloading",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("model '{0}' not found")]
    UnknownModel(String),

    #[error("no models are registered")]
    NoModels,

    #[error("model '{0}' is not loaded")]
    NotLoaded(String),

    #[error("model '{0}' is not loaded and autoload is disabled")]
    AutoloadDisabled(String),

    #[error("cannot load model '{model}': {models_max} models are loaded and all are serving requests")]
    CapacityExhausted { model: String, models_max: usize },

    #[error("failed to load model '{model}': {source}")]
    LoadFailed {
        model: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("duplicate model id '{0}'")]
    DuplicateModel(String),
}

impl HasErrorKind for RouterError {
    fn kind(&self) -> ErrorKind {
        match self {
            RouterError::UnknownModel(_) | RouterError::NoModels => ErrorKind::NotFound,
            RouterError::NotLoaded(_)
            | RouterError::AutoloadDisabled(_)
            | RouterError::DuplicateModel(_) => ErrorKind::InvalidRequest,
            RouterError::CapacityExhausted { .. } => ErrorKind::ResourceExhausted,
            RouterError::LoadFailed { .. } => ErrorKind::Internal,
        }
    }
}

/// Resources of a loaded model.
#[derive(Getters)]
pub struct LoadedModel {
    id: String,
    path: PathBuf,
    engine: ExecutionContext,
    tokenizer: Arc<dyn Tokenizer>,
    pool: Arc<SlotPool>,
    loaded_at: chrono::DateTime<chrono::Utc>,
}

impl LoadedModel {
    pub fn new(
        spec: &ModelSpec,
        engine: ExecutionContext,
        tokenizer: Arc<dyn Tokenizer>,
        pool: Arc<SlotPool>,
    ) -> Self {
        LoadedModel {
            id: spec.id.clone(),
            path: spec.path.clone(),
            engine,
            tokenizer,
            pool,
            loaded_at: chrono::Utc::now(),
        }
    }
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("n_slots", &self.pool.len())
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

/// Point-in-time view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSnapshot {
    pub id: String,
    pub path: PathBuf,
    pub status: ModelStatus,
    /// Logical access time; larger is more recent
    pub last_access: u64,
    pub in_flight: usize,
}

#[derive(Debug)]
struct EntryState {
    status: ModelStatus,
    model: Option<Arc<LoadedModel>>,
    last_access: u64,
    last_used: Instant,
    in_flight: usize,
}

#[derive(Debug)]
struct ModelEntry {
    spec: ModelSpec,
    /// registration order, the LRU tie-break
    order: usize,
    op: tokio::sync::Mutex<()>,
    status_tx: watch::Sender<ModelStatus>,
    drained: Notify,
    state: Mutex<EntryState>,
}

impl ModelEntry {
    fn new(spec: ModelSpec, order: usize) -> Self {
        let (status_tx, _) = watch::channel(ModelStatus::Unloaded);
        ModelEntry {
            spec,
            order,
            op: tokio::sync::Mutex::new(()),
            status_tx,
            drained: Notify::new(),
            state: Mutex::new(EntryState {
                status: ModelStatus::Unloaded,
                model: None,
                last_access: 0,
                last_used: Instant::now(),
                in_flight: 0,
            }),
        }
    }

    fn id(&self) -> &str {
        &self.spec.id
    }

    fn set_status(&self, state: &mut EntryState, status: ModelStatus) {
        state.status = status;
        self.status_tx.send_replace(status);
    }

    /// Move a loaded entry to `unloading` and hand its resources to the caller.
    fn begin_unload(&self, state: &mut EntryState) -> Option<Arc<LoadedModel>> {
        if state.status != ModelStatus::Loaded {
            return None;
        }
        let model = state.model.clone()?;
        self.set_status(state, ModelStatus::Unloading);
        Some(model)
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if lock(&self.state).in_flight == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Wait until the status is no longer `status`.
    async fn wait_while(&self, status: ModelStatus) {
        let mut rx = self.status_tx.subscribe();
        // the sender lives as long as the entry, so `changed` only fails if it is dropped
        while *rx.borrow_and_update() == status {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// A model in use by one request. The model cannot be unloaded while a handle exists.
pub struct ModelHandle {
    entry: Arc<ModelEntry>,
    model: Arc<LoadedModel>,
}

impl ModelHandle {
    pub fn model(&self) -> &Arc<LoadedModel> {
        &self.model
    }
}

impl std::ops::Deref for ModelHandle {
    type Target = LoadedModel;

    fn deref(&self) -> &Self::Target {
        &self.model
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ModelHandle").field(&self.entry.id()).finish()
    }
}

impl Drop for ModelHandle {
    fn drop(&mut self) {
        let mut state = lock(&self.entry.state);
        state.in_flight = state.in_flight.saturating_sub(1);
        state.last_used = Instant::now();
        if state.in_flight == 0 {
            self.entry.drained.notify_waiters();
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterMetrics {
    models_loaded: IntGauge,
    loads: IntCounterVec,
    unloads: IntCounterVec,
}

impl Default for RouterMetrics {
    fn default() -> Self {
        Self::new(name_prefix::FRONTEND)
    }
}

impl RouterMetrics {
    pub fn new(prefix: &str) -> Self {
        let prefix = sanitize_prometheus_prefix(prefix, name_prefix::FRONTEND);
        let name = |suffix: &str| format!("{prefix}_{suffix}");
        RouterMetrics {
            models_loaded: IntGauge::new(name(model_router::MODELS_RESIDENT), "Models loaded")
                .unwrap(),
            loads: IntCounterVec::new(
                Opts::new(name(model_router::MODEL_LOADS_TOTAL), "Model loads"),
                &["model", "status"],
            )
            .unwrap(),
            unloads: IntCounterVec::new(
                Opts::new(name(model_router::MODEL_UNLOADS_TOTAL), "Model unloads"),
                &["model", "reason"],
            )
            .unwrap(),
        }
    }

    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.models_loaded.clone()))?;
        registry.register(Box::new(self.loads.clone()))?;
        registry.register(Box::new(self.unloads.clone()))?;
        Ok(())
    }

    pub fn models_loaded(&self) -> i64 {
        self.models_loaded.get()
    }

    pub fn unloads(&self, model: &str, reason: UnloadReason) -> u64 {
        self.unloads
            .with_label_values(&[model, reason.as_str()])
            .get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadReason {
    Manual,
    Evicted,
    Idle,
    Shutdown,
}

impl UnloadReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnloadReason::Manual => "manual",
            UnloadReason::Evicted => "evicted",
            UnloadReason::Idle => "idle",
            UnloadReason::Shutdown => "shutdown",
        }
    }
}

/// Router limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterSettings {
    /// 0 means unlimited
    pub models_max: usize,
    pub autoload: bool,
}

impl Default for RouterSettings {
    fn default() -> Self {
        RouterSettings {
            models_max: 4,
            autoload: true,
        }
    }
}

enum Reservation {
    Load,
    Evict(Arc<ModelEntry>, Arc<LoadedModel>),
    /// This model, or the model holding the last resident place, is still unloading
    WaitUnloading(Arc<ModelEntry>),
    /// At capacity and another model is mid-load; retry once it settles
    WaitLoading(Arc<ModelEntry>),
    AlreadyLoaded,
}

pub struct ModelRouter {
    entries: Vec<Arc<ModelEntry>>,
    loader: Arc<dyn ModelLoader>,
    policy: Arc<LifecyclePolicy>,
    settings: RouterSettings,
    capacity: Mutex<()>,
    clock: AtomicU64,
    metrics: RouterMetrics,
}

impl std::fmt::Debug for ModelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRouter")
            .field("models", &self.entries.iter().map(|e| e.id()).collect::<Vec<_>>())
            .field("settings", &self.settings)
            .finish()
    }
}

impl ModelRouter {
    pub fn new(
        specs: Vec<ModelSpec>,
        loader: Arc<dyn ModelLoader>,
        policy: Arc<LifecyclePolicy>,
        settings: RouterSettings,
        metrics: RouterMetrics,
    ) -> Result<Self, RouterError> {
        let mut entries: Vec<Arc<ModelEntry>> = Vec::with_capacity(specs.len());
        for (order, spec) in specs.into_iter().enumerate() {
            if entries.iter().any(|e| e.id() == spec.id) {
                return Err(RouterError::DuplicateModel(spec.id));
            }
            entries.push(Arc::new(ModelEntry::new(spec, order)));
        }
        Ok(ModelRouter {
            entries,
            loader,
            policy,
            settings,
            capacity: Mutex::new(()),
            clock: AtomicU64::new(0),
            metrics,
        })
    }

    pub fn settings(&self) -> RouterSettings {
        self.settings
    }

    pub fn policy(&self) -> &Arc<LifecyclePolicy> {
        &self.policy
    }

    pub fn metrics(&self) -> &RouterMetrics {
        &self.metrics
    }

    pub fn specs(&self) -> impl Iterator<Item = &ModelSpec> {
        self.entries.iter().map(|e| &e.spec)
    }

    fn entry(&self, model: &str) -> Result<&Arc<ModelEntry>, RouterError> {
        if model == AUTO_MODEL {
            return self.entries.first().ok_or(RouterError::NoModels);
        }
        self.entries
            .iter()
            .find(|e| e.id() == model)
            .ok_or_else(|| RouterError::UnknownModel(model.to_string()))
    }

    /// The registered spec a model id (or [`AUTO_MODEL`]) refers to.
    pub fn spec(&self, model: &str) -> Result<&ModelSpec, RouterError> {
        Ok(&self.entry(model)?.spec)
    }

    pub fn status(&self, model: &str) -> Result<ModelStatus, RouterError> {
        Ok(lock(&self.entry(model)?.state).status)
    }

    pub fn list(&self) -> Vec<ModelSnapshot> {
        self.entries
            .iter()
            .map(|entry| {
                let state = lock(&entry.state);
                ModelSnapshot {
                    id: entry.spec.id.clone(),
                    path: entry.spec.path.clone(),
                    status: state.status,
                    last_access: state.last_access,
                    in_flight: state.in_flight,
                }
            })
            .collect()
    }

    /// Resolve a model for a request, loading it when autoload is enabled.
    pub async fn resolve(self: &Arc<Self>, model: &str) -> Result<ModelHandle, RouterError> {
        self.resolve_with(model, self.settings.autoload).await
    }

    pub async fn resolve_with(
        self: &Arc<Self>,
        model: &str,
        autoload: bool,
    ) -> Result<ModelHandle, RouterError> {
        let entry = self.entry(model)?.clone();
        loop {
            let status = {
                let mut state = lock(&entry.state);
                if state.status == ModelStatus::Loaded {
                    if let Some(model) = state.model.clone() {
                        state.in_flight += 1;
                        state.last_access = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
                        state.last_used = Instant::now();
                        return Ok(ModelHandle {
                            entry: entry.clone(),
                            model,
                        });
                    }
                }
                state.status
            };

            match status {
                ModelStatus::Unloaded if !autoload => {
                    return Err(RouterError::AutoloadDisabled(entry.spec.id.clone()))
                }
                ModelStatus::Unloaded => self.load_entry(&entry).await?,
                other => entry.wait_while(other).await,
            }
        }
    }

    /// Load a model. Joins an in-flight load of the same model; a loaded model is a no-op.
    pub async fn load(self: &Arc<Self>, model: &str) -> Result<(), RouterError> {
        let entry = self.entry(model)?.clone();
        self.load_entry(&entry).await
    }

    /// The reserve, evict and load sequence runs on its own task so a caller that is dropped
    /// mid-transition cannot leave the entry (or an eviction victim) stranded.
    async fn load_entry(self: &Arc<Self>, entry: &Arc<ModelEntry>) -> Result<(), RouterError> {
        let router = Arc::clone(self);
        let task_entry = Arc::clone(entry);
        tokio::spawn(async move { router.run_load(&task_entry).await }.in_current_span())
            .await
            .map_err(|e| RouterError::LoadFailed {
                model: entry.spec.id.clone(),
                source: e.into(),
            })?
    }

    async fn run_load(&self, entry: &Arc<ModelEntry>) -> Result<(), RouterError> {
        let _op = entry.op.lock().await;

        loop {
            match self.reserve(entry)? {
                Reservation::AlreadyLoaded => return Ok(()),
                Reservation::WaitUnloading(other) => {
                    other.wait_while(ModelStatus::Unloading).await
                }
                Reservation::WaitLoading(other) => other.wait_while(ModelStatus::Loading).await,
                Reservation::Load => break,
                Reservation::Evict(victim, model) => {
                    tracing::info!(
                        model = %victim.id(),
                        loading = %entry.id(),
                        "evicting least recently used model"
                    );
                    self.finish_unload(&victim, model, UnloadReason::Evicted)
                        .await;
                    break;
                }
            }
        }

        tracing::info!(model = %entry.id(), path = %entry.spec.path.display(), "loading model");
        let started = Instant::now();
        match self.loader.load(&entry.spec).await {
            Ok(model) => {
                let mut state = lock(&entry.state);
                state.model = Some(Arc::new(model));
                state.last_used = Instant::now();
                entry.set_status(&mut state, ModelStatus::Loaded);
                self.metrics.models_loaded.inc();
                self.metrics
                    .loads
                    .with_label_values(&[entry.id(), "success"])
                    .inc();
                tracing::info!(
                    model = %entry.id(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "model loaded"
                );
                Ok(())
            }
            Err(e) => {
                let mut state = lock(&entry.state);
                entry.set_status(&mut state, ModelStatus::Unloaded);
                self.metrics
                    .loads
                    .with_label_values(&[entry.id(), "error"])
                    .inc();
                tracing::warn!(model = %entry.id(), error = %e, "model load failed");
                Err(RouterError::LoadFailed {
                    model: entry.spec.id.clone(),
                    source: e.into(),
                })
            }
        }
    }

    /// Count resident models, choose a victim if at capacity, and mark `entry` loading.
    ///
    /// A model that is still unloading holds its resources until it drains, so it counts
    /// as resident.
    fn reserve(&self, entry: &Arc<ModelEntry>) -> Result<Reservation, RouterError> {
        let _capacity = lock(&self.capacity);

        match lock(&entry.state).status {
            ModelStatus::Loaded => return Ok(Reservation::AlreadyLoaded),
            ModelStatus::Unloading => return Ok(Reservation::WaitUnloading(Arc::clone(entry))),
            ModelStatus::Loading | ModelStatus::Unloaded => {}
        }

        let others: Vec<&Arc<ModelEntry>> = self
            .entries
            .iter()
            .filter(|e| !Arc::ptr_eq(e, entry))
            .collect();
        let resident = others
            .iter()
            .filter(|e| lock(&e.state).status != ModelStatus::Unloaded)
            .count();

        let max = self.settings.models_max;
        let mut reservation = Reservation::Load;
        if max > 0 && resident >= max {
            // least recently accessed first, registration order breaks ties
            let victim = others
                .iter()
                .filter_map(|e| {
                    let state = lock(&e.state);
                    (state.status == ModelStatus::Loaded && state.in_flight == 0)
                        .then(|| (state.last_access, e.order, Arc::clone(e)))
                })
                .min_by_key(|(last_access, order, _)| (*last_access, *order))
                .map(|(_, _, e)| e);

            let Some(victim) = victim else {
                let settling = |status: ModelStatus| {
                    others
                        .iter()
                        .find(|e| lock(&e.state).status == status)
                        .map(|e| Arc::clone(e))
                };
                if let Some(other) = settling(ModelStatus::Loading) {
                    return Ok(Reservation::WaitLoading(other));
                }
                if let Some(other) = settling(ModelStatus::Unloading) {
                    return Ok(Reservation::WaitUnloading(other));
                }
                return Err(RouterError::CapacityExhausted {
                    model: entry.spec.id.clone(),
                    models_max: max,
                });
            };
            let model = victim
                .begin_unload(&mut lock(&victim.state))
                .ok_or_else(|| RouterError::CapacityExhausted {
                    model: entry.spec.id.clone(),
                    models_max: max,
                })?;
            reservation = Reservation::Evict(victim, model);
        }

        let mut state = lock(&entry.state);
        entry.set_status(&mut state, ModelStatus::Loading);
        Ok(reservation)
    }

    /// Unload a model after its in-flight requests finish. Fails if it is not loaded.
    pub async fn unload(self: &Arc<Self>, model: &str) -> Result<(), RouterError> {
        let entry = self.entry(model)?.clone();
        let _op = entry.op.lock().await;

        let loaded = {
            let mut state = lock(&entry.state);
            match state.status {
                ModelStatus::Loaded => entry.begin_unload(&mut state),
                ModelStatus::Unloading => None,
                _ => return Err(RouterError::NotLoaded(entry.spec.id.clone())),
            }
        };

        match loaded {
            Some(model) => {
                self.spawn_unload(&entry, model, UnloadReason::Manual)
                    .await
            }
            None => entry.wait_while(ModelStatus::Unloading).await,
        }
        Ok(())
    }

    /// Unload every loaded model that has been idle for at least `idle`.
    /// Returns the ids that were unloaded.
    pub async fn unload_idle(self: &Arc<Self>, idle: Duration) -> Vec<String> {
        let mut unloaded = vec![];
        for entry in &self.entries {
            let model = {
                let mut state = lock(&entry.state);
                if state.status != ModelStatus::Loaded
                    || state.in_flight > 0
                    || state.last_used.elapsed() < idle
                {
                    continue;
                }
                entry.begin_unload(&mut state)
            };
            if let Some(model) = model {
                tracing::info!(model = %entry.id(), idle_s = idle.as_secs_f64(), "unloading idle model");
                self.spawn_unload(entry, model, UnloadReason::Idle).await;
                unloaded.push(entry.spec.id.clone());
            }
        }
        unloaded
    }

    /// Unload everything, persisting slots. Used at shutdown.
    ///
    /// Holding the op lock waits out a load of the same model; an eviction started by
    /// another model's load is waited for as well so its slots are persisted.
    pub async fn unload_all(self: &Arc<Self>) {
        for entry in &self.entries {
            let _op = entry.op.lock().await;
            entry.wait_while(ModelStatus::Unloading).await;
            let model = entry.begin_unload(&mut lock(&entry.state));
            if let Some(model) = model {
                self.spawn_unload(entry, model, UnloadReason::Shutdown)
                    .await;
            }
        }
    }

    /// Finish an unload on its own task; the entry reaches `unloaded` even if the
    /// caller is dropped while waiting.
    async fn spawn_unload(
        self: &Arc<Self>,
        entry: &Arc<ModelEntry>,
        model: Arc<LoadedModel>,
        reason: UnloadReason,
    ) {
        let router = Arc::clone(self);
        let task_entry = Arc::clone(entry);
        let task = tokio::spawn(
            async move { router.finish_unload(&task_entry, model, reason).await }
                .in_current_span(),
        );
        if let Err(e) = task.await {
            tracing::error!(model = %entry.id(), error = %e, "model unload task failed");
        }
    }

    async fn finish_unload(
        &self,
        entry: &Arc<ModelEntry>,
        model: Arc<LoadedModel>,
        reason: UnloadReason,
    ) {
        entry.wait_drained().await;

        let n_saved = self.policy.persist_pool(model.pool()).await;
        if let Err(e) = self.loader.unload(&model).await {
            tracing::warn!(model = %entry.id(), error = %e, "model unload hook failed");
        }

        {
            let mut state = lock(&entry.state);
            state.model = None;
            entry.set_status(&mut state, ModelStatus::Unloaded);
        }
        self.metrics.models_loaded.dec();
        self.metrics
            .unloads
            .with_label_values(&[entry.id(), reason.as_str()])
            .inc();
        tracing::info!(
            model = %entry.id(),
            reason = reason.as_str(),
            n_slots_saved = n_saved,
            "model unloaded"
        );
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
