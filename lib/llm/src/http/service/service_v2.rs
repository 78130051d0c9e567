// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use anyhow::{Context as _, Result};
use derive_builder::Builder;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use slotrouter_runtime::metrics::prometheus_names::METRICS_PREFIX_ENV;

use super::metrics;
use super::Metrics;
use super::RouteDoc;
use crate::config::ServerConfig;
use crate::router::{
    spawn_idle_watchdog, MockModelLoader, ModelLoader, ModelRouter, RouterMetrics, AUTO_MODEL,
};
use crate::serving::ServingEngine;
use crate::slots::SlotMetrics;

/// HTTP service shared state
pub struct State {
    metrics: Arc<Metrics>,
    engine: Arc<ServingEngine>,
    config: ServerConfig,
}

impl State {
    pub fn new(engine: Arc<ServingEngine>, config: ServerConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            metrics,
            engine,
            config,
        }
    }

    /// Get the Prometheus [`Metrics`] object which tracks request counts and inflight requests
    pub fn metrics_clone(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn engine(&self) -> &Arc<ServingEngine> {
        &self.engine
    }

    pub fn router(&self) -> &Arc<ModelRouter> {
        self.engine.router()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The model id used for metric labels; `__AUTO__` resolves to the model it selects.
    pub fn model_label(&self, model: &str) -> String {
        self.router()
            .spec(model)
            .map(|spec| spec.id.clone())
            .unwrap_or_else(|_| model.to_string())
    }
}

#[derive(Clone)]
pub struct HttpService {
    // The state we share with every request handler
    state: Arc<State>,

    router: axum::Router,
    port: u16,
    host: String,
    route_docs: Vec<RouteDoc>,
}

#[derive(Clone, Builder)]
#[builder(pattern = "owned", build_fn(private, name = "build_internal"))]
pub struct HttpServiceConfig {
    /// Host, port and every router and slot setting
    #[builder(default)]
    config: ServerConfig,

    /// Defaults to a [`MockModelLoader`] built from the config
    #[builder(default, setter(strip_option))]
    loader: Option<Arc<dyn ModelLoader>>,
}

impl HttpService {
    pub fn builder() -> HttpServiceConfigBuilder {
        HttpServiceConfigBuilder::default()
    }

    pub fn state_clone(&self) -> Arc<State> {
        self.state.clone()
    }

    pub fn state(&self) -> &State {
        Arc::as_ref(&self.state)
    }

    pub fn model_router(&self) -> &Arc<ModelRouter> {
        self.state().router()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn spawn(&self, cancel_token: CancellationToken) -> JoinHandle<Result<()>> {
        let this = self.clone();
        tokio::spawn(async move { this.run(cancel_token).await })
    }

    /// Serve until `cancel_token` fires, then unload every model so slot state is
    /// persisted under the lifecycle policy.
    pub async fn run(&self, cancel_token: CancellationToken) -> Result<()> {
        let address = format!("{}:{}", self.host, self.port);
        tracing::info!(address, "Starting HTTP service on: {address}");

        let listener = tokio::net::TcpListener::bind(address.as_str())
            .await
            .with_context(|| format!("could not bind to address: {address}"))?;

        let model_router = self.model_router().clone();
        if model_router.specs().count() == 1 {
            // single model mode: load up front so the first request does not pay for it
            if let Err(err) = model_router.load(AUTO_MODEL).await {
                tracing::warn!(%err, "failed to preload the model");
            }
        }

        let watchdog = self.state().config().sleep_idle().map(|idle| {
            tracing::info!(idle_secs = idle.as_secs(), "idle unload enabled");
            spawn_idle_watchdog(model_router.clone(), idle, cancel_token.child_token())
        });

        let router = self.router.clone();
        let observer = cancel_token.child_token();

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(observer.cancelled_owned())
            .await
            .inspect_err(|_| cancel_token.cancel());

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }
        model_router.unload_all().await;
        tracing::info!("HTTP service stopped");

        served?;
        Ok(())
    }

    /// Documentation of exposed HTTP endpoints
    pub fn route_docs(&self) -> &[RouteDoc] {
        &self.route_docs
    }
}

/// Environment variable to set the metrics endpoint path (default: `/metrics`)
static HTTP_SVC_METRICS_PATH_ENV: &str = "SLR_HTTP_SVC_METRICS_PATH";
/// Environment variable to set the health endpoint path (default: `/health`)
static HTTP_SVC_HEALTH_PATH_ENV: &str = "SLR_HTTP_SVC_HEALTH_PATH";
/// Environment variable to set the live endpoint path (default: `/live`)
static HTTP_SVC_LIVE_PATH_ENV: &str = "SLR_HTTP_SVC_LIVE_PATH";

impl HttpServiceConfigBuilder {
    pub fn build(self) -> Result<HttpService> {
        let HttpServiceConfig { config, loader } = self.build_internal()?;

        if let Some(dir) = &config.slot_save_path {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create slot save path {}", dir.display()))?;
        }

        let prefix =
            std::env::var(METRICS_PREFIX_ENV).unwrap_or_else(|_| config.metrics_prefix.clone());

        // enable prometheus metrics
        let registry = metrics::Registry::new();
        let metrics = Arc::new(Metrics::new(&prefix));
        metrics.register(&registry)?;
        let slot_metrics = SlotMetrics::new(&prefix);
        slot_metrics.register(&registry)?;
        let router_metrics = RouterMetrics::new(&prefix);
        router_metrics.register(&registry)?;

        let loader: Arc<dyn ModelLoader> = match loader {
            Some(loader) => loader,
            None => Arc::new(MockModelLoader::new(
                config.mock_engine_args(),
                config.n_slots,
                config.n_ctx,
                slot_metrics,
            )),
        };

        let model_router = Arc::new(ModelRouter::new(
            config.models.clone(),
            loader,
            Arc::new(config.lifecycle_policy()),
            config.router_settings(),
            router_metrics,
        )?);
        let engine = Arc::new(ServingEngine::new(model_router, config.serving_defaults()));
        let state = Arc::new(State::new(engine, config.clone(), metrics));

        let var = |name: &str| std::env::var(name).ok();
        let routes = vec![
            metrics::router(
                registry,
                config.endpoint_metrics,
                var(HTTP_SVC_METRICS_PATH_ENV),
            ),
            super::health::health_check_router(var(HTTP_SVC_HEALTH_PATH_ENV)),
            super::health::live_check_router(var(HTTP_SVC_LIVE_PATH_ENV)),
            super::models::models_router(state.clone()),
            super::props::props_router(state.clone()),
            super::slots::slots_router(state.clone()),
            super::openai::completions_router(state.clone()),
            super::openai::chat_completions_router(state.clone()),
        ];

        let mut router = axum::Router::new();
        let mut all_docs = Vec::new();
        for (route_docs, route) in routes.into_iter() {
            router = router.merge(route);
            all_docs.extend(route_docs);
        }

        if let Some(api_key) = config.api_key.as_deref().filter(|key| !key.is_empty()) {
            router = router.layer(axum::middleware::from_fn_with_state(
                Arc::<str>::from(api_key),
                super::auth::require_api_key,
            ));
        }
        let router = router.layer(TraceLayer::new_for_http());

        Ok(HttpService {
            state,
            router,
            port: config.port,
            host: config.host,
            route_docs: all_docs,
        })
    }
}
