// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts};
use std::{sync::Arc, time::Instant};

pub use prometheus::Registry;

use slotrouter_runtime::metrics::prometheus_names::{frontend_service, name_prefix};
use slotrouter_runtime::metrics::sanitize_prometheus_prefix;

use super::error::HttpError;
use super::RouteDoc;

const TOKEN_BUCKETS: [f64; 10] = [
    0.0, 16.0, 64.0, 256.0, 1024.0, 2048.0, 4096.0, 8192.0, 16384.0, 32768.0,
];

/// Frontend request metrics. Every series except the request counter is labelled by model
/// only; the counter adds endpoint, request type and status.
pub struct Metrics {
    request_counter: IntCounterVec,
    inflight_gauge: IntGaugeVec,
    request_duration: HistogramVec,
    input_sequence_length: HistogramVec,
    cached_prompt_tokens: HistogramVec,
    output_sequence_length: HistogramVec,
    time_to_first_token: HistogramVec,
}

/// Requests will be logged by the type of endpoint hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// llama-server `/completion`
    Completions,
    ChatCompletions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Unary,
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Error,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Completions => "completions",
            Endpoint::ChatCompletions => "chat_completions",
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Unary => "unary",
            RequestType::Stream => "stream",
        }
    }
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Error => "error",
        }
    }
}

fn model_histogram(name: String, help: &str, buckets: Vec<f64>) -> HistogramVec {
    HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), &["model"])
        .expect("valid histogram")
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new(name_prefix::FRONTEND)
    }
}

impl Metrics {
    /// Create the frontend metrics under `prefix`; see
    /// [`frontend_service`] for the series and their meaning.
    pub fn new(prefix: &str) -> Self {
        let prefix = sanitize_prometheus_prefix(prefix, name_prefix::FRONTEND);
        let name = |suffix: &str| format!("{prefix}_{suffix}");

        Metrics {
            request_counter: IntCounterVec::new(
                Opts::new(
                    name(frontend_service::REQUESTS_TOTAL),
                    "Total number of completion requests processed",
                ),
                &["model", "endpoint", "request_type", "status"],
            )
            .expect("valid counter"),
            inflight_gauge: IntGaugeVec::new(
                Opts::new(
                    name(frontend_service::INFLIGHT_REQUESTS),
                    "Requests currently holding a slot",
                ),
                &["model"],
            )
            .expect("valid gauge"),
            request_duration: model_histogram(
                name(frontend_service::REQUEST_DURATION_SECONDS),
                "Duration of completion requests",
                vec![0.0, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0, 256.0],
            ),
            input_sequence_length: model_histogram(
                name(frontend_service::INPUT_SEQUENCE_TOKENS),
                "Prompt tokens evaluated, excluding the reused prefix",
                TOKEN_BUCKETS.to_vec(),
            ),
            cached_prompt_tokens: model_histogram(
                name(frontend_service::CACHED_PROMPT_TOKENS),
                "Prompt tokens reused from the slot cache",
                TOKEN_BUCKETS.to_vec(),
            ),
            output_sequence_length: model_histogram(
                name(frontend_service::OUTPUT_SEQUENCE_TOKENS),
                "Generated tokens",
                TOKEN_BUCKETS.to_vec(),
            ),
            time_to_first_token: model_histogram(
                name(frontend_service::TIME_TO_FIRST_TOKEN_SECONDS),
                "Time to first token in seconds",
                vec![
                    0.0, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0,
                    30.0,
                ],
            ),
        }
    }

    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.request_counter.clone()))?;
        registry.register(Box::new(self.inflight_gauge.clone()))?;
        registry.register(Box::new(self.request_duration.clone()))?;
        registry.register(Box::new(self.input_sequence_length.clone()))?;
        registry.register(Box::new(self.cached_prompt_tokens.clone()))?;
        registry.register(Box::new(self.output_sequence_length.clone()))?;
        registry.register(Box::new(self.time_to_first_token.clone()))?;
        Ok(())
    }

    fn requests(
        &self,
        model: &str,
        endpoint: Endpoint,
        request_type: RequestType,
        status: Status,
    ) -> prometheus::IntCounter {
        self.request_counter.with_label_values(&[
            model,
            endpoint.as_str(),
            request_type.as_str(),
            status.as_str(),
        ])
    }

    /// Requests finished for one label combination
    pub fn get_request_counter(
        &self,
        model: &str,
        endpoint: Endpoint,
        request_type: RequestType,
        status: Status,
    ) -> u64 {
        self.requests(model, endpoint, request_type, status).get()
    }

    pub fn get_inflight_count(&self, model: &str) -> i64 {
        self.inflight_gauge.with_label_values(&[model]).get()
    }

    pub fn create_inflight_guard(
        self: Arc<Self>,
        model: &str,
        endpoint: Endpoint,
        streaming: bool,
    ) -> InflightGuard {
        let request_type = if streaming {
            RequestType::Stream
        } else {
            RequestType::Unary
        };
        self.inflight_gauge.with_label_values(&[model]).inc();
        InflightGuard {
            metrics: self,
            model: model.to_string(),
            endpoint,
            request_type,
            status: Status::Error,
            timer: Instant::now(),
        }
    }

    pub fn create_response_collector(self: Arc<Self>, model: &str) -> ResponseMetricCollector {
        ResponseMetricCollector {
            metrics: self,
            model: model.to_string(),
            start_time: Instant::now(),
            first_token_seen: false,
        }
    }
}

/// Counts a request as in flight until dropped. A guard dropped without
/// [`InflightGuard::mark_ok`] records the request with status `error`, which covers
/// cancelled streams and failed handlers alike.
pub struct InflightGuard {
    metrics: Arc<Metrics>,
    model: String,
    endpoint: Endpoint,
    request_type: RequestType,
    status: Status,
    timer: Instant,
}

impl InflightGuard {
    pub(crate) fn mark_ok(&mut self) {
        self.status = Status::Success;
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let metrics = &self.metrics;
        metrics.inflight_gauge.with_label_values(&[&self.model]).dec();
        metrics
            .requests(&self.model, self.endpoint, self.request_type, self.status)
            .inc();
        metrics
            .request_duration
            .with_label_values(&[&self.model])
            .observe(self.timer.elapsed().as_secs_f64());
    }
}

/// Per-response token metrics, fed from the serving events of one request
pub struct ResponseMetricCollector {
    metrics: Arc<Metrics>,
    model: String,
    start_time: Instant,
    first_token_seen: bool,
}

impl ResponseMetricCollector {
    /// Called for each streamed delta; the first one publishes TTFT.
    pub fn observe_delta(&mut self) {
        if !self.first_token_seen {
            self.first_token_seen = true;
            self.metrics
                .time_to_first_token
                .with_label_values(&[&self.model])
                .observe(self.start_time.elapsed().as_secs_f64());
        }
    }

    /// `prompt_n` counts only the tokens evaluated this turn, `cache_n` the reused prefix.
    pub fn observe_final(&self, prompt_n: usize, cache_n: usize, predicted_n: usize) {
        let labels = [self.model.as_str()];
        let m = &self.metrics;
        m.input_sequence_length
            .with_label_values(&labels)
            .observe(prompt_n as f64);
        m.cached_prompt_tokens
            .with_label_values(&labels)
            .observe(cache_n as f64);
        m.output_sequence_length
            .with_label_values(&labels)
            .observe(predicted_n as f64);
    }
}

/// `/metrics` in prometheus text format, or 501 when the endpoint is disabled.
pub fn router(
    registry: Registry,
    enabled: bool,
    path: Option<String>,
) -> (Vec<RouteDoc>, Router) {
    let path = path.unwrap_or_else(|| "/metrics".to_string());
    let doc = RouteDoc::new(axum::http::Method::GET, &path);
    let route = if enabled {
        Router::new()
            .route(&path, get(handler_metrics))
            .with_state(Arc::new(registry))
    } else {
        Router::new().route(&path, get(handler_disabled))
    };
    (vec![doc], route)
}

async fn handler_disabled() -> HttpError {
    HttpError::not_supported("This server does not support metrics endpoint. Start it with `--metrics`")
}

async fn handler_metrics(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let mut buffer = vec![];
    let encoded = prometheus::TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .ok()
        .and_then(|_| String::from_utf8(buffer).ok());
    match encoded {
        Some(text) => (StatusCode::OK, text).into_response(),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response(),
    }
}
