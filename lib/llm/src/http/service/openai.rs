// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::Method,
    response::{sse::Event, IntoResponse, Response, Sse},
    routing::post,
    Json, Router,
};
use futures::StreamExt;
use serde::Serialize;
use tracing::Instrument;
use validator::Validate;

use slotrouter_runtime::pipeline::{AsyncEngine, AsyncEngineContextProvider, Context};
use slotrouter_runtime::protocols::Annotated;

use super::disconnect::{sse_until_disconnect, watch_client, DisconnectGuard};
use super::error::HttpError;
use super::metrics::{Endpoint, ResponseMetricCollector};
use super::{service_v2, RouteDoc};
use crate::protocols::chat::{ChatChunkBuilder, ChatCompletionRequest, ChatCompletionResponse};
use crate::protocols::completions::{CompletionRequest, CompletionResponse};
use crate::serving::ServeEvent;

const COMPLETION_PATHS: [&str; 3] = ["/completion", "/completions", "/v1/completions"];
const CHAT_PATHS: [&str; 2] = ["/chat/completions", "/v1/chat/completions"];

/// llama-server `/completion`, also mounted at `/completions` and `/v1/completions`.
pub fn completions_router(state: Arc<service_v2::State>) -> (Vec<RouteDoc>, Router) {
    let mut docs = Vec::new();
    let mut router = Router::new();
    for path in COMPLETION_PATHS {
        docs.push(RouteDoc::new(Method::POST, path));
        router = router.route(path, post(handler_completions));
    }
    (docs, router.with_state(state))
}

pub fn chat_completions_router(state: Arc<service_v2::State>) -> (Vec<RouteDoc>, Router) {
    let mut docs = Vec::new();
    let mut router = Router::new();
    for path in CHAT_PATHS {
        docs.push(RouteDoc::new(Method::POST, path));
        router = router.route(path, post(handler_chat_completions));
    }
    (docs, router.with_state(state))
}

/// The request runs on its own task so a client disconnect, which drops this future,
/// reaches the engine through the armed handler guard instead of orphaning the slot.
#[tracing::instrument(skip_all)]
async fn handler_completions(
    State(state): State<Arc<service_v2::State>>,
    request: Result<Json<CompletionRequest>, JsonRejection>,
) -> Result<Response, HttpError> {
    let Json(request) = request?;
    request.validate()?;

    let request = Context::with_id(request, uuid::Uuid::new_v4().to_string());
    let (mut handler_guard, stream_guard) = watch_client(request.context());

    let response = tokio::spawn(completions(state, request, stream_guard).in_current_span())
        .await
        .map_err(|e| anyhow::anyhow!("completion task failed: {e}"))?;

    handler_guard.disarm();
    response
}

async fn completions(
    state: Arc<service_v2::State>,
    request: Context<CompletionRequest>,
    stream_guard: DisconnectGuard,
) -> Result<Response, HttpError> {
    let streaming = request.stream;
    let model = state.model_label(&request.model_or_auto());

    let mut inflight_guard =
        state
            .metrics_clone()
            .create_inflight_guard(&model, Endpoint::Completions, streaming);
    let mut response_collector = state.metrics_clone().create_response_collector(&model);

    let request = request.map(CompletionRequest::into_serve_request);
    let stream = state.engine().generate(request).await?;
    let ctx = stream.context();

    if streaming {
        let stream = stream.map(move |annotated| {
            process_event_converter(annotated, &mut response_collector, CompletionResponse::from_event)
        });
        let stream = sse_until_disconnect(stream, ctx, inflight_guard, stream_guard, false);
        Ok(Sse::new(stream).into_response())
    } else {
        let stream = stream.inspect(move |annotated| observe(&mut response_collector, annotated));
        let response = CompletionResponse::from_annotated_stream(stream).await?;
        inflight_guard.mark_ok();
        Ok(Json(response).into_response())
    }
}

#[tracing::instrument(skip_all)]
async fn handler_chat_completions(
    State(state): State<Arc<service_v2::State>>,
    request: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Result<Response, HttpError> {
    let Json(request) = request?;
    request.validate()?;

    let request = Context::with_id(request, uuid::Uuid::new_v4().to_string());
    let (mut handler_guard, stream_guard) = watch_client(request.context());

    let response =
        tokio::spawn(chat_completions(state, request, stream_guard).in_current_span())
            .await
            .map_err(|e| anyhow::anyhow!("chat completion task failed: {e}"))?;

    handler_guard.disarm();
    response
}

async fn chat_completions(
    state: Arc<service_v2::State>,
    request: Context<ChatCompletionRequest>,
    stream_guard: DisconnectGuard,
) -> Result<Response, HttpError> {
    let streaming = request.stream;
    let model = state.model_label(&request.model_or_auto());
    let completion_id = format!("chatcmpl-{}", request.id());

    let mut inflight_guard =
        state
            .metrics_clone()
            .create_inflight_guard(&model, Endpoint::ChatCompletions, streaming);
    let mut response_collector = state.metrics_clone().create_response_collector(&model);

    let request = request.map(ChatCompletionRequest::into_serve_request);
    let stream = state.engine().generate(request).await?;
    let ctx = stream.context();

    if streaming {
        let mut builder = ChatChunkBuilder::new(completion_id, model);
        let stream = stream.map(move |annotated| {
            process_event_converter(annotated, &mut response_collector, |event| {
                builder.chunk(event)
            })
        });
        let stream = sse_until_disconnect(stream, ctx, inflight_guard, stream_guard, true);
        Ok(Sse::new(stream).into_response())
    } else {
        let stream = stream.inspect(move |annotated| observe(&mut response_collector, annotated));
        let response = ChatCompletionResponse::from_annotated_stream(completion_id, stream).await?;
        inflight_guard.mark_ok();
        Ok(Json(response).into_response())
    }
}

fn observe(collector: &mut ResponseMetricCollector, annotated: &Annotated<ServeEvent>) {
    match &annotated.data {
        Some(ServeEvent::Delta { .. }) => collector.observe_delta(),
        Some(ServeEvent::Final(summary)) => collector.observe_final(
            summary.timings.prompt_n,
            summary.timings.cache_n,
            summary.tokens_predicted,
        ),
        None => {}
    }
}

/// One SSE `data:` event per serving event. A mid-stream failure becomes a
/// `{"error": ...}` payload; the stream then ends without a final chunk.
fn process_event_converter<T: Serialize>(
    annotated: Annotated<ServeEvent>,
    collector: &mut ResponseMetricCollector,
    mut convert: impl FnMut(ServeEvent) -> T,
) -> Result<Event, axum::Error> {
    observe(collector, &annotated);
    match annotated.into_result() {
        Ok(Some(event)) => Event::default().json_data(convert(event)),
        Ok(None) => Ok(Event::default().comment("")),
        Err(err) => Event::default().json_data(HttpError::from_anyhow(&err).body()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::service::metrics::Metrics;

    #[test]
    fn test_error_item_becomes_error_payload() {
        let metrics = Arc::new(Metrics::new("test_openai"));
        let mut collector = metrics.create_response_collector("tiny");
        let event = process_event_converter(
            Annotated::<ServeEvent>::from_error("engine error: boom".to_string()),
            &mut collector,
            CompletionResponse::from_event,
        );
        assert!(event.is_ok());
    }
}
