// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Client disconnect handling for the completion handlers.
//!
//! A completion holds a slot for as long as it generates, so a client that goes away must
//! release it promptly. A request lives in two scopes and each gets a [`DisconnectGuard`]:
//! the handler task, which axum drops when the client leaves before the response starts,
//! and the SSE body, which axum drops when the client leaves mid-stream. A guard dropped
//! while armed kills the request context; the serving task then records the turn as
//! cancelled (no lifecycle save) and releases the slot.

use std::sync::Arc;

use axum::response::sse::Event;
use futures::{Stream, StreamExt};
use tokio::sync::oneshot;

use slotrouter_runtime::pipeline::AsyncEngineContext;

use crate::http::service::metrics::InflightGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnDrop {
    /// The scope is not in use, e.g. the stream guard of a unary request
    Ignore,
    Cancel,
    Complete,
}

pub struct DisconnectGuard {
    tx: Option<oneshot::Sender<OnDrop>>,
    on_drop: OnDrop,
}

impl DisconnectGuard {
    fn new(tx: oneshot::Sender<OnDrop>, on_drop: OnDrop) -> Self {
        Self {
            tx: Some(tx),
            on_drop,
        }
    }

    pub fn arm(&mut self) {
        self.on_drop = OnDrop::Cancel;
    }

    pub fn disarm(&mut self) {
        self.on_drop = OnDrop::Complete;
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(self.on_drop);
        }
    }
}

/// Watch a request for a vanished client. Returns `(handler_guard, stream_guard)`; the
/// handler guard starts armed, the stream guard stays inert until a streaming response
/// arms it.
pub fn watch_client(context: Arc<dyn AsyncEngineContext>) -> (DisconnectGuard, DisconnectGuard) {
    let (handler_tx, handler_rx) = oneshot::channel();
    let (stream_tx, stream_rx) = oneshot::channel();

    tokio::spawn(async move {
        for (scope, rx) in [("handler", handler_rx), ("stream", stream_rx)] {
            match rx.await {
                // a sender dropped without a verdict counts as a disconnect
                Ok(OnDrop::Cancel) | Err(_) => {
                    tracing::debug!(request_id = context.id(), scope, "client disconnected");
                    context.kill();
                }
                Ok(OnDrop::Complete) | Ok(OnDrop::Ignore) => {}
            }
        }
    });

    (
        DisconnectGuard::new(handler_tx, OnDrop::Cancel),
        DisconnectGuard::new(stream_tx, OnDrop::Ignore),
    )
}

/// Forward SSE events until the source ends or the request context is stopped.
///
/// A source that ends on its own marks the request successful and, for OpenAI style
/// endpoints (`done_sentinel`), appends `data: [DONE]`.
pub fn sse_until_disconnect(
    events: impl Stream<Item = Result<Event, axum::Error>>,
    context: Arc<dyn AsyncEngineContext>,
    mut inflight_guard: InflightGuard,
    mut stream_guard: DisconnectGuard,
    done_sentinel: bool,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream_guard.arm();
    async_stream::try_stream! {
        tokio::pin!(events);
        loop {
            let next = tokio::select! {
                next = events.next() => next,
                _ = context.stopped() => break,
            };
            let Some(event) = next else {
                inflight_guard.mark_ok();
                stream_guard.disarm();
                if done_sentinel {
                    yield Event::default().data("[DONE]");
                }
                break;
            };
            match event {
                Ok(event) => yield event,
                Err(err) => yield Event::default().event("error").comment(err.to_string()),
            }
        }
    }
}
