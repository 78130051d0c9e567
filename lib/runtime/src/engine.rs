// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Streaming engine abstraction.
//!
//! An [`AsyncEngine`] turns one request into a response, most often a stream of items that
//! carries an [`AsyncEngineContext`]. The context is the control channel back to the
//! producer: the HTTP layer calls [`AsyncEngineContext::stop_generating`] when a client goes
//! away, and the producer observes it via [`AsyncEngineContext::stopped`].

use std::{fmt::Debug, pin::Pin, sync::Arc};

pub use async_trait::async_trait;
use futures::stream::Stream;

/// All [`Send`] + [`Sync`] + `'static` types can be used as [`AsyncEngine`] request and
/// response types. Covered by a blanket implementation.
pub trait Data: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> Data for T {}

/// A stream of [`Data`] items. Adapt it to a [`ResponseStream`] by pairing it with an
/// [`AsyncEngineContext`].
pub type DataStream<T> = Pin<Box<dyn Stream<Item = T> + Send + Sync>>;

pub type Engine<Req, Resp, E> = Arc<dyn AsyncEngine<Req, Resp, E>>;
pub type EngineStream<Resp> = Pin<Box<dyn AsyncEngineStream<Resp>>>;

impl<T: Data> From<EngineStream<T>> for DataStream<T> {
    fn from(stream: EngineStream<T>) -> Self {
        Box::pin(stream)
    }
}

/// Controls the stream produced by an engine.
#[async_trait]
pub trait AsyncEngineContext: Send + Sync + Debug {
    /// Unique ID for the Stream
    fn id(&self) -> &str;

    /// Returns true if `stop_generating()` has been called; otherwise, false.
    fn is_stopped(&self) -> bool;

    /// Returns true if `kill()` has been called; otherwise, false.
    fn is_killed(&self) -> bool;

    /// Resolves once [`AsyncEngineContext::is_stopped`] is true.
    async fn stopped(&self);

    /// Resolves once [`AsyncEngineContext::is_killed`] is true.
    async fn killed(&self);

    /// Informs the [`AsyncEngine`] to stop producing results for this stream. Idempotent.
    /// Items already in the stream stay valid; the caller can drain or drop it.
    fn stop_generating(&self);

    /// See [`AsyncEngineContext::stop_generating`].
    fn stop(&self);

    /// Like [`AsyncEngineContext::stop_generating`], with a preference to terminate
    /// without draining.
    fn kill(&self);
}

/// Access to the [`AsyncEngineContext`] associated with an engine operation.
pub trait AsyncEngineContextProvider: Send + Sync + Debug {
    fn context(&self) -> Arc<dyn AsyncEngineContext>;
}

/// A stream of engine results that also exposes its context.
pub trait AsyncEngineStream<Resp: Data>:
    Stream<Item = Resp> + AsyncEngineContextProvider + Send + Sync
{
}

/// Engine is a trait that defines the interface for a streaming engine.
///
/// `generate` returning `Err` means the request never started; a failure after the first
/// item is reported inside the stream.
#[async_trait]
pub trait AsyncEngine<Req: Data, Resp: Data + AsyncEngineContextProvider, E: Data>:
    Send + Sync
{
    /// Generate a stream of completion responses.
    async fn generate(&self, request: Req) -> Result<Resp, E>;
}

/// Adapter for a [`DataStream`] to a [`ResponseStream`].
///
/// A common pattern is to consume the [`ResponseStream`] with standard stream combinators
/// which produces a [`DataStream`] stream, then form a [`ResponseStream`] by propagating the
/// original [`AsyncEngineContext`].
pub struct ResponseStream<R: Data> {
    stream: DataStream<R>,
    ctx: Arc<dyn AsyncEngineContext>,
}

impl<R: Data> ResponseStream<R> {
    pub fn new(stream: DataStream<R>, ctx: Arc<dyn AsyncEngineContext>) -> Pin<Box<Self>> {
        Box::pin(Self { stream, ctx })
    }
}

impl<R: Data> Stream for ResponseStream<R> {
    type Item = R;

    #[inline]
    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        Pin::new(&mut self.stream).poll_next(cx)
    }
}

impl<R: Data> AsyncEngineStream<R> for ResponseStream<R> {}

impl<R: Data> AsyncEngineContextProvider for ResponseStream<R> {
    fn context(&self) -> Arc<dyn AsyncEngineContext> {
        self.ctx.clone()
    }
}

impl<T: Data> AsyncEngineContextProvider for Pin<Box<dyn AsyncEngineStream<T>>> {
    fn context(&self) -> Arc<dyn AsyncEngineContext> {
        AsyncEngineContextProvider::context(&**self)
    }
}

impl<R: Data> Debug for ResponseStream<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream")
            .field("ctx", &self.ctx)
            .finish()
    }
}
