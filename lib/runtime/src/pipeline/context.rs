// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Request context.
//!
//! [`Context`] carries a request payload together with a shared [`Controller`]. The
//! controller travels with the response stream, so stopping it from the HTTP side is seen
//! by whichever task is producing tokens.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::engine::{AsyncEngineContext, AsyncEngineContextProvider};

#[derive(Debug)]
pub struct Controller {
    id: String,
    stopped: AtomicBool,
    killed: AtomicBool,
    stop_token: CancellationToken,
    kill_token: CancellationToken,
}

impl Controller {
    pub fn new(id: String) -> Self {
        Self {
            id,
            stopped: AtomicBool::new(false),
            killed: AtomicBool::new(false),
            stop_token: CancellationToken::new(),
            kill_token: CancellationToken::new(),
        }
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl AsyncEngineContext for Controller {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    async fn stopped(&self) {
        self.stop_token.cancelled().await;
    }

    async fn killed(&self) {
        self.kill_token.cancelled().await;
    }

    fn stop_generating(&self) {
        self.stopped.store(true, Ordering::Release);
        self.stop_token.cancel();
    }

    fn stop(&self) {
        self.stop_generating();
    }

    // a kill implies a stop
    fn kill(&self) {
        self.killed.store(true, Ordering::Release);
        self.kill_token.cancel();
        self.stop_generating();
    }
}

/// A request payload paired with its [`Controller`].
#[derive(Debug)]
pub struct Context<T> {
    current: T,
    controller: Arc<Controller>,
}

impl<T: Send + Sync + 'static> Context<T> {
    /// Wrap a request with a fresh controller and a random id.
    pub fn new(current: T) -> Self {
        Self {
            current,
            controller: Arc::new(Controller::default()),
        }
    }

    pub fn with_id(current: T, id: String) -> Self {
        Self {
            current,
            controller: Arc::new(Controller::new(id)),
        }
    }

    pub fn id(&self) -> &str {
        self.controller.id()
    }

    pub fn content(&self) -> &T {
        &self.current
    }

    /// Split into the payload and a context handle that can still stop the stream.
    pub fn into_parts(self) -> (T, Context<()>) {
        (
            self.current,
            Context {
                current: (),
                controller: self.controller,
            },
        )
    }

    /// Swap the payload, keeping the controller.
    pub fn transfer<U: Send + Sync + 'static>(self, new_current: U) -> (T, Context<U>) {
        (
            self.current,
            Context {
                current: new_current,
                controller: self.controller,
            },
        )
    }

    pub fn map<U: Send + Sync + 'static, F: FnOnce(T) -> U>(self, f: F) -> Context<U> {
        Context {
            current: f(self.current),
            controller: self.controller,
        }
    }
}

impl<T> Deref for Context<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.current
    }
}

impl<T> DerefMut for Context<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.current
    }
}

impl<T: Send + Sync + std::fmt::Debug> AsyncEngineContextProvider for Context<T> {
    fn context(&self) -> Arc<dyn AsyncEngineContext> {
        self.controller.clone()
    }
}

impl<T: Send + Sync + 'static> From<T> for Context<T> {
    fn from(current: T) -> Self {
        Context::new(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_transfer_keeps_controller() {
        let request = Context::with_id(7u32, "abc".to_string());
        let (value, next) = request.transfer("seven");
        assert_eq!(value, 7);
        assert_eq!(next.id(), "abc");
        assert_eq!(*next, "seven");

        let mapped = next.map(|s| s.len());
        assert_eq!(*mapped, 5);
        assert_eq!(mapped.id(), "abc");
    }

    #[tokio::test]
    async fn test_stop_wakes_waiters() {
        let (_, ctx) = Context::new(()).into_parts();
        let engine_ctx = ctx.context();

        let waiter = {
            let engine_ctx = engine_ctx.clone();
            tokio::spawn(async move { engine_ctx.stopped().await })
        };

        ctx.context().stop_generating();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(engine_ctx.is_stopped());
        assert!(!engine_ctx.is_killed());
    }

    #[test]
    fn test_kill_implies_stop() {
        let ctx = Context::new(());
        ctx.context().kill();
        assert!(ctx.context().is_killed());
        assert!(ctx.context().is_stopped());
    }
}
