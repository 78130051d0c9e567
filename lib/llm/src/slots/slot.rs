// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use super::lifecycle::SlotLifecycle;
use super::SlotError;
use crate::tokens::TokenState;

pub type SlotId = usize;

/// One execution context and its cached token state.
///
/// Occupancy is a test-and-set flag; only the holder of a [`SlotGuard`] can touch the
/// token state. The inner mutexes are never held across an await point.
#[derive(Debug)]
pub struct Slot {
    id: SlotId,
    n_ctx: usize,
    model: String,
    busy: AtomicBool,
    released: Notify,
    state: Mutex<TokenState>,
    last_lifecycle: Mutex<Option<SlotLifecycle>>,
}

impl Slot {
    pub fn new(id: SlotId, n_ctx: usize, model: impl Into<String>) -> Self {
        Self {
            id,
            n_ctx,
            model: model.into(),
            busy: AtomicBool::new(false),
            released: Notify::new(),
            state: Mutex::new(TokenState::new()),
            last_lifecycle: Mutex::new(None),
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn n_ctx(&self) -> usize {
        self.n_ctx
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_processing(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Number of cached tokens. Readable without occupancy, for introspection.
    pub fn n_past(&self) -> usize {
        lock(&self.state).len()
    }

    pub fn last_lifecycle(&self) -> Option<SlotLifecycle> {
        lock(&self.last_lifecycle).clone()
    }

    /// Take the slot if it is free.
    pub fn try_acquire(self: &Arc<Self>) -> Result<SlotGuard, SlotError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SlotError::Busy(self.id))?;
        Ok(SlotGuard {
            slot: self.clone(),
        })
    }

    /// Wait until the slot is free, then take it.
    pub async fn acquire(self: &Arc<Self>) -> SlotGuard {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // register before checking so a release in between is not missed
            notified.as_mut().enable();
            if let Ok(guard) = self.try_acquire() {
                return guard;
            }
            notified.await;
        }
    }

    fn release(&self) {
        self.busy.store(false, Ordering::Release);
        self.released.notify_waiters();
    }
}

/// Exclusive access to a [`Slot`]. Occupancy is released on drop; the token state stays.
#[derive(Debug)]
pub struct SlotGuard {
    slot: Arc<Slot>,
}

impl SlotGuard {
    pub fn id(&self) -> SlotId {
        self.slot.id
    }

    pub fn n_ctx(&self) -> usize {
        self.slot.n_ctx
    }

    pub fn model(&self) -> &str {
        &self.slot.model
    }

    pub fn slot(&self) -> &Arc<Slot> {
        &self.slot
    }

    /// A copy of the cached state.
    pub fn state(&self) -> TokenState {
        lock(&self.slot.state).clone()
    }

    pub fn n_past(&self) -> usize {
        lock(&self.slot.state).len()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut TokenState) -> R) -> R {
        f(&mut lock(&self.slot.state))
    }

    pub fn replace_state(&self, state: TokenState) {
        *lock(&self.slot.state) = state;
    }

    /// Clear the cached state, returning how many tokens were dropped.
    pub fn erase(&self) -> usize {
        let mut state = lock(&self.slot.state);
        let n = state.len();
        state.clear();
        n
    }

    pub fn record_lifecycle(&self, lifecycle: SlotLifecycle) {
        *lock(&self.slot.last_lifecycle) = Some(lifecycle);
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slot.release();
    }
}

// a panic while holding the lock leaves the data consistent: every mutation is a single call
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
