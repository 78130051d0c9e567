// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Slots
//!
//! A [`SlotPool`] owns a fixed number of [`Slot`]s for one loaded model. A request holds
//! one slot for its whole duration through a [`SlotGuard`]. The slot keeps its cached
//! [`crate::tokens::TokenState`] between requests, so a later prompt with a common prefix
//! only evaluates the part that differs ([`PrefixPlan`]).
//!
//! Slot state can be written to and read from checkpoint files ([`CheckpointStore`]),
//! either on request or automatically under a [`LifecyclePolicy`].

pub mod checkpoint;
pub mod lifecycle;
pub mod metrics;
pub mod pool;
pub mod prefix;
pub mod slot;

pub use checkpoint::{CheckpointError, CheckpointStore, RestoreQuality};
pub use lifecycle::{
    LifecycleError, LifecyclePolicy, RestoreReport, SaveDecision, SlotLifecycle,
    SlotLifecycleMode,
};
pub use metrics::SlotMetrics;
pub use pool::SlotPool;
pub use prefix::PrefixPlan;
pub use slot::{Slot, SlotGuard, SlotId};

use crate::error::{ErrorKind, HasErrorKind};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("invalid slot id {id}, the pool has {n_slots} slots")]
    InvalidId { id: SlotId, n_slots: usize },

    #[error("slot {0} is busy processing another request")]
    Busy(SlotId),

    #[error("no free slot available")]
    NoneAvailable,
}

impl HasErrorKind for SlotError {
    fn kind(&self) -> ErrorKind {
        match self {
            SlotError::InvalidId { .. } => ErrorKind::NotFound,
            SlotError::Busy(_) => ErrorKind::Conflict,
            SlotError::NoneAvailable => ErrorKind::ResourceExhausted,
        }
    }
}
