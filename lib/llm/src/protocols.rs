// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Engine Protocols
//! ================
//!
//! [`common`] holds the request and response types exchanged with the inference engine.
//! [`completions`] and [`chat`] are the client facing wire types of the llama-style
//! `/completion` endpoint and the OpenAI-style `/chat/completions` endpoint.

pub mod chat;
pub mod common;
pub mod completions;

pub use crate::tokens::Token as TokenIdType;

/// Seed value that asks for a random seed, as in llama-server.
pub const RANDOM_SEED: u64 = 4_294_967_295;

/// Seconds since the unix epoch, for the `created` fields.
pub fn unix_timestamp() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
