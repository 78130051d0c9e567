// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! # Slot Router LLM
//!
//! A model router with per-model slot pools whose prompt caches survive model unloads.
//!
//! - [`router`]: registry of configured models, LRU eviction under `models_max`, autoload
//! - [`slots`]: slot pools, prefix reuse, checkpoint files and the save/restore lifecycle
//! - [`serving`]: one completion request through router, slot and engine
//! - [`http`]: the llama-server compatible axum service

pub mod config;
pub mod error;
pub mod http;
pub mod mocker;
pub mod protocols;
pub mod router;
pub mod serving;
pub mod slots;
pub mod tokenizers;
pub mod tokens;
