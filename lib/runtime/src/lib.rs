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

//! Slot Router Runtime
//!
//! Process-local building blocks shared by the router and its launcher: logging setup,
//! runtime configuration, the streaming [`engine::AsyncEngine`] abstraction, per-request
//! [`pipeline::Context`] and the [`protocols::annotated::Annotated`] stream item.

pub use anyhow::{
    anyhow as error, bail as raise, Context as ErrorContext, Error, Ok as OK, Result,
};

mod config;
pub use config::{
    env_is_falsey, env_is_truthy, is_falsey, is_truthy, RuntimeConfig, RuntimeConfigBuilder,
};

pub mod engine;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod protocols;

pub use futures::stream;
pub use tokio_util::sync::CancellationToken;
