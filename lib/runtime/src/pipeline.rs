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

use std::pin::Pin;

mod context;
pub use context::{Context, Controller};

pub use crate::engine::{
    async_trait, AsyncEngine, AsyncEngineContext, AsyncEngineContextProvider, AsyncEngineStream,
    Data, DataStream, Engine, EngineStream, ResponseStream,
};

pub type Error = anyhow::Error;

/// A single request wrapped with its stream controller.
pub type SingleIn<T> = Context<T>;

/// A stream of responses bound to the request's controller.
pub type ManyOut<T> = Pin<Box<dyn AsyncEngineStream<T>>>;

pub type ServiceEngine<T, U> = Engine<T, U, Error>;
