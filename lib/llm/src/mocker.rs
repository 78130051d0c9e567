// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Mock inference engine and tokenizer, used by the launcher and the tests in place of a
//! real model.

pub mod engine;
pub mod protocols;
pub mod tokenizer;

pub use engine::MockEngine;
pub use protocols::MockEngineArgs;
pub use tokenizer::MockTokenizer;
