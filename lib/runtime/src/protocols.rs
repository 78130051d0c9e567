// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod annotated;
pub mod maybe_error;

pub use annotated::Annotated;
pub use maybe_error::MaybeError;
