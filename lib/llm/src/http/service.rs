// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! HTTP Service for the Slot Router
//!
//! Serves the llama-server compatible surface: `/completion`, OpenAI style
//! `/v1/chat/completions`, model management under `/models`, slot management under
//! `/slots`, `/props`, `/metrics` and the health probes.
//!
//! Every completion request is served as a stream by the [`crate::serving::ServingEngine`].
//! Non-streaming requests are folded by the handler into a single response body, so the
//! slot lifecycle record is computed in exactly one place for both modes.
//!
//! The [`service_v2::HttpService`] is built with [`service_v2::HttpServiceConfigBuilder`],
//! which wires the router, the lifecycle policy and the prometheus registry from a
//! [`crate::config::ServerConfig`].

mod auth;
mod models;
mod openai;
mod props;
mod slots;

pub mod disconnect;
pub mod error;
pub mod health;
pub mod metrics;
pub mod service_v2;

pub use axum;
pub use metrics::Metrics;

/// Documentation for a route
#[derive(Debug, Clone)]
pub struct RouteDoc {
    method: axum::http::Method,
    path: String,
}

impl std::fmt::Display for RouteDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

impl RouteDoc {
    pub fn new<T: Into<String>>(method: axum::http::Method, path: T) -> Self {
        RouteDoc {
            method,
            path: path.into(),
        }
    }

    pub fn method(&self) -> &axum::http::Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}
