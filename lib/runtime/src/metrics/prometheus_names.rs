// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metric name constants

/// Metric name prefixes
pub mod name_prefix {
    /// Prefix for slot lifecycle counters, joined with `:`
    pub const SLOTS: &str = "slotrouter";

    /// Prefix for HTTP frontend metrics, joined with `_`
    pub const FRONTEND: &str = "slotrouter_frontend";
}

/// Environment variable that overrides [`name_prefix::FRONTEND`]
pub const METRICS_PREFIX_ENV: &str = "SLR_METRICS_PREFIX";

/// Slot persistence counters, exported as `{prefix}:{name}`
pub mod slot_lifecycle {
    /// Slot checkpoints written, manual or lifecycle driven
    pub const SAVE_TOTAL: &str = "slot_save_total";

    /// Slot checkpoints restored, manual or lifecycle driven
    pub const RESTORE_TOTAL: &str = "slot_restore_total";

    /// Restores that used a checkpoint sidecar (quality `full`)
    pub const RESTORE_FULL_TOTAL: &str = "slot_restore_full_total";

    /// Lifecycle saves skipped by the reuse guard
    pub const SAVE_SKIPPED_TOTAL: &str = "slot_save_skipped_total";
}

/// HTTP frontend metrics, exported as `{prefix}_{name}`
pub mod frontend_service {
    /// Requests processed, labelled by model, endpoint, request type and status
    pub const REQUESTS_TOTAL: &str = "requests_total";

    /// Requests currently being served, per model
    pub const INFLIGHT_REQUESTS: &str = "inflight_requests";

    /// End-to-end request duration
    pub const REQUEST_DURATION_SECONDS: &str = "request_duration_seconds";

    /// Prompt tokens actually evaluated (after prefix reuse)
    pub const INPUT_SEQUENCE_TOKENS: &str = "input_sequence_tokens";

    /// Generated tokens
    pub const OUTPUT_SEQUENCE_TOKENS: &str = "output_sequence_tokens";

    /// Prompt tokens served from the slot cache (`cache_n`)
    pub const CACHED_PROMPT_TOKENS: &str = "cached_prompt_tokens";

    pub const TIME_TO_FIRST_TOKEN_SECONDS: &str = "time_to_first_token_seconds";
}

/// Model router gauges and counters, exported as `{frontend prefix}_{name}`
pub mod model_router {
    /// Models currently loaded
    pub const MODELS_RESIDENT: &str = "models_resident";

    /// Loads, labelled by model and outcome
    pub const MODEL_LOADS_TOTAL: &str = "model_loads_total";

    /// Unloads, labelled by model and reason (`manual`, `evicted`, `idle`)
    pub const MODEL_UNLOADS_TOTAL: &str = "model_unloads_total";
}
