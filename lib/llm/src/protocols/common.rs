// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use slotrouter_runtime::pipeline::{ManyOut, ServiceEngine, SingleIn};

use super::TokenIdType;
use crate::tokens::Cell;

/// The engine a loaded model runs requests on.
pub type ExecutionContext = ServiceEngine<SingleIn<PreprocessedRequest>, ManyOut<LLMEngineOutput>>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    #[serde(rename = "eos")]
    EoS,

    #[serde(rename = "length")]
    Length,

    #[serde(rename = "stop")]
    Stop,

    #[serde(rename = "error")]
    Error(String),

    #[serde(rename = "cancelled")]
    Cancelled,
}

impl FinishReason {
    /// The OpenAI `finish_reason` value. Only `length` is distinguished from `stop`.
    pub fn as_openai(&self) -> &'static str {
        match self {
            FinishReason::Length => "length",
            _ => "stop",
        }
    }

    /// The llama-server `stop_type` value.
    pub fn stop_type(&self) -> &'static str {
        match self {
            FinishReason::EoS => "eos",
            FinishReason::Length => "limit",
            FinishReason::Stop => "word",
            FinishReason::Error(_) | FinishReason::Cancelled => "none",
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::EoS => write!(f, "eos"),
            FinishReason::Length => write!(f, "length"),
            FinishReason::Stop => write!(f, "stop"),
            FinishReason::Error(msg) => write!(f, "error: {}", msg),
            FinishReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for FinishReason {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eos" => Ok(FinishReason::EoS),
            "length" => Ok(FinishReason::Length),
            "stop" => Ok(FinishReason::Stop),
            "cancelled" => Ok(FinishReason::Cancelled),
            s if s.starts_with("error: ") => Ok(FinishReason::Error(s[7..].to_string())),
            _ => Err(anyhow::anyhow!("Invalid FinishReason variant: '{}'", s)),
        }
    }
}

/// Sampling knobs passed through to the engine.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct SamplingOptions {
    /// 0 means greedy decoding
    pub temperature: f32,

    /// `None` draws a fresh seed per request
    pub seed: Option<u64>,
}

/// The engine's view of one turn on a slot.
///
/// The slot already holds `n_past` evaluated tokens ending in `past_cell`; the engine
/// evaluates `token_ids` on top of them and then samples up to `max_tokens` new tokens.
#[derive(Serialize, Deserialize, Debug, Clone, Builder)]
pub struct PreprocessedRequest {
    pub model: String,

    /// The part of the prompt that is not served from the slot cache
    pub token_ids: Vec<TokenIdType>,

    #[builder(default)]
    pub n_past: usize,

    /// Cell of the last cached token, or the model's root cell for an empty slot
    pub past_cell: Cell,

    /// Context size of the slot
    pub n_ctx: usize,

    /// `None` generates until the slot context is full
    #[builder(default)]
    pub max_tokens: Option<u32>,

    #[builder(default)]
    pub ignore_eos: bool,

    #[builder(default)]
    pub sampling_options: SamplingOptions,
}

impl PreprocessedRequest {
    pub fn builder() -> PreprocessedRequestBuilder {
        PreprocessedRequestBuilder::default()
    }
}

/// One step of engine output.
///
/// `evaluated` lists the tokens the engine committed to the slot since the previous
/// output, with the cell each produced. The caller appends them to the slot state.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct LLMEngineOutput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evaluated: Vec<(TokenIdType, Cell)>,

    pub token_ids: Vec<TokenIdType>,

    /// Detokenized text, when the engine does its own detokenization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl LLMEngineOutput {
    pub fn cancelled() -> Self {
        LLMEngineOutput {
            finish_reason: Some(FinishReason::Cancelled),
            ..Default::default()
        }
    }

    pub fn stop() -> Self {
        LLMEngineOutput {
            finish_reason: Some(FinishReason::Stop),
            ..Default::default()
        }
    }

    pub fn length() -> Self {
        LLMEngineOutput {
            finish_reason: Some(FinishReason::Length),
            ..Default::default()
        }
    }

    pub fn error(err_msg: String) -> Self {
        LLMEngineOutput {
            finish_reason: Some(FinishReason::Error(err_msg)),
            ..Default::default()
        }
    }
}

/// Per-request timing and cache usage, llama-server `timings` object.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct Timings {
    /// Tokens served from the slot cache
    pub cache_n: usize,
    /// Prompt tokens evaluated this turn
    pub prompt_n: usize,
    pub prompt_ms: f64,
    pub prompt_per_token_ms: f64,
    pub prompt_per_second: f64,
    pub predicted_n: usize,
    pub predicted_ms: f64,
    pub predicted_per_token_ms: f64,
    pub predicted_per_second: f64,
}

impl Timings {
    pub fn new(
        cache_n: usize,
        prompt_n: usize,
        prompt_ms: f64,
        predicted_n: usize,
        predicted_ms: f64,
    ) -> Self {
        let (prompt_per_token_ms, prompt_per_second) = rates(prompt_n, prompt_ms);
        let (predicted_per_token_ms, predicted_per_second) = rates(predicted_n, predicted_ms);
        Timings {
            cache_n,
            prompt_n,
            prompt_ms,
            prompt_per_token_ms,
            prompt_per_second,
            predicted_n,
            predicted_ms,
            predicted_per_token_ms,
            predicted_per_second,
        }
    }
}

fn rates(n: usize, ms: f64) -> (f64, f64) {
    if n == 0 {
        return (0.0, 0.0);
    }
    let per_token = ms / n as f64;
    let per_second = if ms > 0.0 { 1e3 * n as f64 / ms } else { 0.0 };
    (per_token, per_second)
}
