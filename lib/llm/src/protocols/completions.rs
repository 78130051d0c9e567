// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! llama-server `/completion` request and response bodies.
//!
//! The same [`CompletionResponse`] shape is used for the unary body, for every stream
//! chunk, and for the final stream chunk. Only the final one (`stop: true`) carries the
//! [`CompletionSummary`] with `timings` and `slot_lifecycle`.

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use validator::Validate;

use slotrouter_runtime::protocols::Annotated;

use super::TokenIdType;
use crate::router::AUTO_MODEL;
use crate::serving::{Prompt, ServeEvent, ServeRequest, ServeSummary};
use crate::slots::SlotLifecycle;

use super::common::Timings;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum CompletionPrompt {
    Text(String),
    Tokens(Vec<TokenIdType>),
}

#[derive(Serialize, Deserialize, Debug, Clone, Validate)]
pub struct CompletionRequest {
    #[serde(default)]
    pub model: Option<String>,

    pub prompt: CompletionPrompt,

    /// -1 generates until the context is full
    #[serde(default, alias = "max_tokens")]
    #[validate(range(min = -1))]
    pub n_predict: Option<i64>,

    #[serde(default)]
    #[validate(range(min = 0.0, max = 2.0))]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default)]
    pub stream: bool,

    #[serde(default = "default_cache_prompt")]
    pub cache_prompt: bool,

    /// -1 picks any free slot
    #[serde(default)]
    pub id_slot: Option<i64>,

    #[serde(default)]
    pub ignore_eos: bool,
}

pub(crate) fn default_cache_prompt() -> bool {
    true
}

impl CompletionRequest {
    pub fn model_or_auto(&self) -> String {
        match self.model.as_deref() {
            Some(model) if !model.is_empty() => model.to_string(),
            _ => AUTO_MODEL.to_string(),
        }
    }

    pub fn into_serve_request(self) -> ServeRequest {
        let model = self.model_or_auto();
        let prompt = match self.prompt {
            CompletionPrompt::Text(text) => Prompt::Text(text),
            CompletionPrompt::Tokens(tokens) => Prompt::Tokens(tokens),
        };
        ServeRequest {
            model,
            prompt,
            id_slot: slot_from_wire(self.id_slot),
            cache_prompt: self.cache_prompt,
            n_predict: self.n_predict,
            temperature: self.temperature,
            seed: self.seed,
            ignore_eos: self.ignore_eos,
        }
    }
}

/// llama-server uses -1 for "no preference".
pub(crate) fn slot_from_wire(id_slot: Option<i64>) -> Option<usize> {
    id_slot.and_then(|id| usize::try_from(id).ok())
}

/// Fields present only on the final response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompletionSummary {
    pub model: String,
    pub stop_type: String,
    pub tokens_predicted: usize,
    pub tokens_evaluated: usize,
    pub tokens_cached: usize,
    pub truncated: bool,
    pub timings: Timings,
    pub slot_lifecycle: SlotLifecycle,
}

impl From<&ServeSummary> for CompletionSummary {
    fn from(summary: &ServeSummary) -> Self {
        CompletionSummary {
            model: summary.model.clone(),
            stop_type: summary.finish_reason.stop_type().to_string(),
            tokens_predicted: summary.tokens_predicted,
            tokens_evaluated: summary.tokens_evaluated,
            tokens_cached: summary.tokens_cached,
            truncated: false,
            timings: summary.timings,
            slot_lifecycle: summary.slot_lifecycle.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub content: String,

    #[serde(default)]
    pub tokens: Vec<TokenIdType>,

    pub id_slot: usize,

    pub stop: bool,

    #[serde(flatten, default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<CompletionSummary>,
}

impl CompletionResponse {
    /// Convert one serving event into a stream chunk.
    pub fn from_event(event: ServeEvent) -> Self {
        match event {
            ServeEvent::Delta {
                id_slot,
                content,
                token_ids,
            } => CompletionResponse {
                content,
                tokens: token_ids,
                id_slot,
                stop: false,
                summary: None,
            },
            ServeEvent::Final(summary) => CompletionResponse {
                content: String::new(),
                tokens: vec![],
                id_slot: summary.id_slot,
                stop: true,
                summary: Some(CompletionSummary::from(summary.as_ref())),
            },
        }
    }

    /// Fold a serving stream into the unary response body.
    pub async fn from_annotated_stream(
        stream: impl Stream<Item = Annotated<ServeEvent>>,
    ) -> anyhow::Result<Self> {
        let mut content = String::new();
        let mut tokens = Vec::new();
        let mut summary = None;

        tokio::pin!(stream);
        while let Some(item) = stream.next().await {
            match item.into_result()? {
                Some(ServeEvent::Delta {
                    content: delta,
                    token_ids,
                    ..
                }) => {
                    content.push_str(&delta);
                    tokens.extend(token_ids);
                }
                Some(ServeEvent::Final(final_summary)) => summary = Some(final_summary),
                None => {}
            }
        }

        let summary = summary
            .ok_or_else(|| anyhow::anyhow!("stream ended before the final response"))?;
        Ok(CompletionResponse {
            content,
            tokens,
            id_slot: summary.id_slot,
            stop: true,
            summary: Some(CompletionSummary::from(summary.as_ref())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::common::FinishReason;
    use crate::slots::{SaveDecision, SlotLifecycleMode};

    fn summary() -> ServeSummary {
        ServeSummary {
            model: "tiny".to_string(),
            id_slot: 1,
            finish_reason: FinishReason::Length,
            tokens_evaluated: 5,
            tokens_predicted: 2,
            tokens_cached: 4,
            timings: Timings::new(4, 1, 1.0, 2, 2.0),
            slot_lifecycle: SlotLifecycle {
                enabled: false,
                mode: SlotLifecycleMode::Off,
                restore_attempted: false,
                restore_success: false,
                restore_quality: None,
                restore_effective: false,
                n_restored: 0,
                cache_reused_tokens: 4,
                reuse_ratio: 0.8,
                save_decision: SaveDecision::SkippedDisabled,
                n_saved: 0,
            },
        }
    }

    #[test]
    fn test_request_defaults() {
        let request: CompletionRequest =
            serde_json::from_str(r#"{"prompt": "hello", "id_slot": -1}"#).unwrap();
        assert!(request.cache_prompt);
        assert!(!request.stream);
        let serve = request.into_serve_request();
        assert_eq!(serve.model, AUTO_MODEL);
        assert_eq!(serve.id_slot, None);

        let request: CompletionRequest =
            serde_json::from_str(r#"{"prompt": [1, 2], "max_tokens": 3, "id_slot": 2}"#).unwrap();
        assert_eq!(request.n_predict, Some(3));
        assert_eq!(request.prompt, CompletionPrompt::Tokens(vec![1, 2]));
        assert_eq!(request.into_serve_request().id_slot, Some(2));
    }

    #[test]
    fn test_chunks_only_final_has_lifecycle() {
        let delta = CompletionResponse::from_event(ServeEvent::Delta {
            id_slot: 1,
            content: " hi".to_string(),
            token_ids: vec![300],
        });
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["stop"], false);
        assert!(json.get("slot_lifecycle").is_none());
        assert!(json.get("timings").is_none());

        let last = CompletionResponse::from_event(ServeEvent::Final(Box::new(summary())));
        let json = serde_json::to_value(&last).unwrap();
        assert_eq!(json["stop"], true);
        assert_eq!(json["timings"]["cache_n"], 4);
        assert_eq!(json["slot_lifecycle"]["save_decision"], "skipped_disabled");
        assert_eq!(json["stop_type"], "limit");
    }

    #[tokio::test]
    async fn test_fold_stream() {
        let items = vec![
            Annotated::from_data(ServeEvent::Delta {
                id_slot: 1,
                content: " a".to_string(),
                token_ids: vec![1],
            }),
            Annotated::from_data(ServeEvent::Delta {
                id_slot: 1,
                content: " b".to_string(),
                token_ids: vec![2],
            }),
            Annotated::from_data(ServeEvent::Final(Box::new(summary()))),
        ];
        let response = CompletionResponse::from_annotated_stream(futures::stream::iter(items))
            .await
            .unwrap();
        assert_eq!(response.content, " a b");
        assert_eq!(response.tokens, vec![1, 2]);
        assert!(response.stop);

        let truncated = vec![Annotated::from_data(ServeEvent::Delta {
            id_slot: 0,
            content: "x".to_string(),
            token_ids: vec![1],
        })];
        assert!(CompletionResponse::from_annotated_stream(futures::stream::iter(truncated))
            .await
            .is_err());
    }
}
