// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! OpenAI-compatible chat completions, with the llama-server extensions (`id_slot`,
//! `cache_prompt`, `timings`, `slot_lifecycle`).

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use validator::Validate;

use slotrouter_runtime::protocols::Annotated;

use super::common::Timings;
use super::completions::{default_cache_prompt, slot_from_wire};
use super::unix_timestamp;
use crate::router::AUTO_MODEL;
use crate::serving::{Prompt, ServeEvent, ServeRequest, ServeSummary};
use crate::slots::SlotLifecycle;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Validate)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,

    #[validate(length(min = 1))]
    pub messages: Vec<ChatMessage>,

    #[serde(default, alias = "max_completion_tokens", alias = "n_predict")]
    #[validate(range(min = -1))]
    pub max_tokens: Option<i64>,

    #[serde(default)]
    #[validate(range(min = 0.0, max = 2.0))]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default)]
    pub stream: bool,

    #[serde(default = "default_cache_prompt")]
    pub cache_prompt: bool,

    #[serde(default)]
    pub id_slot: Option<i64>,

    #[serde(default)]
    pub ignore_eos: bool,
}

impl ChatCompletionRequest {
    pub fn model_or_auto(&self) -> String {
        match self.model.as_deref() {
            Some(model) if !model.is_empty() => model.to_string(),
            _ => AUTO_MODEL.to_string(),
        }
    }

    pub fn into_serve_request(self) -> ServeRequest {
        ServeRequest {
            model: self.model_or_auto(),
            prompt: Prompt::Chat(self.messages),
            id_slot: slot_from_wire(self.id_slot),
            cache_prompt: self.cache_prompt,
            n_predict: self.max_tokens,
            temperature: self.temperature,
            seed: self.seed,
            ignore_eos: self.ignore_eos,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl From<&ServeSummary> for Usage {
    fn from(summary: &ServeSummary) -> Self {
        Usage {
            prompt_tokens: summary.tokens_evaluated,
            completion_tokens: summary.tokens_predicted,
            total_tokens: summary.tokens_evaluated + summary.tokens_predicted,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Usage,
    pub id_slot: usize,
    pub timings: Timings,
    pub slot_lifecycle: SlotLifecycle,
}

impl ChatCompletionResponse {
    pub async fn from_annotated_stream(
        id: String,
        stream: impl Stream<Item = Annotated<ServeEvent>>,
    ) -> anyhow::Result<Self> {
        let mut content = String::new();
        let mut summary = None;

        tokio::pin!(stream);
        while let Some(item) = stream.next().await {
            match item.into_result()? {
                Some(ServeEvent::Delta { content: delta, .. }) => content.push_str(&delta),
                Some(ServeEvent::Final(final_summary)) => summary = Some(final_summary),
                None => {}
            }
        }

        let summary = summary
            .ok_or_else(|| anyhow::anyhow!("stream ended before the final response"))?;
        Ok(ChatCompletionResponse {
            id,
            object: "chat.completion".to_string(),
            created: unix_timestamp(),
            model: summary.model.clone(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage::new("assistant", content),
                finish_reason: summary.finish_reason.as_openai().to_string(),
            }],
            usage: Usage::from(summary.as_ref()),
            id_slot: summary.id_slot,
            timings: summary.timings,
            slot_lifecycle: summary.slot_lifecycle.clone(),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ChatDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatChunkChoice {
    pub index: u32,
    pub delta: ChatDelta,
    /// `null` on every chunk but the last
    pub finish_reason: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timings: Option<Timings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_lifecycle: Option<SlotLifecycle>,
}

/// Turns serving events into chunks that share one id and creation time.
#[derive(Debug, Clone)]
pub struct ChatChunkBuilder {
    id: String,
    created: u64,
    model: String,
    first: bool,
}

impl ChatChunkBuilder {
    pub fn new(id: String, model: String) -> Self {
        ChatChunkBuilder {
            id,
            created: unix_timestamp(),
            model,
            first: true,
        }
    }

    pub fn chunk(&mut self, event: ServeEvent) -> ChatCompletionChunk {
        match event {
            ServeEvent::Delta { content, .. } => {
                let role = if self.first {
                    self.first = false;
                    Some("assistant".to_string())
                } else {
                    None
                };
                self.build(
                    ChatDelta {
                        role,
                        content: Some(content),
                    },
                    None,
                    None,
                )
            }
            ServeEvent::Final(summary) => {
                self.model = summary.model.clone();
                self.build(
                    ChatDelta::default(),
                    Some(summary.finish_reason.as_openai().to_string()),
                    Some(summary.as_ref()),
                )
            }
        }
    }

    fn build(
        &self,
        delta: ChatDelta,
        finish_reason: Option<String>,
        summary: Option<&ServeSummary>,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: summary.map(Usage::from),
            timings: summary.map(|s| s.timings),
            slot_lifecycle: summary.map(|s| s.slot_lifecycle.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::common::FinishReason;
    use crate::slots::{SaveDecision, SlotLifecycleMode};

    fn summary(finish_reason: FinishReason) -> ServeSummary {
        ServeSummary {
            model: "tiny".to_string(),
            id_slot: 0,
            finish_reason,
            tokens_evaluated: 6,
            tokens_predicted: 2,
            tokens_cached: 0,
            timings: Timings::default(),
            slot_lifecycle: SlotLifecycle {
                enabled: true,
                mode: SlotLifecycleMode::Conservative,
                restore_attempted: true,
                restore_success: false,
                restore_quality: None,
                restore_effective: false,
                n_restored: 0,
                cache_reused_tokens: 0,
                reuse_ratio: 0.0,
                save_decision: SaveDecision::SaveSucceeded,
                n_saved: 7,
            },
        }
    }

    #[test]
    fn test_request_aliases() {
        let request: ChatCompletionRequest = serde_json::from_str(
            r#"{"messages": [{"role": "user", "content": "hi"}], "max_completion_tokens": 4}"#,
        )
        .unwrap();
        assert_eq!(request.max_tokens, Some(4));
        assert!(request.validate().is_ok());

        let empty: ChatCompletionRequest = serde_json::from_str(r#"{"messages": []}"#).unwrap();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_stream_chunks() {
        let mut builder = ChatChunkBuilder::new("chatcmpl-1".to_string(), "tiny".to_string());

        let first = serde_json::to_value(builder.chunk(ServeEvent::Delta {
            id_slot: 0,
            content: " hello".to_string(),
            token_ids: vec![300],
        }))
        .unwrap();
        assert_eq!(first["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(first["choices"][0]["delta"]["content"], " hello");
        assert!(first["choices"][0]["finish_reason"].is_null());
        assert!(first.get("slot_lifecycle").is_none());

        let last = serde_json::to_value(
            builder.chunk(ServeEvent::Final(Box::new(summary(FinishReason::EoS)))),
        )
        .unwrap();
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
        assert!(last["choices"][0]["delta"].get("content").is_none());
        assert_eq!(last["slot_lifecycle"]["enabled"], true);
        assert_eq!(last["usage"]["total_tokens"], 8);
        assert_eq!(last["id"], first["id"]);
    }

    #[tokio::test]
    async fn test_fold_stream() {
        let items = vec![
            Annotated::from_data(ServeEvent::Delta {
                id_slot: 0,
                content: "one".to_string(),
                token_ids: vec![1],
            }),
            Annotated::from_data(ServeEvent::Final(Box::new(summary(FinishReason::Length)))),
        ];
        let response =
            ChatCompletionResponse::from_annotated_stream("x".to_string(), futures::stream::iter(items))
                .await
                .unwrap();
        assert_eq!(response.choices[0].message.content, "one");
        assert_eq!(response.choices[0].finish_reason, "length");
        assert_eq!(response.slot_lifecycle.n_saved, 7);
    }
}
