// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Tokenizer seam between the serving pipeline and a model.

use crate::protocols::chat::ChatMessage;

pub use crate::protocols::TokenIdType;

pub type Error = anyhow::Error;
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod traits {
    use super::*;

    pub trait Encoder: Send + Sync {
        /// Encode text without special tokens.
        fn encode(&self, input: &str) -> Result<Vec<TokenIdType>>;
    }

    pub trait Decoder: Send + Sync {
        fn decode(&self, token_ids: &[TokenIdType], skip_special_tokens: bool) -> Result<String>;
    }

    pub trait Tokenizer: Encoder + Decoder + std::fmt::Debug {
        fn bos_token_id(&self) -> Option<TokenIdType>;

        fn eos_token_id(&self) -> Option<TokenIdType>;

        /// Flatten a conversation into the prompt text the model expects.
        fn apply_chat_template(&self, messages: &[ChatMessage]) -> Result<String>;

        /// Encode a prompt, with the BOS token when the model has one.
        fn encode_prompt(&self, input: &str) -> Result<Vec<TokenIdType>> {
            let mut tokens: Vec<TokenIdType> = self.bos_token_id().into_iter().collect();
            tokens.extend(self.encode(input)?);
            Ok(tokens)
        }
    }
}

pub use traits::{Decoder, Encoder, Tokenizer};
