// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::protocols::chat::ChatMessage;
use crate::tokenizers::{Decoder, Encoder, Result, TokenIdType, Tokenizer};

pub const BOS_TOKEN: TokenIdType = 1;
pub const EOS_TOKEN: TokenIdType = 2;

/// First byte token; byte `b` encodes as `BYTE_OFFSET + b`.
const BYTE_OFFSET: TokenIdType = 3;

/// First word token, right after the 256 byte tokens.
pub const WORD_OFFSET: TokenIdType = BYTE_OFFSET + 256;

/// What the mock model "says". Word `i` is token `WORD_OFFSET + i` and decodes as `" word"`.
pub const WORDS: &[&str] = &[
    "the", "slot", "cache", "model", "token", "prompt", "state", "saved", "restored", "again",
    "quick", "brown", "fox", "jumps", "over", "lazy", "dog", "and", "then", "some",
    "more", "text", "here", "is", "a", "small", "story", "about", "llamas", "in",
    "the", "sun",
];

/// Byte level tokenizer for the mock engine.
#[derive(Debug, Clone, Default)]
pub struct MockTokenizer;

impl MockTokenizer {
    pub fn new() -> Self {
        MockTokenizer
    }

    pub fn n_words() -> usize {
        WORDS.len()
    }

    pub fn word_token(index: usize) -> TokenIdType {
        WORD_OFFSET + (index % WORDS.len()) as TokenIdType
    }
}

impl Encoder for MockTokenizer {
    fn encode(&self, input: &str) -> Result<Vec<TokenIdType>> {
        Ok(input
            .bytes()
            .map(|b| BYTE_OFFSET + TokenIdType::from(b))
            .collect())
    }
}

impl Decoder for MockTokenizer {
    fn decode(&self, token_ids: &[TokenIdType], skip_special_tokens: bool) -> Result<String> {
        let mut out = String::new();
        let mut bytes = Vec::new();
        for &token in token_ids {
            if (BYTE_OFFSET..WORD_OFFSET).contains(&token) {
                bytes.push((token - BYTE_OFFSET) as u8);
                continue;
            }
            if !bytes.is_empty() {
                out.push_str(&String::from_utf8_lossy(&bytes));
                bytes.clear();
            }
            match token {
                BOS_TOKEN if !skip_special_tokens => out.push_str("<s>"),
                EOS_TOKEN if !skip_special_tokens => out.push_str("</s>"),
                BOS_TOKEN | EOS_TOKEN => {}
                t if t >= WORD_OFFSET => match WORDS.get((t - WORD_OFFSET) as usize) {
                    Some(word) => {
                        out.push(' ');
                        out.push_str(word);
                    }
                    None => anyhow::bail!("token {t} is outside the mock vocabulary"),
                },
                t => anyhow::bail!("token {t} is outside the mock vocabulary"),
            }
        }
        if !bytes.is_empty() {
            out.push_str(&String::from_utf8_lossy(&bytes));
        }
        Ok(out)
    }
}

impl Tokenizer for MockTokenizer {
    fn bos_token_id(&self) -> Option<TokenIdType> {
        Some(BOS_TOKEN)
    }

    fn eos_token_id(&self) -> Option<TokenIdType> {
        Some(EOS_TOKEN)
    }

    fn apply_chat_template(&self, messages: &[ChatMessage]) -> Result<String> {
        let mut prompt = String::new();
        for message in messages {
            prompt.push_str("<|");
            prompt.push_str(&message.role);
            prompt.push_str("|>\n");
            prompt.push_str(&message.content);
            prompt.push('\n');
        }
        prompt.push_str("<|assistant|>\n");
        Ok(prompt)
    }
}
