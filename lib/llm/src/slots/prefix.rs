// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::tokens::Token;

/// Length of the longest common prefix of two token sequences.
pub fn common_prefix_len(a: &[Token], b: &[Token]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// How a prompt maps onto a slot's cached tokens.
///
/// The slot keeps `n_reused` cached tokens and evaluates the remaining `prompt_n`. At least
/// one prompt token is always evaluated so that the engine has logits to sample from, which
/// is why an identical prompt still reports `prompt_n == 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixPlan {
    /// Tokens served from the cache (`cache_n`)
    pub n_reused: usize,
    /// Tokens evaluated this turn (`prompt_n`)
    pub prompt_n: usize,
    /// Cached tokens discarded because they diverge from the prompt
    pub n_discarded: usize,
}

impl PrefixPlan {
    pub fn compute(cached: &[Token], prompt: &[Token], cache_prompt: bool) -> Self {
        let n_reused = if cache_prompt && !prompt.is_empty() {
            common_prefix_len(cached, prompt).min(prompt.len() - 1)
        } else {
            0
        };
        PrefixPlan {
            n_reused,
            prompt_n: prompt.len() - n_reused,
            n_discarded: cached.len() - n_reused,
        }
    }

    /// The part of the prompt that has to be evaluated.
    pub fn suffix<'a>(&self, prompt: &'a [Token]) -> &'a [Token] {
        &prompt[self.n_reused..]
    }

    /// Share of the prompt served from cache, 0 for an empty prompt.
    pub fn reuse_ratio(&self) -> f64 {
        let total = self.n_reused + self.prompt_n;
        if total == 0 {
            0.0
        } else {
            self.n_reused as f64 / total as f64
        }
    }
}
