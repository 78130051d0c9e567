// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! MockEngine - AsyncEngine that evaluates tokens on a deterministic cell chain
//!
//! Evaluating token `t` after cell `c` produces `chain_cell(t, c)`, so two slots that
//! evaluated the same tokens hold the same cells. Sampling reads the last cell: greedy
//! decoding at temperature 0 is a pure function of the evaluated sequence.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use slotrouter_runtime::engine::AsyncEngineContext;
use slotrouter_runtime::pipeline::{
    async_trait, AsyncEngine, AsyncEngineContextProvider, Error, ManyOut, ResponseStream,
    SingleIn,
};

use super::protocols::MockEngineArgs;
use super::tokenizer::{MockTokenizer, EOS_TOKEN};
use crate::protocols::common::{LLMEngineOutput, PreprocessedRequest, SamplingOptions};
use crate::protocols::TokenIdType;
use crate::tokens::{chain_cell, Cell};

enum Sampler {
    Greedy,
    Random(StdRng),
}

impl Sampler {
    fn new(options: &SamplingOptions) -> Self {
        if options.temperature <= 0.0 {
            return Sampler::Greedy;
        }
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Sampler::Random(rng)
    }

    /// Sample the next token after `cell`. EOS is only drawn when `eos_period > 0`.
    fn sample(&mut self, cell: Cell, eos_period: u64) -> TokenIdType {
        let n_words = MockTokenizer::n_words() as u64;
        match self {
            Sampler::Greedy => {
                if eos_period > 0 && (cell >> 32) % eos_period == 0 {
                    return EOS_TOKEN;
                }
                MockTokenizer::word_token((cell % n_words) as usize)
            }
            Sampler::Random(rng) => {
                let denominator = eos_period.min(u64::from(u32::MAX)) as u32;
                if eos_period > 0 && rng.random_ratio(1, denominator) {
                    return EOS_TOKEN;
                }
                MockTokenizer::word_token(rng.random_range(0..n_words) as usize)
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    args: MockEngineArgs,
}

impl MockEngine {
    pub fn new(args: MockEngineArgs) -> Self {
        Self { args }
    }

    pub fn args(&self) -> &MockEngineArgs {
        &self.args
    }
}

async fn pause(delay: Duration, ctx: &dyn AsyncEngineContext) {
    if delay.is_zero() {
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = ctx.stopped() => {}
    }
}

#[async_trait]
impl AsyncEngine<SingleIn<PreprocessedRequest>, ManyOut<LLMEngineOutput>, Error> for MockEngine {
    async fn generate(
        &self,
        input: SingleIn<PreprocessedRequest>,
    ) -> Result<ManyOut<LLMEngineOutput>, Error> {
        let (request, ctx) = input.into_parts();
        let async_context = ctx.context();

        if request.n_past + request.token_ids.len() > request.n_ctx {
            return Err(Error::msg(format!(
                "{} cached + {} new tokens exceed the slot context of {}",
                request.n_past,
                request.token_ids.len(),
                request.n_ctx
            )));
        }

        let (stream_tx, stream_rx) = mpsc::channel::<LLMEngineOutput>(64);
        let args = self.args.clone();
        let engine_context = async_context.clone();

        tokio::spawn(async move {
            let ctx = engine_context.as_ref();
            let eos_period = if request.ignore_eos { 0 } else { args.eos_period };
            let mut sampler = Sampler::new(&request.sampling_options);

            // prefill
            let mut cell = request.past_cell;
            let mut evaluated = Vec::with_capacity(request.token_ids.len());
            for &token in &request.token_ids {
                cell = chain_cell(token, cell);
                evaluated.push((token, cell));
            }
            let mut n_past = request.n_past + evaluated.len();
            pause(args.prefill_delay(evaluated.len()), ctx).await;

            let max_tokens = request.max_tokens.map(|n| n as usize);
            if max_tokens == Some(0) {
                let _ = stream_tx
                    .send(LLMEngineOutput {
                        evaluated,
                        ..LLMEngineOutput::length()
                    })
                    .await;
                return;
            }

            let mut generated = 0;
            loop {
                if ctx.is_stopped() {
                    let _ = stream_tx
                        .send(LLMEngineOutput {
                            evaluated,
                            ..LLMEngineOutput::cancelled()
                        })
                        .await;
                    break;
                }

                let token = sampler.sample(cell, eos_period);
                if token == EOS_TOKEN {
                    let _ = stream_tx
                        .send(LLMEngineOutput {
                            evaluated,
                            ..LLMEngineOutput::stop()
                        })
                        .await;
                    break;
                }
                generated += 1;

                // the last sampled token is returned but never evaluated
                let at_limit = max_tokens.is_some_and(|max| generated >= max);
                let ctx_full = n_past >= request.n_ctx;
                if at_limit || ctx_full {
                    let _ = stream_tx
                        .send(LLMEngineOutput {
                            evaluated,
                            token_ids: vec![token],
                            ..LLMEngineOutput::length()
                        })
                        .await;
                    break;
                }

                let output = LLMEngineOutput {
                    evaluated: std::mem::take(&mut evaluated),
                    token_ids: vec![token],
                    text: None,
                    finish_reason: None,
                };
                if stream_tx.send(output).await.is_err() {
                    tracing::trace!("mock engine output receiver dropped; stopping");
                    break;
                }

                pause(args.decode_delay(), ctx).await;
                cell = chain_cell(token, cell);
                evaluated.push((token, cell));
                n_past += 1;
            }
        });

        let stream = ReceiverStream::new(stream_rx);
        Ok(ResponseStream::new(Box::pin(stream), async_context))
    }
}
