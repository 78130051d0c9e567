// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Serving pipeline
//!
//! [`ServingEngine`] turns one completion request into a stream of [`ServeEvent`]s:
//!
//! 1. resolve the model through the [`ModelRouter`] (autoloading it if allowed)
//! 2. tokenize the prompt and check it fits a slot
//! 3. take a slot and let the [`crate::slots::LifecyclePolicy`] restore it if cold
//! 4. keep the cached prefix, evaluate the rest and stream the sampled tokens
//! 5. let the policy save the slot, release it, and emit the final event
//!
//! Everything up to the first engine output happens inside `generate`, so admission
//! errors (unknown model, busy slot, strict restore) reach the caller as a typed error
//! before any bytes are streamed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use slotrouter_runtime::pipeline::{
    async_trait, AsyncEngine, AsyncEngineContextProvider, Error, ManyOut, ResponseStream,
    SingleIn,
};
use slotrouter_runtime::protocols::Annotated;

use crate::error::{ErrorKind, HasErrorKind};
use crate::protocols::chat::ChatMessage;
use crate::protocols::common::{FinishReason, PreprocessedRequest, SamplingOptions, Timings};
use crate::protocols::RANDOM_SEED;
use crate::router::ModelRouter;
use crate::slots::{PrefixPlan, SlotLifecycle};
use crate::tokenizers::Tokenizer;
use crate::tokens::{root_cell, Token};

#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    Text(String),
    /// Used verbatim, no BOS is added
    Tokens(Vec<Token>),
    Chat(Vec<ChatMessage>),
}

/// A completion request after the HTTP layer has normalized it.
#[derive(Debug, Clone)]
pub struct ServeRequest {
    /// A registered model id or [`crate::router::AUTO_MODEL`]
    pub model: String,
    pub prompt: Prompt,
    pub id_slot: Option<usize>,
    pub cache_prompt: bool,
    /// `None` or -1 uses the server default
    pub n_predict: Option<i64>,
    pub temperature: Option<f32>,
    pub seed: Option<u64>,
    pub ignore_eos: bool,
}

impl ServeRequest {
    pub fn new(model: impl Into<String>, prompt: Prompt) -> Self {
        ServeRequest {
            model: model.into(),
            prompt,
            id_slot: None,
            cache_prompt: true,
            n_predict: None,
            temperature: None,
            seed: None,
            ignore_eos: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServeEvent {
    Delta {
        id_slot: usize,
        content: String,
        token_ids: Vec<Token>,
    },
    Final(Box<ServeSummary>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServeSummary {
    pub model: String,
    pub id_slot: usize,
    pub finish_reason: FinishReason,
    /// Prompt length in tokens
    pub tokens_evaluated: usize,
    pub tokens_predicted: usize,
    /// Tokens held by the slot after the turn
    pub tokens_cached: usize,
    pub timings: Timings,
    pub slot_lifecycle: SlotLifecycle,
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("the prompt is empty")]
    EmptyPrompt,

    #[error("the prompt has {n_prompt} tokens, the slot context is {n_ctx}")]
    ContextExceeded { n_prompt: usize, n_ctx: usize },

    #[error("failed to tokenize the prompt: {0}")]
    Tokenize(String),

    #[error("engine error: {0}")]
    Engine(String),
}

impl HasErrorKind for ServeError {
    fn kind(&self) -> ErrorKind {
        match self {
            ServeError::EmptyPrompt
            | ServeError::ContextExceeded { .. }
            | ServeError::Tokenize(_) => ErrorKind::InvalidRequest,
            ServeError::Engine(_) => ErrorKind::Internal,
        }
    }
}

/// Server-wide generation defaults, overridden per request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServingDefaults {
    /// -1 generates until the slot context is full
    pub n_predict: i64,
    pub temperature: f32,
    /// [`RANDOM_SEED`] draws a fresh seed per request
    pub seed: u64,
}

impl Default for ServingDefaults {
    fn default() -> Self {
        ServingDefaults {
            n_predict: -1,
            temperature: 0.0,
            seed: RANDOM_SEED,
        }
    }
}

impl ServingDefaults {
    fn max_tokens(&self, n_predict: Option<i64>) -> Option<u32> {
        let n = match n_predict {
            Some(n) if n >= 0 => n,
            _ => self.n_predict,
        };
        if n < 0 {
            None
        } else {
            Some(u32::try_from(n).unwrap_or(u32::MAX))
        }
    }

    fn sampling(&self, request: &ServeRequest) -> SamplingOptions {
        let seed = request.seed.unwrap_or(self.seed);
        SamplingOptions {
            temperature: request.temperature.unwrap_or(self.temperature),
            seed: (seed != RANDOM_SEED).then_some(seed),
        }
    }
}

pub struct ServingEngine {
    router: Arc<ModelRouter>,
    defaults: ServingDefaults,
}

impl ServingEngine {
    pub fn new(router: Arc<ModelRouter>, defaults: ServingDefaults) -> Self {
        Self { router, defaults }
    }

    pub fn router(&self) -> &Arc<ModelRouter> {
        &self.router
    }

    pub fn defaults(&self) -> &ServingDefaults {
        &self.defaults
    }
}

fn tokenize(tokenizer: &dyn Tokenizer, prompt: &Prompt) -> Result<Vec<Token>, ServeError> {
    let tokens = match prompt {
        Prompt::Tokens(tokens) => tokens.clone(),
        Prompt::Text(text) if text.is_empty() => return Err(ServeError::EmptyPrompt),
        Prompt::Text(text) => tokenizer
            .encode_prompt(text)
            .map_err(|e| ServeError::Tokenize(e.to_string()))?,
        Prompt::Chat(messages) if messages.is_empty() => return Err(ServeError::EmptyPrompt),
        Prompt::Chat(messages) => tokenizer
            .apply_chat_template(messages)
            .and_then(|text| tokenizer.encode_prompt(&text))
            .map_err(|e| ServeError::Tokenize(e.to_string()))?,
    };
    if tokens.is_empty() {
        return Err(ServeError::EmptyPrompt);
    }
    Ok(tokens)
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1e3
}

#[async_trait]
impl AsyncEngine<SingleIn<ServeRequest>, ManyOut<Annotated<ServeEvent>>, Error> for ServingEngine {
    async fn generate(
        &self,
        request: SingleIn<ServeRequest>,
    ) -> Result<ManyOut<Annotated<ServeEvent>>, Error> {
        let (request, ctx) = request.into_parts();
        let handle = self.router.resolve(&request.model).await?;

        let prompt = tokenize(handle.tokenizer().as_ref(), &request.prompt)?;
        let pool = handle.pool().clone();
        let n_ctx = pool.n_ctx_per_slot();
        if prompt.len() > n_ctx {
            return Err(ServeError::ContextExceeded {
                n_prompt: prompt.len(),
                n_ctx,
            }
            .into());
        }

        let guard = pool.assign(request.id_slot)?;
        let policy = self.router.policy().clone();
        let restore = policy.before_serve(&pool, &guard).await?;

        let plan = guard.with_state(|state| {
            let plan = PrefixPlan::compute(state.tokens(), &prompt, request.cache_prompt);
            state.truncate(plan.n_reused);
            plan
        });
        let past_cell = guard
            .with_state(|state| state.last_cell())
            .unwrap_or_else(|| root_cell(handle.id()));

        let preprocessed = PreprocessedRequest::builder()
            .model(handle.id().clone())
            .token_ids(plan.suffix(&prompt).to_vec())
            .n_past(plan.n_reused)
            .past_cell(past_cell)
            .n_ctx(guard.n_ctx())
            .max_tokens(self.defaults.max_tokens(request.n_predict))
            .ignore_eos(request.ignore_eos)
            .sampling_options(self.defaults.sampling(&request))
            .build()?;

        tracing::debug!(
            request_id = %ctx.id(),
            model = %handle.id(),
            id_slot = guard.id(),
            n_prompt = prompt.len(),
            cache_n = plan.n_reused,
            n_discarded = plan.n_discarded,
            "slot assigned"
        );

        let started = Instant::now();
        let mut stream = handle
            .engine()
            .generate(ctx.map(|_| preprocessed))
            .await
            .map_err(|e| ServeError::Engine(format!("{e:#}")))?;
        let async_context = stream.context();

        let (tx, rx) = mpsc::channel::<Annotated<ServeEvent>>(64);
        let stream_context = async_context.clone();
        let n_prompt = prompt.len();

        tokio::spawn(async move {
            let tokenizer = handle.tokenizer().clone();
            let model = handle.id().clone();
            let id_slot = guard.id();

            let mut finish_reason = None;
            let mut first_output = None;
            let mut n_predicted = 0;
            let mut client_gone = false;

            while let Some(output) = stream.next().await {
                first_output.get_or_insert_with(|| started.elapsed());
                guard.with_state(|state| state.extend(output.evaluated.iter().copied()));

                if !output.token_ids.is_empty() {
                    n_predicted += output.token_ids.len();
                    let content = match output.text {
                        Some(text) => text,
                        None => tokenizer
                            .decode(&output.token_ids, true)
                            .unwrap_or_else(|e| {
                                tracing::warn!(%model, error = %e, "failed to decode tokens");
                                String::new()
                            }),
                    };
                    let event = ServeEvent::Delta {
                        id_slot,
                        content,
                        token_ids: output.token_ids,
                    };
                    if !client_gone && tx.send(Annotated::from_data(event)).await.is_err() {
                        tracing::debug!(%model, id_slot, "client went away, stopping generation");
                        client_gone = true;
                        stream_context.stop_generating();
                    }
                }

                if let Some(reason) = output.finish_reason {
                    finish_reason = Some(reason);
                }
            }

            let finish_reason = finish_reason.unwrap_or(FinishReason::Cancelled);
            let interrupted = matches!(
                finish_reason,
                FinishReason::Cancelled | FinishReason::Error(_)
            ) || stream_context.is_stopped();
            let slot_lifecycle = if interrupted {
                policy.cancelled(&guard, restore, &plan)
            } else {
                policy.after_serve(&pool, &guard, restore, &plan).await
            };

            let prompt_elapsed = first_output.unwrap_or_else(|| started.elapsed());
            let predicted_elapsed = started.elapsed().saturating_sub(prompt_elapsed);
            let summary = ServeSummary {
                model,
                id_slot,
                finish_reason,
                tokens_evaluated: n_prompt,
                tokens_predicted: n_predicted,
                tokens_cached: guard.n_past(),
                timings: Timings::new(
                    plan.n_reused,
                    plan.prompt_n,
                    ms(prompt_elapsed),
                    n_predicted,
                    ms(predicted_elapsed),
                ),
                slot_lifecycle,
            };

            tracing::info!(
                model = %summary.model,
                id_slot,
                prompt_n = plan.prompt_n,
                cache_n = plan.n_reused,
                predicted_n = n_predicted,
                finish_reason = %summary.finish_reason,
                save_decision = ?summary.slot_lifecycle.save_decision,
                "request served"
            );

            // the slot and the model are free before the client sees the end of the stream
            drop(guard);
            drop(handle);

            let last = match &summary.finish_reason {
                FinishReason::Error(msg) => Annotated::from_error(msg.clone()),
                _ => Annotated::from_data(ServeEvent::Final(Box::new(summary))),
            };
            let _ = tx.send(last).await;
        });

        let stream = ReceiverStream::new(rx);
        Ok(ResponseStream::new(Box::pin(stream), async_context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify;
    use crate::mocker::MockEngineArgs;
    use crate::router::{
        MockModelLoader, ModelSpec, RouterMetrics, RouterSettings, AUTO_MODEL,
    };
    use crate::slots::{
        CheckpointStore, LifecyclePolicy, SaveDecision, SlotLifecycleMode, SlotMetrics,
    };
    use slotrouter_runtime::pipeline::Context;

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: ServingEngine,
    }

    fn fixture(mode: SlotLifecycleMode, args: MockEngineArgs) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.gguf");
        std::fs::write(&path, b"").unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path(), 16));
        let policy = Arc::new(LifecyclePolicy::new(mode, 0.5, 0, 503, Some(store)));
        let loader = Arc::new(MockModelLoader::new(args, 2, 256, SlotMetrics::default()));
        let router = ModelRouter::new(
            vec![ModelSpec::new("tiny", path)],
            loader,
            policy,
            RouterSettings::default(),
            RouterMetrics::default(),
        )
        .unwrap();
        Fixture {
            _dir: dir,
            engine: ServingEngine::new(Arc::new(router), ServingDefaults::default()),
        }
    }

    fn request(prompt: &str, n_predict: i64) -> ServeRequest {
        ServeRequest {
            id_slot: Some(0),
            n_predict: Some(n_predict),
            ignore_eos: true,
            ..ServeRequest::new(AUTO_MODEL, Prompt::Text(prompt.to_string()))
        }
    }

    async fn serve(engine: &ServingEngine, request: ServeRequest) -> (String, ServeSummary) {
        let stream = engine.generate(Context::new(request)).await.unwrap();
        let events: Vec<_> = stream.collect().await;
        let mut content = String::new();
        let mut summary = None;
        for event in events {
            match event.into_result().unwrap() {
                Some(ServeEvent::Delta { content: c, .. }) => content.push_str(&c),
                Some(ServeEvent::Final(s)) => summary = Some(*s),
                None => {}
            }
        }
        (content, summary.expect("final event"))
    }

    #[tokio::test]
    async fn test_identical_prompt_reuses_cache() {
        let f = fixture(SlotLifecycleMode::Off, MockEngineArgs::default());

        let (first, summary) = serve(&f.engine, request("hello there", 4)).await;
        assert_eq!(summary.tokens_predicted, 4);
        assert_eq!(summary.timings.prompt_n, 12);
        assert_eq!(summary.timings.cache_n, 0);
        assert_eq!(summary.tokens_cached, 12 + 3);
        assert_eq!(summary.finish_reason, FinishReason::Length);
        assert_eq!(
            summary.slot_lifecycle.save_decision,
            SaveDecision::SkippedDisabled
        );

        let (second, summary) = serve(&f.engine, request("hello there", 4)).await;
        assert_eq!(summary.timings.prompt_n, 1);
        assert_eq!(summary.timings.cache_n, 11);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_bootstrap_then_restore_after_unload() {
        let f = fixture(SlotLifecycleMode::Conservative, MockEngineArgs::default());
        let prompt = "a fairly long prompt that should be worth caching";

        let (_, summary) = serve(&f.engine, request(prompt, 2)).await;
        let lifecycle = &summary.slot_lifecycle;
        assert!(lifecycle.restore_attempted);
        assert!(!lifecycle.restore_success);
        assert_eq!(lifecycle.save_decision, SaveDecision::SaveSucceeded);

        f.engine.router().unload("tiny").await.unwrap();

        let (_, summary) = serve(&f.engine, request(prompt, 2)).await;
        let lifecycle = &summary.slot_lifecycle;
        assert!(lifecycle.restore_success);
        assert!(lifecycle.restore_effective);
        assert_eq!(summary.timings.prompt_n, 1);
    }

    #[tokio::test]
    async fn test_strict_mode_without_checkpoint_is_unavailable() {
        let f = fixture(SlotLifecycleMode::Strict, MockEngineArgs::default());
        let err = f
            .engine
            .generate(Context::new(request("hi", 2)))
            .await
            .unwrap_err();
        let c = classify(&err);
        assert_eq!(c.kind, ErrorKind::Unavailable);
        assert_eq!(c.status, 503);
    }

    #[tokio::test]
    async fn test_prompt_must_fit_slot() {
        let f = fixture(SlotLifecycleMode::Off, MockEngineArgs::default());
        let long = "x".repeat(200);
        let err = f
            .engine
            .generate(Context::new(request(&long, 2)))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ServeError>(),
            Some(ServeError::ContextExceeded { n_ctx: 128, .. })
        ));

        let err = f
            .engine
            .generate(Context::new(request("", 2)))
            .await
            .unwrap_err();
        assert_eq!(classify(&err).kind, ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_busy_slot_conflicts() {
        let args = MockEngineArgs::builder()
            .decode_us_per_token(5_000)
            .build()
            .unwrap();
        let f = fixture(SlotLifecycleMode::Off, args);

        let mut running = f
            .engine
            .generate(Context::new(request("hi", 50)))
            .await
            .unwrap();
        assert!(running.next().await.is_some());

        let err = f
            .engine
            .generate(Context::new(request("hi", 1)))
            .await
            .unwrap_err();
        assert_eq!(classify(&err).kind, ErrorKind::Conflict);
        running.context().stop_generating();
    }

    #[tokio::test]
    async fn test_cancelled_turn_is_not_saved() {
        let args = MockEngineArgs::builder()
            .decode_us_per_token(5_000)
            .build()
            .unwrap();
        let f = fixture(SlotLifecycleMode::Conservative, args);

        let mut stream = f
            .engine
            .generate(Context::new(request("hello", 1_000)))
            .await
            .unwrap();
        assert!(stream.next().await.is_some());
        stream.context().stop_generating();

        let mut summary = None;
        while let Some(event) = stream.next().await {
            if let Some(ServeEvent::Final(s)) = event.into_result().unwrap() {
                summary = Some(s);
            }
        }
        let summary = summary.unwrap();
        assert_eq!(summary.finish_reason, FinishReason::Cancelled);
        assert_eq!(
            summary.slot_lifecycle.save_decision,
            SaveDecision::SkippedCancelled
        );
    }

    #[tokio::test]
    async fn test_chat_prompt_and_defaults() {
        let f = fixture(SlotLifecycleMode::Off, MockEngineArgs::default());
        let request = ServeRequest {
            n_predict: Some(-1),
            ignore_eos: true,
            ..ServeRequest::new(
                "tiny",
                Prompt::Chat(vec![ChatMessage::new("user", "hi")]),
            )
        };
        let (content, summary) = serve(&f.engine, request).await;
        assert!(!content.is_empty());
        // unbounded generation runs until the slot is full
        assert_eq!(summary.tokens_cached, 128);
        assert_eq!(summary.finish_reason, FinishReason::Length);
    }

    #[test]
    fn test_defaults_resolve_limits() {
        let defaults = ServingDefaults {
            n_predict: 16,
            ..Default::default()
        };
        assert_eq!(defaults.max_tokens(None), Some(16));
        assert_eq!(defaults.max_tokens(Some(-1)), Some(16));
        assert_eq!(defaults.max_tokens(Some(3)), Some(3));
        assert_eq!(ServingDefaults::default().max_tokens(None), None);

        let request = ServeRequest::new("m", Prompt::Tokens(vec![1]));
        assert_eq!(defaults.sampling(&request).seed, None);
        let seeded = ServeRequest {
            seed: Some(42),
            ..request
        };
        assert_eq!(defaults.sampling(&seeded).seed, Some(42));
    }
}
