// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use slotrouter_runtime::pipeline::async_trait;

use super::{LoadedModel, ModelSpec};
use crate::mocker::{MockEngine, MockEngineArgs, MockTokenizer};
use crate::slots::{SlotMetrics, SlotPool};

/// Brings a model's engine up and down. The router calls it without holding any locks
/// other than the model's own op lock.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, spec: &ModelSpec) -> anyhow::Result<LoadedModel>;

    /// Called after the slots were persisted and before the resources are dropped.
    async fn unload(&self, _model: &LoadedModel) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Loads every model file as a [`MockEngine`]. The file has to exist; its content is
/// not read.
#[derive(Debug, Clone)]
pub struct MockModelLoader {
    args: MockEngineArgs,
    n_slots: usize,
    n_ctx: usize,
    metrics: SlotMetrics,
}

impl MockModelLoader {
    /// `n_ctx` is the total context, split evenly over `n_slots`.
    pub fn new(args: MockEngineArgs, n_slots: usize, n_ctx: usize, metrics: SlotMetrics) -> Self {
        Self {
            args,
            n_slots,
            n_ctx,
            metrics,
        }
    }
}

#[async_trait]
impl ModelLoader for MockModelLoader {
    async fn load(&self, spec: &ModelSpec) -> anyhow::Result<LoadedModel> {
        let meta = tokio::fs::metadata(&spec.path).await.map_err(|e| {
            anyhow::anyhow!("cannot open model file {}: {e}", spec.path.display())
        })?;
        if !meta.is_file() {
            anyhow::bail!("model path {} is not a file", spec.path.display());
        }

        let delay = self.args.load_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let pool = SlotPool::new(&spec.id, self.n_slots, self.n_ctx, self.metrics.clone());
        Ok(LoadedModel::new(
            spec,
            Arc::new(MockEngine::new(self.args.clone())),
            Arc::new(MockTokenizer::new()),
            Arc::new(pool),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_loader_builds_pool() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.gguf");
        std::fs::write(&path, b"").unwrap();

        let loader = MockModelLoader::new(MockEngineArgs::default(), 4, 1024, SlotMetrics::default());
        let model = loader.load(&ModelSpec::new("tiny", &path)).await.unwrap();
        assert_eq!(model.id(), "tiny");
        assert_eq!(model.pool().len(), 4);
        assert_eq!(model.pool().n_ctx_per_slot(), 256);
        assert_eq!(model.tokenizer().bos_token_id(), Some(1));

        let missing = loader
            .load(&ModelSpec::new("gone", dir.path().join("gone.gguf")))
            .await;
        assert!(missing.is_err());
        assert!(loader.load(&ModelSpec::new("dir", dir.path())).await.is_err());
    }
}
