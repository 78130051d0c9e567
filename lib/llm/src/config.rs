// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Server configuration
//!
//! Merged in increasing priority: built-in defaults, the TOML file named by
//! `SLR_CONFIG_PATH`, `SLR_SERVER_*` environment variables, and finally the overrides
//! given by the caller (the CLI flags).

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use derive_builder::Builder;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use slotrouter_runtime::metrics::prometheus_names::name_prefix;

use crate::mocker::MockEngineArgs;
use crate::protocols::RANDOM_SEED;
use crate::router::{ModelSpec, RouterSettings};
use crate::serving::ServingDefaults;
use crate::slots::{CheckpointStore, LifecyclePolicy, SlotLifecycleMode};

const SERVER_ENV_PREFIX: &str = "SLR_SERVER_";

const SERVER_CONFIG_PATH_ENV: &str = "SLR_CONFIG_PATH";

#[derive(Serialize, Deserialize, Validate, Debug, Clone, Builder, PartialEq)]
#[builder(build_fn(private, name = "build_internal"), derive(Debug, Serialize))]
#[validate(schema(function = "validate_server_config"))]
pub struct ServerConfig {
    #[builder(default = "default_host()", setter(into))]
    pub host: String,

    #[builder(default = "8080")]
    pub port: u16,

    /// Total context, split evenly over the slots of each model
    #[builder(default = "4096")]
    pub n_ctx: usize,

    #[validate(range(min = 1))]
    #[builder(default = "1")]
    pub n_slots: usize,

    /// -1 generates until the slot context is full
    #[validate(range(min = -1))]
    #[builder(default = "-1")]
    pub n_predict: i64,

    /// 4294967295 draws a fresh seed per request
    #[builder(default = "RANDOM_SEED")]
    pub seed: u64,

    #[validate(range(min = 0.0, max = 2.0))]
    #[builder(default = "0.8")]
    pub temperature: f32,

    #[builder(default)]
    pub models: Vec<ModelSpec>,

    /// Loaded models at once, 0 for no limit
    #[builder(default = "4")]
    pub models_max: usize,

    #[builder(default = "true")]
    pub models_autoload: bool,

    /// Directory for slot checkpoints; save/restore are disabled without it
    #[builder(default)]
    pub slot_save_path: Option<PathBuf>,

    #[builder(default)]
    pub slot_lifecycle: SlotLifecycleMode,

    #[validate(range(min = 0.0, max = 1.0))]
    #[builder(default = "0.5")]
    pub slot_lifecycle_save_min_ratio: f64,

    #[builder(default)]
    pub slot_lifecycle_save_min_restored_tokens: usize,

    #[validate(range(min = 400, max = 599))]
    #[builder(default = "503")]
    pub slot_lifecycle_strict_status_code: u16,

    /// Tokens between sidecar checkpoints
    #[validate(range(min = 1))]
    #[builder(default = "256")]
    pub checkpoint_interval: usize,

    #[builder(default)]
    pub sleep_idle_seconds: Option<u64>,

    #[builder(default)]
    pub api_key: Option<String>,

    #[builder(default = "true")]
    pub endpoint_slots: bool,

    #[builder(default)]
    pub endpoint_metrics: bool,

    #[builder(default = "true")]
    pub endpoint_props: bool,

    #[builder(default)]
    pub slots_expose_params: bool,

    #[builder(default = "default_metrics_prefix()", setter(into))]
    pub metrics_prefix: String,

    #[builder(default)]
    pub mock_prefill_us_per_token: u64,

    #[builder(default)]
    pub mock_decode_us_per_token: u64,

    #[builder(default)]
    pub mock_load_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_metrics_prefix() -> String {
    name_prefix::SLOTS.to_string()
}

fn validate_server_config(config: &ServerConfig) -> Result<(), ValidationError> {
    if config.n_ctx < config.n_slots {
        return Err(ValidationError::new("n_ctx_below_n_slots")
            .with_message("n_ctx must be at least n_slots".into()));
    }
    if config.slot_lifecycle == SlotLifecycleMode::Strict && config.slot_save_path.is_none() {
        return Err(ValidationError::new("strict_without_save_path")
            .with_message("slot_lifecycle=strict requires slot_save_path".into()));
    }
    let mut ids = HashSet::new();
    for model in &config.models {
        if model.id.is_empty() {
            return Err(ValidationError::new("empty_model_id")
                .with_message("model ids must not be empty".into()));
        }
        if !ids.insert(model.id.as_str()) {
            return Err(ValidationError::new("duplicate_model_id")
                .with_message(format!("duplicate model id '{}'", model.id).into()));
        }
    }
    Ok(())
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: default_host(),
            port: 8080,
            n_ctx: 4096,
            n_slots: 1,
            n_predict: -1,
            seed: RANDOM_SEED,
            temperature: 0.8,
            models: vec![],
            models_max: 4,
            models_autoload: true,
            slot_save_path: None,
            slot_lifecycle: SlotLifecycleMode::default(),
            slot_lifecycle_save_min_ratio: 0.5,
            slot_lifecycle_save_min_restored_tokens: 0,
            slot_lifecycle_strict_status_code: 503,
            checkpoint_interval: 256,
            sleep_idle_seconds: None,
            api_key: None,
            endpoint_slots: true,
            endpoint_metrics: false,
            endpoint_props: true,
            slots_expose_params: false,
            metrics_prefix: default_metrics_prefix(),
            mock_prefill_us_per_token: 0,
            mock_decode_us_per_token: 0,
            mock_load_ms: 0,
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    fn figment() -> Figment {
        let config_path = std::env::var(SERVER_CONFIG_PATH_ENV).unwrap_or_default();
        Figment::new()
            .merge(Serialized::defaults(ServerConfig::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(SERVER_ENV_PREFIX).filter_map(|k| {
                let full_key = format!("{SERVER_ENV_PREFIX}{}", k.as_str());
                // filters out empty environment variables
                match std::env::var(&full_key) {
                    Ok(v) if !v.is_empty() => Some(k.into()),
                    _ => None,
                }
            }))
    }

    /// Defaults, config file and environment only.
    pub fn from_settings() -> anyhow::Result<ServerConfig> {
        let config: ServerConfig = Self::figment().extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`ServerConfig::from_settings`], with `overrides` on top. Fields that
    /// `overrides` does not serialize keep their configured value.
    pub fn from_settings_with<T: Serialize>(overrides: &T) -> anyhow::Result<ServerConfig> {
        let config: ServerConfig = Self::figment()
            .merge(Serialized::globals(overrides))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn n_ctx_per_slot(&self) -> usize {
        self.n_ctx / self.n_slots.max(1)
    }

    pub fn sleep_idle(&self) -> Option<Duration> {
        self.sleep_idle_seconds.map(Duration::from_secs)
    }

    pub fn checkpoint_store(&self) -> Option<Arc<CheckpointStore>> {
        self.slot_save_path
            .as_ref()
            .map(|dir| Arc::new(CheckpointStore::new(dir, self.checkpoint_interval)))
    }

    pub fn lifecycle_policy(&self) -> LifecyclePolicy {
        LifecyclePolicy::new(
            self.slot_lifecycle,
            self.slot_lifecycle_save_min_ratio,
            self.slot_lifecycle_save_min_restored_tokens,
            self.slot_lifecycle_strict_status_code,
            self.checkpoint_store(),
        )
    }

    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            models_max: self.models_max,
            autoload: self.models_autoload,
        }
    }

    pub fn serving_defaults(&self) -> ServingDefaults {
        ServingDefaults {
            n_predict: self.n_predict,
            temperature: self.temperature,
            seed: self.seed,
        }
    }

    pub fn mock_engine_args(&self) -> MockEngineArgs {
        MockEngineArgs {
            prefill_us_per_token: self.mock_prefill_us_per_token,
            decode_us_per_token: self.mock_decode_us_per_token,
            load_ms: self.mock_load_ms,
            ..Default::default()
        }
    }
}

impl ServerConfigBuilder {
    /// Build and validate the server configuration
    pub fn build(&self) -> anyhow::Result<ServerConfig> {
        let config = self.build_internal()?;
        config.validate()?;
        Ok(config)
    }
}
