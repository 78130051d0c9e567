// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Serialize;

use slotrouter_llm::router::ModelSpec;
use slotrouter_llm::slots::SlotLifecycleMode;

/// Command line flags, named after llama-server where one exists.
///
/// Every flag is optional: an unset flag leaves the value from `SLR_CONFIG_PATH`,
/// `SLR_SERVER_*` or the built-in default in place.
#[derive(clap::Parser, Debug, Clone, Default)]
#[command(version, about, long_about = None)]
pub struct Flags {
    /// Path to a model file. Served under `--alias`, or the file stem.
    #[arg(short = 'm', long)]
    pub model: Option<PathBuf>,

    /// Model id for `--model`
    #[arg(long, requires = "model")]
    pub alias: Option<String>,

    /// Register every file in this directory, id = file stem
    #[arg(long)]
    pub models_dir: Option<PathBuf>,

    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    /// Total context size, split evenly over the slots
    #[arg(short = 'c', long = "ctx-size")]
    pub ctx_size: Option<usize>,

    /// Slots per model (llama-server `-np`)
    #[arg(long = "parallel", visible_alias = "np")]
    pub parallel: Option<usize>,

    /// Tokens to predict, -1 for no limit
    #[arg(short = 'n', long = "n-predict", allow_negative_numbers = true)]
    pub n_predict: Option<i64>,

    #[arg(long = "temp")]
    pub temperature: Option<f32>,

    #[arg(short = 's', long)]
    pub seed: Option<u64>,

    /// Directory for slot checkpoints. Enables save and restore.
    #[arg(long)]
    pub slot_save_path: Option<PathBuf>,

    /// off, conservative or strict
    #[arg(long)]
    pub slot_lifecycle: Option<SlotLifecycleMode>,

    /// Minimum prefix reuse ratio for an automatic save
    #[arg(long)]
    pub slot_lifecycle_save_min_ratio: Option<f64>,

    /// Status code returned when strict mode cannot restore a slot
    #[arg(long)]
    pub slot_lifecycle_strict_status_code: Option<u16>,

    /// Tokens between checkpoint boundaries in the sidecar index
    #[arg(long)]
    pub checkpoint_interval: Option<usize>,

    /// Models loaded at once, 0 for no limit
    #[arg(long)]
    pub models_max: Option<usize>,

    /// Only load models through `POST /models/load`
    #[arg(long)]
    pub no_models_autoload: bool,

    /// Unload models idle for this many seconds
    #[arg(long)]
    pub sleep_idle_seconds: Option<u64>,

    #[arg(long, env = "SLR_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Expose `GET /metrics`
    #[arg(long)]
    pub metrics: bool,

    /// Disable the `/slots` endpoints
    #[arg(long)]
    pub no_slots: bool,

    /// Include generation parameters in `GET /slots`
    #[arg(long)]
    pub slots_expose_params: bool,

    /// Verbose output (-v for debug, -vv for trace)
    #[arg(short = 'v', action = clap::ArgAction::Count, default_value_t = 0)]
    pub verbosity: u8,
}

/// The subset of `ServerConfig` set on the command line. Unset fields are not
/// serialized so they do not shadow the file and environment layers.
#[derive(Serialize, Debug, Default, PartialEq)]
pub struct ServerOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_ctx: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_slots: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_predict: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<ModelSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models_max: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models_autoload: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_save_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_lifecycle: Option<SlotLifecycleMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_lifecycle_save_min_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_lifecycle_strict_status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_interval: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sleep_idle_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_slots: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_metrics: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slots_expose_params: Option<bool>,
}

impl Flags {
    /// `SLR_LOG` level for `-v` / `-vv`, none for the default.
    pub fn log_level(&self) -> anyhow::Result<Option<&'static str>> {
        match self.verbosity {
            0 => Ok(None),
            1 => Ok(Some("debug")),
            2 => Ok(Some("trace")),
            _ => anyhow::bail!("Invalid verbosity level. Valid values are v (debug) or vv (trace)"),
        }
    }

    /// Models named by `--model` and `--models-dir`, in that order.
    pub fn models(&self) -> anyhow::Result<Vec<ModelSpec>> {
        let mut models = Vec::new();
        if let Some(path) = &self.model {
            let id = match &self.alias {
                Some(alias) => alias.clone(),
                None => file_stem(path)?,
            };
            models.push(ModelSpec::new(id, path));
        }
        if let Some(dir) = &self.models_dir {
            models.extend(scan_models_dir(dir)?);
        }
        Ok(models)
    }

    pub fn overrides(&self) -> anyhow::Result<ServerOverrides> {
        let models = self.models()?;
        Ok(ServerOverrides {
            host: self.host.clone(),
            port: self.port,
            n_ctx: self.ctx_size,
            n_slots: self.parallel,
            n_predict: self.n_predict,
            temperature: self.temperature,
            seed: self.seed,
            models: (!models.is_empty()).then_some(models),
            models_max: self.models_max,
            models_autoload: self.no_models_autoload.then_some(false),
            slot_save_path: self.slot_save_path.clone(),
            slot_lifecycle: self.slot_lifecycle,
            slot_lifecycle_save_min_ratio: self.slot_lifecycle_save_min_ratio,
            slot_lifecycle_strict_status_code: self.slot_lifecycle_strict_status_code,
            checkpoint_interval: self.checkpoint_interval,
            sleep_idle_seconds: self.sleep_idle_seconds,
            api_key: self.api_key.clone(),
            endpoint_slots: self.no_slots.then_some(false),
            endpoint_metrics: self.metrics.then_some(true),
            slots_expose_params: self.slots_expose_params.then_some(true),
        })
    }
}

fn file_stem(path: &Path) -> anyhow::Result<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .with_context(|| format!("cannot derive a model id from {}", path.display()))
}

/// Regular files in `dir`, sorted by file name.
pub fn scan_models_dir(dir: &Path) -> anyhow::Result<Vec<ModelSpec>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("cannot read models dir {}", dir.display()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("cannot read models dir {}", dir.display()))?;
        if entry.file_type()?.is_file() {
            paths.push(entry.path());
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    paths
        .into_iter()
        .map(|path| Ok(ModelSpec::new(file_stem(&path)?, path)))
        .collect()
}
