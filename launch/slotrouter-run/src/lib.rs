// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use slotrouter_llm::config::ServerConfig;
use slotrouter_llm::http::service::service_v2::HttpService;
use tokio_util::sync::CancellationToken;

mod flags;
pub use flags::{scan_models_dir, Flags, ServerOverrides};

/// Merge `flags` over the file and environment configuration.
pub fn server_config(flags: &Flags) -> anyhow::Result<ServerConfig> {
    let overrides = flags.overrides()?;
    let config = ServerConfig::from_settings_with(&overrides)?;
    if config.models.is_empty() {
        anyhow::bail!("No models configured. Pass --model <path> or --models-dir <dir>.");
    }
    Ok(config)
}

/// Serve until ctrl-c, then give in-flight requests and slot persistence
/// `shutdown_timeout` to finish.
pub async fn run(flags: Flags, shutdown_timeout: Duration) -> anyhow::Result<()> {
    let config = server_config(&flags)?;
    tracing::info!(
        models = config.models.len(),
        n_slots = config.n_slots,
        n_ctx = config.n_ctx,
        slot_lifecycle = %config.slot_lifecycle,
        slot_save_path = ?config.slot_save_path,
        "configured"
    );

    let service = HttpService::builder().config(config).build()?;
    for route in service.route_docs() {
        tracing::debug!(%route, "route");
    }

    let cancel_token = CancellationToken::new();
    let mut task = service.spawn(cancel_token.clone()).await;

    tokio::select! {
        result = &mut task => return result?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("ctrl-c received, shutting down");
        }
    }

    cancel_token.cancel();
    match tokio::time::timeout(shutdown_timeout, task).await {
        Ok(result) => result?,
        Err(_) => {
            tracing::warn!(
                timeout_secs = shutdown_timeout.as_secs(),
                "shutdown timed out, slots may not have been persisted"
            );
            Ok(())
        }
    }
}
