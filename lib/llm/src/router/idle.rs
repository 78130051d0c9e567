// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::ModelRouter;

/// Periodically unload models that served nothing for `idle`.
///
/// The check runs every quarter of `idle`, between 50ms and 1s.
pub fn spawn_idle_watchdog(
    router: Arc<ModelRouter>,
    idle: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let period = (idle / 4).clamp(Duration::from_millis(50), Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let unloaded = router.unload_idle(idle).await;
                    if !unloaded.is_empty() {
                        tracing::debug!(models = ?unloaded, "idle watchdog pass");
                    }
                }
            }
        }
        tracing::trace!("idle watchdog stopped");
    })
}
