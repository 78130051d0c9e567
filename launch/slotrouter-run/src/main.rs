// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use clap::Parser;

use slotrouter_runtime::{logging, RuntimeConfig};

fn main() -> anyhow::Result<()> {
    let flags = slotrouter_run::Flags::parse();

    // Set log level based on verbosity flag
    if let Some(level) = flags.log_level()? {
        std::env::set_var("SLR_LOG", level);
    }
    logging::init();

    // worker and blocking thread counts from env vars or config file
    let rt_config = RuntimeConfig::from_settings()?;
    tracing::debug!(%rt_config, "runtime config");
    let shutdown_timeout = Duration::from_secs(rt_config.graceful_shutdown_timeout);

    let runtime = rt_config.create_runtime()?;
    runtime.block_on(slotrouter_run::run(flags, shutdown_timeout))
}
