// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{IntCounter, Opts, Registry};

use slotrouter_runtime::metrics::prometheus_names::{name_prefix, slot_lifecycle};
use slotrouter_runtime::metrics::sanitize_prometheus_prefix;

/// Process-wide slot persistence counters, shared by every model's pool.
///
/// Exported as `{prefix}:slot_save_total`, `{prefix}:slot_restore_total`,
/// `{prefix}:slot_restore_full_total` and `{prefix}:slot_save_skipped_total`.
#[derive(Debug, Clone)]
pub struct SlotMetrics {
    save_total: IntCounter,
    restore_total: IntCounter,
    restore_full_total: IntCounter,
    save_skipped_total: IntCounter,
}

impl Default for SlotMetrics {
    fn default() -> Self {
        Self::new(name_prefix::SLOTS)
    }
}

impl SlotMetrics {
    pub fn new(prefix: &str) -> Self {
        let prefix = sanitize_prometheus_prefix(prefix, name_prefix::SLOTS);
        let counter = |name: &str, help: &str| {
            IntCounter::with_opts(Opts::new(format!("{prefix}:{name}"), help)).unwrap()
        };
        SlotMetrics {
            save_total: counter(slot_lifecycle::SAVE_TOTAL, "Slot checkpoints saved"),
            restore_total: counter(slot_lifecycle::RESTORE_TOTAL, "Slot checkpoints restored"),
            restore_full_total: counter(
                slot_lifecycle::RESTORE_FULL_TOTAL,
                "Slot restores that used the checkpoint sidecar index",
            ),
            save_skipped_total: counter(
                slot_lifecycle::SAVE_SKIPPED_TOTAL,
                "Lifecycle saves skipped by the reuse guard",
            ),
        }
    }

    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.save_total.clone()))?;
        registry.register(Box::new(self.restore_total.clone()))?;
        registry.register(Box::new(self.restore_full_total.clone()))?;
        registry.register(Box::new(self.save_skipped_total.clone()))?;
        Ok(())
    }

    pub fn inc_save(&self) {
        self.save_total.inc();
    }

    pub fn inc_restore(&self, full: bool) {
        self.restore_total.inc();
        if full {
            self.restore_full_total.inc();
        }
    }

    pub fn inc_save_skipped(&self) {
        self.save_skipped_total.inc();
    }

    pub fn save_total(&self) -> u64 {
        self.save_total.get()
    }

    pub fn restore_total(&self) -> u64 {
        self.restore_total.get()
    }

    pub fn restore_full_total(&self) -> u64 {
        self.restore_full_total.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Encoder;

    #[test]
    fn test_counters_render_with_prefix() {
        let metrics = SlotMetrics::new("slotrouter");
        let registry = Registry::new();
        metrics.register(&registry).unwrap();

        metrics.inc_save();
        metrics.inc_restore(true);
        metrics.inc_restore(false);

        let mut buffer = vec![];
        prometheus::TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("slotrouter:slot_save_total 1"));
        assert!(text.contains("slotrouter:slot_restore_total 2"));
        assert!(text.contains("slotrouter:slot_restore_full_total 1"));
    }
}
