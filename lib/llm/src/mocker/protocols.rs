// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Configuration arguments for [`super::engine::MockEngine`]
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(pattern = "owned", build_fn(public))]
pub struct MockEngineArgs {
    /// Simulated prompt evaluation cost
    #[builder(default = "0")]
    pub prefill_us_per_token: u64,

    /// Simulated cost of each generated token
    #[builder(default = "0")]
    pub decode_us_per_token: u64,

    /// Simulated model load time
    #[builder(default = "0")]
    pub load_ms: u64,

    #[builder(default = "1.0")]
    pub speedup_ratio: f64,

    /// On average one sampled token in `eos_period` is EOS; 0 never samples EOS
    #[builder(default = "32")]
    pub eos_period: u64,
}

impl Default for MockEngineArgs {
    fn default() -> Self {
        MockEngineArgs {
            prefill_us_per_token: 0,
            decode_us_per_token: 0,
            load_ms: 0,
            speedup_ratio: 1.0,
            eos_period: 32,
        }
    }
}

impl MockEngineArgs {
    pub fn builder() -> MockEngineArgsBuilder {
        MockEngineArgsBuilder::default()
    }

    pub fn prefill_delay(&self, n_tokens: usize) -> Duration {
        self.scaled(self.prefill_us_per_token.saturating_mul(n_tokens as u64))
    }

    pub fn decode_delay(&self) -> Duration {
        self.scaled(self.decode_us_per_token)
    }

    pub fn load_delay(&self) -> Duration {
        self.scaled(self.load_ms.saturating_mul(1000))
    }

    fn scaled(&self, micros: u64) -> Duration {
        if micros == 0 {
            return Duration::ZERO;
        }
        let ratio = if self.speedup_ratio > 0.0 {
            self.speedup_ratio
        } else {
            1.0
        };
        Duration::from_secs_f64(micros as f64 / 1e6 / ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_scale_with_speedup() {
        let args = MockEngineArgs::builder()
            .prefill_us_per_token(100)
            .decode_us_per_token(1000)
            .speedup_ratio(2.0)
            .build()
            .unwrap();
        assert_eq!(args.prefill_delay(10), Duration::from_micros(500));
        assert_eq!(args.decode_delay(), Duration::from_micros(500));
        assert_eq!(args.load_delay(), Duration::ZERO);
        assert_eq!(MockEngineArgs::default().eos_period, 32);
    }
}
