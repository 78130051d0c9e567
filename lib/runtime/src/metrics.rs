// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Metric naming helpers shared by the HTTP frontend and the slot manager.
//!
//! The collectors themselves live next to the code that updates them; this module only
//! owns the names so that `/metrics` output stays stable.

pub mod prometheus_names;

/// Coerce `raw` into a valid Prometheus metric name prefix.
///
/// Invalid characters become `_`; a leading digit gets an `_` in front; an empty prefix
/// falls back to `fallback`.
pub fn sanitize_prometheus_prefix(raw: &str, fallback: &str) -> String {
    // [a-zA-Z_:][a-zA-Z0-9_:]*
    let mut s: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if s.is_empty() {
        return fallback.to_string();
    }

    let first = s.as_bytes()[0];
    if !(first.is_ascii_alphabetic() || first == b'_' || first == b':') {
        s.insert(0, '_');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("slotrouter", "slotrouter")]
    #[case("slot-router.v2", "slot_router_v2")]
    #[case("9lives", "_9lives")]
    #[case("ns:sub", "ns:sub")]
    #[case("", "fallback")]
    fn test_sanitize_prefix(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(sanitize_prometheus_prefix(raw, "fallback"), expected);
    }
}
