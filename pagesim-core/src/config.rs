// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Network conditions a page load is simulated under.

use serde::{Deserialize, Serialize};

/// Default round-trip time in milliseconds
pub const DEFAULT_RTT_MS: f64 = 150.0;

/// Default downlink throughput in bits per second (1600 * 1024)
pub const DEFAULT_THROUGHPUT_BPS: f64 = 1_638_400.0;

/// Default server response time assumed for records without a measurement,
/// in milliseconds
pub const DEFAULT_RESPONSE_TIME_MS: f64 = 30.0;

/// Default limit on concurrently in-flight requests
pub const DEFAULT_MAXIMUM_CONCURRENT_REQUESTS: usize = 10;

/// Simulated network conditions.
///
/// Every field falls back to its default when deserializing, so partial
/// condition files are accepted.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Round-trip time of the simulated link, in milliseconds
    pub rtt_ms: f64,
    /// Total downlink throughput shared by all in-flight requests, in bits
    /// per second
    pub throughput_bps: f64,
    /// Server response time substituted for records that carry no
    /// measurement, in milliseconds
    pub default_response_time_ms: f64,
    /// Maximum number of requests in flight at once
    pub maximum_concurrent_requests: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rtt_ms: DEFAULT_RTT_MS,
            throughput_bps: DEFAULT_THROUGHPUT_BPS,
            default_response_time_ms: DEFAULT_RESPONSE_TIME_MS,
            maximum_concurrent_requests: DEFAULT_MAXIMUM_CONCURRENT_REQUESTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();

        assert_eq!(config.rtt_ms, 150.0);
        assert_eq!(config.throughput_bps, 1600.0 * 1024.0);
        assert_eq!(config.default_response_time_ms, 30.0);
        assert_eq!(config.maximum_concurrent_requests, 10);
    }

    #[test]
    fn partial_config_deserializes_against_defaults() {
        let config: Config = serde_json::from_str(r#"{"rtt_ms": 40.0}"#).unwrap();

        assert_eq!(config.rtt_ms, 40.0);
        assert_eq!(config.throughput_bps, DEFAULT_THROUGHPUT_BPS);
        assert_eq!(config.default_response_time_ms, DEFAULT_RESPONSE_TIME_MS);
        assert_eq!(
            config.maximum_concurrent_requests,
            DEFAULT_MAXIMUM_CONCURRENT_REQUESTS
        );
    }

    #[test]
    fn round_trip() {
        let config = Config {
            rtt_ms: 40.0,
            throughput_bps: 10_240_000.0,
            default_response_time_ms: 15.0,
            maximum_concurrent_requests: 6,
        };

        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<Config>(&json).unwrap(), config);
    }
}
