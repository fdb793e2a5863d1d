// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::prelude::*;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    32
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    32_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// `min(initial · 2^attempt, max)` plus additive jitter uniform in
/// `[0, min(1s, initial)]`.
pub fn backoff_for_attempt(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let exponential = initial.saturating_mul(2u32.saturating_pow(attempt));
    let base = exponential.min(max);
    let jitter_cap = initial.min(Duration::from_secs(1));
    let jitter = jitter_cap.mul_f64(rand::thread_rng().gen_range(0.0..=1.0));
    base + jitter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_saturates() {
        let initial = Duration::from_millis(100);
        let max = Duration::from_millis(800);
        // jitter is bounded by the initial delay
        for (attempt, floor_ms) in [(0u32, 100u64), (1, 200), (2, 400), (3, 800), (10, 800)] {
            let delay = backoff_for_attempt(attempt, initial, max);
            let floor = Duration::from_millis(floor_ms);
            assert!(delay >= floor, "attempt {attempt}: {delay:?} < {floor:?}");
            assert!(
                delay <= floor + initial,
                "attempt {attempt}: {delay:?} > {:?}",
                floor + initial
            );
        }
    }

    #[test]
    fn jitter_is_capped_at_one_second() {
        let initial = Duration::from_secs(4);
        let max = Duration::from_secs(8);
        let delay = backoff_for_attempt(0, initial, max);
        assert!(delay >= initial);
        assert!(delay <= initial + Duration::from_secs(1));
    }

    #[test]
    fn config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 32);
        assert_eq!(config.initial_delay(), Duration::from_secs(1));
        assert_eq!(config.max_delay(), Duration::from_secs(32));
    }
}
