// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::{Deserialize, Serialize};
use tokio_retry::strategy::{ExponentialBackoff, jitter};

use super::Strategy;
use crate::backoff::default_max_attempts;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    base: u64,
    factor: u64,
    #[serde(deserialize_with = "deserialize_duration")]
    max_delay: Duration,
    #[serde(default = "default_max_attempts")]
    max_attempts: usize,
    #[serde(default)]
    jitter: bool,
}

impl Config {
    pub fn new(
        base: u64,
        factor: u64,
        max_delay: Duration,
        max_attempts: usize,
        jitter: bool,
    ) -> Self {
        Config {
            base,
            factor,
            max_delay,
            max_attempts,
            jitter,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base: 100,
            factor: 1,
            max_delay: Duration::from_millis(1000),
            max_attempts: default_max_attempts(),
            jitter: true,
        }
    }
}

impl Strategy for Config {
    fn get_strategy(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        let ret = ExponentialBackoff::from_millis(self.base)
            .factor(self.factor)
            .max_delay(self.max_delay)
            .take(self.max_attempts);
        let jitter_flag = self.jitter;

        Box::new(ret.map(move |d| if jitter_flag { jitter(d) } else { d }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_attempts_bounds_strategy() {
        let config = Config::new(10, 2, Duration::from_millis(50), 3, false);
        let delays: Vec<Duration> = config.get_strategy().collect();
        assert_eq!(delays.len(), 3);
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(50)));
    }
}
