// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::{Deserialize, Serialize};
use tokio_retry::strategy::FixedInterval;

use super::Strategy;
use crate::backoff::default_max_attempts;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_duration")]
    interval: Duration,
    #[serde(default = "default_max_attempts")]
    max_attempts: usize,
}

impl Config {
    pub fn new(interval: Duration, max_attempts: usize) -> Self {
        Config {
            interval,
            max_attempts,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            interval: Duration::from_millis(1000),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Strategy for Config {
    fn get_strategy(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        Box::new(FixedInterval::new(self.interval).take(self.max_attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_interval_strategy() {
        let config = Config::new(Duration::from_millis(20), 2);
        let delays: Vec<Duration> = config.get_strategy().collect();
        assert_eq!(delays, vec![Duration::from_millis(20); 2]);
    }
}
