// Copyright (C) 2026 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Config is created by the host, and handed to the poll service at construction. Used to hold
//! things typically configured by CLI flags or a YAML file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::PollServiceError;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollServiceConfig {
    /// Number of worker threads evaluating polls. Independent of how many polls are open.
    pub num_workers: usize,
    /// Size of the pool which builds and writes responses.
    pub execution_threads: usize,
    /// How long a worker blocks on the dispatch queue before reporting liveness and checking
    /// whether it should exit.
    pub dispatch_wait: Duration,
    /// Period of the retry sweep. Fixed; there is no backoff.
    pub retry_interval: Duration,
    /// How long `stop` waits for responses already being written.
    pub shutdown_grace: Duration,
    /// Prefix for the names of every thread the service spawns.
    pub thread_name_prefix: String,
}

impl Default for PollServiceConfig {
    fn default() -> Self {
        let execution_threads = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(8)
            .max(2);
        Self {
            num_workers: 4,
            execution_threads,
            dispatch_wait: Duration::from_secs(1),
            retry_interval: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(1),
            thread_name_prefix: "poll-service".to_string(),
        }
    }
}

impl PollServiceConfig {
    pub fn validate(&self) -> Result<(), PollServiceError> {
        if self.num_workers == 0 {
            return Err(PollServiceError::InvalidConfig(
                "num_workers must be at least 1".to_string(),
            ));
        }
        if self.execution_threads == 0 {
            return Err(PollServiceError::InvalidConfig(
                "execution_threads must be at least 1".to_string(),
            ));
        }
        if self.retry_interval.is_zero() {
            return Err(PollServiceError::InvalidConfig(
                "retry_interval must be non-zero".to_string(),
            ));
        }
        if self.dispatch_wait.is_zero() {
            return Err(PollServiceError::InvalidConfig(
                "dispatch_wait must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn worker_thread_name(&self, index: usize) -> String {
        format!("{}-worker-{index}", self.thread_name_prefix)
    }

    pub(crate) fn retry_thread_name(&self) -> String {
        format!("{}-retry", self.thread_name_prefix)
    }

    pub(crate) fn execution_thread_name(&self, index: usize) -> String {
        format!("{}-exec-{index}", self.thread_name_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = PollServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_interval, Duration::from_millis(100));
        assert!(config.execution_threads >= 2);
    }

    #[test]
    fn test_rejects_zero_workers() {
        let config = PollServiceConfig {
            num_workers: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PollServiceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_zero_retry_interval() {
        let config = PollServiceConfig {
            retry_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_thread_names() {
        let config = PollServiceConfig {
            thread_name_prefix: "eq".to_string(),
            ..Default::default()
        };
        assert_eq!(config.worker_thread_name(2), "eq-worker-2");
        assert_eq!(config.retry_thread_name(), "eq-retry");
        assert_eq!(config.execution_thread_name(0), "eq-exec-0");
    }

    #[test]
    fn test_partial_config_round_trips_through_json() {
        let parsed: PollServiceConfig =
            serde_json::from_str(r#"{"num_workers": 8, "thread_name_prefix": "caps"}"#).unwrap();
        assert_eq!(parsed.num_workers, 8);
        assert_eq!(parsed.thread_name_prefix, "caps");
        assert_eq!(parsed.retry_interval, Duration::from_millis(100));
    }
}
