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

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::ValueHint;
use clap_derive::Parser;
use comet_poll::PollServiceConfig;
use eyre::eyre;
use figment::Figment;
use figment::providers::{Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

/// Everything the load test needs, as read from YAML.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoadTestConfig {
    pub service: PollServiceConfig,
    /// Simulated viewer sessions.
    pub sessions: usize,
    /// Polls submitted back to back for each session; all but the first wait in the gate.
    pub polls_per_session: usize,
    /// Timeout budget given to every poll.
    pub timeout_ms: u64,
    /// Chance that any one `has_events` check finds something.
    pub event_probability: f64,
    /// Chance that a session's client hangs up partway through the run.
    pub disconnect_probability: f64,
    /// Chance that a response keeps flushing for `slow_send_ms` after it is sent, holding up the
    /// session's next poll.
    pub slow_send_probability: f64,
    pub slow_send_ms: u64,
    /// Give up waiting for polls to resolve after this long, and stop the service regardless.
    pub duration_seconds: u64,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            service: PollServiceConfig::default(),
            sessions: 1000,
            polls_per_session: 3,
            timeout_ms: 2000,
            event_probability: 0.05,
            disconnect_probability: 0.02,
            slow_send_probability: 0.01,
            slow_send_ms: 50,
            duration_seconds: 30,
        }
    }
}

impl LoadTestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_seconds)
    }

    pub fn slow_send(&self) -> Duration {
        Duration::from_millis(self.slow_send_ms)
    }

    pub fn total_polls(&self) -> usize {
        self.sessions * self.polls_per_session
    }

    pub fn validate(&self) -> Result<(), eyre::Report> {
        self.service
            .validate()
            .map_err(|e| eyre!("Invalid service configuration: {}", e))?;
        for (name, p) in [
            ("event_probability", self.event_probability),
            ("disconnect_probability", self.disconnect_probability),
            ("slow_send_probability", self.slow_send_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(eyre!("{name} must be between 0 and 1, got {p}"));
            }
        }
        Ok(())
    }
}

#[derive(Parser, Debug, Serialize, Deserialize)]
pub struct Args {
    #[arg(
        long,
        value_name = "config",
        help = "Path to configuration (YAML) file to use, if any. If not specified, defaults are used.\
                Configuration file values can be overridden by command line arguments.",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[arg(long, help = "Number of simulated viewer sessions")]
    pub sessions: Option<usize>,

    #[arg(long, help = "Polls submitted back to back for each session")]
    pub polls_per_session: Option<usize>,

    #[arg(long, help = "Number of poll worker threads")]
    pub workers: Option<usize>,

    #[arg(long, help = "Number of threads building and sending responses")]
    pub execution_threads: Option<usize>,

    #[arg(long, help = "Period of the retry sweep, in milliseconds")]
    pub retry_interval_ms: Option<u64>,

    #[arg(long, help = "Timeout budget for each poll, in milliseconds")]
    pub timeout_ms: Option<u64>,

    #[arg(long, help = "Chance (0..1) that an event check finds something")]
    pub event_probability: Option<f64>,

    #[arg(
        long,
        help = "Maximum time to wait for every poll to resolve before stopping the service"
    )]
    pub duration_seconds: Option<u64>,

    #[arg(long, help = "Enable debug logging", default_value = "false")]
    pub debug: bool,
}

impl Args {
    fn merge_config(&self, mut config: LoadTestConfig) -> Result<LoadTestConfig, eyre::Report> {
        if let Some(sessions) = self.sessions {
            config.sessions = sessions;
        }
        if let Some(polls) = self.polls_per_session {
            config.polls_per_session = polls;
        }
        if let Some(workers) = self.workers {
            config.service.num_workers = workers;
        }
        if let Some(threads) = self.execution_threads {
            config.service.execution_threads = threads;
        }
        if let Some(ms) = self.retry_interval_ms {
            config.service.retry_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.timeout_ms {
            config.timeout_ms = ms;
        }
        if let Some(p) = self.event_probability {
            config.event_probability = p;
        }
        if let Some(secs) = self.duration_seconds {
            config.duration_seconds = secs;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration file if we have it, and then merge the arguments into it.
    pub fn load_config(&self) -> Result<LoadTestConfig, eyre::Report> {
        let config = match self.config_file.as_ref() {
            Some(config_path) => Figment::new()
                .merge(Serialized::defaults(LoadTestConfig::default()))
                .merge(Yaml::file(config_path))
                .extract::<LoadTestConfig>()
                .map_err(|e| {
                    eyre!(
                        "Failed to parse configuration from {:?}: {}",
                        config_path,
                        e
                    )
                })?,
            None => LoadTestConfig::default(),
        };
        self.merge_config(config)
    }
}
