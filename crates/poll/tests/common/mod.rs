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

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use comet_poll::testing::{MockConnection, MockSource};
use comet_poll::{PollRequest, PollService, PollServiceConfig, SessionKey};

pub const ENDPOINT: &str = "/caps/event_queue";

/// Upper bound on how long any scenario should take to settle.
pub const SETTLE: Duration = Duration::from_secs(10);

/// Route library logs through the test harness's captured output.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .with_thread_names(true)
        .try_init();
}

/// Short waits everywhere so tests don't sit around for production-sized intervals.
pub fn fast_config(num_workers: usize) -> PollServiceConfig {
    PollServiceConfig {
        num_workers,
        execution_threads: 4,
        dispatch_wait: Duration::from_millis(20),
        retry_interval: Duration::from_millis(10),
        shutdown_grace: Duration::from_millis(500),
        thread_name_prefix: "poll-test".to_string(),
    }
}

pub fn started_service(num_workers: usize) -> PollService {
    init_logging();
    let service = PollService::new(fast_config(num_workers)).unwrap();
    service.start().unwrap();
    service
}

pub fn session(id: u64) -> SessionKey {
    SessionKey::new(id, ENDPOINT)
}

pub fn poll(
    session: &SessionKey,
    timeout: Duration,
    connection: &Arc<MockConnection>,
    source: &Arc<MockSource>,
) -> PollRequest {
    PollRequest::new(
        session.clone(),
        timeout,
        connection.clone(),
        source.clone(),
    )
}

/// Spin until `condition` holds or `SETTLE` elapses. Returns whether it held.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + SETTLE;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
