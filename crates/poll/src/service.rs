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

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use minstant::Instant;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::config::PollServiceConfig;
use crate::counters::{CountersSnapshot, PollCounters};
use crate::errors::PollServiceError;
use crate::gate::Admission;
use crate::request::{PollRequest, SessionKey};
use crate::retry::retry_loop;
use crate::state::ServiceState;
use crate::watchdog::{NoopWatchdog, Watchdog};
use crate::worker::worker_loop;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Operational snapshot of the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollServiceStatus {
    pub running: bool,
    pub workers: usize,
    pub busy_workers: usize,
    /// Sessions with a poll somewhere in the dispatch path.
    pub sessions: usize,
    /// Polls waiting in the gate behind their session's in-flight poll.
    pub pending: usize,
    pub dispatch_depth: usize,
    pub retry_depth: usize,
    pub executing: usize,
    pub counters: CountersSnapshot,
}

/// What `stop` had to clean up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Polls waiting in the gate, discarded without any callback.
    pub discarded: usize,
    /// Connections force-closed during shutdown: polls still on the retry or dispatch queue, and
    /// polls a worker deferred after the service stopped running.
    pub force_closed: usize,
    /// Threads which hadn't exited by the deadline and were left to finish on their own.
    pub detached_threads: usize,
}

struct Running {
    state: Arc<ServiceState>,
    workers: Vec<JoinHandle<()>>,
    retry: JoinHandle<()>,
}

/// Multiplexes long-poll requests over a fixed pool of worker threads, keeping at most one poll
/// per session in flight at a time.
///
/// Lifecycle is `stopped -> running -> stopped`, and may be repeated; each `start` builds fresh
/// queues and a fresh execution pool.
pub struct PollService {
    config: PollServiceConfig,
    counters: Arc<PollCounters>,
    watchdog: Arc<dyn Watchdog>,
    /// Read on every submit, so kept outside the lifecycle lock.
    current: ArcSwapOption<ServiceState>,
    lifecycle: Mutex<Option<Running>>,
}

impl PollService {
    pub fn new(config: PollServiceConfig) -> Result<Self, PollServiceError> {
        Self::with_watchdog(config, Arc::new(NoopWatchdog))
    }

    pub fn with_watchdog(
        config: PollServiceConfig,
        watchdog: Arc<dyn Watchdog>,
    ) -> Result<Self, PollServiceError> {
        config.validate()?;
        Ok(Self {
            config,
            counters: Arc::new(PollCounters::default()),
            watchdog,
            current: ArcSwapOption::empty(),
            lifecycle: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &PollServiceConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.current.load().is_some()
    }

    /// Start the execution pool, the workers and the retry loop. No-op if already running.
    pub fn start(&self) -> Result<(), PollServiceError> {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if lifecycle.is_some() {
            return Ok(());
        }

        let state = Arc::new(ServiceState::new(
            self.config.clone(),
            self.counters.clone(),
            self.watchdog.clone(),
        )?);
        // The loops exit as soon as they see this false, so it has to be set before they spawn.
        state.set_running(true);

        let retry_name = self.config.retry_thread_name();
        let retry_state = state.clone();
        let retry = match std::thread::Builder::new()
            .name(retry_name.clone())
            .spawn(move || retry_loop(retry_state, retry_name))
        {
            Ok(handle) => handle,
            Err(e) => {
                state.set_running(false);
                state.execution.shutdown();
                return Err(PollServiceError::ThreadSpawn(e.to_string()));
            }
        };

        let mut workers = Vec::with_capacity(self.config.num_workers);
        for index in 0..self.config.num_workers {
            let name = self.config.worker_thread_name(index);
            let worker_state = state.clone();
            match std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(worker_state, name))
            {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    error!(error = ?e, index, "Could not spawn poll worker");
                    state.set_running(false);
                    for handle in workers.drain(..).chain(std::iter::once(retry)) {
                        let _ = handle.join();
                    }
                    state.execution.shutdown();
                    return Err(PollServiceError::ThreadSpawn(e.to_string()));
                }
            }
        }

        self.current.store(Some(state.clone()));
        *lifecycle = Some(Running {
            state,
            workers,
            retry,
        });
        info!(
            workers = self.config.num_workers,
            execution_threads = self.config.execution_threads,
            "Poll service started"
        );
        Ok(())
    }

    /// Hand a poll to the scheduler. It is dispatched immediately if its session has nothing in
    /// flight, otherwise it waits its turn behind the session's earlier polls.
    ///
    /// If the service is not running the poll's connection is closed and it is not admitted.
    /// Once admitted, nothing that happens to the poll is reported back here.
    pub fn submit(&self, request: PollRequest) -> Result<Admission, PollServiceError> {
        let Some(state) = self.current.load_full() else {
            self.reject(request);
            return Err(PollServiceError::NotRunning);
        };
        match state.gate.submit(request) {
            Ok(admission) => {
                PollCounters::bump(&self.counters.submitted);
                Ok(admission)
            }
            Err(request) => {
                // Lost a race with `stop`.
                self.reject(request);
                Err(PollServiceError::NotRunning)
            }
        }
    }

    /// Throw away every poll queued behind the session's in-flight one, without answering them.
    /// Used when a session is torn down by its owner. Returns how many were discarded.
    pub fn drop_session(&self, session: &SessionKey) -> usize {
        let Some(state) = self.current.load_full() else {
            return 0;
        };
        let discarded = state.gate.drop_session(session);
        if discarded > 0 {
            debug!(%session, discarded, "Dropped queued polls for session");
        }
        discarded
    }

    /// Stop the service. Idempotent: returns `None` if it wasn't running.
    ///
    /// Waits for workers to notice, gives in-flight responses a grace period, forgets every
    /// queued session, and force-closes the connection of every poll still sitting on the
    /// dispatch or retry queue.
    pub fn stop(&self) -> Option<ShutdownReport> {
        let running = self.lifecycle.lock().unwrap().take()?;
        let Running {
            state,
            workers,
            retry,
        } = running;

        let closed_before = self.counters.snapshot().force_closed;
        self.current.store(None);
        state.set_running(false);
        debug!("Poll service stopping");

        // Workers wake at least once per dispatch wait, so that bounds how long they take to
        // notice. Anything slower than that plus the grace period is stuck in a callback.
        let deadline = Instant::now() + self.config.dispatch_wait + self.config.shutdown_grace;
        let mut detached_threads = 0;
        for handle in std::iter::once(retry).chain(workers) {
            if !join_by(handle, deadline) {
                detached_threads += 1;
            }
        }
        if detached_threads > 0 {
            warn!(detached_threads, "Poll service threads did not exit in time; detaching");
        }

        if !state.execution.wait_idle(self.config.shutdown_grace) {
            warn!(
                executing = state.execution.in_flight(),
                "Responses still being written after shutdown grace period"
            );
        }

        let discarded = state.gate.close();

        for request in state.retry.drain().into_iter().chain(state.dispatch.drain()) {
            state.force_close(request);
        }
        let force_closed = (self.counters.snapshot().force_closed - closed_before) as usize;

        state.execution.shutdown();

        let report = ShutdownReport {
            discarded,
            force_closed,
            detached_threads,
        };
        info!(?report, "Poll service stopped");
        Some(report)
    }

    /// Totals since construction. Carried across restarts.
    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    pub fn status(&self) -> PollServiceStatus {
        let counters = self.counters.snapshot();
        let Some(state) = self.current.load_full() else {
            return PollServiceStatus {
                running: false,
                workers: 0,
                busy_workers: 0,
                sessions: 0,
                pending: 0,
                dispatch_depth: 0,
                retry_depth: 0,
                executing: 0,
                counters,
            };
        };
        let (sessions, pending) = state.gate.depths();
        PollServiceStatus {
            running: true,
            workers: self.config.num_workers,
            busy_workers: state.busy_workers.load(Ordering::SeqCst),
            sessions,
            pending,
            dispatch_depth: state.dispatch.len(),
            retry_depth: state.retry.len(),
            executing: state.execution.in_flight(),
            counters,
        }
    }

    fn reject(&self, request: PollRequest) {
        trace!(session = %request.session, "Rejecting poll; service not running");
        PollCounters::bump(&self.counters.force_closed);
        if let Err(e) = request.connection.force_close() {
            trace!(session = %request.session, error = ?e, "Error closing rejected poll");
        }
    }
}

impl Drop for PollService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Join `handle` if it finishes before `deadline`. Otherwise leave it running and return false.
fn join_by(handle: JoinHandle<()>, deadline: Instant) -> bool {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(JOIN_POLL_INTERVAL);
    }
    if handle.join().is_err() {
        error!("Poll service thread panicked");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnection;
    use crate::testing::MockSource;

    fn quick_config() -> PollServiceConfig {
        PollServiceConfig {
            num_workers: 2,
            execution_threads: 2,
            dispatch_wait: Duration::from_millis(20),
            retry_interval: Duration::from_millis(10),
            shutdown_grace: Duration::from_millis(200),
            thread_name_prefix: "svc-test".to_string(),
        }
    }

    #[test]
    fn test_start_is_idempotent() {
        let service = PollService::new(quick_config()).unwrap();
        assert!(!service.is_running());
        service.start().unwrap();
        service.start().unwrap();
        assert!(service.is_running());
        assert_eq!(service.status().workers, 2);
        assert!(service.stop().is_some());
        assert!(!service.is_running());
    }

    #[test]
    fn test_stop_twice() {
        let service = PollService::new(quick_config()).unwrap();
        service.start().unwrap();
        assert!(service.stop().is_some());
        assert!(service.stop().is_none());
    }

    #[test]
    fn test_stop_without_start() {
        let service = PollService::new(quick_config()).unwrap();
        assert!(service.stop().is_none());
    }

    #[test]
    fn test_submit_while_stopped_closes_connection() {
        let service = PollService::new(quick_config()).unwrap();
        let connection = Arc::new(MockConnection::new());
        let result = service.submit(PollRequest::new(
            SessionKey::new(1, "/caps/eq"),
            Duration::from_secs(30),
            connection.clone(),
            Arc::new(MockSource::new()),
        ));
        assert_eq!(result, Err(PollServiceError::NotRunning));
        assert_eq!(connection.force_closes(), 1);
        assert_eq!(connection.send_attempts(), 0);
    }

    #[test]
    fn test_restart_after_stop() {
        let service = PollService::new(quick_config()).unwrap();
        service.start().unwrap();
        service.stop();
        service.start().unwrap();

        let connection = Arc::new(MockConnection::new());
        let source = Arc::new(MockSource::with_events());
        service
            .submit(PollRequest::new(
                SessionKey::new(1, "/caps/eq"),
                Duration::from_secs(30),
                connection.clone(),
                source.clone(),
            ))
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while connection.responses().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(connection.responses().len(), 1);
        service.stop();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PollServiceConfig {
            execution_threads: 0,
            ..quick_config()
        };
        assert!(matches!(
            PollService::new(config),
            Err(PollServiceError::InvalidConfig(_))
        ));
    }
}
