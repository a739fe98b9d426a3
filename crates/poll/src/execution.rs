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

//! The execution pool builds and writes responses, so that a slow serializer or a slow socket
//! only ever occupies a pool thread and never a worker.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use minstant::Instant;
use rayon::ThreadPool;
use tracing::{debug, error, trace};

use crate::config::PollServiceConfig;
use crate::counters::PollCounters;
use crate::errors::{ConnectionError, PayloadError, PollServiceError};
use crate::request::PollRequest;
use crate::state::{ServiceState, SlotRelease};

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Which payload to build for a poll that is being answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Events,
    NoEvents,
}

enum ResponseFailure {
    Payload(PayloadError),
    Send(ConnectionError),
}

pub(crate) struct ExecutionPool {
    pool: Mutex<Option<ThreadPool>>,
    in_flight: Arc<AtomicUsize>,
}

/// Decrements the in-flight count when a job finishes, however it finishes.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ExecutionPool {
    pub(crate) fn new(config: &PollServiceConfig) -> Result<Self, PollServiceError> {
        let names = config.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.execution_threads)
            .thread_name(move |i| names.execution_thread_name(i))
            .build()
            .map_err(|e| PollServiceError::PoolBuild(e.to_string()))?;
        Ok(Self {
            pool: Mutex::new(Some(pool)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub(crate) fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight(self.in_flight.clone());
        let pool = self.pool.lock().unwrap();
        if let Some(pool) = pool.as_ref() {
            pool.spawn(move || {
                let _guard = guard;
                job();
            });
            return;
        }
        drop(pool);
        // Pool already shut down; run on the caller so the job's cleanup still happens.
        let _guard = guard;
        job();
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait up to `grace` for all in-flight jobs to finish. Returns whether the pool went idle.
    pub(crate) fn wait_idle(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        while self.in_flight() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(IDLE_POLL_INTERVAL);
        }
        true
    }

    /// Drop the pool. Jobs already queued inside it still run to completion on its threads.
    pub(crate) fn shutdown(&self) {
        if self.pool.lock().unwrap().take().is_some() {
            debug!("Execution pool shut down");
        }
    }
}

/// Hand a poll to the execution pool to be answered. The session slot is released when the job
/// finishes, whether the response went out, payload construction failed, or the connection had
/// already been disposed.
pub(crate) fn respond(state: &Arc<ServiceState>, request: PollRequest, kind: ResponseKind) {
    let job_state = state.clone();
    state.execution.spawn(move || run_response(job_state, request, kind));
}

fn run_response(state: Arc<ServiceState>, request: PollRequest, kind: ResponseKind) {
    let _slot = SlotRelease::new(state.clone(), request.session.clone());
    let counters = &state.counters;

    let result = catch_unwind(AssertUnwindSafe(|| build_and_send(&request, kind)));
    match result {
        Ok(Ok(())) => {
            let counter = match kind {
                ResponseKind::Events => &counters.answered,
                ResponseKind::NoEvents => &counters.answered_empty,
            };
            PollCounters::bump(counter);
            trace!(session = %request.session, ?kind, "Poll answered");
        }
        Ok(Err(ResponseFailure::Payload(e))) => {
            PollCounters::bump(&counters.payload_failures);
            error!(session = %request.session, request_id = ?request.request_id, ?kind, error = ?e, "Failed to build poll response");
        }
        Ok(Err(ResponseFailure::Send(ConnectionError::Disposed))) => {
            trace!(session = %request.session, "Connection disposed before response could be sent");
        }
        Ok(Err(ResponseFailure::Send(e))) => {
            error!(session = %request.session, request_id = ?request.request_id, error = ?e, "Failed to send poll response");
        }
        Err(_) => {
            PollCounters::bump(&counters.payload_failures);
            error!(session = %request.session, request_id = ?request.request_id, ?kind, "Panic while answering poll");
        }
    }
}

fn build_and_send(request: &PollRequest, kind: ResponseKind) -> Result<(), ResponseFailure> {
    let response = match kind {
        ResponseKind::Events => request.source.get_events(request.request_id, &request.session),
        ResponseKind::NoEvents => request.source.no_events(request.request_id, &request.session),
    }
    .map_err(ResponseFailure::Payload)?;
    request
        .connection
        .send_response(response)
        .map_err(ResponseFailure::Send)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn config(threads: usize) -> PollServiceConfig {
        PollServiceConfig {
            execution_threads: threads,
            thread_name_prefix: "exec-test".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_wait_idle_after_jobs_finish() {
        let pool = ExecutionPool::new(&config(2)).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let ran = ran.clone();
            pool.spawn(move || {
                std::thread::sleep(Duration::from_millis(2));
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(pool.wait_idle(Duration::from_secs(5)));
        assert_eq!(ran.load(Ordering::SeqCst), 10);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_wait_idle_times_out_on_stuck_job() {
        let pool = ExecutionPool::new(&config(1)).unwrap();
        let release = Arc::new(AtomicBool::new(false));
        let r = release.clone();
        pool.spawn(move || {
            while !r.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
        });
        assert!(!pool.wait_idle(Duration::from_millis(20)));
        release.store(true, Ordering::SeqCst);
        assert!(pool.wait_idle(Duration::from_secs(5)));
    }

    #[test]
    fn test_spawn_after_shutdown_runs_inline() {
        let pool = ExecutionPool::new(&config(1)).unwrap();
        pool.shutdown();
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        pool.spawn(move || r.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(pool.in_flight(), 0);
    }
}
