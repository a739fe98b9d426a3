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

//! State shared between the workers, the retry thread and the execution pool for one
//! start/stop cycle of the service.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::{trace, warn};

use crate::config::PollServiceConfig;
use crate::counters::PollCounters;
use crate::errors::{ConnectionError, PollServiceError};
use crate::execution::ExecutionPool;
use crate::gate::SessionGate;
use crate::queues::PollQueue;
use crate::request::{PollRequest, SessionKey};
use crate::watchdog::Watchdog;

pub(crate) struct ServiceState {
    pub(crate) config: PollServiceConfig,
    running: AtomicBool,
    pub(crate) gate: SessionGate,
    pub(crate) dispatch: PollQueue,
    pub(crate) retry: PollQueue,
    pub(crate) execution: ExecutionPool,
    pub(crate) counters: Arc<PollCounters>,
    pub(crate) watchdog: Arc<dyn Watchdog>,
    pub(crate) busy_workers: AtomicUsize,
}

impl ServiceState {
    pub(crate) fn new(
        config: PollServiceConfig,
        counters: Arc<PollCounters>,
        watchdog: Arc<dyn Watchdog>,
    ) -> Result<Self, PollServiceError> {
        let dispatch = PollQueue::new();
        let gate = SessionGate::new(dispatch.sender());
        let execution = ExecutionPool::new(&config)?;
        Ok(Self {
            config,
            running: AtomicBool::new(false),
            gate,
            dispatch,
            retry: PollQueue::new(),
            execution,
            counters,
            watchdog,
            busy_workers: AtomicUsize::new(0),
        })
    }

    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Report liveness for `thread_name`. A panicking watchdog is logged and otherwise ignored.
    pub(crate) fn beat(&self, thread_name: &str) {
        if catch_unwind(AssertUnwindSafe(|| self.watchdog.update_thread(thread_name))).is_err() {
            warn!(thread = %thread_name, "Watchdog panicked while recording liveness");
        }
    }

    /// The client is gone (or its write never drained in time): tell the owner, give up the
    /// slot, and forget the poll.
    pub(crate) fn abandon(self: &Arc<Self>, request: PollRequest) {
        let _slot = SlotRelease::new(self.clone(), request.session.clone());
        PollCounters::bump(&self.counters.dropped);
        trace!(session = %request.session, request_id = ?request.request_id, "Abandoning poll");
        if catch_unwind(AssertUnwindSafe(|| request.abandon())).is_err() {
            PollCounters::bump(&self.counters.worker_faults);
            warn!(session = %request.session, "Event source panicked while dropping poll");
        }
    }

    /// Shutdown path: terminate the connection unconditionally. Tolerates connections a racing
    /// disconnect has already disposed of.
    pub(crate) fn force_close(&self, request: PollRequest) {
        PollCounters::bump(&self.counters.force_closed);
        match catch_unwind(AssertUnwindSafe(|| request.connection.force_close())) {
            Ok(Ok(())) | Ok(Err(ConnectionError::Disposed)) | Ok(Err(ConnectionError::Closed)) => {}
            Ok(Err(e)) => {
                trace!(session = %request.session, error = ?e, "Error force-closing poll connection");
            }
            Err(_) => {
                warn!(session = %request.session, "Connection panicked while force-closing");
            }
        }
    }
}

/// Gives the session's slot back to the gate when dropped, so that whichever way a poll leaves
/// the dispatch path (success, error, or unwind) the release happens exactly once.
pub(crate) struct SlotRelease {
    state: Arc<ServiceState>,
    session: Option<SessionKey>,
}

impl SlotRelease {
    pub(crate) fn new(state: Arc<ServiceState>, session: SessionKey) -> Self {
        Self {
            state,
            session: Some(session),
        }
    }
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let outcome = self.state.gate.release(&session);
            trace!(%session, ?outcome, "Released session slot");
        }
    }
}
