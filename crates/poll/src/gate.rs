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

//! Per-session exclusivity.
//!
//! A session has an entry in the gate for exactly as long as one of its polls is somewhere in
//! the dispatch path (dispatch queue, a worker, the retry queue, or the execution pool). Further
//! polls for the same session wait in the entry's FIFO until the in-flight one releases its
//! slot. Entries are removed as soon as they have nothing in flight, so the map tracks live
//! sessions only.

use std::collections::{HashMap, VecDeque};
use std::hash::BuildHasherDefault;
use std::sync::Mutex;

use ahash::AHasher;
use tracing::{error, trace};

use crate::queues::DispatchSender;
use crate::request::{PollRequest, SessionKey};

/// What happened to a submitted poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Nothing else in flight for the session; sent straight to the dispatch queue.
    Dispatched,
    /// Parked behind an in-flight poll, at this position in the session's FIFO (0 = next).
    Queued(usize),
}

/// What happened when a slot was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The next queued poll for the session was admitted to the dispatch queue.
    Advanced,
    /// Nothing was waiting; the session entry was removed.
    Vacated,
    /// The session had no entry (gate closed during shutdown, or already released).
    Unknown,
}

type SessionMap = HashMap<SessionKey, VecDeque<PollRequest>, BuildHasherDefault<AHasher>>;

struct GateState {
    open: bool,
    sessions: SessionMap,
}

pub(crate) struct SessionGate {
    state: Mutex<GateState>,
    dispatch: DispatchSender,
}

impl SessionGate {
    pub(crate) fn new(dispatch: DispatchSender) -> Self {
        Self {
            state: Mutex::new(GateState {
                open: true,
                sessions: SessionMap::default(),
            }),
            dispatch,
        }
    }

    /// Admit the poll if its session has nothing in flight, otherwise queue it behind the
    /// session's existing polls. Hands the poll back if the gate has been closed.
    pub(crate) fn submit(&self, request: PollRequest) -> Result<Admission, PollRequest> {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Err(request);
        }
        if let Some(waiting) = state.sessions.get_mut(&request.session) {
            waiting.push_back(request);
            return Ok(Admission::Queued(waiting.len() - 1));
        }
        let session = request.session.clone();
        state.sessions.insert(session.clone(), VecDeque::new());
        // Sending is a non-blocking push onto an unbounded channel, so it happens under the lock
        // to keep admission atomic with respect to `close`.
        if let Err(e) = self.dispatch.send(request) {
            state.sessions.remove(&session);
            return Err(e.into_inner());
        }
        Ok(Admission::Dispatched)
    }

    /// Give up the session's slot. Called exactly once for every poll that leaves the dispatch
    /// path, whichever way it leaves.
    pub(crate) fn release(&self, session: &SessionKey) -> Release {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Release::Unknown;
        }
        let Some(waiting) = state.sessions.get_mut(session) else {
            trace!(%session, "Release for session with no gate entry");
            return Release::Unknown;
        };
        let Some(next) = waiting.pop_front() else {
            state.sessions.remove(session);
            return Release::Vacated;
        };
        if let Err(e) = self.dispatch.send(next) {
            // Only possible if the dispatch queue has been torn down underneath an open gate.
            let next = e.into_inner();
            error!(%session, request_id = ?next.request_id, "Dispatch queue gone; abandoning poll");
            next.abandon();
            state.sessions.remove(session);
            return Release::Vacated;
        }
        Release::Advanced
    }

    /// Discard every poll waiting behind the session's in-flight one. No callbacks are invoked;
    /// the in-flight poll keeps its slot and releases it normally.
    pub(crate) fn drop_session(&self, session: &SessionKey) -> usize {
        let mut state = self.state.lock().unwrap();
        state
            .sessions
            .get_mut(session)
            .map(|waiting| waiting.drain(..).count())
            .unwrap_or(0)
    }

    /// Stop admitting and forget every session. Waiting polls are discarded without callbacks.
    /// Returns the number of waiting polls thrown away.
    pub(crate) fn close(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        state.open = false;
        let discarded = state.sessions.values().map(VecDeque::len).sum();
        state.sessions.clear();
        discarded
    }

    /// (sessions with a poll in flight, polls waiting behind them)
    pub(crate) fn depths(&self) -> (usize, usize) {
        let state = self.state.lock().unwrap();
        let pending = state.sessions.values().map(VecDeque::len).sum();
        (state.sessions.len(), pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queues::PollQueue;
    use crate::testing::{NullConnection, NullSource};
    use std::sync::Arc;
    use std::time::Duration;

    fn request(key: &SessionKey) -> PollRequest {
        PollRequest::new(
            key.clone(),
            Duration::from_secs(30),
            Arc::new(NullConnection),
            Arc::new(NullSource),
        )
    }

    #[test]
    fn test_first_poll_dispatches_rest_queue() {
        let dispatch = PollQueue::new();
        let gate = SessionGate::new(dispatch.sender());
        let key = SessionKey::new(1, "/caps/eq");

        assert_eq!(gate.submit(request(&key)).unwrap(), Admission::Dispatched);
        assert_eq!(gate.submit(request(&key)).unwrap(), Admission::Queued(0));
        assert_eq!(gate.submit(request(&key)).unwrap(), Admission::Queued(1));
        assert_eq!(dispatch.len(), 1);
        assert_eq!(gate.depths(), (1, 2));
    }

    #[test]
    fn test_release_admits_in_submission_order() {
        let dispatch = PollQueue::new();
        let gate = SessionGate::new(dispatch.sender());
        let key = SessionKey::new(1, "/caps/eq");

        let ids: Vec<_> = (0..3)
            .map(|_| {
                let r = request(&key);
                let id = r.request_id;
                gate.submit(r).unwrap();
                id
            })
            .collect();

        let first = dispatch.try_recv().unwrap();
        assert_eq!(first.request_id, ids[0]);
        assert!(dispatch.try_recv().is_none());

        assert_eq!(gate.release(&key), Release::Advanced);
        let second = dispatch.try_recv().unwrap();
        assert_eq!(second.request_id, ids[1]);
        assert!(dispatch.try_recv().is_none());

        assert_eq!(gate.release(&key), Release::Advanced);
        assert_eq!(dispatch.try_recv().unwrap().request_id, ids[2]);

        assert_eq!(gate.release(&key), Release::Vacated);
        assert_eq!(gate.depths(), (0, 0));
    }

    #[test]
    fn test_distinct_sessions_do_not_block_each_other() {
        let dispatch = PollQueue::new();
        let gate = SessionGate::new(dispatch.sender());
        for i in 0..10 {
            let key = SessionKey::new(i, "/caps/eq");
            assert_eq!(gate.submit(request(&key)).unwrap(), Admission::Dispatched);
        }
        assert_eq!(dispatch.len(), 10);
        assert_eq!(gate.depths(), (10, 0));
    }

    #[test]
    fn test_release_unknown_session() {
        let dispatch = PollQueue::new();
        let gate = SessionGate::new(dispatch.sender());
        assert_eq!(
            gate.release(&SessionKey::new(7, "/nowhere")),
            Release::Unknown
        );
    }

    #[test]
    fn test_drop_session_keeps_slot_held() {
        let dispatch = PollQueue::new();
        let gate = SessionGate::new(dispatch.sender());
        let key = SessionKey::new(3, "/caps/eq");
        gate.submit(request(&key)).unwrap();
        gate.submit(request(&key)).unwrap();
        gate.submit(request(&key)).unwrap();

        assert_eq!(gate.drop_session(&key), 2);
        // The in-flight poll still owns the slot, so a new poll must wait.
        assert_eq!(gate.submit(request(&key)).unwrap(), Admission::Queued(0));
        assert_eq!(dispatch.len(), 1);
    }

    #[test]
    fn test_close_discards_and_refuses() {
        let dispatch = PollQueue::new();
        let gate = SessionGate::new(dispatch.sender());
        let key = SessionKey::new(4, "/caps/eq");
        gate.submit(request(&key)).unwrap();
        gate.submit(request(&key)).unwrap();

        assert_eq!(gate.close(), 1);
        assert!(gate.submit(request(&key)).is_err());
        assert_eq!(gate.release(&key), Release::Unknown);
        // Only the originally dispatched poll ever made it to the queue.
        assert_eq!(dispatch.len(), 1);
    }
}
