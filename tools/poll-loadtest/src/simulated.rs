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

//! Stand-ins for the viewer's held-open HTTP exchange and the simulator's per-viewer event
//! queue.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use comet_poll::{
    ConnectionError, PayloadError, PollConnection, PollEventSource, PollResponse, SessionKey,
};
use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

/// How each poll attempt ended, from the point of view of the simulated clients.
#[derive(Default)]
pub struct Tally {
    answered: AtomicU64,
    heartbeats: AtomicU64,
    dropped: AtomicU64,
    disposed: AtomicU64,
    force_closed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TallySnapshot {
    pub answered: u64,
    pub heartbeats: u64,
    pub dropped: u64,
    pub disposed: u64,
    pub force_closed: u64,
}

impl TallySnapshot {
    pub fn resolved(&self) -> u64 {
        self.answered + self.heartbeats + self.dropped + self.disposed + self.force_closed
    }
}

impl Tally {
    pub fn snapshot(&self) -> TallySnapshot {
        TallySnapshot {
            answered: self.answered.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            disposed: self.disposed.load(Ordering::Relaxed),
            force_closed: self.force_closed.load(Ordering::Relaxed),
        }
    }
}

/// A viewer's keep-alive connection, carrying each of its session's polls in turn. The client
/// may hang up partway through, and a response may keep flushing after `send_response` returns.
pub struct SimulatedConnection {
    tally: Arc<Tally>,
    /// When the client hangs up, if it does.
    hangs_up_at: Option<Instant>,
    slow_send_probability: f64,
    slow_send: Duration,
    /// The previous response is still being written out until this instant.
    flushing_until: Mutex<Option<Instant>>,
    closed: AtomicBool,
}

impl SimulatedConnection {
    pub fn new(
        tally: Arc<Tally>,
        hangs_up_at: Option<Instant>,
        slow_send_probability: f64,
        slow_send: Duration,
    ) -> Self {
        Self {
            tally,
            hangs_up_at,
            slow_send_probability,
            slow_send,
            flushing_until: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn hung_up(&self) -> bool {
        self.hangs_up_at.is_some_and(|at| Instant::now() >= at)
    }
}

impl PollConnection for SimulatedConnection {
    fn can_send(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.hung_up()
    }

    fn is_sending(&self) -> bool {
        self.flushing_until
            .lock()
            .unwrap()
            .is_some_and(|until| Instant::now() < until)
    }

    fn send_response(&self, response: PollResponse) -> Result<(), ConnectionError> {
        // The client may have gone between the worker's check and now.
        if self.hung_up() || self.closed.load(Ordering::Acquire) {
            self.tally.disposed.fetch_add(1, Ordering::Relaxed);
            return Err(ConnectionError::Disposed);
        }
        if rand::rng().random_bool(self.slow_send_probability) {
            *self.flushing_until.lock().unwrap() = Some(Instant::now() + self.slow_send);
        }
        let counter = if response.body.is_empty() {
            &self.tally.heartbeats
        } else {
            &self.tally.answered
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn force_close(&self) -> Result<(), ConnectionError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(ConnectionError::Closed);
        }
        self.tally.force_closed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// One viewer's event queue. Events turn up at random.
pub struct SimulatedEventQueue {
    tally: Arc<Tally>,
    event_probability: f64,
    sequence: AtomicU64,
}

impl SimulatedEventQueue {
    pub fn new(tally: Arc<Tally>, event_probability: f64) -> Self {
        Self {
            tally,
            event_probability,
            sequence: AtomicU64::new(0),
        }
    }
}

impl PollEventSource for SimulatedEventQueue {
    fn has_events(&self, _request_id: Uuid, _session: &SessionKey) -> bool {
        rand::rng().random_bool(self.event_probability)
    }

    fn get_events(
        &self,
        request_id: Uuid,
        session: &SessionKey,
    ) -> Result<PollResponse, PayloadError> {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed);
        let body = format!(
            "<llsd><map><key>id</key><integer>{id}</integer><key>request</key><uuid>{request_id}</uuid><key>session</key><string>{session}</string></map></llsd>"
        );
        Ok(PollResponse::ok("application/llsd+xml", Bytes::from(body)))
    }

    fn no_events(
        &self,
        _request_id: Uuid,
        _session: &SessionKey,
    ) -> Result<PollResponse, PayloadError> {
        Ok(PollResponse::no_content())
    }

    fn drop_request(&self, _request_id: Uuid, _session: &SessionKey) {
        self.tally.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hung_up_connection_reports_disposed() {
        let tally = Arc::new(Tally::default());
        let connection =
            SimulatedConnection::new(tally.clone(), Some(Instant::now()), 0.0, Duration::ZERO);
        assert!(!connection.can_send());
        assert_eq!(
            connection.send_response(PollResponse::no_content()),
            Err(ConnectionError::Disposed)
        );
        assert_eq!(tally.snapshot().disposed, 1);
    }

    #[test]
    fn test_force_close_counts_once() {
        let tally = Arc::new(Tally::default());
        let connection = SimulatedConnection::new(tally.clone(), None, 0.0, Duration::ZERO);
        assert!(connection.force_close().is_ok());
        assert_eq!(connection.force_close(), Err(ConnectionError::Closed));
        assert_eq!(tally.snapshot().force_closed, 1);
        assert!(!connection.can_send());
    }

    #[test]
    fn test_heartbeat_and_event_responses_tallied_separately() {
        let tally = Arc::new(Tally::default());
        let source = SimulatedEventQueue::new(tally.clone(), 1.0);
        let session = SessionKey::new(1, "/caps/eq");
        let id = Uuid::new_v4();
        assert!(source.has_events(id, &session));

        let connection = SimulatedConnection::new(tally.clone(), None, 0.0, Duration::ZERO);
        connection
            .send_response(source.get_events(id, &session).unwrap())
            .unwrap();
        connection
            .send_response(source.no_events(id, &session).unwrap())
            .unwrap();

        let snapshot = tally.snapshot();
        assert_eq!(snapshot.answered, 1);
        assert_eq!(snapshot.heartbeats, 1);
        assert_eq!(snapshot.resolved(), 2);
    }

    #[test]
    fn test_slow_send_keeps_connection_sending() {
        let tally = Arc::new(Tally::default());
        let connection =
            SimulatedConnection::new(tally.clone(), None, 1.0, Duration::from_millis(50));
        assert!(!connection.is_sending());

        connection.send_response(PollResponse::no_content()).unwrap();
        assert!(connection.is_sending());
        assert!(connection.can_send());

        std::thread::sleep(Duration::from_millis(60));
        assert!(!connection.is_sending());
        assert_eq!(tally.snapshot().heartbeats, 1);
    }
}
