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

//! Connection and event-source doubles which record every call made on them. Used by the unit
//! tests here, the integration suite, and anything embedding the service that wants to check
//! its wiring.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use uuid::Uuid;

use crate::errors::{ConnectionError, PayloadError};
use crate::request::{PollConnection, PollEventSource, PollResponse, SessionKey};

/// Always writable, never busy, discards everything.
pub struct NullConnection;

impl PollConnection for NullConnection {
    fn can_send(&self) -> bool {
        true
    }

    fn is_sending(&self) -> bool {
        false
    }

    fn send_response(&self, _response: PollResponse) -> Result<(), ConnectionError> {
        Ok(())
    }

    fn force_close(&self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

/// Never has events.
pub struct NullSource;

impl PollEventSource for NullSource {
    fn has_events(&self, _request_id: Uuid, _session: &SessionKey) -> bool {
        false
    }

    fn get_events(
        &self,
        _request_id: Uuid,
        _session: &SessionKey,
    ) -> Result<PollResponse, PayloadError> {
        Ok(PollResponse::no_content())
    }

    fn no_events(
        &self,
        _request_id: Uuid,
        _session: &SessionKey,
    ) -> Result<PollResponse, PayloadError> {
        Ok(PollResponse::no_content())
    }

    fn drop_request(&self, _request_id: Uuid, _session: &SessionKey) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendBehavior {
    Succeed,
    /// Report the connection as already disposed, as if the client vanished mid-write.
    Disposed,
    Fail,
    Panic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadBehavior {
    Succeed,
    Fail,
    Panic,
}

pub struct MockConnection {
    can_send: AtomicBool,
    sending: AtomicBool,
    send_behavior: Mutex<SendBehavior>,
    responses: Mutex<Vec<PollResponse>>,
    send_attempts: AtomicUsize,
    force_closes: AtomicUsize,
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnection {
    pub fn new() -> Self {
        Self {
            can_send: AtomicBool::new(true),
            sending: AtomicBool::new(false),
            send_behavior: Mutex::new(SendBehavior::Succeed),
            responses: Mutex::new(vec![]),
            send_attempts: AtomicUsize::new(0),
            force_closes: AtomicUsize::new(0),
        }
    }

    pub fn set_can_send(&self, can_send: bool) {
        self.can_send.store(can_send, Ordering::SeqCst);
    }

    pub fn set_sending(&self, sending: bool) {
        self.sending.store(sending, Ordering::SeqCst);
    }

    pub fn set_send_behavior(&self, behavior: SendBehavior) {
        *self.send_behavior.lock().unwrap() = behavior;
    }

    pub fn responses(&self) -> Vec<PollResponse> {
        self.responses.lock().unwrap().clone()
    }

    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn force_closes(&self) -> usize {
        self.force_closes.load(Ordering::SeqCst)
    }
}

impl PollConnection for MockConnection {
    fn can_send(&self) -> bool {
        self.can_send.load(Ordering::SeqCst)
    }

    fn is_sending(&self) -> bool {
        self.sending.load(Ordering::SeqCst)
    }

    fn send_response(&self, response: PollResponse) -> Result<(), ConnectionError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.send_behavior.lock().unwrap();
        match behavior {
            SendBehavior::Succeed => {
                self.responses.lock().unwrap().push(response);
                Ok(())
            }
            SendBehavior::Disposed => Err(ConnectionError::Disposed),
            SendBehavior::Fail => Err(ConnectionError::Io("broken pipe".to_string())),
            SendBehavior::Panic => panic!("mock connection panicked on send"),
        }
    }

    fn force_close(&self) -> Result<(), ConnectionError> {
        self.force_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockSource {
    has_events: AtomicBool,
    payload_behavior: Mutex<PayloadBehavior>,
    /// How long `get_events` takes, to widen race windows.
    hold: Mutex<Duration>,
    /// How long `has_events` takes, to keep a worker busy.
    check_hold: Mutex<Duration>,
    check_panics: AtomicBool,
    has_events_calls: AtomicUsize,
    answered: Mutex<Vec<Uuid>>,
    answered_empty: Mutex<Vec<Uuid>>,
    dropped: Mutex<Vec<Uuid>>,
    building: AtomicUsize,
    max_building: AtomicUsize,
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            has_events: AtomicBool::new(false),
            payload_behavior: Mutex::new(PayloadBehavior::Succeed),
            hold: Mutex::new(Duration::ZERO),
            check_hold: Mutex::new(Duration::ZERO),
            check_panics: AtomicBool::new(false),
            has_events_calls: AtomicUsize::new(0),
            answered: Mutex::new(vec![]),
            answered_empty: Mutex::new(vec![]),
            dropped: Mutex::new(vec![]),
            building: AtomicUsize::new(0),
            max_building: AtomicUsize::new(0),
        }
    }

    pub fn with_events() -> Self {
        let source = Self::new();
        source.set_has_events(true);
        source
    }

    pub fn set_has_events(&self, has_events: bool) {
        self.has_events.store(has_events, Ordering::SeqCst);
    }

    pub fn set_payload_behavior(&self, behavior: PayloadBehavior) {
        *self.payload_behavior.lock().unwrap() = behavior;
    }

    pub fn set_hold(&self, hold: Duration) {
        *self.hold.lock().unwrap() = hold;
    }

    pub fn set_check_hold(&self, hold: Duration) {
        *self.check_hold.lock().unwrap() = hold;
    }

    /// Make `has_events` panic, as a buggy owner might.
    pub fn set_check_panics(&self, panics: bool) {
        self.check_panics.store(panics, Ordering::SeqCst);
    }

    pub fn has_events_calls(&self) -> usize {
        self.has_events_calls.load(Ordering::SeqCst)
    }

    /// Request ids passed to `get_events`, in call order.
    pub fn answered(&self) -> Vec<Uuid> {
        self.answered.lock().unwrap().clone()
    }

    /// Request ids passed to `no_events`, in call order.
    pub fn answered_empty(&self) -> Vec<Uuid> {
        self.answered_empty.lock().unwrap().clone()
    }

    /// Request ids passed to `drop_request`, in call order.
    pub fn dropped(&self) -> Vec<Uuid> {
        self.dropped.lock().unwrap().clone()
    }

    /// The most payloads this source was ever asked to build at the same time.
    pub fn max_concurrent_builds(&self) -> usize {
        self.max_building.load(Ordering::SeqCst)
    }

    fn build(&self, request_id: Uuid, log: &Mutex<Vec<Uuid>>) -> Result<PollResponse, PayloadError> {
        let now_building = self.building.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_building.fetch_max(now_building, Ordering::SeqCst);
        log.lock().unwrap().push(request_id);

        let hold = *self.hold.lock().unwrap();
        if !hold.is_zero() {
            std::thread::sleep(hold);
        }
        self.building.fetch_sub(1, Ordering::SeqCst);

        let behavior = *self.payload_behavior.lock().unwrap();
        match behavior {
            PayloadBehavior::Succeed => Ok(PollResponse::ok(
                "application/llsd+xml",
                request_id.to_string().into_bytes(),
            )),
            PayloadBehavior::Fail => Err(PayloadError::Failed("serializer exploded".to_string())),
            PayloadBehavior::Panic => panic!("mock source panicked building payload"),
        }
    }
}

impl PollEventSource for MockSource {
    fn has_events(&self, _request_id: Uuid, _session: &SessionKey) -> bool {
        self.has_events_calls.fetch_add(1, Ordering::SeqCst);
        let hold = *self.check_hold.lock().unwrap();
        if !hold.is_zero() {
            std::thread::sleep(hold);
        }
        if self.check_panics.load(Ordering::SeqCst) {
            panic!("mock source panicked checking for events");
        }
        self.has_events.load(Ordering::SeqCst)
    }

    fn get_events(
        &self,
        request_id: Uuid,
        _session: &SessionKey,
    ) -> Result<PollResponse, PayloadError> {
        self.build(request_id, &self.answered)
    }

    fn no_events(
        &self,
        request_id: Uuid,
        _session: &SessionKey,
    ) -> Result<PollResponse, PayloadError> {
        let behavior = *self.payload_behavior.lock().unwrap();
        self.answered_empty.lock().unwrap().push(request_id);
        match behavior {
            PayloadBehavior::Succeed => Ok(PollResponse::no_content()),
            PayloadBehavior::Fail => Err(PayloadError::Failed("heartbeat exploded".to_string())),
            PayloadBehavior::Panic => panic!("mock source panicked building heartbeat"),
        }
    }

    fn drop_request(&self, request_id: Uuid, _session: &SessionKey) {
        self.dropped.lock().unwrap().push(request_id);
    }
}
