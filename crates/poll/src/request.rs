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

//! The record of one outstanding long-poll attempt, and the interfaces the scheduler uses to
//! talk back to the HTTP layer which owns the connection and the event source.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use minstant::Instant;
use uuid::Uuid;

use crate::errors::{ConnectionError, PayloadError};

/// Identifies a polling session: a logical channel which outlives any single HTTP request, and
/// which is shared by the successive polls of one viewer against one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub connection_id: u64,
    pub endpoint: Arc<str>,
}

impl SessionKey {
    pub fn new(connection_id: u64, endpoint: impl Into<Arc<str>>) -> Self {
        Self {
            connection_id,
            endpoint: endpoint.into(),
        }
    }
}

impl Display for SessionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.connection_id, self.endpoint)
    }
}

/// A fully formed response to hand back to the connection. The scheduler never looks inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResponse {
    pub status_code: u16,
    pub content_type: String,
    pub body: Bytes,
    pub keep_alive: bool,
}

impl PollResponse {
    pub fn ok(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            status_code: 200,
            content_type: content_type.into(),
            body: body.into(),
            keep_alive: true,
        }
    }

    /// The "nothing happened" heartbeat. Well-formed and empty, never an error.
    pub fn no_content() -> Self {
        Self {
            status_code: 200,
            content_type: "text/plain".to_string(),
            body: Bytes::new(),
            keep_alive: true,
        }
    }
}

/// The transport side of a poll: the held-open HTTP exchange.
pub trait PollConnection: Send + Sync {
    /// Whether the transport can still accept a write. False means the client is gone.
    fn can_send(&self) -> bool;

    /// Whether a previous response write on this connection is still flushing.
    fn is_sending(&self) -> bool;

    /// Write the payload and complete the HTTP exchange.
    fn send_response(&self, response: PollResponse) -> Result<(), ConnectionError>;

    /// Terminate the exchange unconditionally. Only used while the scheduler shuts down.
    fn force_close(&self) -> Result<(), ConnectionError>;
}

/// The owning subsystem's side of a poll (e.g. an event queue for one viewer).
///
/// `get_events` and `no_events` run on the execution pool, not on the worker which made the
/// decision, and so must be safe to call from an arbitrary thread.
pub trait PollEventSource: Send + Sync {
    /// Non-blocking check for data ready to return right now.
    fn has_events(&self, request_id: Uuid, session: &SessionKey) -> bool;

    /// Build the payload for pending events. May be moderately expensive.
    fn get_events(&self, request_id: Uuid, session: &SessionKey)
    -> Result<PollResponse, PayloadError>;

    /// Build the empty/heartbeat payload sent when the poll times out.
    fn no_events(&self, request_id: Uuid, session: &SessionKey)
    -> Result<PollResponse, PayloadError>;

    /// This poll attempt is being abandoned without a response.
    fn drop_request(&self, request_id: Uuid, session: &SessionKey);
}

/// One outstanding poll attempt. Owned by the scheduler from `submit` until it is answered,
/// dropped, or force-closed; the session gate guarantees only one thread ever holds it.
pub struct PollRequest {
    pub request_id: Uuid,
    pub session: SessionKey,
    pub submitted_at: Instant,
    pub timeout: Duration,
    pub connection: Arc<dyn PollConnection>,
    pub source: Arc<dyn PollEventSource>,
}

impl PollRequest {
    pub fn new(
        session: SessionKey,
        timeout: Duration,
        connection: Arc<dyn PollConnection>,
        source: Arc<dyn PollEventSource>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            session,
            submitted_at: Instant::now(),
            timeout,
            connection,
            source,
        }
    }

    /// Time since submission, as seen at `now`. Saturates at zero if `now` predates submission.
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.checked_duration_since(self.submitted_at)
            .unwrap_or(Duration::ZERO)
    }

    /// Expiry is inclusive: a poll whose elapsed time equals its budget has timed out.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.elapsed_at(now) >= self.timeout
    }

    pub(crate) fn abandon(&self) {
        self.source.drop_request(self.request_id, &self.session);
    }
}

impl std::fmt::Debug for PollRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollRequest")
            .field("request_id", &self.request_id)
            .field("session", &self.session)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
