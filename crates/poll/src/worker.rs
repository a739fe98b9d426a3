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

//! Poll workers. A fixed number of these pull polls off the dispatch queue and make only cheap
//! decisions about them; anything which builds or writes a response goes to the execution pool.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use minstant::Instant;
use tracing::{debug, trace, warn};

use crate::counters::PollCounters;
use crate::execution::{ResponseKind, respond};
use crate::request::PollRequest;
use crate::state::ServiceState;

/// The outcome of looking at a poll once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Triage {
    /// Client gone, or its previous write never drained within the budget. Drop without answering.
    Abandon,
    /// Not ready and not expired. Park on the retry queue, slot still held.
    Defer,
    /// Events are waiting; answer with them.
    Respond,
    /// Timed out with nothing to say; answer with the empty heartbeat.
    RespondEmpty,
}

/// Decide what to do with a poll at `now`. Calls only the cheap, non-blocking checks.
pub fn triage(request: &PollRequest, now: Instant) -> Triage {
    if !request.connection.can_send() {
        return Triage::Abandon;
    }
    if request.connection.is_sending() {
        return if request.is_expired_at(now) {
            Triage::Abandon
        } else {
            Triage::Defer
        };
    }
    if request
        .source
        .has_events(request.request_id, &request.session)
    {
        return Triage::Respond;
    }
    if request.is_expired_at(now) {
        Triage::RespondEmpty
    } else {
        Triage::Defer
    }
}

pub(crate) fn worker_loop(state: Arc<ServiceState>, thread_name: String) {
    debug!(thread = %thread_name, "Poll worker started");
    while state.is_running() {
        let Some(request) = state.dispatch.recv_timeout(state.config.dispatch_wait) else {
            state.beat(&thread_name);
            continue;
        };
        state.busy_workers.fetch_add(1, Ordering::SeqCst);
        evaluate(&state, request);
        state.busy_workers.fetch_sub(1, Ordering::SeqCst);
        state.beat(&thread_name);
    }
    debug!(thread = %thread_name, "Poll worker exiting");
}

fn evaluate(state: &Arc<ServiceState>, request: PollRequest) {
    let decision = catch_unwind(AssertUnwindSafe(|| triage(&request, Instant::now())));
    let decision = match decision {
        Ok(decision) => decision,
        Err(_) => {
            PollCounters::bump(&state.counters.worker_faults);
            warn!(session = %request.session, request_id = ?request.request_id, "Panic while evaluating poll; dropping it");
            state.abandon(request);
            return;
        }
    };
    trace!(session = %request.session, ?decision, "Poll evaluated");
    match decision {
        Triage::Abandon => state.abandon(request),
        // The retry queue is not swept again once the service has stopped.
        Triage::Defer if !state.is_running() => {
            debug!(session = %request.session, "Poll deferred after shutdown; closing it");
            state.force_close(request);
        }
        Triage::Defer => {
            PollCounters::bump(&state.counters.retried);
            state.retry.push(request);
        }
        Triage::Respond => respond(state, request, ResponseKind::Events),
        Triage::RespondEmpty => respond(state, request, ResponseKind::NoEvents),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::SessionKey;
    use crate::testing::{MockConnection, MockSource};
    use std::time::Duration;
    use test_case::test_case;

    fn request(
        connection: Arc<MockConnection>,
        source: Arc<MockSource>,
        timeout: Duration,
    ) -> PollRequest {
        PollRequest::new(SessionKey::new(1, "/caps/eq"), timeout, connection, source)
    }

    #[test_case(true, false, true, 0, Triage::Respond; "events ready")]
    #[test_case(true, false, false, 0, Triage::Defer; "waiting for events")]
    #[test_case(true, false, false, 30, Triage::RespondEmpty; "exactly at budget")]
    #[test_case(true, false, false, 31, Triage::RespondEmpty; "past budget")]
    #[test_case(true, false, true, 31, Triage::Respond; "events beat expiry")]
    #[test_case(false, false, true, 0, Triage::Abandon; "client gone")]
    #[test_case(true, true, true, 0, Triage::Defer; "previous write still flushing")]
    #[test_case(true, true, false, 30, Triage::Abandon; "write never drained")]
    fn test_triage(
        can_send: bool,
        is_sending: bool,
        has_events: bool,
        elapsed_secs: u64,
        expected: Triage,
    ) {
        let connection = Arc::new(MockConnection::new());
        connection.set_can_send(can_send);
        connection.set_sending(is_sending);
        let source = Arc::new(MockSource::new());
        source.set_has_events(has_events);

        let r = request(connection, source, Duration::from_secs(30));
        let now = r.submitted_at + Duration::from_secs(elapsed_secs);
        assert_eq!(triage(&r, now), expected);
    }

    #[test]
    fn test_zero_budget_expires_immediately() {
        let r = request(
            Arc::new(MockConnection::new()),
            Arc::new(MockSource::new()),
            Duration::ZERO,
        );
        assert_eq!(triage(&r, r.submitted_at), Triage::RespondEmpty);
    }

    #[test]
    fn test_gone_client_skips_event_check() {
        let connection = Arc::new(MockConnection::new());
        connection.set_can_send(false);
        let source = Arc::new(MockSource::new());
        let r = request(connection, source.clone(), Duration::from_secs(30));
        assert_eq!(triage(&r, Instant::now()), Triage::Abandon);
        assert_eq!(source.has_events_calls(), 0);
    }
}
