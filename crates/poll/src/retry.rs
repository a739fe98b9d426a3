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

//! Periodically moves parked polls back onto the dispatch queue. A poll that isn't ready waits
//! at most one retry period before it is looked at again.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::state::ServiceState;

pub(crate) fn retry_loop(state: Arc<ServiceState>, thread_name: String) {
    debug!(thread = %thread_name, "Poll retry loop started");
    while state.is_running() {
        std::thread::sleep(state.config.retry_interval);
        if !state.is_running() {
            break;
        }
        let swept = sweep(&state);
        if swept > 0 {
            trace!(swept, "Requeued parked polls");
        }
        state.beat(&thread_name);
    }
    debug!(thread = %thread_name, "Poll retry loop exiting");
}

/// Move everything currently parked back to dispatch. Returns how many were moved.
pub(crate) fn sweep(state: &ServiceState) -> usize {
    let parked = state.retry.drain();
    let count = parked.len();
    for request in parked {
        state.dispatch.push(request);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PollServiceConfig;
    use crate::counters::PollCounters;
    use crate::request::{PollRequest, SessionKey};
    use crate::testing::{NullConnection, NullSource};
    use crate::watchdog::NoopWatchdog;
    use std::time::Duration;

    #[test]
    fn test_sweep_moves_everything_to_dispatch() {
        let state = ServiceState::new(
            PollServiceConfig {
                execution_threads: 1,
                ..Default::default()
            },
            Arc::new(PollCounters::default()),
            Arc::new(NoopWatchdog),
        )
        .unwrap();
        for n in 0..3 {
            state.retry.push(PollRequest::new(
                SessionKey::new(n, "/caps/eq"),
                Duration::from_secs(30),
                Arc::new(NullConnection),
                Arc::new(NullSource),
            ));
        }

        assert_eq!(sweep(&state), 3);
        assert_eq!(state.retry.len(), 0);
        assert_eq!(state.dispatch.len(), 3);
        assert_eq!(sweep(&state), 0);
    }
}
