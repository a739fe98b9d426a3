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

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Running totals of how polls left the scheduler. Relaxed ordering throughout; these are for
/// operators, not for synchronization.
#[derive(Debug, Default)]
pub struct PollCounters {
    pub submitted: AtomicU64,
    pub answered: AtomicU64,
    pub answered_empty: AtomicU64,
    pub dropped: AtomicU64,
    pub retried: AtomicU64,
    pub force_closed: AtomicU64,
    pub payload_failures: AtomicU64,
    pub worker_faults: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountersSnapshot {
    pub submitted: u64,
    pub answered: u64,
    pub answered_empty: u64,
    pub dropped: u64,
    pub retried: u64,
    pub force_closed: u64,
    pub payload_failures: u64,
    pub worker_faults: u64,
}

impl PollCounters {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            answered: self.answered.load(Ordering::Relaxed),
            answered_empty: self.answered_empty.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            force_closed: self.force_closed.load(Ordering::Relaxed),
            payload_failures: self.payload_failures.load(Ordering::Relaxed),
            worker_faults: self.worker_faults.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_bumps() {
        let counters = PollCounters::default();
        PollCounters::bump(&counters.submitted);
        PollCounters::bump(&counters.submitted);
        PollCounters::bump(&counters.answered_empty);

        let snap = counters.snapshot();
        assert_eq!(snap.submitted, 2);
        assert_eq!(snap.answered_empty, 1);
        assert_eq!(snap.answered, 0);
    }
}
