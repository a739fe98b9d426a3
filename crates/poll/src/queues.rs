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

//! The dispatch and retry queues. Both are plain multi-producer/multi-consumer channels; the
//! queue owns one end of each side so the channel can never become disconnected while the queue
//! is alive.

use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};

use crate::request::PollRequest;

pub(crate) type DispatchSender = Sender<PollRequest>;

pub(crate) struct PollQueue {
    sender: Sender<PollRequest>,
    receiver: Receiver<PollRequest>,
}

impl PollQueue {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self { sender, receiver }
    }

    pub(crate) fn sender(&self) -> Sender<PollRequest> {
        self.sender.clone()
    }

    pub(crate) fn push(&self, request: PollRequest) {
        // We hold a receiver, so this cannot fail.
        let _ = self.sender.send(request);
    }

    /// Block for at most `wait`. `None` on timeout.
    pub(crate) fn recv_timeout(&self, wait: Duration) -> Option<PollRequest> {
        match self.receiver.recv_timeout(wait) {
            Ok(request) => Some(request),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn try_recv(&self) -> Option<PollRequest> {
        self.receiver.try_recv().ok()
    }

    /// Take everything currently queued, in queue order.
    pub(crate) fn drain(&self) -> Vec<PollRequest> {
        self.receiver.drain().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.receiver.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::SessionKey;
    use crate::testing::{NullConnection, NullSource};
    use std::sync::Arc;

    fn request(n: u64) -> PollRequest {
        PollRequest::new(
            SessionKey::new(n, "/caps/eq"),
            Duration::from_secs(1),
            Arc::new(NullConnection),
            Arc::new(NullSource),
        )
    }

    #[test]
    fn test_recv_timeout_empty() {
        let q = PollQueue::new();
        let start = std::time::Instant::now();
        assert!(q.recv_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_drain_preserves_order() {
        let q = PollQueue::new();
        for n in 0..5 {
            q.push(request(n));
        }
        let sender = q.sender();
        sender.send(request(5)).unwrap();

        let drained: Vec<_> = q.drain().into_iter().map(|r| r.session.connection_id).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(q.len(), 0);
    }
}
