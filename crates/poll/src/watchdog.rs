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

//! Liveness reporting for the scheduler's own threads.
//! Workers beat every time their dispatch wait times out and after every poll they evaluate, so
//! a thread which stops beating is wedged inside a callback.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use minstant::Instant;

pub trait Watchdog: Send + Sync {
    fn update_thread(&self, thread_name: &str);
}

/// Used when the host doesn't supply a watchdog.
pub struct NoopWatchdog;

impl Watchdog for NoopWatchdog {
    fn update_thread(&self, _thread_name: &str) {}
}

/// Remembers the most recent beat from each thread.
#[derive(Default)]
pub struct HeartbeatRegistry {
    beats: Mutex<HashMap<String, Instant>>,
}

impl HeartbeatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_beat(&self, thread_name: &str) -> Option<Instant> {
        self.beats.lock().unwrap().get(thread_name).copied()
    }

    /// Threads whose last beat is older than `max_age`, sorted by name.
    pub fn stale_threads(&self, max_age: Duration) -> Vec<String> {
        let now = Instant::now();
        let beats = self.beats.lock().unwrap();
        let mut stale: Vec<_> = beats
            .iter()
            .filter(|(_, beat)| {
                now.checked_duration_since(**beat)
                    .is_some_and(|age| age > max_age)
            })
            .map(|(name, _)| name.clone())
            .collect();
        stale.sort();
        stale
    }

    pub fn thread_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.beats.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Watchdog for HeartbeatRegistry {
    fn update_thread(&self, thread_name: &str) {
        self.beats
            .lock()
            .unwrap()
            .insert(thread_name.to_string(), Instant::now());
    }
}
