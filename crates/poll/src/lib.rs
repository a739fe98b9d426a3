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

//! Long-poll request scheduling for the simulator's HTTP layer.
//!
//! Many thousands of held-open viewer polls are multiplexed over a small fixed set of worker
//! threads. Each session has at most one poll being evaluated or answered at a time; the rest
//! wait their turn in submission order.

pub use crate::config::PollServiceConfig;
pub use crate::counters::{CountersSnapshot, PollCounters};
pub use crate::errors::{ConnectionError, PayloadError, PollServiceError};
pub use crate::execution::ResponseKind;
pub use crate::gate::{Admission, Release};
pub use crate::request::{PollConnection, PollEventSource, PollRequest, PollResponse, SessionKey};
pub use crate::service::{PollService, PollServiceStatus, ShutdownReport};
pub use crate::watchdog::{HeartbeatRegistry, NoopWatchdog, Watchdog};
pub use crate::worker::{Triage, triage};

mod config;
mod counters;
mod errors;
mod execution;
mod gate;
mod queues;
mod request;
mod retry;
mod service;
mod state;
mod watchdog;
mod worker;

pub mod testing;
