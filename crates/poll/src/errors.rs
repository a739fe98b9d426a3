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

use thiserror::Error;

/// Errors surfaced to the owner of the poll service itself. Nothing that happens to an
/// individual poll once it has been admitted is reported through here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PollServiceError {
    #[error("Poll service is not running")]
    NotRunning,
    #[error("Invalid poll service configuration: {0}")]
    InvalidConfig(String),
    #[error("Could not spawn poll service thread: {0}")]
    ThreadSpawn(String),
    #[error("Could not build execution pool: {0}")]
    PoolBuild(String),
}

/// Failures reported by a connection when writing or closing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The connection was torn down underneath us, typically by a racing client disconnect.
    /// This is expected under churn and is not treated as a failure.
    #[error("Connection already disposed")]
    Disposed,
    #[error("Connection closed")]
    Closed,
    #[error("Connection I/O failure: {0}")]
    Io(String),
}

/// Failure while building a response payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Payload construction failed: {0}")]
    Failed(String),
}
