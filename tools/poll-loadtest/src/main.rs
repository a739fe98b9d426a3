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

//! Long-poll scheduler load test. Opens a crowd of simulated viewer sessions, each firing a
//! burst of polls, and waits for every poll to be answered, timed out, or dropped.
//! Note: you should run this in release mode to get decent/comparable results

mod args;
mod simulated;

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use color_eyre::eyre::Report;
use comet_poll::{PollRequest, PollService, PollServiceStatus, SessionKey, ShutdownReport};
use eyre::eyre;
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::args::{Args, LoadTestConfig};
use crate::simulated::{SimulatedConnection, SimulatedEventQueue, Tally, TallySnapshot};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
const ENDPOINT: &str = "/caps/event_queue";

#[derive(Serialize)]
struct Summary {
    config: LoadTestConfig,
    elapsed_ms: u128,
    submitted: usize,
    rejected: usize,
    unresolved: u64,
    clients: TallySnapshot,
    shutdown: Option<ShutdownReport>,
    status: PollServiceStatus,
}

fn init_tracing(debug_fallback: bool) -> Result<(), Report> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if debug_fallback { "debug" } else { "info" })
    });
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_ansi(true)
                .with_target(false)
                .with_thread_names(true),
        )
        .with(filter)
        .try_init()
        .map_err(|e| eyre!("Unable to configure logging: {}", e))
}

/// Submit every poll for every session, back to back. Returns (submitted, rejected).
fn submit_all(
    service: &PollService,
    config: &LoadTestConfig,
    tally: &Arc<Tally>,
) -> (usize, usize) {
    let mut rng = rand::rng();
    let timeout = config.timeout();
    let (mut submitted, mut rejected) = (0, 0);
    for session_id in 0..config.sessions as u64 {
        let session = SessionKey::new(session_id, ENDPOINT);
        let source = Arc::new(SimulatedEventQueue::new(
            tally.clone(),
            config.event_probability,
        ));
        let hangs_up_at = rng
            .random_bool(config.disconnect_probability)
            .then(|| Instant::now() + timeout.mul_f64(rng.random_range(0.0..2.0)));
        let connection = Arc::new(SimulatedConnection::new(
            tally.clone(),
            hangs_up_at,
            config.slow_send_probability,
            config.slow_send(),
        ));
        for _ in 0..config.polls_per_session {
            let request = PollRequest::new(
                session.clone(),
                timeout,
                connection.clone(),
                source.clone(),
            );
            match service.submit(request) {
                Ok(_) => submitted += 1,
                Err(e) => {
                    warn!(%session, error = ?e, "Poll rejected");
                    rejected += 1;
                }
            }
        }
    }
    (submitted, rejected)
}

fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let args = Args::parse();
    init_tracing(args.debug)?;
    let config = args.load_config()?;

    info!(
        sessions = config.sessions,
        polls_per_session = config.polls_per_session,
        workers = config.service.num_workers,
        execution_threads = config.service.execution_threads,
        "Starting poll load test"
    );

    let service = PollService::new(config.service.clone())
        .map_err(|e| eyre!("Unable to create poll service: {}", e))?;
    service
        .start()
        .map_err(|e| eyre!("Unable to start poll service: {}", e))?;

    let tally = Arc::new(Tally::default());
    let start = Instant::now();
    let (submitted, rejected) = submit_all(&service, &config, &tally);
    info!(submitted, rejected, elapsed = ?start.elapsed(), "All polls submitted");

    let deadline = start + config.duration();
    let mut last_progress = Instant::now();
    loop {
        let resolved = tally.snapshot().resolved();
        if resolved >= submitted as u64 {
            break;
        }
        if Instant::now() >= deadline {
            warn!(
                resolved,
                submitted, "Duration elapsed before every poll resolved"
            );
            break;
        }
        if last_progress.elapsed() >= PROGRESS_INTERVAL {
            let status = service.status();
            info!(
                resolved,
                sessions = status.sessions,
                pending = status.pending,
                dispatch = status.dispatch_depth,
                retry = status.retry_depth,
                executing = status.executing,
                "Progress"
            );
            last_progress = Instant::now();
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    let elapsed = start.elapsed();

    let shutdown = service.stop();
    let clients = tally.snapshot();
    let summary = Summary {
        elapsed_ms: elapsed.as_millis(),
        submitted,
        rejected,
        unresolved: (submitted as u64).saturating_sub(clients.resolved()),
        clients,
        shutdown,
        status: service.status(),
        config,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
