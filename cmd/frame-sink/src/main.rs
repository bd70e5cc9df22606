//! Frame Sink
//!
//! TCP server that frames each client's byte stream through a slotwire slot
//! pool and logs every message it drains from the outgoing queue.
//!
//! Wire format: `[len: i32 native-endian][len bytes]` repeated.
//!
//! Usage:
//!     cargo build --release -p frame-sink
//!     ./target/release/frame-sink [port] [max_conns]
//!
//! Tuning (env):
//!     SLOTWIRE_SLOT_COUNT, SLOTWIRE_SLOT_SIZE, SLOTWIRE_OUTGOING_CAPACITY,
//!     SLOTWIRE_POLL_INTERVAL_MS, SLOTWIRE_ACQUIRE_TIMEOUT_MS,
//!     SLOTWIRE_MAX_MESSAGES, SLOTWIRE_POLL_TIMEOUT_MS
//!     RUST_LOG=debug for per-connection lifecycle, trace for every frame
//!
//! Test with:
//!     printf '\x05\x00\x00\x00hello' | nc -q1 localhost 9998

use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::AsFd;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use slotwire_core::{env_get, ConnectionConfig, PoolConfig, SlotPool, WireResult};
use slotwire_net::{accept_pending, bind_listener, ConnectionTable, Poller, DEFAULT_BACKLOG};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_sigint(_: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}

const STATS_INTERVAL: Duration = Duration::from_secs(10);

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let port: u16 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(9998);
    let max_conns: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(1024);

    // SIGINT/SIGTERM stop the loop and tear connections down cleanly
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_sigint as libc::sighandler_t);
    }

    match run(port, max_conns) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "frame-sink failed");
            ExitCode::FAILURE
        }
    }
}

fn run(port: u16, max_conns: usize) -> WireResult<()> {
    let pool_config = PoolConfig::from_env();
    let conn_config = ConnectionConfig::from_env();
    let pool = SlotPool::new(&pool_config)?;
    let mut table = ConnectionTable::new(pool.clone(), max_conns, &conn_config)?;
    let mut poller = Poller::new(Duration::from_millis(env_get("SLOTWIRE_POLL_TIMEOUT_MS", 50)));

    let listener = bind_listener(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port), DEFAULT_BACKLOG)?;
    info!(
        port,
        max_conns,
        slots = pool_config.slot_count,
        max_frame = pool_config.max_frame_size(),
        max_messages = conn_config.max_messages,
        "frame-sink listening"
    );

    let mut last_stats = Instant::now();
    let mut frames = 0u64;
    let mut bytes = 0u64;

    while RUNNING.load(Ordering::Relaxed) {
        let report = poller.poll_once(&mut table, Some(listener.as_fd()))?;
        if report.accept_ready {
            accept_pending(&listener, &mut table)?;
        }

        pool.drain_outgoing(|msg| {
            frames += 1;
            bytes += msg.len() as u64;
            debug!(
                connection = %msg.connection(),
                len = msg.len(),
                head = ?&msg.payload()[..msg.len().min(16)],
                "message"
            );
            table.on_read_message(msg.connection());
        });

        if last_stats.elapsed() >= STATS_INTERVAL {
            let stats = pool.stats();
            info!(
                connections = table.len(),
                frames,
                bytes,
                free_slots = stats.free_slots,
                exhausted_waits = stats.exhausted_waits,
                "stats"
            );
            last_stats = Instant::now();
        }
    }

    let closed = table.disconnect_all();
    let drained = pool.drain_outgoing(drop);
    info!(closed, drained, frames, bytes, "frame-sink stopped");
    Ok(())
}
