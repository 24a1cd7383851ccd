//! A readiness primitive bounding cancellation latency to ~100ms (spec §5,
//! §9: "target ≤ 100 ms").
//!
//! On Unix this is `nix::poll` against the socket's raw fd, re-checked in a
//! loop so the cancellation flag is polled at well-defined intervals even
//! while waiting for I/O. Non-Unix platforms don't expose a portable
//! readiness multiplexer through this crate's dependency set, so they fall
//! back to socket2's read-timeout in short slices — "short-poll permitted"
//! per spec §9.

use crate::clock::{MonoClock, MonoInstant};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// The granularity at which the cancellation flag is re-checked while
/// waiting for socket readiness.
pub const POLL_SLICE: Duration = Duration::from_millis(50);

/// The outcome of waiting for a socket to become readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Readable,
    TimedOut,
    Cancelled,
}

/// Wait until `socket` is readable, `deadline` passes, or `cancel` is set.
#[cfg(unix)]
pub fn wait_readable(
    socket: &socket2::Socket,
    clock: &MonoClock,
    deadline: MonoInstant,
    cancel: &AtomicBool,
) -> WaitOutcome {
    use nix::poll::{poll, PollFd, PollFlags};
    use std::os::unix::io::AsRawFd;

    let fd = socket.as_raw_fd();
    loop {
        if cancel.load(Ordering::Relaxed) {
            return WaitOutcome::Cancelled;
        }
        let now = clock.now();
        if now >= deadline {
            return WaitOutcome::TimedOut;
        }
        let remaining = deadline.since(now).min(POLL_SLICE);
        let timeout_ms = i32::try_from(remaining.as_millis()).unwrap_or(i32::MAX).max(1);
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        match poll(&mut fds, timeout_ms) {
            Ok(n) if n > 0 => {
                if let Some(flags) = fds[0].revents() {
                    if flags.intersects(PollFlags::POLLIN | PollFlags::POLLERR | PollFlags::POLLHUP) {
                        return WaitOutcome::Readable;
                    }
                }
            }
            Ok(_) => {}
            Err(_) => return WaitOutcome::TimedOut,
        }
    }
}

/// Wait until `socket` is readable, `deadline` passes, or `cancel` is set.
#[cfg(not(unix))]
pub fn wait_readable(
    socket: &socket2::Socket,
    clock: &MonoClock,
    deadline: MonoInstant,
    cancel: &AtomicBool,
) -> WaitOutcome {
    loop {
        if cancel.load(Ordering::Relaxed) {
            return WaitOutcome::Cancelled;
        }
        let now = clock.now();
        if now >= deadline {
            return WaitOutcome::TimedOut;
        }
        let remaining = deadline.since(now).min(POLL_SLICE);
        let _ = socket.set_read_timeout(Some(remaining.max(Duration::from_millis(1))));
        let mut probe = [std::mem::MaybeUninit::uninit(); 1];
        match socket.peek(&mut probe) {
            Ok(_) => return WaitOutcome::Readable,
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
            }
            Err(_) => return WaitOutcome::Readable, // let recv surface the error
        }
    }
}
