//! Cooperative shutdown shared by every thread in a session.

use log::info;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// How often [`join_with_timeout`] checks on the thread it waits for.
const JOIN_POLL: Duration = Duration::from_millis(10);

/// A process-wide stop flag. Any clone can set it; once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    /// A fresh, unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks every component observing this signal to wind down.
    pub fn signal_stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sets this signal when the process is asked to stop, by Ctrl+C,
    /// SIGTERM or SIGHUP. A process can only install this once.
    pub fn set_on_interrupt(&self) -> Result<(), ctrlc::Error> {
        let stop = self.clone();
        ctrlc::set_handler(move || {
            info!("Received shutdown signal");
            stop.signal_stop();
        })
    }

    /// Polls `condition` every `poll` until it holds, the signal is set, or
    /// `timeout` runs out.
    pub fn wait_until<F>(&self, timeout: Duration, poll: Duration, mut condition: F) -> WaitOutcome
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if condition() {
                return WaitOutcome::Ready;
            }
            if self.is_stopped() {
                return WaitOutcome::Stopped;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            thread::sleep(poll.min(deadline - now));
        }
    }
}

/// How a [`StopSignal::wait_until`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The condition held.
    Ready,
    /// The stop signal was set first.
    Stopped,
    /// Neither happened in time.
    TimedOut,
}

/// How a [`join_with_timeout`] ended.
#[derive(Debug)]
pub enum JoinOutcome<T> {
    /// The thread finished and returned this value.
    Joined(T),
    /// The thread panicked.
    Panicked,
    /// The thread was still running at the deadline. The handle is handed
    /// back; dropping it detaches the thread.
    TimedOut(JoinHandle<T>),
}

/// Waits at most `timeout` for `handle`'s thread to finish.
pub fn join_with_timeout<T>(handle: JoinHandle<T>, timeout: Duration) -> JoinOutcome<T> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return JoinOutcome::TimedOut(handle);
        }
        thread::sleep(JOIN_POLL);
    }
    match handle.join() {
        Ok(value) => JoinOutcome::Joined(value),
        Err(_) => JoinOutcome::Panicked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_terminal_and_shared() {
        let stop = StopSignal::new();
        let other = stop.clone();
        assert!(!other.is_stopped());
        stop.signal_stop();
        assert!(other.is_stopped());
        stop.signal_stop();
        assert!(stop.is_stopped());
    }

    #[test]
    fn stop_is_seen_across_threads() {
        let stop = StopSignal::new();
        let worker_stop = stop.clone();
        let worker = thread::spawn(move || {
            let mut spins = 0u64;
            while !worker_stop.is_stopped() {
                spins += 1;
                thread::sleep(Duration::from_millis(1));
            }
            spins
        });
        thread::sleep(Duration::from_millis(20));
        stop.signal_stop();
        assert!(matches!(
            join_with_timeout(worker, Duration::from_secs(2)),
            JoinOutcome::Joined(_)
        ));
    }

    #[test]
    fn wait_until_outcomes() {
        let stop = StopSignal::new();
        let poll = Duration::from_millis(1);
        assert_eq!(
            stop.wait_until(Duration::from_millis(50), poll, || true),
            WaitOutcome::Ready
        );
        assert_eq!(
            stop.wait_until(Duration::from_millis(20), poll, || false),
            WaitOutcome::TimedOut
        );
        stop.signal_stop();
        assert_eq!(
            stop.wait_until(Duration::from_secs(10), poll, || false),
            WaitOutcome::Stopped
        );
    }

    #[test]
    fn join_gives_up_on_a_stuck_thread() {
        let stop = StopSignal::new();
        let worker_stop = stop.clone();
        let worker = thread::spawn(move || {
            while !worker_stop.is_stopped() {
                thread::sleep(Duration::from_millis(1));
            }
        });

        let started = Instant::now();
        let handle = match join_with_timeout(worker, Duration::from_millis(30)) {
            JoinOutcome::TimedOut(handle) => handle,
            other => panic!("expected a timeout, got {:?}", other),
        };
        assert!(started.elapsed() < Duration::from_secs(2));

        stop.signal_stop();
        assert!(matches!(
            join_with_timeout(handle, Duration::from_secs(2)),
            JoinOutcome::Joined(())
        ));
    }

    #[cfg(unix)]
    #[test]
    fn interrupt_sets_the_signal() {
        use std::process::Command;

        let stop = StopSignal::new();
        stop.set_on_interrupt().unwrap();
        // the handler is process wide; a second one is refused
        assert!(StopSignal::new().set_on_interrupt().is_err());
        assert!(!stop.is_stopped());

        let status = Command::new("kill")
            .args(["-INT", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());
        assert_eq!(
            stop.wait_until(Duration::from_secs(5), Duration::from_millis(1), || false),
            WaitOutcome::Stopped
        );
    }

    #[test]
    fn join_reports_panics() {
        let worker = thread::spawn(|| panic!("boom"));
        assert!(matches!(
            join_with_timeout::<()>(worker, Duration::from_secs(2)),
            JoinOutcome::Panicked
        ));
    }
}
