//! Heartbeat management for ticker connections.
//!
//! The venue drops idle public connections unless the client sends an
//! application-level `ping` regularly, so pings are sent on a fixed cadence
//! regardless of inbound traffic. A pong that does not arrive within the
//! timeout marks the connection dead.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct HeartbeatInner {
    last_ping: Option<Instant>,
    last_message: Instant,
    waiting_for_pong: bool,
}

/// Heartbeat manager for a single connection.
#[derive(Debug)]
pub struct HeartbeatManager {
    /// How often to send ping.
    interval: Duration,
    /// How long to wait for pong.
    timeout: Duration,
    inner: Mutex<HeartbeatInner>,
}

impl HeartbeatManager {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
            inner: Mutex::new(HeartbeatInner {
                last_ping: None,
                last_message: Instant::now(),
                waiting_for_pong: false,
            }),
        }
    }

    /// Interval at which the connection loop should poll `should_ping`/`is_timed_out`.
    pub fn check_interval(&self) -> Duration {
        (self.interval / 4).max(Duration::from_millis(10))
    }

    /// Reset state (called after connecting).
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.last_ping = None;
        inner.last_message = Instant::now();
        inner.waiting_for_pong = false;
    }

    pub fn record_ping(&self) {
        let mut inner = self.inner.lock();
        inner.last_ping = Some(Instant::now());
        inner.waiting_for_pong = true;
    }

    pub fn record_pong(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        if let Some(ping) = inner.last_ping {
            debug!(rtt_ms = now.duration_since(ping).as_millis() as u64, "Received pong");
        }
        inner.waiting_for_pong = false;
    }

    pub fn record_message(&self) {
        self.inner.lock().last_message = Instant::now();
    }

    /// Pong overdue.
    pub fn is_timed_out(&self) -> bool {
        let inner = self.inner.lock();
        match (inner.waiting_for_pong, inner.last_ping) {
            (true, Some(ping)) => ping.elapsed() > self.timeout,
            _ => false,
        }
    }

    /// A ping is due: none outstanding and the last one is older than the interval.
    pub fn should_ping(&self) -> bool {
        let inner = self.inner.lock();
        if inner.waiting_for_pong {
            return false;
        }
        let since = inner.last_ping.unwrap_or(inner.last_message);
        since.elapsed() >= self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let hb = HeartbeatManager::new(20_000, 10_000);
        assert!(!hb.is_timed_out());
        assert!(!hb.should_ping());
    }

    #[test]
    fn test_ping_pong_cycle() {
        let hb = HeartbeatManager::new(0, 10_000);
        assert!(hb.should_ping());

        hb.record_ping();
        assert!(!hb.should_ping(), "no second ping while waiting for pong");
        assert!(!hb.is_timed_out());

        hb.record_pong();
        assert!(hb.should_ping());
    }

    #[test]
    fn test_timeout_detection() {
        let hb = HeartbeatManager::new(0, 0);
        hb.record_ping();
        std::thread::sleep(Duration::from_millis(5));
        assert!(hb.is_timed_out());

        hb.record_pong();
        assert!(!hb.is_timed_out());
    }

    #[test]
    fn test_check_interval_floor() {
        let hb = HeartbeatManager::new(0, 0);
        assert_eq!(hb.check_interval(), Duration::from_millis(10));
        let hb = HeartbeatManager::new(20_000, 10_000);
        assert_eq!(hb.check_interval(), Duration::from_millis(5_000));
    }
}
