//! Connection Manager.
//!
//! Handshake (banner-or-status, then `?`-then-first-status), auto-reconnect
//! with exponential backoff, a status-poll watchdog, and a homing grace
//! period that suspends loss detection during `$H`.

use std::time::Duration;

/// Tunables for the connection manager, sourced from `ConfigCtx`.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionConfig {
    pub handshake_timeout: Duration,
    pub poll_interval: Duration,
    pub failure_threshold: u32,
    pub reconnect_initial_backoff: Duration,
    pub reconnect_factor: f64,
    pub reconnect_cap: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(200),
            failure_threshold: 3,
            reconnect_initial_backoff: Duration::from_secs(1),
            reconnect_factor: 2.0,
            reconnect_cap: Duration::from_secs(30),
        }
    }
}

/// Connection lifecycle state.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionState {
    Closed,
    Handshaking,
    Ready,
    /// Retrying after an unexpected close, with the backoff delay about to
    /// be slept before the next attempt.
    Reconnecting { attempt: u32, next_delay: Duration },
    Failed(String),
}

/// Tracks handshake progress, poll-failure count, and the homing grace
/// period. Does not own the link itself — callers drive it with observed
/// events (`on_banner`, `on_status`, `on_poll_failure`, `on_poll_success`,
/// `on_unexpected_close`, `begin_homing`, `end_homing`).
pub struct ConnectionManager {
    config: ConnectionConfig,
    state: ConnectionState,
    saw_banner_or_status: bool,
    saw_first_status_after_query: bool,
    consecutive_failures: u32,
    homing_in_progress: bool,
    reconnect_attempt: u32,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Closed,
            saw_banner_or_status: false,
            saw_first_status_after_query: false,
            consecutive_failures: 0,
            homing_in_progress: false,
            reconnect_attempt: 0,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Begins the handshake after the port is physically opened.
    pub fn begin_handshake(&mut self) {
        self.state = ConnectionState::Handshaking;
        self.saw_banner_or_status = false;
        self.saw_first_status_after_query = false;
    }

    /// Call when a GRBL banner line arrives during handshake.
    pub fn on_banner(&mut self) {
        if self.state == ConnectionState::Handshaking {
            self.saw_banner_or_status = true;
        }
    }

    /// Call when a status report arrives. During handshake this both
    /// satisfies the "banner-or-status" step and, once a `?` has been sent,
    /// the "first status" step; outside handshake it resets the failure
    /// counter (a successful poll).
    pub fn on_status(&mut self) {
        if self.state == ConnectionState::Handshaking {
            self.saw_banner_or_status = true;
            self.saw_first_status_after_query = true;
            if self.saw_banner_or_status && self.saw_first_status_after_query {
                self.state = ConnectionState::Ready;
                self.reconnect_attempt = 0;
            }
        }
        self.consecutive_failures = 0;
    }

    /// Call on a status-poll timeout/failure. Increments the failure count
    /// and transitions to `Failed` once the threshold is reached, unless a
    /// homing grace period is active.
    pub fn on_poll_failure(&mut self) {
        if self.homing_in_progress {
            return;
        }
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.config.failure_threshold {
            self.state = ConnectionState::Failed("status poll failure threshold reached".into());
        }
    }

    /// Suspends loss detection for the duration of a homing cycle (spec
    /// §4.F: "A homing watchdog grace period suspends loss-detection during $H").
    pub fn begin_homing(&mut self) {
        self.homing_in_progress = true;
    }

    pub fn end_homing(&mut self) {
        self.homing_in_progress = false;
        self.consecutive_failures = 0;
    }

    /// Call when the link reports an unexpected close (not user-initiated).
    /// Begins the reconnect backoff sequence.
    pub fn on_unexpected_close(&mut self, user_disconnected: bool) {
        if user_disconnected {
            self.state = ConnectionState::Closed;
            return;
        }
        self.reconnect_attempt = 1;
        self.state = ConnectionState::Reconnecting {
            attempt: self.reconnect_attempt,
            next_delay: self.config.reconnect_initial_backoff,
        };
    }

    /// Advances the reconnect backoff after a failed retry, returning the
    /// delay to sleep before the next attempt.
    pub fn advance_backoff(&mut self) -> Duration {
        let delay = backoff_delay(
            self.reconnect_attempt,
            self.config.reconnect_initial_backoff,
            self.config.reconnect_factor,
            self.config.reconnect_cap,
        );
        self.reconnect_attempt += 1;
        self.state = ConnectionState::Reconnecting {
            attempt: self.reconnect_attempt,
            next_delay: delay,
        };
        delay
    }
}

/// Computes the backoff delay for reconnect attempt `n` (1-based): `initial *
/// factor^(n-1)`, capped at `cap`. Pure function so the sequence is testable
/// without a real clock.
pub fn backoff_delay(attempt: u32, initial: Duration, factor: f64, cap: Duration) -> Duration {
    if attempt == 0 {
        return initial.min(cap);
    }
    let scaled = initial.as_secs_f64() * factor.powi(attempt as i32 - 1);
    let capped = scaled.min(cap.as_secs_f64());
    Duration::from_secs_f64(capped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_requires_banner_then_status() {
        let mut mgr = ConnectionManager::new(ConnectionConfig::default());
        mgr.begin_handshake();
        assert_eq!(*mgr.state(), ConnectionState::Handshaking);
        mgr.on_banner();
        assert_eq!(*mgr.state(), ConnectionState::Handshaking);
        mgr.on_status();
        assert_eq!(*mgr.state(), ConnectionState::Ready);
    }

    #[test]
    fn test_handshake_status_alone_is_sufficient() {
        let mut mgr = ConnectionManager::new(ConnectionConfig::default());
        mgr.begin_handshake();
        mgr.on_status();
        assert_eq!(*mgr.state(), ConnectionState::Ready);
    }

    #[test]
    fn test_poll_failure_threshold_marks_failed() {
        let mut mgr = ConnectionManager::new(ConnectionConfig {
            failure_threshold: 3,
            ..Default::default()
        });
        mgr.on_poll_failure();
        mgr.on_poll_failure();
        assert!(matches!(mgr.state(), ConnectionState::Closed));
        mgr.on_poll_failure();
        assert!(matches!(mgr.state(), ConnectionState::Failed(_)));
    }

    #[test]
    fn test_homing_grace_suspends_failure_counting() {
        let mut mgr = ConnectionManager::new(ConnectionConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        mgr.begin_homing();
        mgr.on_poll_failure();
        mgr.on_poll_failure();
        assert!(!matches!(mgr.state(), ConnectionState::Failed(_)));
        mgr.end_homing();
        mgr.on_poll_failure();
        assert!(matches!(mgr.state(), ConnectionState::Failed(_)));
    }

    #[test]
    fn test_unexpected_close_starts_reconnect() {
        let mut mgr = ConnectionManager::new(ConnectionConfig::default());
        mgr.on_unexpected_close(false);
        assert!(matches!(mgr.state(), ConnectionState::Reconnecting { attempt: 1, .. }));
    }

    #[test]
    fn test_user_disconnect_does_not_reconnect() {
        let mut mgr = ConnectionManager::new(ConnectionConfig::default());
        mgr.on_unexpected_close(true);
        assert_eq!(*mgr.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_backoff_sequence_doubles_and_caps() {
        let initial = Duration::from_secs(1);
        let cap = Duration::from_secs(30);
        assert_eq!(backoff_delay(1, initial, 2.0, cap), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, initial, 2.0, cap), Duration::from_secs(2));
        assert_eq!(backoff_delay(3, initial, 2.0, cap), Duration::from_secs(4));
        assert_eq!(backoff_delay(6, initial, 2.0, cap), Duration::from_secs(30));
        assert_eq!(backoff_delay(10, initial, 2.0, cap), Duration::from_secs(30));
    }

    #[test]
    fn test_advance_backoff_increments_attempt() {
        let mut mgr = ConnectionManager::new(ConnectionConfig::default());
        mgr.on_unexpected_close(false);
        let d1 = mgr.advance_backoff();
        assert_eq!(d1, Duration::from_secs(1));
        let d2 = mgr.advance_backoff();
        assert_eq!(d2, Duration::from_secs(2));
    }
}
