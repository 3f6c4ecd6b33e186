//! Broker session lifecycle.
//!
//! Connection attempts never block. The owner calls [`ConnectionManager::tick`]
//! from its loop and reports transport outcomes back. A failed attempt
//! schedules the next one 5 seconds later, forever. Every successful connect
//! starts the same announcement sequence: discovery, status, state.

pub mod mqtt;
pub mod wifi;

use common::MessageKind;
use log::{debug, info, warn};
use thiserror::Error;

/// Fixed wait between failed connection attempts
pub const RETRY_DELAY_MS: u64 = 5_000;
/// Gap between consecutive announcement messages
pub const ANNOUNCE_PACING_MS: u64 = 500;
/// Longest an attempt may stay unanswered before it counts as timed out
pub const CONNECT_TIMEOUT_MS: u64 = 15_000;

const ANNOUNCE_SEQUENCE: [MessageKind; 3] =
    [MessageKind::Discovery, MessageKind::Status, MessageKind::State];

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Why a broker connection could not be made or was lost
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectFailure {
    #[error("connection timed out")]
    Timeout,
    #[error("connection lost")]
    ConnectionLost,
    #[error("network connect failed: {0}")]
    ConnectFailed(String),
    #[error("disconnected by broker")]
    Disconnected,
    #[error("broker refused connection")]
    Refused(u8),
}

impl ConnectFailure {
    /// Numeric status code, matching the convention of common embedded MQTT
    /// clients: negative for transport problems, CONNACK code for refusals.
    pub fn code(&self) -> i32 {
        match self {
            ConnectFailure::Timeout => -4,
            ConnectFailure::ConnectionLost => -3,
            ConnectFailure::ConnectFailed(_) => -2,
            ConnectFailure::Disconnected => -1,
            ConnectFailure::Refused(code) => *code as i32,
        }
    }
}

/// Paced discovery → status → state sequence for one session
#[derive(Clone, Debug)]
struct Announcement {
    started_at: u64,
    next: usize,
}

impl Announcement {
    fn due(&mut self, now: u64) -> Vec<MessageKind> {
        let mut due = Vec::new();
        while let Some(kind) = ANNOUNCE_SEQUENCE.get(self.next) {
            let at = self.started_at + self.next as u64 * ANNOUNCE_PACING_MS;
            if now < at {
                break;
            }
            due.push(*kind);
            self.next += 1;
        }
        due
    }

    fn finished(&self) -> bool {
        self.next >= ANNOUNCE_SEQUENCE.len()
    }
}

#[derive(Debug, Default)]
pub struct ConnectionManager {
    state: ConnectionState,
    next_attempt_at: u64,
    attempt_started_at: u64,
    attempts: u32,
    sessions: u32,
    announcement: Option<Announcement>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// True while the transport should be driven (attempting or connected)
    pub fn link_active(&self) -> bool {
        self.state != ConnectionState::Disconnected
    }

    /// Number of sessions established so far
    pub fn sessions(&self) -> u32 {
        self.sessions
    }

    pub fn next_attempt_at(&self) -> Option<u64> {
        (self.state == ConnectionState::Disconnected).then_some(self.next_attempt_at)
    }

    /// Returns true when a new connection attempt starts now. An attempt
    /// still unanswered after [`CONNECT_TIMEOUT_MS`] fails as a timeout.
    pub fn tick(&mut self, now: u64) -> bool {
        if self.state == ConnectionState::Connecting
            && now.saturating_sub(self.attempt_started_at) >= CONNECT_TIMEOUT_MS
        {
            self.on_connect_failed(now, &ConnectFailure::Timeout);
            return false;
        }
        if self.state != ConnectionState::Disconnected || now < self.next_attempt_at {
            return false;
        }
        self.state = ConnectionState::Connecting;
        self.attempt_started_at = now;
        self.attempts += 1;
        info!("mqtt: Connecting to MQTT... (attempt {})", self.attempts);
        true
    }

    pub fn on_connected(&mut self, now: u64) {
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        self.sessions += 1;
        self.announcement = Some(Announcement {
            started_at: now,
            next: 0,
        });
        info!("mqtt: connected (session {})", self.sessions);
    }

    pub fn on_connect_failed(&mut self, now: u64, failure: &ConnectFailure) {
        self.state = ConnectionState::Disconnected;
        self.announcement = None;
        self.next_attempt_at = now + RETRY_DELAY_MS;
        warn!(
            "mqtt: failed, rc={} ({}) try again in {} seconds",
            failure.code(),
            failure,
            RETRY_DELAY_MS / 1000
        );
    }

    /// A live session dropped. The next tick reconnects right away.
    pub fn on_connection_lost(&mut self, now: u64, failure: &ConnectFailure) {
        self.state = ConnectionState::Disconnected;
        self.announcement = None;
        self.next_attempt_at = now;
        warn!(
            "mqtt: connection lost, rc={} ({})",
            failure.code(),
            failure
        );
    }

    /// Route a transport error to the right transition for the current state.
    /// Errors arriving while already disconnected belong to an attempt that
    /// was given up on and leave the retry schedule alone.
    pub fn on_error(&mut self, now: u64, failure: &ConnectFailure) {
        match self.state {
            ConnectionState::Connected => self.on_connection_lost(now, failure),
            ConnectionState::Connecting => self.on_connect_failed(now, failure),
            ConnectionState::Disconnected => {
                debug!("mqtt: ignoring late error rc={} ({})", failure.code(), failure)
            }
        }
    }

    /// Announcement messages whose time has come, in order
    pub fn due_announcements(&mut self, now: u64) -> Vec<MessageKind> {
        if self.state != ConnectionState::Connected {
            return Vec::new();
        }
        let Some(announcement) = self.announcement.as_mut() else {
            return Vec::new();
        };
        let due = announcement.due(now);
        if announcement.finished() {
            self.announcement = None;
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_tick_attempts_immediately() {
        let mut manager = ConnectionManager::new();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.tick(0));
        assert_eq!(manager.state(), ConnectionState::Connecting);
        // Already connecting, no second attempt
        assert!(!manager.tick(10));
    }

    #[test]
    fn test_failed_attempt_waits_five_seconds() {
        let mut manager = ConnectionManager::new();
        let refused = ConnectFailure::ConnectFailed("connection refused".to_string());

        assert!(manager.tick(0));
        manager.on_error(200, &refused);
        assert_eq!(manager.next_attempt_at(), Some(5_200));
        assert!(!manager.tick(5_199));
        assert!(manager.tick(5_200));

        // No growth between retries
        manager.on_error(5_300, &refused);
        assert_eq!(manager.next_attempt_at(), Some(10_300));
    }

    #[test]
    fn test_retries_are_unbounded() {
        let mut manager = ConnectionManager::new();
        let mut now = 0;
        for _ in 0..1_000 {
            assert!(manager.tick(now));
            manager.on_error(now, &ConnectFailure::Timeout);
            now += RETRY_DELAY_MS;
        }
        assert!(manager.tick(now));
    }

    #[test]
    fn test_announcement_order_and_pacing() {
        let mut manager = ConnectionManager::new();
        manager.tick(0);
        manager.on_connected(1_000);

        assert_eq!(manager.due_announcements(1_000), vec![MessageKind::Discovery]);
        assert!(manager.due_announcements(1_499).is_empty());
        assert_eq!(manager.due_announcements(1_500), vec![MessageKind::Status]);
        assert_eq!(manager.due_announcements(2_000), vec![MessageKind::State]);
        assert!(manager.due_announcements(10_000).is_empty());
    }

    #[test]
    fn test_late_tick_keeps_order() {
        let mut manager = ConnectionManager::new();
        manager.tick(0);
        manager.on_connected(0);
        assert_eq!(
            manager.due_announcements(5_000),
            vec![MessageKind::Discovery, MessageKind::Status, MessageKind::State]
        );
    }

    #[test]
    fn test_reconnect_restarts_announcement() {
        let mut manager = ConnectionManager::new();
        manager.tick(0);
        manager.on_connected(0);
        assert_eq!(manager.due_announcements(0), vec![MessageKind::Discovery]);

        // Session drops before status goes out
        manager.on_error(100, &ConnectFailure::ConnectionLost);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.due_announcements(600).is_empty());

        // Lost sessions reconnect without the retry delay
        assert!(manager.tick(100));
        manager.on_connected(200);
        assert_eq!(manager.sessions(), 2);
        assert_eq!(manager.due_announcements(200), vec![MessageKind::Discovery]);
    }

    #[test]
    fn test_unanswered_attempt_times_out() {
        let mut manager = ConnectionManager::new();
        assert!(manager.tick(1_000));

        assert!(!manager.tick(1_000 + CONNECT_TIMEOUT_MS - 1));
        assert_eq!(manager.state(), ConnectionState::Connecting);

        let deadline = 1_000 + CONNECT_TIMEOUT_MS;
        assert!(!manager.tick(deadline));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.next_attempt_at(), Some(deadline + RETRY_DELAY_MS));
        assert!(manager.tick(deadline + RETRY_DELAY_MS));
    }

    #[test]
    fn test_late_error_keeps_schedule() {
        let mut manager = ConnectionManager::new();
        manager.tick(0);
        manager.on_error(100, &ConnectFailure::Timeout);
        assert_eq!(manager.next_attempt_at(), Some(5_100));

        manager.on_error(4_000, &ConnectFailure::ConnectionLost);
        assert_eq!(manager.next_attempt_at(), Some(5_100));
        assert!(manager.tick(5_100));
    }

    #[test]
    fn test_failure_codes() {
        assert_eq!(ConnectFailure::Timeout.code(), -4);
        assert_eq!(ConnectFailure::ConnectionLost.code(), -3);
        assert_eq!(ConnectFailure::ConnectFailed(String::new()).code(), -2);
        assert_eq!(ConnectFailure::Disconnected.code(), -1);
        assert_eq!(ConnectFailure::Refused(5).code(), 5);
    }
}
