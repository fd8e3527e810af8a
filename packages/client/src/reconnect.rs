//! Connection lifecycle state machine for the room socket.
//!
//! This module contains no I/O and no timers: the socket task feeds it
//! lifecycle events and it answers with the next state and, after an
//! unexpected close, the delay before the next attempt.

use std::time::Duration;

/// Observable state of the room connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadyState::Connecting => "connecting",
            ReadyState::Open => "open",
            ReadyState::Closing => "closing",
            ReadyState::Closed => "closed",
        }
    }
}

/// Delay before the reconnect following `attempt` consecutive failures
/// (0-indexed). Capped at the last entry of `delays`.
pub fn reconnect_delay(delays: &[Duration], attempt: u32) -> Duration {
    let index = usize::try_from(attempt).unwrap_or(usize::MAX);
    delays
        .get(index)
        .or_else(|| delays.last())
        .copied()
        .unwrap_or_default()
}

/// Lifecycle of one room connection.
///
/// `CLOSED -> CONNECTING -> OPEN -> (CLOSING) -> CLOSED`, re-entering
/// `CONNECTING` after a backoff delay unless stopped.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ReadyState,
    retry_count: u32,
    stopped: bool,
    delays: Vec<Duration>,
}

impl ConnectionMachine {
    /// A stopped machine in `Closed`
    pub fn new(delays: Vec<Duration>) -> Self {
        Self {
            state: ReadyState::Closed,
            retry_count: 0,
            stopped: true,
            delays,
        }
    }

    pub fn state(&self) -> ReadyState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Arm the machine for a fresh `connect`
    pub fn start(&mut self) {
        self.stopped = false;
        self.retry_count = 0;
        self.state = ReadyState::Connecting;
    }

    /// A connection attempt is about to be made. Returns `false` when the
    /// machine was stopped in the meantime.
    pub fn begin_attempt(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        self.state = ReadyState::Connecting;
        true
    }

    pub fn on_open(&mut self) {
        self.state = ReadyState::Open;
        self.retry_count = 0;
    }

    /// The peer started the closing handshake
    pub fn on_closing(&mut self) {
        if self.state == ReadyState::Open {
            self.state = ReadyState::Closing;
        }
    }

    /// The connection (or the attempt) ended. Returns the delay before the
    /// next attempt, or `None` when no reconnect should happen.
    pub fn on_close(&mut self) -> Option<Duration> {
        self.state = ReadyState::Closed;
        if self.stopped {
            return None;
        }
        let delay = reconnect_delay(&self.delays, self.retry_count);
        self.retry_count = self.retry_count.saturating_add(1);
        Some(delay)
    }

    /// Intentional stop; no further reconnects until `start`
    pub fn stop(&mut self) {
        self.stopped = true;
        self.state = ReadyState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RECONNECT_DELAYS;

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|s| Duration::from_secs(*s)).collect()
    }

    #[test]
    fn test_reconnect_delay_follows_table_and_caps() {
        // テスト項目: 再接続遅延がテーブルどおりに増加し、最後の値で頭打ちになる
        // given (前提条件):
        let delays = RECONNECT_DELAYS;

        // when (操作):
        let observed: Vec<Duration> = (0..8).map(|n| reconnect_delay(&delays, n)).collect();

        // then (期待する結果):
        assert_eq!(observed, secs(&[1, 2, 5, 10, 15, 15, 15, 15]));
    }

    #[test]
    fn test_reconnect_delay_with_empty_table_is_zero() {
        // テスト項目: 空のテーブルでは遅延 0 になる
        assert_eq!(reconnect_delay(&[], 3), Duration::ZERO);
    }

    #[test]
    fn test_initial_state_is_closed_and_stopped() {
        // テスト項目: 初期状態は CLOSED かつ停止中である
        let machine = ConnectionMachine::new(RECONNECT_DELAYS.to_vec());

        assert_eq!(machine.state(), ReadyState::Closed);
        assert!(machine.is_stopped());
        assert_eq!(machine.retry_count(), 0);
    }

    #[test]
    fn test_consecutive_failures_escalate_delay() {
        // テスト項目: 連続した切断で遅延が段階的に増える
        // given (前提条件):
        let mut machine = ConnectionMachine::new(RECONNECT_DELAYS.to_vec());
        machine.start();

        // when (操作):
        let mut delays = Vec::new();
        for _ in 0..7 {
            assert!(machine.begin_attempt());
            assert_eq!(machine.state(), ReadyState::Connecting);
            delays.push(machine.on_close().unwrap());
        }

        // then (期待する結果):
        assert_eq!(delays, secs(&[1, 2, 5, 10, 15, 15, 15]));
        assert_eq!(machine.retry_count(), 7);
        assert_eq!(machine.state(), ReadyState::Closed);
    }

    #[test]
    fn test_successful_open_resets_attempt_counter() {
        // テスト項目: 接続成功で試行回数が 0 にリセットされる
        // given (前提条件):
        let mut machine = ConnectionMachine::new(RECONNECT_DELAYS.to_vec());
        machine.start();
        machine.on_close();
        machine.on_close();
        machine.on_close();
        assert_eq!(machine.retry_count(), 3);

        // when (操作):
        assert!(machine.begin_attempt());
        machine.on_open();

        // then (期待する結果):
        assert_eq!(machine.state(), ReadyState::Open);
        assert_eq!(machine.retry_count(), 0);
        assert_eq!(machine.on_close(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_stop_prevents_reconnect() {
        // テスト項目: 意図的な停止後は再接続しない
        // given (前提条件):
        let mut machine = ConnectionMachine::new(RECONNECT_DELAYS.to_vec());
        machine.start();
        machine.on_open();

        // when (操作):
        machine.stop();

        // then (期待する結果):
        assert_eq!(machine.state(), ReadyState::Closed);
        assert_eq!(machine.on_close(), None);
        assert!(!machine.begin_attempt());
    }

    #[test]
    fn test_closing_only_from_open() {
        // テスト項目: CLOSING へは OPEN からのみ遷移する
        let mut machine = ConnectionMachine::new(RECONNECT_DELAYS.to_vec());
        machine.start();

        machine.on_closing();
        assert_eq!(machine.state(), ReadyState::Connecting);

        machine.on_open();
        machine.on_closing();
        assert_eq!(machine.state(), ReadyState::Closing);
    }

    #[test]
    fn test_restart_after_stop_resets_counter() {
        // テスト項目: 停止後の再開で試行回数がリセットされる
        let mut machine = ConnectionMachine::new(RECONNECT_DELAYS.to_vec());
        machine.start();
        machine.on_close();
        machine.on_close();
        machine.stop();

        machine.start();

        assert!(!machine.is_stopped());
        assert_eq!(machine.retry_count(), 0);
        assert_eq!(machine.state(), ReadyState::Connecting);
    }
}
