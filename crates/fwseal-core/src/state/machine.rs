//! Transfer state machine.
//!
//! Phases advance strictly in order. `Completed` and `Aborted` are terminal.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Protocol phase of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Handshaking,
    MetadataExchange,
    Transferring,
    AwaitingCompletionAck,
    Completed,
    Aborted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "IDLE"),
            Phase::Handshaking => write!(f, "HANDSHAKING"),
            Phase::MetadataExchange => write!(f, "METADATA"),
            Phase::Transferring => write!(f, "TRANSFERRING"),
            Phase::AwaitingCompletionAck => write!(f, "AWAITING_COMPLETION"),
            Phase::Completed => write!(f, "COMPLETED"),
            Phase::Aborted => write!(f, "ABORTED"),
        }
    }
}

impl Phase {
    /// The only phase reachable from this one on success.
    pub fn successor(&self) -> Option<Phase> {
        match self {
            Phase::Idle => Some(Phase::Handshaking),
            Phase::Handshaking => Some(Phase::MetadataExchange),
            Phase::MetadataExchange => Some(Phase::Transferring),
            Phase::Transferring => Some(Phase::AwaitingCompletionAck),
            Phase::AwaitingCompletionAck => Some(Phase::Completed),
            Phase::Completed | Phase::Aborted => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Aborted)
    }
}

/// Runtime state of a transfer session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub phase: Phase,
    /// Transfer payload bytes not yet acknowledged.
    pub bytes_remaining: usize,
    /// Data frames acknowledged so far.
    pub frames_sent: usize,
    pub total_frames: usize,
    /// Last byte received from the device.
    pub last_ack: Option<u8>,
    /// Set once the session aborts.
    pub error: Option<SessionError>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move to the next phase.
    pub fn advance(&mut self) -> Result<(Phase, Phase), SessionError> {
        let from = self.phase;
        let to = from.successor().ok_or(SessionError::NotReusable)?;
        tracing::info!(from = %from, to = %to, "State transition");
        self.phase = to;
        Ok((from, to))
    }

    /// Record a fatal error. Terminal states are left untouched.
    pub fn abort(&mut self, error: SessionError) -> Option<Phase> {
        if self.phase.is_terminal() {
            return None;
        }
        let from = self.phase;
        tracing::info!(from = %from, to = %Phase::Aborted, "State transition");
        self.phase = Phase::Aborted;
        self.error = Some(error);
        Some(from)
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Completed
    }
}

/// Delay between handshake polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffPolicy {
    #[default]
    Fixed,
    Exponential,
}

impl BackoffPolicy {
    /// Delay after the `attempt`-th failed poll (1-based), capped at `max`.
    pub fn delay(&self, attempt: u32, base: Duration, max: Duration) -> Duration {
        let delay = match self {
            BackoffPolicy::Fixed => base,
            BackoffPolicy::Exponential => {
                let shift = attempt.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << shift)
            }
        };
        delay.min(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_advance_in_order() {
        let mut state = SessionState::new();
        let mut seen = vec![state.phase];
        while !state.phase.is_terminal() {
            state.advance().unwrap();
            seen.push(state.phase);
        }
        assert_eq!(
            seen,
            vec![
                Phase::Idle,
                Phase::Handshaking,
                Phase::MetadataExchange,
                Phase::Transferring,
                Phase::AwaitingCompletionAck,
                Phase::Completed,
            ]
        );
        assert!(state.is_complete());
        assert_eq!(state.advance(), Err(SessionError::NotReusable));
    }

    #[test]
    fn test_abort_from_any_active_phase() {
        for steps in 0..5 {
            let mut state = SessionState::new();
            for _ in 0..steps {
                state.advance().unwrap();
            }
            let before = state.phase;
            assert_eq!(state.abort(SessionError::Cancelled), Some(before));
            assert_eq!(state.phase, Phase::Aborted);
            assert_eq!(state.error, Some(SessionError::Cancelled));
        }
    }

    #[test]
    fn test_abort_keeps_terminal_state() {
        let mut state = SessionState::new();
        for _ in 0..5 {
            state.advance().unwrap();
        }
        assert_eq!(state.abort(SessionError::Cancelled), None);
        assert_eq!(state.phase, Phase::Completed);
        assert!(state.error.is_none());

        let mut state = SessionState::new();
        state.abort(SessionError::Cancelled);
        assert_eq!(state.abort(SessionError::NotReusable), None);
        assert_eq!(state.error, Some(SessionError::Cancelled));
        assert_eq!(state.advance(), Err(SessionError::NotReusable));
    }

    #[test]
    fn test_fixed_backoff() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(2000);
        assert_eq!(BackoffPolicy::Fixed.delay(1, base, max), base);
        assert_eq!(BackoffPolicy::Fixed.delay(40, base, max), base);
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(2000);
        let policy = BackoffPolicy::Exponential;
        assert_eq!(policy.delay(1, base, max), Duration::from_millis(100));
        assert_eq!(policy.delay(2, base, max), Duration::from_millis(200));
        assert_eq!(policy.delay(4, base, max), Duration::from_millis(800));
        assert_eq!(policy.delay(6, base, max), max);
        assert_eq!(policy.delay(u32::MAX, base, max), max);
    }
}
