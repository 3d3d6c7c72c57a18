//! Reconnection state machine
//!
//! Transitions are plain methods so the backoff schedule can be tested
//! without sockets or timers; the connection manager performs the sleeps.

use ntnl_common::TunnelError;
use ntnl_common::constants::{
    MAX_RECONNECT_ATTEMPTS, RECONNECT_BASE_DELAY_MS, RECONNECT_MAX_DELAY_MS,
};
use std::time::Duration;

/// Observable client connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Registered { url: String },
    Reconnecting { attempt: u32, delay: Duration },
    GivenUp,
}

/// Reconnection configuration with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(RECONNECT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(RECONNECT_MAX_DELAY_MS),
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ReconnectConfig {
    /// `min(base * 2^attempt, max)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

#[derive(Debug, Clone)]
pub struct Reconnector {
    config: ReconnectConfig,
    attempts: u32,
    state: ConnectionState,
}

impl Reconnector {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Consecutive failed connections since the last registration
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn on_connecting(&mut self) -> &ConnectionState {
        self.state = ConnectionState::Connecting;
        &self.state
    }

    /// A `registered` acknowledgment resets the attempt counter
    pub fn on_registered(&mut self, url: String) -> &ConnectionState {
        self.attempts = 0;
        self.state = ConnectionState::Registered { url };
        &self.state
    }

    /// The connection dropped or could not be opened
    ///
    /// Returns the delay before the next attempt, or
    /// `MaxReconnectAttemptsExceeded` once the attempt budget is spent.
    pub fn on_disconnected(&mut self) -> Result<Duration, TunnelError> {
        self.attempts += 1;
        if self.attempts > self.config.max_attempts {
            self.state = ConnectionState::GivenUp;
            return Err(TunnelError::MaxReconnectAttemptsExceeded {
                attempts: self.config.max_attempts,
            });
        }

        let delay = self.config.delay_for(self.attempts);
        self.state = ConnectionState::Reconnecting {
            attempt: self.attempts,
            delay,
        };
        Ok(delay)
    }

    /// Local shutdown: no reconnect is scheduled
    pub fn on_closed(&mut self) -> &ConnectionState {
        self.state = ConnectionState::Disconnected;
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let mut reconnector = Reconnector::new(ReconnectConfig::default());

        let delays: Vec<u64> = (0..5)
            .map(|_| {
                reconnector.on_connecting();
                reconnector.on_disconnected().unwrap().as_secs()
            })
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 30]);
        assert_eq!(
            reconnector.state(),
            &ConnectionState::Reconnecting {
                attempt: 5,
                delay: Duration::from_secs(30)
            }
        );

        reconnector.on_connecting();
        let err = reconnector.on_disconnected().unwrap_err();
        assert!(matches!(
            err,
            TunnelError::MaxReconnectAttemptsExceeded { attempts: 5 }
        ));
        assert_eq!(reconnector.state(), &ConnectionState::GivenUp);
    }

    #[test]
    fn test_registered_resets_attempts() {
        let mut reconnector = Reconnector::new(ReconnectConfig::default());
        reconnector.on_disconnected().unwrap();
        reconnector.on_disconnected().unwrap();
        assert_eq!(reconnector.attempts(), 2);

        reconnector.on_connecting();
        reconnector.on_registered("http://demo.localhost:8000".to_string());
        assert_eq!(reconnector.attempts(), 0);
        assert!(matches!(
            reconnector.state(),
            ConnectionState::Registered { url } if url == "http://demo.localhost:8000"
        ));

        assert_eq!(reconnector.on_disconnected().unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn test_state_sequence() {
        let mut reconnector = Reconnector::new(ReconnectConfig::default());
        assert_eq!(reconnector.state(), &ConnectionState::Disconnected);
        assert_eq!(reconnector.on_connecting(), &ConnectionState::Connecting);
        reconnector.on_registered("u".to_string());
        reconnector.on_disconnected().unwrap();
        assert!(matches!(
            reconnector.state(),
            ConnectionState::Reconnecting { attempt: 1, .. }
        ));
        assert_eq!(reconnector.on_closed(), &ConnectionState::Disconnected);
    }

    #[test]
    fn test_delay_for_caps_and_never_overflows() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_for(0), Duration::from_secs(1));
        assert_eq!(config.delay_for(4), Duration::from_secs(16));
        assert_eq!(config.delay_for(5), Duration::from_secs(30));
        assert_eq!(config.delay_for(40), Duration::from_secs(30));
    }
}
