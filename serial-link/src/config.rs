//! Link parameters.

use std::time::Duration;

use crate::packet;

/// Default transmissions per frame before giving up.
pub const DEFAULT_RETRIES: u32 = 3;
/// Default wait for a reply to each transmission.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
/// Default largest I-frame payload.
pub const DEFAULT_MAX_PAYLOAD: usize = packet::MAX_PACKET_SIZE;
/// Smallest payload that still fits the largest control packet.
pub const MIN_MAX_PAYLOAD: usize = packet::MAX_CONTROL_PACKET_LEN;
/// Longest accepted per-transmission timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Tunables shared by the link state machine and the ARQ engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Total transmissions of a SET, DISC or I-frame before the operation
    /// fails.  REJ-triggered and timeout-triggered retransmissions draw from
    /// the same budget.
    pub retries: u32,
    /// How long each transmission waits for its reply.
    pub timeout: Duration,
    /// Largest information field carried by one I-frame.
    pub max_payload: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl LinkConfig {
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retries == 0 {
            return Err(ConfigError::NoRetries);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.timeout > MAX_TIMEOUT {
            return Err(ConfigError::TimeoutTooLong(self.timeout));
        }
        if !(MIN_MAX_PAYLOAD..=u16::MAX as usize).contains(&self.max_payload) {
            return Err(ConfigError::MaxPayload(self.max_payload));
        }
        Ok(())
    }
}

/// Rejected [`LinkConfig`] values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("retry limit must allow at least one transmission")]
    NoRetries,
    #[error("timeout must be non-zero")]
    ZeroTimeout,
    #[error("timeout {0:?} exceeds the {MAX_TIMEOUT:?} limit")]
    TimeoutTooLong(Duration),
    #[error("max payload {0} outside {MIN_MAX_PAYLOAD}..=65535")]
    MaxPayload(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = LinkConfig::default();
        assert_eq!(cfg.retries, 3);
        assert_eq!(cfg.timeout, Duration::from_secs(3));
        assert_eq!(cfg.max_payload, 1024);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_degenerate_values() {
        let cfg = LinkConfig::default();
        assert_eq!(cfg.clone().with_retries(0).validate(), Err(ConfigError::NoRetries));
        assert_eq!(
            cfg.clone().with_timeout(Duration::ZERO).validate(),
            Err(ConfigError::ZeroTimeout)
        );
        assert_eq!(
            cfg.clone().with_max_payload(16).validate(),
            Err(ConfigError::MaxPayload(16))
        );
        assert!(cfg.with_max_payload(MIN_MAX_PAYLOAD).validate().is_ok());
    }

    #[test]
    fn timeout_is_bounded() {
        let cfg = LinkConfig::default();
        let forever = Duration::from_secs(u64::MAX);
        assert_eq!(
            cfg.clone().with_timeout(forever).validate(),
            Err(ConfigError::TimeoutTooLong(forever))
        );
        assert!(cfg.clone().with_timeout(MAX_TIMEOUT).validate().is_ok());
        assert!(cfg
            .with_timeout(MAX_TIMEOUT + Duration::from_millis(1))
            .validate()
            .is_err());
    }
}
