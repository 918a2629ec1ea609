//! Lifecycle of one streaming session, shared by both roles.

use std::fmt;
use std::time::{Duration, Instant};

use crate::capture::StreamConfig;
use crate::error::LinkError;

// ── SessionPhase ─────────────────────────────────────────────────

/// The current phase of a streaming session.
///
/// ```text
///  Handshake ──► Streaming ──► Closed
///      │                         ▲
///      └─────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// Connected; the stream configuration is not settled yet.
    #[default]
    Handshake,

    /// Frames flow with the negotiated configuration.
    Streaming {
        config: StreamConfig,
        /// When streaming began.
        since: Instant,
    },

    /// Terminal. No further packages are sent or accepted.
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handshake => write!(f, "Handshake"),
            Self::Streaming { config, .. } => write!(f, "Streaming ({config})"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl SessionPhase {
    pub fn is_handshake(&self) -> bool {
        matches!(self, Self::Handshake)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// The negotiated configuration, once streaming.
    pub fn config(&self) -> Option<&StreamConfig> {
        match self {
            Self::Streaming { config, .. } => Some(config),
            _ => None,
        }
    }

    /// How long the session has been streaming. `None` in any other phase.
    pub fn streaming_duration(&self) -> Option<Duration> {
        match self {
            Self::Streaming { since, .. } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Streaming` with the settled configuration.
    ///
    /// Valid from: `Handshake`. The configuration is fixed for the rest of
    /// the session.
    pub fn begin_streaming(&mut self, config: StreamConfig) -> Result<(), LinkError> {
        match self {
            Self::Handshake => {
                *self = Self::Streaming {
                    config,
                    since: Instant::now(),
                };
                Ok(())
            }
            Self::Streaming { .. } => Err(LinkError::ProtocolViolation(
                "stream configuration is already settled".into(),
            )),
            Self::Closed => Err(LinkError::ProtocolViolation(
                "cannot start streaming: session is closed".into(),
            )),
        }
    }

    /// Transition to `Closed`. Valid from every phase; closing twice is
    /// harmless.
    pub fn close(&mut self) {
        *self = Self::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_handshake() {
        let phase = SessionPhase::default();
        assert!(phase.is_handshake());
        assert!(phase.config().is_none());
        assert!(phase.streaming_duration().is_none());
    }

    #[test]
    fn handshake_then_streaming() {
        let mut phase = SessionPhase::default();
        phase.begin_streaming(StreamConfig::default()).unwrap();
        assert!(phase.is_streaming());
        assert_eq!(phase.config(), Some(&StreamConfig::default()));
        assert!(phase.streaming_duration().is_some());
    }

    #[test]
    fn config_cannot_change_while_streaming() {
        let mut phase = SessionPhase::default();
        phase.begin_streaming(StreamConfig::default()).unwrap();
        let err = phase.begin_streaming(StreamConfig::default()).unwrap_err();
        assert!(matches!(err, LinkError::ProtocolViolation(_)));
        assert!(phase.is_streaming());
    }

    #[test]
    fn closed_is_terminal() {
        let mut phase = SessionPhase::default();
        phase.close();
        assert!(phase.is_closed());
        assert!(phase.begin_streaming(StreamConfig::default()).is_err());
        phase.close();
        assert!(phase.is_closed());
    }

    #[test]
    fn display() {
        let mut phase = SessionPhase::default();
        assert_eq!(phase.to_string(), "Handshake");
        phase.begin_streaming(StreamConfig::default()).unwrap();
        assert_eq!(phase.to_string(), "Streaming (320x180 YUYV)");
        phase.close();
        assert_eq!(phase.to_string(), "Closed");
    }
}
