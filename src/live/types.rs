//! Session state and the typed events delivered to the caller

use strum::{Display, EnumString};

/// Lifecycle of the single live session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// Transport open, `setup` sent, waiting for `setupComplete`
    AwaitingSetup,
    Ready,
    Closing,
}

impl ConnectionState {
    /// Audio and turn messages may only be transmitted in this state.
    pub fn can_stream(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }
}

/// Everything the session reports to its owner, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Transport is open and setup has been sent
    Connected,
    /// Server accepted the setup; audio now flows directly
    SetupComplete,
    /// One text part of the model turn
    Transcript { text: String },
    /// One inline audio part of the model turn, already base64-decoded
    AudioOutput { data: Vec<u8>, mime_type: String },
    /// User barged in; stop playback now
    Interrupted,
    TurnComplete,
    /// Error object sent by the remote service
    ServerError { code: i64, message: String },
    /// Connection failed to open or dropped
    TransportError { message: String },
    Disconnected,
    /// Frame that could not be decoded
    ProtocolError { message: String },
    /// Outbound message could not be handed to the transport
    SendFailure { message: String },
    /// Operation not allowed in the current state
    InvalidOperation { message: String },
}

impl InboundEvent {
    /// Failures, as opposed to lifecycle or content events
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            InboundEvent::ServerError { .. }
                | InboundEvent::TransportError { .. }
                | InboundEvent::ProtocolError { .. }
                | InboundEvent::SendFailure { .. }
                | InboundEvent::InvalidOperation { .. }
        )
    }

    /// Text shown to the user for error events
    pub fn error_message(&self) -> Option<String> {
        match self {
            InboundEvent::ServerError { code, message } => Some(format!("{} ({})", message, code)),
            InboundEvent::TransportError { message }
            | InboundEvent::ProtocolError { message }
            | InboundEvent::SendFailure { message }
            | InboundEvent::InvalidOperation { message } => Some(message.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::AwaitingSetup.to_string(), "AwaitingSetup");
        assert_eq!(
            ConnectionState::from_str("Ready").unwrap(),
            ConnectionState::Ready
        );
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_only_ready_streams() {
        assert!(ConnectionState::Ready.can_stream());
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::AwaitingSetup,
            ConnectionState::Closing,
        ] {
            assert!(!state.can_stream(), "{} should not stream", state);
        }
    }

    #[test]
    fn test_error_classification() {
        let error = InboundEvent::ServerError {
            code: 403,
            message: "bad key".into(),
        };
        assert!(error.is_error());
        assert_eq!(error.error_message().unwrap(), "bad key (403)");
        assert!(!InboundEvent::TurnComplete.is_error());
        assert_eq!(InboundEvent::Connected.error_message(), None);
    }
}
