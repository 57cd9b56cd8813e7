//! Duplex streaming session with the Gemini Live API

pub mod client;
pub mod codec;
pub mod pending;
pub mod session;
pub mod transport;
pub mod types;

pub use client::ProtocolClient;
pub use codec::{CodecError, OutboundMessage, ServerMessage};
pub use pending::{PendingAudioQueue, PENDING_AUDIO_CAPACITY};
pub use transport::{ConnectError, API_KEY_HEADER};
pub use types::{ConnectionState, InboundEvent};
