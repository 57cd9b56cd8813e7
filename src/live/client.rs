use super::session::Session;
use super::transport;
use super::types::{ConnectionState, InboundEvent};
use crate::audio::{AudioChunk, ChunkConsumer};
use crate::config::{ApiConfig, LiveConfig};
use crate::error::{CoachError, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver};

pub(crate) struct Shared {
    session: Mutex<Session>,
    pub(crate) endpoint: String,
    pub(crate) api: ApiConfig,
    runtime: Handle,
}

impl Shared {
    /// The single entry point for every session mutation
    pub(crate) fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the live streaming session.
///
/// Cheap to clone. All clones drive the same session, and every call is safe
/// from any thread, including the capture thread.
#[derive(Clone)]
pub struct ProtocolClient {
    shared: Arc<Shared>,
}

impl ProtocolClient {
    /// Create the client and the receiver for its events.
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: LiveConfig,
        api: ApiConfig,
    ) -> Result<(Self, UnboundedReceiver<InboundEvent>)> {
        let runtime = Handle::try_current().map_err(|e| CoachError::Runtime(e.to_string()))?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            session: Mutex::new(Session::new(&config, events_tx)),
            endpoint: config.endpoint,
            api,
            runtime,
        });

        Ok((Self { shared }, events_rx))
    }

    /// Open the connection in the background. No-op while a connection is live.
    pub fn connect(&self) {
        let Some((id, outbound)) = self.shared.session().begin_connect() else {
            return;
        };
        log::info!("🔌 Connecting to {}", self.shared.endpoint);
        self.shared
            .runtime
            .spawn(transport::run_connection(Arc::clone(&self.shared), id, outbound));
    }

    pub fn send_audio(&self, chunk: AudioChunk) {
        self.shared.session().submit_audio(chunk);
    }

    pub fn request_turn_end(&self) {
        self.shared.session().request_turn_end();
    }

    pub fn disconnect(&self) {
        self.shared.session().disconnect();
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.session().state()
    }

    pub fn pending_len(&self) -> usize {
        self.shared.session().pending_len()
    }

    /// Consumer for [`crate::audio::AudioCapture`] that feeds this client.
    pub fn chunk_consumer(&self) -> ChunkConsumer {
        let client = self.clone();
        Arc::new(move |chunk| client.send_audio(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> ApiConfig {
        ApiConfig::from_key("AIzaSyTest1234567").unwrap()
    }

    #[test]
    fn test_requires_runtime() {
        assert!(ProtocolClient::new(LiveConfig::default(), api()).is_err());
    }

    #[tokio::test]
    async fn test_chunks_queue_before_connect() {
        let (client, mut events) = ProtocolClient::new(LiveConfig::default(), api()).unwrap();
        let consumer = client.chunk_consumer();
        consumer(AudioChunk::input(vec![1, 2]));
        consumer(AudioChunk::input(vec![3, 4]));
        assert_eq!(client.pending_len(), 2);
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.disconnect();
        assert_eq!(client.pending_len(), 0);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_turn_end_while_disconnected() {
        let (client, mut events) = ProtocolClient::new(LiveConfig::default(), api()).unwrap();
        client.request_turn_end();
        assert!(matches!(
            events.recv().await,
            Some(InboundEvent::InvalidOperation { .. })
        ));
    }
}
