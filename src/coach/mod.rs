//! Push-to-talk coach session tying capture, the live client and playback together

pub mod dispatcher;
pub mod state;

pub use dispatcher::Dispatcher;
pub use state::CoachState;

use crate::audio::{AudioCapture, AudioCaptureConfig, AudioSink};
use crate::config::{ApiConfig, LiveConfig};
use crate::error::{CoachError, Result};
use crate::live::{ConnectionState, ProtocolClient};
use crate::response::TextResponseValidator;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct CoachSession {
    client: ProtocolClient,
    capture: Arc<AudioCapture>,
    playback: Arc<dyn AudioSink>,
    state: Arc<watch::Sender<CoachState>>,
    dispatcher: JoinHandle<()>,
}

impl CoachSession {
    /// Build the session and start its event dispatcher. Must run inside a tokio runtime.
    pub fn new(
        live: LiveConfig,
        api: ApiConfig,
        capture: AudioCaptureConfig,
        playback: Arc<dyn AudioSink>,
        validator: Arc<dyn TextResponseValidator>,
    ) -> Result<Self> {
        let (client, events) = ProtocolClient::new(live, api)?;
        let capture = Arc::new(AudioCapture::new(capture, client.chunk_consumer()));
        let (state, _) = watch::channel(CoachState::default());
        let state = Arc::new(state);

        let dispatcher = Dispatcher::new(Arc::clone(&playback), validator, Arc::clone(&state));
        let dispatcher = tokio::spawn(dispatcher.run(events));

        Ok(Self {
            client,
            capture,
            playback,
            state,
            dispatcher,
        })
    }

    pub fn connect(&self) {
        log::info!("🎓 Connecting coach session");
        self.client.connect();
    }

    /// Stop audio in both directions and close the connection.
    pub async fn disconnect(&self) {
        self.stop_capture().await;
        if let Err(e) = self.playback.stop().await {
            log::warn!("⚠️  Failed to stop playback: {}", e);
        }
        self.client.disconnect();
        self.update(|state| {
            state.is_streaming = false;
            state.status = "Disconnected".to_string();
        });
    }

    /// Silence the coach and start streaming the microphone.
    pub async fn start_push_to_talk(&self) -> Result<()> {
        if let Err(e) = self.playback.stop().await {
            log::warn!("⚠️  Failed to stop playback: {}", e);
        }

        let capture = Arc::clone(&self.capture);
        tokio::task::spawn_blocking(move || capture.start())
            .await
            .map_err(|e| CoachError::Runtime(e.to_string()))??;

        self.update(|state| {
            state.status = "Listening".to_string();
            state.is_streaming = true;
        });
        Ok(())
    }

    /// Stop the microphone and ask the model to answer.
    pub async fn stop_push_to_talk(&self) {
        // Capture delivers its tail before stop returns, so it precedes the turn boundary
        self.stop_capture().await;
        self.client.request_turn_end();
        self.update(|state| {
            state.is_streaming = false;
            state.status = "Awaiting response".to_string();
        });
    }

    pub async fn set_always_on(&self, enabled: bool) -> Result<()> {
        if enabled {
            self.start_push_to_talk().await
        } else {
            self.stop_push_to_talk().await;
            Ok(())
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<CoachState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> CoachState {
        self.state.borrow().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.client.state()
    }

    pub fn is_talking(&self) -> bool {
        self.capture.is_active()
    }

    async fn stop_capture(&self) {
        let capture = Arc::clone(&self.capture);
        if let Err(e) = tokio::task::spawn_blocking(move || capture.stop()).await {
            log::error!("Failed to stop capture: {}", e);
        }
    }

    fn update(&self, modify: impl FnOnce(&mut CoachState)) {
        self.state.send_modify(modify);
    }
}

impl Drop for CoachSession {
    fn drop(&mut self) {
        self.capture.stop();
        self.client.disconnect();
        self.dispatcher.abort();
    }
}
