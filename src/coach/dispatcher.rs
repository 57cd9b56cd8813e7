use super::state::CoachState;
use crate::audio::{AudioChunk, AudioFormat, AudioSink};
use crate::live::InboundEvent;
use crate::response::TextResponseValidator;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;

/// Applies session events to playback and to the shared [`CoachState`].
///
/// Runs as its own task so a slow output device never holds up the socket
/// reader. Text parts are collected per model turn and validated once the
/// turn completes.
pub struct Dispatcher {
    playback: Arc<dyn AudioSink>,
    validator: Arc<dyn TextResponseValidator>,
    state: Arc<watch::Sender<CoachState>>,
    transcript: String,
}

impl Dispatcher {
    pub fn new(
        playback: Arc<dyn AudioSink>,
        validator: Arc<dyn TextResponseValidator>,
        state: Arc<watch::Sender<CoachState>>,
    ) -> Self {
        Self {
            playback,
            validator,
            state,
            transcript: String::new(),
        }
    }

    /// Consume events in arrival order until the session is dropped.
    pub async fn run(mut self, mut events: UnboundedReceiver<InboundEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        log::debug!("Event channel closed, dispatcher exiting");
    }

    pub async fn handle(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Connected => self.set_status("Connected"),
            InboundEvent::SetupComplete => self.set_status("Ready"),
            InboundEvent::Transcript { text } => self.transcript.push_str(&text),
            InboundEvent::AudioOutput { data, mime_type } => {
                let chunk = AudioChunk::new(data, AudioFormat::from_mime(&mime_type));
                match self.playback.write(&chunk).await {
                    Ok(true) => self.set_status("Speaking"),
                    Ok(false) => {}
                    Err(e) => log::warn!("⚠️  Dropping response audio: {}", e),
                }
            }
            InboundEvent::Interrupted => {
                log::info!("✋ Interrupted, stopping playback");
                self.transcript.clear();
                self.stop_playback().await;
            }
            InboundEvent::TurnComplete => self.finish_turn(),
            InboundEvent::Disconnected => {
                self.transcript.clear();
                self.stop_playback().await;
                self.set_status("Disconnected");
            }
            error => {
                if let Some(message) = error.error_message() {
                    self.set_status(&format!("Error: {}", message));
                }
            }
        }
    }

    fn finish_turn(&mut self) {
        let text = std::mem::take(&mut self.transcript);
        if text.trim().is_empty() {
            return;
        }
        let enforced = self.validator.enforce(&text);
        log::info!("📝 Response ready ({} chars)", enforced.len());
        self.state.send_modify(|state| state.last_response_text = enforced);
    }

    async fn stop_playback(&self) {
        match self.playback.stop().await {
            Ok(true) => self.set_status("Listening"),
            Ok(false) => {}
            Err(e) => log::warn!("⚠️  Failed to stop playback: {}", e),
        }
    }

    fn set_status(&self, status: &str) {
        self.state.send_modify(|state| {
            if state.status != status {
                log::debug!("Status: {}", status);
                state.status = status.to_string();
            }
        });
    }
}
