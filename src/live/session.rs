//! Connection state machine for a single live session.
//!
//! `Session` performs no I/O. It decides what goes onto the outbound channel
//! of the current transport and which events the owner sees. Every mutation
//! happens under the one lock held by [`super::ProtocolClient`], so capture
//! and the transport task never interleave inside a transition.
//!
//! Each connection attempt gets a fresh transport id. Callbacks carrying an
//! older id belong to a torn-down transport and are ignored.

use super::codec::{CodecError, OutboundMessage, ServerMessage};
use super::pending::PendingAudioQueue;
use super::types::{ConnectionState, InboundEvent};
use crate::audio::AudioChunk;
use crate::config::LiveConfig;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub type TransportId = u64;

/// WebSocket close code for a normal closure
const NORMAL_CLOSE: u16 = 1000;

struct TransportHandle {
    id: TransportId,
    outbound: UnboundedSender<OutboundMessage>,
}

pub struct Session {
    state: ConnectionState,
    transport: Option<TransportHandle>,
    pending: PendingAudioQueue,
    setup: OutboundMessage,
    setup_sent: bool,
    last_id: TransportId,
    events: UnboundedSender<InboundEvent>,
}

impl Session {
    pub fn new(config: &LiveConfig, events: UnboundedSender<InboundEvent>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            transport: None,
            pending: PendingAudioQueue::default(),
            setup: OutboundMessage::setup(config.model.clone(), config.system_prompt.clone()),
            setup_sent: false,
            last_id: 0,
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Allocate a transport for a new connection attempt.
    /// Returns `None` while a transport already exists.
    pub fn begin_connect(&mut self) -> Option<(TransportId, UnboundedReceiver<OutboundMessage>)> {
        if let Some(transport) = &self.transport {
            log::debug!(
                "🔌 connect() ignored, transport {} is still live ({})",
                transport.id,
                self.state
            );
            return None;
        }

        self.last_id += 1;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        self.transport = Some(TransportHandle {
            id: self.last_id,
            outbound,
        });
        self.setup_sent = false;
        self.set_state(ConnectionState::Connecting);
        Some((self.last_id, outbound_rx))
    }

    /// Transport reported open. Sends `setup` once and waits for `setupComplete`.
    /// Returns `false` when `id` no longer owns the session and should be closed.
    pub fn transport_opened(&mut self, id: TransportId) -> bool {
        if !self.is_current(id) {
            log::debug!("🔌 Transport {} opened after teardown, closing it", id);
            return false;
        }
        if self.setup_sent {
            return true;
        }

        let setup = self.setup.clone();
        if self.transmit(setup) {
            self.setup_sent = true;
            self.set_state(ConnectionState::AwaitingSetup);
            self.emit(InboundEvent::Connected);
        }
        true
    }

    /// Interpret one decoded inbound frame.
    pub fn handle_frame(&mut self, id: TransportId, frame: Result<ServerMessage, CodecError>) {
        if !self.is_current(id) {
            return;
        }

        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                log::warn!("⚠️  Ignoring undecodable frame: {}", e);
                self.emit(InboundEvent::ProtocolError {
                    message: e.to_string(),
                });
                return;
            }
        };

        match message {
            ServerMessage::SetupComplete => self.setup_complete(),
            ServerMessage::Error { code, message } => {
                log::error!("❌ Server error {} in state {}: {}", code, self.state, message);
                self.emit(InboundEvent::ServerError { code, message });
            }
            ServerMessage::Unrecognized => {
                log::debug!("Ignoring unrecognized server message");
            }
            content @ ServerMessage::ServerContent(_) => self.emit_all(content.into_events()),
        }
    }

    fn setup_complete(&mut self) {
        if self.state != ConnectionState::AwaitingSetup {
            log::warn!("⚠️  setupComplete received in state {}, ignoring", self.state);
            return;
        }

        self.set_state(ConnectionState::Ready);
        self.emit(InboundEvent::SetupComplete);

        let queued = self.pending.drain();
        if !queued.is_empty() {
            log::info!("📤 Flushing {} queued audio chunks", queued.len());
        }
        for chunk in queued {
            self.transmit(OutboundMessage::audio(&chunk));
        }
    }

    /// Send a captured chunk now when ready, otherwise hold it for the flush.
    pub fn submit_audio(&mut self, chunk: AudioChunk) {
        if chunk.is_empty() {
            return;
        }
        if self.state.can_stream() {
            log::trace!("📤 Sending {} bytes of audio", chunk.len());
            self.transmit(OutboundMessage::audio(&chunk));
            return;
        }

        if self.pending.push(chunk).is_some() {
            log::trace!("Pending audio full, dropped oldest chunk");
        }
    }

    /// Mark the end of the user's turn. Only valid when ready.
    pub fn request_turn_end(&mut self) {
        if !self.state.can_stream() {
            log::warn!("⚠️  Turn end requested in state {}", self.state);
            self.emit(InboundEvent::InvalidOperation {
                message: format!("Cannot end turn while {}", self.state),
            });
            return;
        }
        log::debug!("📤 Sending turn boundary");
        self.transmit(OutboundMessage::TurnBoundary);
    }

    /// Tear down from any state. Idempotent.
    pub fn disconnect(&mut self) {
        let was_live = self.state != ConnectionState::Disconnected || self.transport.is_some();

        if let Some(transport) = self.transport.take() {
            // Dropping the sender makes the transport task close the socket
            self.set_state(ConnectionState::Closing);
            drop(transport);
        }
        self.reset();

        if was_live {
            self.emit(InboundEvent::Disconnected);
        }
    }

    /// Server closed the connection. Any close code other than a normal
    /// closure is reported as a transport error before `Disconnected`.
    pub fn transport_closed(&mut self, id: TransportId, close: Option<(u16, String)>) {
        if !self.is_current(id) {
            return;
        }
        match close {
            Some((code, reason)) if code != NORMAL_CLOSE => {
                let message = format!("{} {}", code, reason).trim_end().to_string();
                log::error!("❌ Server closed the connection: {}", message);
                self.emit(InboundEvent::TransportError { message });
            }
            Some((_, reason)) if !reason.is_empty() => {
                log::info!("🔌 Server closed the connection: {}", reason)
            }
            _ => log::info!("🔌 Server closed the connection"),
        }
        self.transport = None;
        self.reset();
        self.emit(InboundEvent::Disconnected);
    }

    /// Connection failed to open or broke.
    pub fn transport_lost(&mut self, id: TransportId, reason: String) {
        if !self.is_current(id) {
            return;
        }
        log::error!("❌ Transport failure in state {}: {}", self.state, reason);
        self.emit(InboundEvent::TransportError { message: reason });
        self.transport = None;
        self.reset();
        self.emit(InboundEvent::Disconnected);
    }

    /// An outbound message could not be written to the socket.
    pub fn send_failed(&mut self, id: TransportId, reason: String) {
        if !self.is_current(id) {
            return;
        }
        log::error!("❌ Send failed: {}", reason);
        self.emit(InboundEvent::SendFailure { message: reason });
    }

    fn transmit(&mut self, message: OutboundMessage) -> bool {
        if message.requires_ready() && !self.state.can_stream() {
            log::error!("❌ Refusing to send {} in state {}", message.kind(), self.state);
            self.emit(InboundEvent::InvalidOperation {
                message: format!("Cannot send {} while {}", message.kind(), self.state),
            });
            return false;
        }

        let kind = message.kind();
        let result = match &self.transport {
            Some(transport) => transport
                .outbound
                .send(message)
                .map_err(|_| "transport task has exited".to_string()),
            None => Err("no open transport".to_string()),
        };

        match result {
            Ok(()) => true,
            Err(reason) => {
                log::error!("❌ Could not queue {}: {}", kind, reason);
                self.emit(InboundEvent::SendFailure { message: reason });
                false
            }
        }
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.setup_sent = false;
        self.set_state(ConnectionState::Disconnected);
    }

    fn is_current(&self, id: TransportId) -> bool {
        self.transport.as_ref().is_some_and(|t| t.id == id)
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            log::info!("🔄 Session state: {} → {}", self.state, state);
            self.state = state;
        }
    }

    fn emit(&self, event: InboundEvent) {
        if self.events.send(event).is_err() {
            log::trace!("Event receiver dropped");
        }
    }

    fn emit_all(&self, events: Vec<InboundEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::codec::{decode, ServerContent};

    struct Harness {
        session: Session,
        events: UnboundedReceiver<InboundEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let (tx, events) = mpsc::unbounded_channel();
            let config = LiveConfig::default().with_model("models/test");
            Self {
                session: Session::new(&config, tx),
                events,
            }
        }

        fn events(&mut self) -> Vec<InboundEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }

        /// Connect and open a transport, leaving the session in AwaitingSetup
        fn open(&mut self) -> (TransportId, UnboundedReceiver<OutboundMessage>) {
            let (id, mut outbound) = self.session.begin_connect().unwrap();
            assert!(self.session.transport_opened(id));
            assert!(matches!(
                outbound.try_recv().unwrap(),
                OutboundMessage::Setup { .. }
            ));
            self.events();
            (id, outbound)
        }
    }

    fn chunk(tag: u8) -> AudioChunk {
        AudioChunk::input(vec![tag, tag])
    }

    fn sent(outbound: &mut UnboundedReceiver<OutboundMessage>) -> Vec<OutboundMessage> {
        let mut out = Vec::new();
        while let Ok(message) = outbound.try_recv() {
            out.push(message);
        }
        out
    }

    fn audio_tags(messages: &[OutboundMessage]) -> Vec<u8> {
        messages
            .iter()
            .map(|m| match m {
                OutboundMessage::RealtimeAudio { data, .. } => data[0],
                other => panic!("unexpected {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_setup_is_first_and_sent_once() {
        let mut h = Harness::new();
        h.session.submit_audio(chunk(1));
        let (id, mut outbound) = h.session.begin_connect().unwrap();
        assert_eq!(h.session.state(), ConnectionState::Connecting);

        assert!(h.session.transport_opened(id));
        assert!(h.session.transport_opened(id));
        assert_eq!(h.session.state(), ConnectionState::AwaitingSetup);

        let messages = sent(&mut outbound);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            OutboundMessage::Setup { model, .. } => assert_eq!(model, "models/test"),
            other => panic!("expected setup, got {:?}", other),
        }
        assert_eq!(h.events(), vec![InboundEvent::Connected]);
    }

    #[test]
    fn test_audio_is_queued_until_ready() {
        let mut h = Harness::new();
        let (id, mut outbound) = h.open();

        for i in 0..5 {
            h.session.submit_audio(chunk(i));
        }
        assert!(sent(&mut outbound).is_empty());
        assert_eq!(h.session.pending_len(), 5);

        h.session.handle_frame(id, decode(r#"{"setupComplete":{}}"#));
        assert_eq!(h.session.state(), ConnectionState::Ready);
        assert_eq!(h.session.pending_len(), 0);
        assert_eq!(audio_tags(&sent(&mut outbound)), vec![0, 1, 2, 3, 4]);
        assert_eq!(h.events(), vec![InboundEvent::SetupComplete]);

        h.session.submit_audio(chunk(9));
        assert_eq!(audio_tags(&sent(&mut outbound)), vec![9]);
    }

    #[test]
    fn test_overflow_keeps_most_recent_sixty() {
        let mut h = Harness::new();
        let (id, mut outbound) = h.open();

        for i in 0..65 {
            h.session.submit_audio(chunk(i));
            assert!(h.session.pending_len() <= 60);
        }
        h.session.handle_frame(id, decode(r#"{"setupComplete":{}}"#));

        let expected: Vec<u8> = (5..65).collect();
        assert_eq!(audio_tags(&sent(&mut outbound)), expected);

        // A repeated setupComplete does not flush again
        h.session.handle_frame(id, decode(r#"{"setupComplete":{}}"#));
        assert!(sent(&mut outbound).is_empty());
    }

    #[test]
    fn test_turn_end_outside_ready_is_invalid() {
        let mut h = Harness::new();
        h.session.request_turn_end();
        assert!(matches!(
            h.events().as_slice(),
            [InboundEvent::InvalidOperation { .. }]
        ));

        let (id, mut outbound) = h.open();
        h.session.request_turn_end();
        assert!(sent(&mut outbound).is_empty());
        assert!(matches!(
            h.events().as_slice(),
            [InboundEvent::InvalidOperation { .. }]
        ));

        h.session.handle_frame(id, decode(r#"{"setupComplete":{}}"#));
        h.session.request_turn_end();
        assert_eq!(sent(&mut outbound), vec![OutboundMessage::TurnBoundary]);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut h = Harness::new();
        let (_, mut outbound) = h.open();
        h.session.submit_audio(chunk(1));

        h.session.disconnect();
        assert_eq!(h.session.state(), ConnectionState::Disconnected);
        assert_eq!(h.session.pending_len(), 0);
        assert_eq!(h.events(), vec![InboundEvent::Disconnected]);

        h.session.disconnect();
        assert_eq!(h.session.state(), ConnectionState::Disconnected);
        assert!(h.events().is_empty());

        // Outbound channel is closed once the transport is released
        assert!(matches!(
            outbound.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_disconnect_when_never_connected_emits_nothing() {
        let mut h = Harness::new();
        h.session.submit_audio(chunk(1));
        h.session.disconnect();
        assert_eq!(h.session.pending_len(), 0);
        assert!(h.events().is_empty());
    }

    #[test]
    fn test_server_error_keeps_state() {
        let mut h = Harness::new();
        let (id, _outbound) = h.open();

        h.session
            .handle_frame(id, decode(r#"{"error":{"code":403,"message":"bad key"}}"#));
        assert_eq!(
            h.events(),
            vec![InboundEvent::ServerError {
                code: 403,
                message: "bad key".into()
            }]
        );
        assert_eq!(h.session.state(), ConnectionState::AwaitingSetup);
    }

    #[test]
    fn test_protocol_error_keeps_session() {
        let mut h = Harness::new();
        let (id, _outbound) = h.open();

        h.session.handle_frame(id, decode("{not json"));
        assert!(matches!(
            h.events().as_slice(),
            [InboundEvent::ProtocolError { .. }]
        ));
        assert_eq!(h.session.state(), ConnectionState::AwaitingSetup);
    }

    #[test]
    fn test_transport_lost_resets_session() {
        let mut h = Harness::new();
        let (id, _outbound) = h.open();
        h.session.submit_audio(chunk(1));

        h.session.transport_lost(id, "connection reset".into());
        assert_eq!(
            h.events(),
            vec![
                InboundEvent::TransportError {
                    message: "connection reset".into()
                },
                InboundEvent::Disconnected
            ]
        );
        assert_eq!(h.session.state(), ConnectionState::Disconnected);
        assert_eq!(h.session.pending_len(), 0);

        // Terminal; a later disconnect has nothing to report
        h.session.disconnect();
        assert!(h.events().is_empty());
    }

    #[test]
    fn test_normal_close_only_disconnects() {
        let mut h = Harness::new();
        let (id, _outbound) = h.open();

        h.session.transport_closed(id, Some((1000, "bye".into())));
        assert_eq!(h.events(), vec![InboundEvent::Disconnected]);
        assert_eq!(h.session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_abnormal_close_reports_reason() {
        let mut h = Harness::new();
        let (id, _outbound) = h.open();
        h.session.submit_audio(chunk(1));

        h.session
            .transport_closed(id, Some((1008, "models/x is not found".into())));
        assert_eq!(
            h.events(),
            vec![
                InboundEvent::TransportError {
                    message: "1008 models/x is not found".into()
                },
                InboundEvent::Disconnected
            ]
        );
        assert_eq!(h.session.state(), ConnectionState::Disconnected);
        assert_eq!(h.session.pending_len(), 0);
    }

    #[test]
    fn test_stale_transport_is_ignored() {
        let mut h = Harness::new();
        let (old_id, _old) = h.open();
        h.session.disconnect();
        h.events();

        let (new_id, mut outbound) = h.session.begin_connect().unwrap();
        assert_ne!(old_id, new_id);

        assert!(!h.session.transport_opened(old_id));
        h.session.handle_frame(old_id, decode(r#"{"setupComplete":{}}"#));
        h.session.transport_lost(old_id, "late failure".into());
        assert_eq!(h.session.state(), ConnectionState::Connecting);
        assert!(h.events().is_empty());
        assert!(sent(&mut outbound).is_empty());
    }

    #[test]
    fn test_connect_while_live_is_noop() {
        let mut h = Harness::new();
        let _open = h.open();
        assert!(h.session.begin_connect().is_none());
        assert_eq!(h.session.state(), ConnectionState::AwaitingSetup);
    }

    #[test]
    fn test_server_content_forwarded_in_order() {
        let mut h = Harness::new();
        let (id, _outbound) = h.open();
        let content = ServerMessage::ServerContent(ServerContent {
            interrupted: false,
            parts: vec![crate::live::codec::ContentPart::Text("hello".into())],
            turn_complete: true,
        });
        h.session.handle_frame(id, Ok(content));
        assert_eq!(
            h.events(),
            vec![
                InboundEvent::Transcript {
                    text: "hello".into()
                },
                InboundEvent::TurnComplete
            ]
        );
    }

    #[test]
    fn test_send_to_closed_transport_is_a_send_failure() {
        let mut h = Harness::new();
        let (id, outbound) = h.open();
        h.session.handle_frame(id, decode(r#"{"setupComplete":{}}"#));
        h.events();
        drop(outbound);

        h.session.submit_audio(chunk(1));
        assert!(matches!(
            h.events().as_slice(),
            [InboundEvent::SendFailure { .. }]
        ));
    }
}
