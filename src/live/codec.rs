//! JSON wire format of the Gemini Live `BidiGenerateContent` stream.
//!
//! Outbound messages are encoded from [`OutboundMessage`]. Inbound frames are
//! classified into exactly one [`ServerMessage`] with a fixed precedence:
//! `error`, then `setupComplete`, then `serverContent`. Any other shape is
//! [`ServerMessage::Unrecognized`] and produces no events. Unknown fields are
//! ignored everywhere.

use super::types::InboundEvent;
use crate::audio::AudioChunk;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Frame is not valid UTF-8")]
    NotUtf8,
}

/// Output modality requested in the setup message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Audio,
    Text,
}

/// Messages the client sends
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Setup {
        model: String,
        system_prompt: String,
        response_modalities: Vec<ResponseModality>,
    },
    RealtimeAudio {
        data: Vec<u8>,
        mime_type: String,
    },
    /// Empty user turn marking the end of spoken input
    TurnBoundary,
}

impl OutboundMessage {
    pub fn setup(model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        OutboundMessage::Setup {
            model: model.into(),
            system_prompt: system_prompt.into(),
            response_modalities: vec![ResponseModality::Audio],
        }
    }

    pub fn audio(chunk: &AudioChunk) -> Self {
        OutboundMessage::RealtimeAudio {
            data: chunk.data().to_vec(),
            mime_type: chunk.format().mime_type(),
        }
    }

    /// Audio and turn messages are only legal once the session is ready.
    pub fn requires_ready(&self) -> bool {
        !matches!(self, OutboundMessage::Setup { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Setup { .. } => "setup",
            OutboundMessage::RealtimeAudio { .. } => "realtimeInput",
            OutboundMessage::TurnBoundary => "clientContent",
        }
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        let json = match self {
            OutboundMessage::Setup {
                model,
                system_prompt,
                response_modalities,
            } => serde_json::to_string(&SetupFrame {
                setup: SetupBody {
                    model,
                    generation_config: GenerationConfig {
                        response_modalities,
                    },
                    system_instruction: Content {
                        role: None,
                        parts: vec![TextPart {
                            text: system_prompt,
                        }],
                    },
                },
            })?,
            OutboundMessage::RealtimeAudio { data, mime_type } => {
                serde_json::to_string(&RealtimeInputFrame {
                    realtime_input: RealtimeInput {
                        audio: Blob {
                            data: BASE64.encode(data),
                            mime_type,
                        },
                    },
                })?
            }
            OutboundMessage::TurnBoundary => serde_json::to_string(&ClientContentFrame {
                client_content: ClientContent {
                    turns: vec![Content {
                        role: Some("user"),
                        parts: Vec::new(),
                    }],
                },
            })?,
        };
        Ok(json)
    }
}

#[derive(Serialize)]
struct SetupFrame<'a> {
    setup: SetupBody<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupBody<'a> {
    model: &'a str,
    generation_config: GenerationConfig<'a>,
    system_instruction: Content<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: &'a [ResponseModality],
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<TextPart<'a>>,
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputFrame<'a> {
    realtime_input: RealtimeInput<'a>,
}

#[derive(Serialize)]
struct RealtimeInput<'a> {
    audio: Blob<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Blob<'a> {
    data: String,
    mime_type: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientContentFrame<'a> {
    client_content: ClientContent<'a>,
}

#[derive(Serialize)]
struct ClientContent<'a> {
    turns: Vec<Content<'a>>,
}

/// One part of a model turn
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    Audio { data: Vec<u8>, mime_type: String },
    /// A part whose payload could not be decoded
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerContent {
    pub interrupted: bool,
    pub parts: Vec<ContentPart>,
    pub turn_complete: bool,
}

/// Classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Error { code: i64, message: String },
    SetupComplete,
    ServerContent(ServerContent),
    Unrecognized,
}

impl ServerMessage {
    /// Expand into caller events: `Interrupted`, then each part in order, then `TurnComplete`.
    pub fn into_events(self) -> Vec<InboundEvent> {
        match self {
            ServerMessage::Error { code, message } => {
                vec![InboundEvent::ServerError { code, message }]
            }
            ServerMessage::SetupComplete => vec![InboundEvent::SetupComplete],
            ServerMessage::ServerContent(content) => {
                let mut events = Vec::with_capacity(content.parts.len() + 2);
                if content.interrupted {
                    events.push(InboundEvent::Interrupted);
                }
                events.extend(content.parts.into_iter().map(|part| match part {
                    ContentPart::Text(text) => InboundEvent::Transcript { text },
                    ContentPart::Audio { data, mime_type } => {
                        InboundEvent::AudioOutput { data, mime_type }
                    }
                    ContentPart::Rejected(message) => InboundEvent::ProtocolError { message },
                }));
                if content.turn_complete {
                    events.push(InboundEvent::TurnComplete);
                }
                events
            }
            ServerMessage::Unrecognized => Vec::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerMessage {
    error: Option<RawError>,
    setup_complete: Option<serde_json::Value>,
    server_content: Option<RawServerContent>,
}

#[derive(Deserialize)]
struct RawError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerContent {
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
    model_turn: Option<RawModelTurn>,
}

#[derive(Deserialize)]
struct RawModelTurn {
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPart {
    text: Option<String>,
    inline_data: Option<RawInlineData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInlineData {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    data: String,
}

/// Decode a text frame.
pub fn decode(payload: &str) -> Result<ServerMessage, CodecError> {
    let raw: RawServerMessage = serde_json::from_str(payload)?;

    if let Some(error) = raw.error {
        return Ok(ServerMessage::Error {
            code: error.code,
            message: error.message,
        });
    }
    if raw.setup_complete.is_some() {
        return Ok(ServerMessage::SetupComplete);
    }
    let Some(content) = raw.server_content else {
        return Ok(ServerMessage::Unrecognized);
    };

    let mut parts = Vec::new();
    for part in content.model_turn.map(|turn| turn.parts).unwrap_or_default() {
        if let Some(text) = part.text {
            parts.push(ContentPart::Text(text));
        }
        if let Some(inline) = part.inline_data {
            match BASE64.decode(inline.data.as_bytes()) {
                Ok(data) => parts.push(ContentPart::Audio {
                    data,
                    mime_type: inline.mime_type,
                }),
                Err(e) => {
                    log::warn!("⚠️  Skipping undecodable audio part: {}", e);
                    parts.push(ContentPart::Rejected(CodecError::from(e).to_string()));
                }
            }
        }
    }

    Ok(ServerMessage::ServerContent(ServerContent {
        interrupted: content.interrupted,
        parts,
        turn_complete: content.turn_complete,
    }))
}

/// Decode a binary frame; the service sends JSON in binary frames too.
pub fn decode_bytes(payload: &[u8]) -> Result<ServerMessage, CodecError> {
    let text = std::str::from_utf8(payload).map_err(|_| CodecError::NotUtf8)?;
    decode(text)
}
