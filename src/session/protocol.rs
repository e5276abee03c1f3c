//! Text frames exchanged with the voice assistant.

use serde::{Deserialize, Serialize};

use crate::audio::{AudioParams, CODEC_NAME};

/// Transport name advertised in the hello message
pub const TRANSPORT_NAME: &str = "websocket";
/// Protocol version advertised in the hello message
pub const PROTOCOL_VERSION: u32 = 1;

/// How the assistant should decide when the user stopped talking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenMode {
    /// Server-side voice activity detection
    #[default]
    Auto,
    Manual,
    Realtime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsPhase {
    Start,
    Stop,
}

/// Parsed inbound text frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Hello {
        session_id: String,
    },
    Tts {
        state: TtsPhase,
        session_id: Option<String>,
    },
    Goodbye {
        session_id: Option<String>,
    },
    /// Well-formed but not something the session reacts to
    Unknown {
        kind: String,
    },
    /// Not JSON, or JSON missing a field the message type requires
    Malformed {
        raw: String,
    },
}

/// Loose view of any inbound message; only the fields we act on.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    session_id: Option<String>,
    state: Option<String>,
}

impl ControlMessage {
    pub fn parse(text: &str) -> Self {
        // Cheap well-formedness check before handing it to the JSON parser
        if !text.starts_with('{') {
            return Self::Malformed {
                raw: text.to_string(),
            };
        }

        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!("JSON parse error: {}", e);
                return Self::Malformed {
                    raw: text.to_string(),
                };
            }
        };

        let kind = envelope.kind.unwrap_or_default();
        match kind.as_str() {
            "hello" => match envelope.session_id {
                Some(session_id) => Self::Hello { session_id },
                None => Self::Malformed {
                    raw: text.to_string(),
                },
            },
            "tts" => match envelope.state.as_deref() {
                Some("start") => Self::Tts {
                    state: TtsPhase::Start,
                    session_id: envelope.session_id,
                },
                Some("stop") => Self::Tts {
                    state: TtsPhase::Stop,
                    session_id: envelope.session_id,
                },
                // sentence_start and friends only carry display text
                Some(other) => Self::Unknown {
                    kind: format!("tts:{}", other),
                },
                None => Self::Malformed {
                    raw: text.to_string(),
                },
            },
            "goodbye" => Self::Goodbye {
                session_id: envelope.session_id,
            },
            _ => Self::Unknown { kind },
        }
    }
}

/// Text frames the client sends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Hello { audio: AudioParams },
    ListenStart { session_id: String, mode: ListenMode },
}

#[derive(Serialize)]
struct HelloWire {
    #[serde(rename = "type")]
    kind: &'static str,
    version: u32,
    transport: &'static str,
    audio_params: AudioParamsWire,
}

#[derive(Serialize)]
struct AudioParamsWire {
    format: &'static str,
    sample_rate: u32,
    channels: u16,
    frame_duration: u32,
}

#[derive(Serialize)]
struct ListenWire<'a> {
    session_id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    state: &'static str,
    mode: ListenMode,
}

impl OutboundMessage {
    pub fn hello(audio: AudioParams) -> Self {
        Self::Hello { audio }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Hello { audio } => serde_json::to_string(&HelloWire {
                kind: "hello",
                version: PROTOCOL_VERSION,
                transport: TRANSPORT_NAME,
                audio_params: AudioParamsWire {
                    format: CODEC_NAME,
                    sample_rate: audio.sample_rate,
                    channels: audio.channels,
                    frame_duration: audio.frame_duration_ms,
                },
            }),
            Self::ListenStart { session_id, mode } => serde_json::to_string(&ListenWire {
                session_id,
                kind: "listen",
                state: "start",
                mode: *mode,
            }),
        }
    }
}

/// Bounded text + hex preview of a payload for error logs
pub fn preview(raw: &[u8]) -> (String, String) {
    let text: String = String::from_utf8_lossy(raw).chars().take(100).collect();
    let hex = raw
        .iter()
        .take(50)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ");
    (text, hex)
}
