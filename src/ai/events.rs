//! Wire schema for the realtime-AI WebSocket session.
//!
//! Shaped after a real realtime-AI session/event schema (audio format
//! variants tagged by MIME-ish name, voice/model/instructions as session
//! fields) rather than invented from scratch. Unknown event kinds parse
//! into [`ServerEvent::Other`] instead of failing, the same way the
//! gateway event enum elsewhere in this crate keeps a catch-all arm.

use serde::{Deserialize, Serialize};

/// Audio format negotiated for a realtime session, in either direction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AudioFormat {
    /// Raw PCM16 at an explicit sample rate.
    #[serde(rename = "audio/pcm")]
    Pcm {
        /// Sample rate in Hz.
        rate: u32,
    },
    /// G.711 µ-law, implicitly 8kHz.
    #[serde(rename = "audio/pcmu")]
    Pcmu,
    /// G.711 A-law, implicitly 8kHz.
    #[serde(rename = "audio/pcma")]
    Pcma,
}

impl AudioFormat {
    /// The default format this bridge requests when not in G.711
    /// passthrough mode.
    pub fn default_pcm() -> Self {
        AudioFormat::Pcm { rate: crate::constants::DEFAULT_AI_SAMPLE_RATE }
    }
}

/// Session-level configuration sent once at connect time in direct mode.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// `ai.model`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// `ai.voice`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// `ai.system_prompt`, sent as the session's instructions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Audio format used for input (caller→AI) and output (AI→caller).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<AudioFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<AudioFormat>,
}

/// Outbound events the controller/uplink pump are permitted to send.
/// Only the controller (C8) may construct `ResponseCreate`/
/// `InputAudioBufferClear` — everywhere else in the crate these are
/// refused at the type boundary by keeping construction behind
/// controller-only methods (see `controller.rs`).
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Sent once at connection time in direct mode.
    #[serde(rename = "session.update")]
    SessionUpdate {
        session: SessionConfig,
    },
    /// One 20ms uplink frame, base64-encoded.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        audio: String,
    },
    /// Emitted only by the controller, only on `response.created`.
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,
    /// Emitted only by the controller, after the gate passes.
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        modalities: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
    },
    /// Emitted only by the controller, on barge-in.
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

/// Inbound events consumed from the AI session.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "response.created")]
    ResponseCreated,
    #[serde(rename = "response.done")]
    ResponseDone,
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { delta: String },
    #[serde(rename = "response.audio_transcript.delta")]
    ResponseAudioTranscriptDelta { delta: String },
    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone { transcript: String },
    #[serde(rename = "input_audio_buffer.speech_started")]
    InputAudioBufferSpeechStarted,
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    InputAudioBufferSpeechStopped,
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    ConversationItemInputAudioTranscriptionCompleted { transcript: String },
    #[serde(rename = "error")]
    Error { message: String },
    /// Anything not named above. The receive pump logs and drops these
    /// rather than failing the whole connection on a vendor event this
    /// bridge doesn't need to act on.
    #[serde(other)]
    Other,
}
