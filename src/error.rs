//! Crate-wide error hierarchy.
//!
//! Each subsystem gets its own hand-rolled error enum rather than a single
//! flat type, matching the five categories a call can fail in: transient
//! network, codec/decoding, lifecycle violation, media-session-fatal, and
//! configuration. [`Error`] composes them for call
//! sites that need to report across boundaries.

use std::{error::Error as StdError, fmt, io};

/// Top-level error composing every subsystem's own error type.
#[derive(Debug)]
pub enum Error {
    /// A transient network condition: dropped WebSocket, malformed RTP
    /// packet, timed-out send. Never fatal to the call on its own.
    Network(NetworkError),
    /// A codec or decoding failure. The offending packet is discarded by
    /// the caller; this variant exists for logging/counting.
    Codec(CodecError),
    /// An attempt to violate the controller's invariants, e.g. a caller
    /// trying to emit `response.create` without going through the gate.
    Lifecycle(LifecycleError),
    /// A fatal, call-ending condition: socket closed for good, timer
    /// resolution request failed, media session torn down unexpectedly.
    Fatal(FatalError),
    /// A configuration error caught at startup validation.
    Config(ConfigError),
    /// A malformed or unusable SDP offer.
    Sdp(SdpError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Network(e) => write!(f, "network error: {}", e),
            Error::Codec(e) => write!(f, "codec error: {}", e),
            Error::Lifecycle(e) => write!(f, "lifecycle error: {}", e),
            Error::Fatal(e) => write!(f, "fatal media error: {}", e),
            Error::Config(e) => write!(f, "configuration error: {}", e),
            Error::Sdp(e) => write!(f, "sdp error: {}", e),
        }
    }
}

impl StdError for Error {}

impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Error::Network(e)
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Error::Codec(e)
    }
}

impl From<LifecycleError> for Error {
    fn from(e: LifecycleError) -> Self {
        Error::Lifecycle(e)
    }
}

impl From<FatalError> for Error {
    fn from(e: FatalError) -> Self {
        Error::Fatal(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<SdpError> for Error {
    fn from(e: SdpError) -> Self {
        Error::Sdp(e)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Transient network failures (category 1).
#[derive(Debug)]
pub enum NetworkError {
    /// The AI WebSocket connection dropped or failed to connect.
    WebSocket(async_tungstenite::tungstenite::Error),
    /// An inbound RTP packet was shorter than the fixed 12-byte header.
    MalformedRtp,
    /// A UDP socket operation failed.
    Io(io::Error),
    /// JSON (de)serialization of an AI event failed.
    Json(serde_json::Error),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::WebSocket(e) => write!(f, "websocket failure: {}", e),
            NetworkError::MalformedRtp => write!(f, "malformed RTP packet"),
            NetworkError::Io(e) => write!(f, "io failure: {}", e),
            NetworkError::Json(e) => write!(f, "json failure: {}", e),
        }
    }
}

impl StdError for NetworkError {}

impl From<io::Error> for NetworkError {
    fn from(e: io::Error) -> Self {
        NetworkError::Io(e)
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(e: serde_json::Error) -> Self {
        NetworkError::Json(e)
    }
}

impl From<async_tungstenite::tungstenite::Error> for NetworkError {
    fn from(e: async_tungstenite::tungstenite::Error) -> Self {
        NetworkError::WebSocket(e)
    }
}

/// Codec and decoding failures (category 2). The packet that triggered
/// this is always discarded by the caller; the call continues.
#[derive(Debug)]
pub enum CodecError {
    /// Payload length did not match what the codec expects.
    BadPayloadLength { expected: usize, got: usize },
    /// Opus decode failed internally.
    Opus(audiopus::Error),
    /// No codec is registered for this RTP payload type.
    UnknownPayloadType(u8),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::BadPayloadLength { expected, got } =>
                write!(f, "bad payload length: expected {}, got {}", expected, got),
            CodecError::Opus(e) => write!(f, "opus failure: {}", e),
            CodecError::UnknownPayloadType(pt) => write!(f, "unknown payload type {}", pt),
        }
    }
}

impl StdError for CodecError {}

impl From<audiopus::Error> for CodecError {
    fn from(e: audiopus::Error) -> Self {
        CodecError::Opus(e)
    }
}

/// Attempted violations of controller invariants (category 3). Emitting
/// `response.create`/`input_audio_buffer.clear` outside the controller is
/// refused at the type boundary (only `Controller`'s own methods construct
/// those wire events), so the one runtime violation left to report here is
/// the gate itself refusing a request.
#[derive(Debug)]
pub enum LifecycleError {
    /// A response-creation request arrived while the gate was already
    /// unable to pass for a reason other than timing (e.g. call ended).
    GateRefused,
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleError::GateRefused => write!(f, "response-creation gate refused request"),
        }
    }
}

impl StdError for LifecycleError {}

/// Fatal, call-ending conditions (category 4).
#[derive(Debug)]
pub enum FatalError {
    /// The AI WebSocket closed and will not be retried.
    SocketClosed,
    /// The pacer thread could not be started or failed irrecoverably.
    PacerFailed,
    /// The RTP media socket could not be bound.
    MediaSessionFailed(io::Error),
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::SocketClosed => write!(f, "AI socket closed"),
            FatalError::PacerFailed => write!(f, "egress pacer thread failed"),
            FatalError::MediaSessionFailed(e) => write!(f, "media session failed: {}", e),
        }
    }
}

impl StdError for FatalError {}

/// Configuration errors (category 5), surfaced synchronously at startup.
#[derive(Debug)]
pub enum ConfigError {
    /// `ai.ws_url` did not start with `ws://` or `wss://`.
    InvalidWsUrl(String),
    /// A port number fell outside `[1, 65535]`.
    InvalidPort(u32),
    /// A required field was missing.
    MissingField(&'static str),
    /// `ai.mode = direct` was set without an `ai.api_key`.
    MissingApiKeyForDirectMode,
    /// `audio.mode = test-tone` combined with `audio.g711_direct = true`.
    /// Passthrough mode exists to skip the bridge's own audio generation
    /// entirely, which a generated test tone already contradicts.
    TestToneIncompatibleWithG711Direct,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidWsUrl(u) => write!(f, "invalid ai.ws_url: {}", u),
            ConfigError::InvalidPort(p) => write!(f, "invalid port: {}", p),
            ConfigError::MissingField(field) => write!(f, "missing required field: {}", field),
            ConfigError::MissingApiKeyForDirectMode =>
                write!(f, "ai.api_key is required when ai.mode = direct"),
            ConfigError::TestToneIncompatibleWithG711Direct =>
                write!(f, "audio.mode = test-tone is incompatible with audio.g711_direct = true"),
        }
    }
}

impl StdError for ConfigError {}

/// SDP offer parsing failures, surfaced when a call is rejected before
/// it ever reaches the controller.
#[derive(Debug)]
pub enum SdpError {
    /// No `c=` connection address could be found at session or media level.
    MissingConnectionAddress,
    /// No `m=audio` media line was present in the offer.
    MissingAudioMediaLine,
    /// Every offered payload type was either unrecognized or had no
    /// `a=rtpmap` and no static IANA assignment.
    NoUsableCodec,
}

impl fmt::Display for SdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpError::MissingConnectionAddress => write!(f, "SDP offer has no connection address"),
            SdpError::MissingAudioMediaLine => write!(f, "SDP offer has no m=audio line"),
            SdpError::NoUsableCodec => write!(f, "SDP offer has no usable audio codec"),
        }
    }
}

impl StdError for SdpError {}
