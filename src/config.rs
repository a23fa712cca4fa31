//! Startup configuration for the bridge.
//!
//! Mirrors the driver's builder-pattern `Config`: a `Clone + Debug` struct
//! with `#[must_use]` setter methods and an explicit [`Default`], validated
//! once via [`Config::validate`] before any call is accepted.

use crate::error::ConfigError;
use derivative::Derivative;

/// SIP transport.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SipTransport {
    /// Plain UDP (the common case for carrier trunks).
    Udp,
    /// TCP, for trunks that require it.
    Tcp,
}

/// SIP-side configuration.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct SipConfig {
    /// `sip.server`.
    pub server: String,
    /// `sip.port`.
    pub port: u16,
    /// `sip.user`.
    pub user: String,
    /// `sip.auth_user`, optional; defaults to `user` when absent.
    pub auth_user: Option<String>,
    /// `sip.password`.
    #[derivative(Debug = "ignore")]
    pub password: String,
    /// `sip.transport`.
    pub transport: SipTransport,
}

/// Which realtime-AI integration mode the bridge operates in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AiMode {
    /// Connect through a caller-operated edge function; no auth header is
    /// sent, the edge function injects credentials server-side.
    Edge,
    /// Connect directly to the vendor realtime endpoint with a bearer token.
    Direct,
}

/// AI realtime-session configuration.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct AiConfig {
    /// `ai.mode`.
    pub mode: AiMode,
    /// `ai.ws_url`.
    pub ws_url: String,
    /// `ai.api_key`, required when `mode == Direct`.
    #[derivative(Debug = "ignore")]
    pub api_key: Option<String>,
    /// `ai.model`.
    pub model: Option<String>,
    /// `ai.voice`.
    pub voice: Option<String>,
    /// `ai.system_prompt`.
    pub system_prompt: Option<String>,
}

/// Audio pipeline operating mode. `Standard`, `JitterBuffer`, and
/// `BuiltInPacer` all run the same decode/resample/jitter-buffer/pace
/// pipeline (C3's pacer is the only pacer this bridge has); they're kept as
/// distinct values so a caller's config can name which aspect of that one
/// pipeline it cares about reasoning over, the way the pipeline itself
/// doesn't distinguish the three.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AudioMode {
    /// Full pipeline: decode, resample, jitter buffer, pace.
    Standard,
    /// Standard pipeline; `audio.jitter_buffer_ms` governs prebuffer depth.
    JitterBuffer,
    /// Standard pipeline using the built-in fixed-cadence pacer (C3) rather
    /// than delegating pacing to an external mixer.
    BuiltInPacer,
    /// Skip the polyphase sinc resampler in favour of simple linear
    /// interpolation; cheaper, at the cost of audible aliasing.
    SimpleResample,
    /// Emit a fixed sine tone instead of AI audio, for wiring checks.
    /// Incompatible with `g711_direct = true`.
    TestTone,
    /// G.711 passthrough: skip decode/resample entirely, forcing the same
    /// effective behavior as `g711_direct = true` regardless of that
    /// field's own value.
    Passthrough,
}

/// Audio-path configuration.
#[derive(Clone, Debug)]
pub struct AudioConfig {
    /// `audio.mode`.
    pub mode: AudioMode,
    /// `audio.jitter_buffer_ms`, default 60.
    pub jitter_buffer_ms: u32,
    /// `audio.g711_direct`: the AI speaks G.711 bytes directly on the wire.
    pub g711_direct: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            mode: AudioMode::Standard,
            jitter_buffer_ms: 60,
            g711_direct: false,
        }
    }
}

/// NAT traversal configuration for the media socket.
#[derive(Clone, Debug, Default)]
pub struct NatConfig {
    /// `nat.enable_stun`.
    pub enable_stun: bool,
    /// `nat.stun_server`.
    pub stun_server: Option<String>,
    /// `nat.stun_port`.
    pub stun_port: Option<u16>,
    /// Optional TURN credentials, `(username, password, server)`.
    pub turn: Option<(String, String, String)>,
}

/// Top-level bridge configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// SIP-side settings.
    pub sip: SipConfig,
    /// AI realtime-session settings.
    pub ai: AiConfig,
    /// Audio pipeline settings.
    pub audio: AudioConfig,
    /// NAT traversal settings.
    pub nat: NatConfig,
}

impl Config {
    /// Builds a config with the required SIP and AI fields set, and every
    /// other field at its documented default.
    #[must_use]
    pub fn new(sip: SipConfig, ai: AiConfig) -> Self {
        Self {
            sip,
            ai,
            audio: AudioConfig::default(),
            nat: NatConfig::default(),
        }
    }

    /// Overrides the audio pipeline configuration.
    #[must_use]
    pub fn audio(mut self, audio: AudioConfig) -> Self {
        self.audio = audio;
        self
    }

    /// Overrides the NAT traversal configuration.
    #[must_use]
    pub fn nat(mut self, nat: NatConfig) -> Self {
        self.nat = nat;
        self
    }

    /// Validates every configuration option: ws URL scheme, port range,
    /// required SIP fields, the direct-mode API key requirement, and
    /// mutually-incompatible audio mode combinations.
    ///
    /// This runs once at startup; nothing past this point re-validates.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sip.server.is_empty() {
            return Err(ConfigError::MissingField("sip.server"));
        }
        if self.sip.user.is_empty() {
            return Err(ConfigError::MissingField("sip.user"));
        }
        if self.sip.port == 0 {
            return Err(ConfigError::InvalidPort(self.sip.port as u32));
        }
        if !(self.ai.ws_url.starts_with("ws://") || self.ai.ws_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidWsUrl(self.ai.ws_url.clone()));
        }
        if self.ai.mode == AiMode::Direct && self.ai.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError::MissingApiKeyForDirectMode);
        }
        if let Some(port) = self.nat.stun_port {
            if port == 0 {
                return Err(ConfigError::InvalidPort(port as u32));
            }
        }
        if self.audio.mode == AudioMode::TestTone && self.audio.g711_direct {
            return Err(ConfigError::TestToneIncompatibleWithG711Direct);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config::new(
            SipConfig {
                server: "sip.example.com".into(),
                port: 5060,
                user: "agent".into(),
                auth_user: None,
                password: "secret".into(),
                transport: SipTransport::Udp,
            },
            AiConfig {
                mode: AiMode::Edge,
                ws_url: "wss://edge.example.com/realtime".into(),
                api_key: None,
                model: None,
                voice: None,
                system_prompt: None,
            },
        )
    }

    #[test]
    fn default_config_validates() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_tone_with_g711_direct_is_rejected() {
        let config = valid_config().audio(AudioConfig {
            mode: AudioMode::TestTone,
            jitter_buffer_ms: 60,
            g711_direct: true,
        });
        assert!(matches!(config.validate(), Err(ConfigError::TestToneIncompatibleWithG711Direct)));
    }

    #[test]
    fn test_tone_without_g711_direct_is_fine() {
        let config = valid_config().audio(AudioConfig {
            mode: AudioMode::TestTone,
            jitter_buffer_ms: 60,
            g711_direct: false,
        });
        assert!(config.validate().is_ok());
    }
}
