//! Fixed timing, framing, and protocol constants shared across the bridge.

use std::time::Duration;

/// Number of audio frames/packets sent per second. Every call in this
/// crate runs at this cadence regardless of codec.
pub const AUDIO_FRAME_RATE: usize = 50;

/// Length of time between any two RTP frames.
pub const TIMESTEP_LENGTH: Duration = Duration::from_millis(1000 / AUDIO_FRAME_RATE as u64);

/// Length (in milliseconds) of any audio frame.
pub const FRAME_LEN_MS: usize = 1000 / AUDIO_FRAME_RATE;

/// Telephony (G.711/G.722 narrowband) sample rate.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8_000;

/// Number of PCM16 samples in one 20ms telephony frame (160 @ 8kHz).
pub const TELEPHONY_FRAME_SAMPLES: usize = TELEPHONY_SAMPLE_RATE as usize / AUDIO_FRAME_RATE;

/// Default AI-side sample rate when not operating in G.711 passthrough.
pub const DEFAULT_AI_SAMPLE_RATE: u32 = 24_000;

/// Number of PCM16 samples in one 20ms frame at the default AI rate (480).
pub const AI_FRAME_SAMPLES: usize = DEFAULT_AI_SAMPLE_RATE as usize / AUDIO_FRAME_RATE;

/// Opus operates at 48kHz internally in this bridge's RTP clock.
pub const OPUS_SAMPLE_RATE: u32 = 48_000;

/// G.722, confusingly, uses an 8kHz RTP clock despite a 16kHz sampling rate.
pub const G722_RTP_CLOCK_RATE: u32 = 8_000;
/// True sampling rate backing G.722's narrowband-clocked RTP stream.
pub const G722_SAMPLE_RATE: u32 = 16_000;

/// RFC 3551 µ-law (PCMU) silence byte.
pub const MULAW_SILENCE_BYTE: u8 = 0xFF;
/// RFC 3551 A-law (PCMA) silence byte.
pub const ALAW_SILENCE_BYTE: u8 = 0xD5;

/// RTP payload type conventionally assigned to PCMU.
pub const PAYLOAD_TYPE_PCMU: u8 = 0;
/// RTP payload type conventionally assigned to PCMA.
pub const PAYLOAD_TYPE_PCMA: u8 = 8;
/// RTP payload type conventionally assigned to G.722.
pub const PAYLOAD_TYPE_G722: u8 = 9;
/// Dynamic RTP payload type this bridge offers for Opus.
pub const PAYLOAD_TYPE_OPUS: u8 = 111;

/// The one (and only) RTP version.
pub const RTP_VERSION: u8 = 2;

/// Size of the fixed RTP header (no CSRC, no extension) in bytes.
pub const RTP_HEADER_LEN: usize = 12;

/// Safe UDP payload ceiling, below the Ethernet MTU, to avoid fragmentation.
pub const VOICE_PACKET_MAX: usize = 1460;

/// Jitter pre-buffer depth: number of frames withheld before playout starts
/// or resumes after an underrun (60ms at 20ms/frame). Default when
/// `audio.jitter_buffer_ms` isn't translated into a frame count some other
/// way.
pub const JITTER_PREBUFFER_FRAMES: usize = 3;

/// Downlink fade-in length: number of leading samples of a new AI response
/// ramped from silence to full gain, one ramp per `response.created`.
pub const FADE_IN_SAMPLES: usize = 48;

/// Frequency of the `audio.mode = test-tone` sine wave.
pub const TEST_TONE_HZ: f64 = 440.0;

/// Drift-correction threshold: an egress deadline overrun beyond this is
/// treated as a stall rather than something to catch up on.
pub const PACER_DRIFT_RESET_THRESHOLD: Duration = Duration::from_millis(40);

/// Below this wait, the pacer busy-waits rather than sleeping.
pub const PACER_BUSY_WAIT_FLOOR: Duration = Duration::from_micros(500);
/// Above this wait, the pacer sleeps (minus a 1ms safety margin).
pub const PACER_SLEEP_CEILING: Duration = Duration::from_millis(2);
/// Safety margin subtracted from a sleep so it wakes slightly early.
pub const PACER_SLEEP_MARGIN: Duration = Duration::from_millis(1);

/// Minimum silence since the caller last spoke before the gate may pass.
pub const GATE_POST_SPEECH_QUIET: Duration = Duration::from_millis(300);
/// Echo guard: minimum time since the AI last finished speaking.
pub const ECHO_GUARD_INTERVAL: Duration = Duration::from_millis(500);
/// Transcription watchdog: releases transcript-pending if STT never completes.
pub const TRANSCRIPT_WATCHDOG: Duration = Duration::from_secs(3);
/// Bounded close handshake budget for the AI WebSocket on teardown.
pub const WS_CLOSE_BUDGET: Duration = Duration::from_secs(2);

/// Response-creation delay for data-sync style prompts.
pub const DELAY_DATA_SYNC: Duration = Duration::from_millis(40);
/// Response-creation delay for price/quote style prompts.
pub const DELAY_QUOTE: Duration = Duration::from_millis(60);
/// Response-creation delay for confirmation/goodbye prompts.
pub const DELAY_CONFIRMATION: Duration = Duration::from_millis(150);
/// Response-creation delay for a late flush after an interruption.
pub const DELAY_LATE_FLUSH: Duration = Duration::from_millis(80);
/// Lead-in delay before the very first greeting, which bypasses the gate.
pub const DELAY_INITIAL_GREETING: Duration = Duration::from_millis(180);

/// Barge-in RMS threshold: caller audio at/above this interrupts AI speech.
pub const BARGE_IN_RMS_THRESHOLD: f32 = 1500.0;
/// Noise floor below which ingress audio is treated as silence.
pub const NOISE_FLOOR_RMS: f32 = 100.0;
/// Target RMS the AGC step aims for.
pub const AGC_TARGET_RMS: f32 = 4000.0;
/// AGC gain clamp, lower bound.
pub const AGC_GAIN_MIN: f32 = 0.8;
/// AGC gain clamp, upper bound.
pub const AGC_GAIN_MAX: f32 = 4.0;
/// Soft-clip ceiling applied after AGC.
pub const SOFT_CLIP_CEILING: f32 = 24_000.0;
/// DC-blocker pole.
pub const DC_BLOCK_ALPHA: f32 = 0.995;
/// Gain multiplier applied while the AI is speaking and the caller is quiet.
pub const BARGE_IN_SOFT_GATE: f32 = 0.15;
