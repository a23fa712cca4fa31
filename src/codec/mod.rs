//! C1 — Codec kit.
//!
//! A closed, tagged `CodecKind` enum, modeled as a tagged variant rather than
//! via subclassing, with `encode`/`decode` dispatch, plus
//! the sinc resampler used throughout the decoder pipeline and audio
//! adapter.

mod alaw;
mod g722;
mod mulaw;
pub mod resample;

use crate::error::CodecError;

/// The closed set of codecs this bridge negotiates.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CodecKind {
    /// ITU-T G.711 µ-law.
    Pcmu,
    /// ITU-T G.711 A-law.
    Pcma,
    /// ITU-T G.722.
    G722,
    /// Opus (RFC 6716).
    Opus,
}

impl CodecKind {
    /// Native clock rate used on the RTP timeline for this codec.
    pub fn rtp_clock_rate(self) -> u32 {
        match self {
            CodecKind::Pcmu | CodecKind::Pcma => crate::constants::TELEPHONY_SAMPLE_RATE,
            CodecKind::G722 => crate::constants::G722_RTP_CLOCK_RATE,
            CodecKind::Opus => crate::constants::OPUS_SAMPLE_RATE,
        }
    }

    /// True sampling rate of decoded PCM16 for this codec (differs from
    /// the RTP clock rate for G.722, which samples at 16kHz on an 8kHz
    /// clock for historical reasons).
    pub fn sample_rate(self) -> u32 {
        match self {
            CodecKind::Pcmu | CodecKind::Pcma => crate::constants::TELEPHONY_SAMPLE_RATE,
            CodecKind::G722 => crate::constants::G722_SAMPLE_RATE,
            CodecKind::Opus => crate::constants::OPUS_SAMPLE_RATE,
        }
    }

    /// Conventional/offered RTP payload type for this codec.
    pub fn payload_type(self) -> u8 {
        match self {
            CodecKind::Pcmu => crate::constants::PAYLOAD_TYPE_PCMU,
            CodecKind::Pcma => crate::constants::PAYLOAD_TYPE_PCMA,
            CodecKind::G722 => crate::constants::PAYLOAD_TYPE_G722,
            CodecKind::Opus => crate::constants::PAYLOAD_TYPE_OPUS,
        }
    }

    /// RFC 3551 silence byte/frame emitted by the pacer on underrun.
    pub fn silence_frame(self, samples: usize) -> Vec<u8> {
        match self {
            CodecKind::Pcmu => vec![crate::constants::MULAW_SILENCE_BYTE; samples],
            CodecKind::Pcma => vec![crate::constants::ALAW_SILENCE_BYTE; samples],
            // G.722 and Opus have no single silence byte; an all-zero PCM
            // frame re-encoded through the codec is silence for both.
            CodecKind::G722 => g722::encode(&vec![0i16; samples]),
            CodecKind::Opus => Vec::new(),
        }
    }

    /// Decodes one codec payload to PCM16 at [`CodecKind::sample_rate`].
    /// `channels` only affects Opus, the one codec this bridge offers that
    /// can legally carry a stereo stream; a stereo decode comes back
    /// interleaved and is the caller's job to fold (see
    /// [`fold_stereo_to_mono`]). All other codecs always decode to mono
    /// regardless of `channels`.
    pub fn decode(self, payload: &[u8], channels: u8) -> Result<Vec<i16>, CodecError> {
        match self {
            CodecKind::Pcmu => Ok(mulaw::decode(payload)),
            CodecKind::Pcma => Ok(alaw::decode(payload)),
            CodecKind::G722 => Ok(g722::decode(payload)),
            CodecKind::Opus => opus_decode(payload, channels),
        }
    }

    /// Encodes PCM16 mono at [`CodecKind::sample_rate`] to one codec payload.
    pub fn encode(self, pcm16: &[i16]) -> Result<Vec<u8>, CodecError> {
        match self {
            CodecKind::Pcmu => Ok(mulaw::encode(pcm16)),
            CodecKind::Pcma => Ok(alaw::encode(pcm16)),
            CodecKind::G722 => Ok(g722::encode(pcm16)),
            CodecKind::Opus => opus_encode(pcm16),
        }
    }
}

fn opus_decode(payload: &[u8], channels: u8) -> Result<Vec<i16>, CodecError> {
    use audiopus::{coder::Decoder, Channels, SampleRate};

    let stereo = channels == 2;
    let decoder_channels = if stereo { Channels::Stereo } else { Channels::Mono };
    let mut decoder = Decoder::new(SampleRate::Hz48000, decoder_channels)?;
    let frame_samples = crate::constants::AI_FRAME_SAMPLES.max(960) * if stereo { 2 } else { 1 };
    let mut out = vec![0i16; frame_samples];
    let written = decoder.decode(Some(payload), &mut out, false)?;
    out.truncate(written * if stereo { 2 } else { 1 });
    Ok(out)
}

fn opus_encode(pcm16: &[i16]) -> Result<Vec<u8>, CodecError> {
    use audiopus::{coder::Encoder, Application, Channels, SampleRate};

    let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Mono, Application::Voip)?;
    let mut out = vec![0u8; crate::constants::VOICE_PACKET_MAX];
    let written = encoder.encode(pcm16, &mut out)?;
    out.truncate(written);
    Ok(out)
}

/// Folds interleaved stereo PCM16 to mono by averaging channels. Used for
/// Opus sources, per the decoder pipeline's stereo-fold step.
pub fn fold_stereo_to_mono(stereo: &[i16]) -> Vec<i16> {
    stereo
        .chunks_exact(2)
        .map(|pair| (((pair[0] as i32) + (pair[1] as i32)) / 2) as i16)
        .collect()
}

/// Packs PCM16 samples as little-endian bytes, the wire format expected on
/// both sides of the AI realtime session's `audio/pcm` format.
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Unpacks little-endian PCM16 bytes into samples. Any trailing odd byte
/// is dropped.
pub fn bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mulaw_round_trip_is_near_identity() {
        let original: Vec<i16> = (0..160).map(|i| ((i as f32 / 160.0 * 6.28).sin() * 8000.0) as i16).collect();
        let encoded = CodecKind::Pcmu.encode(&original).unwrap();
        let decoded = CodecKind::Pcmu.decode(&encoded, 1).unwrap();
        assert_eq!(decoded.len(), original.len());

        let signal_power: f64 = original.iter().map(|&s| (s as f64).powi(2)).sum();
        let noise_power: f64 = original
            .iter()
            .zip(decoded.iter())
            .map(|(&a, &b)| ((a - b) as f64).powi(2))
            .sum();
        let snr_db = 10.0 * (signal_power / noise_power.max(1.0)).log10();
        assert!(snr_db >= 35.0, "mu-law round trip SNR too low: {snr_db} dB");
    }

    #[test]
    fn alaw_silence_byte_matches_rfc_3551() {
        let frame = CodecKind::Pcma.silence_frame(160);
        assert!(frame.iter().all(|&b| b == crate::constants::ALAW_SILENCE_BYTE));
    }

    #[test]
    fn mulaw_silence_byte_matches_rfc_3551() {
        let frame = CodecKind::Pcmu.silence_frame(160);
        assert!(frame.iter().all(|&b| b == crate::constants::MULAW_SILENCE_BYTE));
    }

    #[test]
    fn pcm16_byte_packing_round_trips() {
        let samples = vec![0i16, 1, -1, 32767, -32768, 12345];
        let bytes = pcm16_to_bytes(&samples);
        assert_eq!(bytes_to_pcm16(&bytes), samples);
    }

    #[test]
    fn stereo_fold_averages_channels() {
        let stereo = vec![100i16, 200, -100, -300];
        let mono = fold_stereo_to_mono(&stereo);
        assert_eq!(mono, vec![150, -200]);
    }
}
