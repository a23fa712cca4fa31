//! C6 — Decoder pipeline.
//!
//! Per-call state tying the payload-type map from SDP negotiation to the
//! codec kit (C1), the resampler, and ingress DSP (C2). One [`DecoderPipeline`]
//! is owned exclusively by the call's ingress handler, enforcing a single
//! writer for per-call DSP state.

use crate::codec::{
    self,
    resample::{LinearResampler, Resampler},
    CodecKind,
};
use crate::constants::{DEFAULT_AI_SAMPLE_RATE, PAYLOAD_TYPE_PCMA, PAYLOAD_TYPE_PCMU};
use crate::dsp::IngressDsp;
use crate::error::CodecError;
use crate::sdp::CodecDescriptor;
use std::collections::HashMap;

/// The read-only payload-type -> codec map built once from the negotiated
/// SDP.
#[derive(Clone, Debug)]
pub struct PayloadTypeMap {
    codecs: HashMap<u8, (CodecKind, u8)>,
}

impl PayloadTypeMap {
    /// Builds the map from every codec descriptor offered/negotiated.
    pub fn from_descriptors(descriptors: &[CodecDescriptor]) -> Self {
        let codecs = descriptors.iter().map(|d| (d.payload_type, (d.kind, d.channels))).collect();
        Self { codecs }
    }

    /// Looks up a codec (and its negotiated channel count) by RTP payload
    /// type, falling back to the conventional PT0 -> µ-law, PT8 -> A-law
    /// static assignment (always mono).
    pub fn lookup(&self, payload_type: u8) -> Option<(CodecKind, u8)> {
        self.codecs.get(&payload_type).copied().or_else(|| match payload_type {
            PAYLOAD_TYPE_PCMU => Some((CodecKind::Pcmu, 1)),
            PAYLOAD_TYPE_PCMA => Some((CodecKind::Pcma, 1)),
            _ => None,
        })
    }
}

/// Output of one pipeline pass over an inbound RTP payload: the decoded
/// (and possibly resampled) PCM16 bytes destined for the uplink, and
/// whether this frame counts as caller barge-in.
pub struct DecodedFrame {
    /// Little-endian PCM16 bytes at the AI's configured sample rate (or
    /// the telephony rate, in G.711-passthrough mode).
    pub pcm16_bytes: Vec<u8>,
    /// True if the caller's raw RMS crossed the barge-in threshold.
    pub barge_in: bool,
}

/// The two interchangeable resampling strategies behind one pipeline field,
/// selected once at construction by `audio.mode = simple-resample`.
enum ResamplerKind {
    Sinc(Resampler),
    Linear(LinearResampler),
}

impl ResamplerKind {
    fn new(simple: bool, from_hz: u32, to_hz: u32) -> Self {
        if simple {
            ResamplerKind::Linear(LinearResampler::new(from_hz, to_hz))
        } else {
            ResamplerKind::Sinc(Resampler::new(from_hz, to_hz))
        }
    }

    fn reset(&mut self) {
        match self {
            ResamplerKind::Sinc(r) => r.reset(),
            ResamplerKind::Linear(r) => r.reset(),
        }
    }

    fn process(&mut self, input: &[i16]) -> Vec<i16> {
        match self {
            ResamplerKind::Sinc(r) => r.process(input),
            ResamplerKind::Linear(r) => r.process(input),
        }
    }
}

/// Per-call decode state: codec map, resampler history, and ingress DSP,
/// exclusively owned by the ingress handler.
pub struct DecoderPipeline {
    payload_map: PayloadTypeMap,
    resampler: ResamplerKind,
    dsp: IngressDsp,
    ai_sample_rate: u32,
    g711_direct: bool,
}

impl DecoderPipeline {
    /// Builds a pipeline for a call negotiated with the given codec
    /// descriptors. `ai_sample_rate` is the AI session's configured rate
    /// (typically 24kHz); if `g711_direct` is set, decode/resample is
    /// skipped entirely and the original codec bytes pass straight
    /// through to the AI session. `simple_resample` selects linear
    /// interpolation (`audio.mode = simple-resample`) over the default
    /// sinc-windowed resampler.
    pub fn new(
        descriptors: &[CodecDescriptor],
        negotiated: CodecKind,
        ai_sample_rate: u32,
        g711_direct: bool,
        simple_resample: bool,
    ) -> Self {
        Self {
            payload_map: PayloadTypeMap::from_descriptors(descriptors),
            resampler: ResamplerKind::new(simple_resample, negotiated.sample_rate(), ai_sample_rate.max(1)),
            dsp: IngressDsp::new(),
            ai_sample_rate: if g711_direct { negotiated.sample_rate() } else { ai_sample_rate },
            g711_direct,
        }
    }

    /// Convenience constructor defaulting to the standard AI rate and the
    /// sinc resampler.
    pub fn standard(descriptors: &[CodecDescriptor], negotiated: CodecKind) -> Self {
        Self::new(descriptors, negotiated, DEFAULT_AI_SAMPLE_RATE, false, false)
    }

    /// The sample rate this pipeline's output PCM16 is at.
    pub fn output_sample_rate(&self) -> u32 {
        self.ai_sample_rate
    }

    /// Resets per-call DSP/resampler state, as if this were a fresh call.
    pub fn reset(&mut self) {
        self.resampler.reset();
        self.dsp.reset();
    }

    /// Runs the five-step decode pipeline over one inbound RTP payload.
    pub fn process(
        &mut self,
        payload: &[u8],
        payload_type: u8,
        ai_speaking: bool,
    ) -> Result<DecodedFrame, CodecError> {
        let (codec, channels) = self
            .payload_map
            .lookup(payload_type)
            .ok_or(CodecError::UnknownPayloadType(payload_type))?;

        if self.g711_direct {
            // Passthrough: the AI speaks this codec's bytes directly, so
            // the only thing left to do is surface barge-in — on a raw
            // byte stream the DSP can't run, so decode anyway for RMS
            // purposes and feed the *original* bytes onward.
            let mut pcm16 = codec.decode(payload, channels)?;
            let barge_in = self.dsp.process(&mut pcm16, ai_speaking);
            return Ok(DecodedFrame { pcm16_bytes: payload.to_vec(), barge_in });
        }

        let mut pcm16 = codec.decode(payload, channels)?;

        if codec == CodecKind::Opus && channels == 2 {
            pcm16 = codec::fold_stereo_to_mono(&pcm16);
        }

        let resampled = if codec.sample_rate() == self.ai_sample_rate {
            pcm16
        } else {
            self.resampler.process(&pcm16)
        };
        pcm16 = resampled;

        let barge_in = self.dsp.process(&mut pcm16, ai_speaking);

        Ok(DecodedFrame { pcm16_bytes: codec::pcm16_to_bytes(&pcm16), barge_in })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdp::CodecDescriptor;

    fn descriptors() -> Vec<CodecDescriptor> {
        vec![
            CodecDescriptor { kind: CodecKind::Pcma, payload_type: 8, clock_rate: 8_000, channels: 1 },
            CodecDescriptor { kind: CodecKind::Pcmu, payload_type: 0, clock_rate: 8_000, channels: 1 },
        ]
    }

    #[test]
    fn payload_type_map_falls_back_to_static_assignment() {
        let map = PayloadTypeMap::from_descriptors(&[]);
        assert_eq!(map.lookup(0), Some((CodecKind::Pcmu, 1)));
        assert_eq!(map.lookup(8), Some((CodecKind::Pcma, 1)));
        assert_eq!(map.lookup(13), None);
    }

    #[test]
    fn payload_type_map_carries_negotiated_channel_count() {
        let descriptors =
            vec![CodecDescriptor { kind: CodecKind::Opus, payload_type: 111, clock_rate: 48_000, channels: 2 }];
        let map = PayloadTypeMap::from_descriptors(&descriptors);
        assert_eq!(map.lookup(111), Some((CodecKind::Opus, 2)));
    }

    #[test]
    fn unknown_payload_type_is_rejected() {
        let mut pipeline = DecoderPipeline::standard(&descriptors(), CodecKind::Pcma);
        let result = pipeline.process(&[0u8; 160], 99, false);
        assert!(matches!(result, Err(CodecError::UnknownPayloadType(99))));
    }

    #[test]
    fn decoded_output_is_resampled_to_ai_rate() {
        let mut pipeline = DecoderPipeline::standard(&descriptors(), CodecKind::Pcma);
        let payload = vec![crate::constants::ALAW_SILENCE_BYTE; 160];
        let frame = pipeline.process(&payload, 8, false).unwrap();
        // 160 samples @ 8kHz resampled toward 24kHz should roughly triple
        // in sample count once the resampler's history is warmed up, so
        // the byte length should exceed the input's 320 bytes.
        assert!(frame.pcm16_bytes.len() >= 320);
    }

    #[test]
    fn simple_resample_mode_uses_linear_interpolation_and_still_resamples() {
        let mut pipeline = DecoderPipeline::new(&descriptors(), CodecKind::Pcma, 24_000, false, true);
        let payload = vec![crate::constants::ALAW_SILENCE_BYTE; 160];
        let frame = pipeline.process(&payload, 8, false).unwrap();
        assert!(frame.pcm16_bytes.len() >= 320);
    }

    #[test]
    fn g711_passthrough_forwards_original_bytes() {
        let mut pipeline = DecoderPipeline::new(&descriptors(), CodecKind::Pcma, 8_000, true, false);
        let payload = vec![crate::constants::ALAW_SILENCE_BYTE; 160];
        let frame = pipeline.process(&payload, 8, false).unwrap();
        assert_eq!(frame.pcm16_bytes, payload);
    }

    #[test]
    fn loud_payload_is_reported_as_barge_in() {
        let mut pipeline = DecoderPipeline::standard(&descriptors(), CodecKind::Pcmu);
        // A square-wave-ish PCMU payload decodes to a loud signal.
        let payload = vec![0x00u8; 160];
        let frame = pipeline.process(&payload, 0, true).unwrap();
        assert!(frame.barge_in);
    }
}
