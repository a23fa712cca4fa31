//! C2 — Ingress DSP.
//!
//! A small per-call single-writer pipeline applied in-place to decoded
//! caller PCM16, grounded on the driver's own per-track soft-clip stage
//! (`audiopus::softclip::SoftClip`) generalized into a hand-written
//! gate/DC-block/AGC chain, since songbird has no noise-gate or AGC
//! precedent of its own to adapt.

use crate::constants::{
    AGC_GAIN_MAX, AGC_GAIN_MIN, AGC_TARGET_RMS, BARGE_IN_RMS_THRESHOLD, BARGE_IN_SOFT_GATE,
    DC_BLOCK_ALPHA, NOISE_FLOOR_RMS, SOFT_CLIP_CEILING,
};

fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    ((sum_sq / samples.len() as f64).sqrt()) as f32
}

fn soft_clip(sample: f32) -> f32 {
    sample.clamp(-SOFT_CLIP_CEILING, SOFT_CLIP_CEILING)
}

/// Per-call ingress DSP state: just the DC blocker's single-pole history,
/// reset at call start.
#[derive(Debug, Default)]
pub struct IngressDsp {
    dc_prev_in: f32,
    dc_prev_out: f32,
}

impl IngressDsp {
    /// Fresh state for a new call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the DC blocker's history, as if this were a new call.
    pub fn reset(&mut self) {
        self.dc_prev_in = 0.0;
        self.dc_prev_out = 0.0;
    }

    /// Applies the five-step pipeline to `pcm16` in place and returns
    /// whether this frame counts as barge-in.
    ///
    /// `ai_speaking` reflects the controller's current
    /// `response-active` flag at the moment this frame arrived.
    pub fn process(&mut self, pcm16: &mut [i16], ai_speaking: bool) -> bool {
        let raw_rms = rms(pcm16);

        // Step 1: noise-gate passthrough while the AI is speaking.
        if raw_rms < NOISE_FLOOR_RMS && ai_speaking {
            for s in pcm16.iter_mut() {
                *s = 0;
            }
            return false;
        }

        // Step 2: DC blocker, y[n] = x[n] - x[n-1] + alpha*y[n-1].
        let mut dc_removed = vec![0.0f32; pcm16.len()];
        for (i, &s) in pcm16.iter().enumerate() {
            let x = s as f32;
            let y = x - self.dc_prev_in + DC_BLOCK_ALPHA * self.dc_prev_out;
            dc_removed[i] = y;
            self.dc_prev_in = x;
            self.dc_prev_out = y;
        }

        // Step 3: AGC targeting AGC_TARGET_RMS, clamped gain, soft clip.
        let post_dc_rms = {
            let sum_sq: f64 = dc_removed.iter().map(|&v| (v as f64) * (v as f64)).sum();
            ((sum_sq / dc_removed.len().max(1) as f64).sqrt()) as f32
        };

        let mut gain = if post_dc_rms > NOISE_FLOOR_RMS {
            (AGC_TARGET_RMS / post_dc_rms).clamp(AGC_GAIN_MIN, AGC_GAIN_MAX)
        } else {
            1.0
        };

        // Step 4: soft gate while the AI speaks and the caller is quiet.
        let barge_in = raw_rms >= BARGE_IN_RMS_THRESHOLD;
        if ai_speaking && raw_rms < BARGE_IN_RMS_THRESHOLD {
            gain *= BARGE_IN_SOFT_GATE;
        }

        for (i, s) in pcm16.iter_mut().enumerate() {
            *s = soft_clip(dc_removed[i] * gain).round() as i16;
        }

        // Step 5: barge-in is reported against the raw, pre-gain RMS.
        barge_in
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(len: usize, amplitude: i16) -> Vec<i16> {
        (0..len)
            .map(|i| ((i as f32 / len as f32 * std::f32::consts::TAU * 4.0).sin() * amplitude as f32) as i16)
            .collect()
    }

    #[test]
    fn silence_while_ai_speaking_is_gated_to_zero() {
        let mut dsp = IngressDsp::new();
        let mut frame = vec![2i16; 160];
        let barge_in = dsp.process(&mut frame, true);
        assert!(!barge_in);
        assert!(frame.iter().all(|&s| s == 0));
    }

    #[test]
    fn loud_caller_audio_is_reported_as_barge_in() {
        let mut dsp = IngressDsp::new();
        let mut frame = tone(160, 8000);
        let barge_in = dsp.process(&mut frame, true);
        assert!(barge_in);
    }

    #[test]
    fn quiet_caller_audio_while_ai_speaks_is_not_barge_in() {
        let mut dsp = IngressDsp::new();
        let mut frame = tone(160, 800);
        let barge_in = dsp.process(&mut frame, true);
        assert!(!barge_in);
    }

    #[test]
    fn agc_brings_quiet_signal_toward_target_rms() {
        let mut dsp = IngressDsp::new();
        let mut frame = tone(160, 500);
        let before = rms(&frame);
        dsp.process(&mut frame, false);
        let after = rms(&frame);
        assert!(after > before, "AGC should have raised the level: {before} -> {after}");
    }

    #[test]
    fn reset_clears_dc_blocker_history() {
        let mut dsp = IngressDsp::new();
        let mut frame = tone(160, 4000);
        dsp.process(&mut frame, false);
        dsp.reset();
        assert_eq!(dsp.dc_prev_in, 0.0);
        assert_eq!(dsp.dc_prev_out, 0.0);
    }
}
