//! Sinc-windowed streaming resampler.
//!
//! Frame-by-frame linear interpolation crackles audibly on 8->24kHz speech,
//! so this wraps `rubato`'s fixed-input-size sinc resampler — the same
//! crate and the same `FftFixedOut`/`SincFixedIn`-style fixed-chunk
//! interface the mixer uses to bring a track's native rate onto the
//! output bus (`driver/tasks/mixer.rs`), generalized here from planar f32
//! track audio to a single mono i16 uplink/downlink stream. `rubato`'s
//! `WindowFunction` enum has no Kaiser variant, so this uses
//! `BlackmanHarris2`, the closest equivalent for stopband attenuation.
//! Samples that don't fill a full input chunk are held in `pending` across
//! calls so frame boundaries introduce no discontinuity; `reset()` drops
//! both the pending tail and the resampler's internal delay line.

use rubato::{
    Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

const SINC_LEN: usize = 128;
const OVERSAMPLING_FACTOR: usize = 256;
const MAX_RATIO_RELATIVE: f64 = 8.0;
/// Input chunk size, in frames, fed to the sinc resampler per `process()`
/// call. 160 is the smallest uplink chunk this bridge ever resamples (one
/// 20ms frame at 8kHz), so a carried remainder never has to wait more
/// than one call to fill.
const CHUNK_FRAMES: usize = 160;

fn sinc_parameters() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: OVERSAMPLING_FACTOR,
        window: WindowFunction::BlackmanHarris2,
    }
}

/// Carries a `rubato` sinc resampler plus the carried-sample remainder
/// across successive `process()` calls for one logical audio stream (one
/// call's uplink or downlink). `None` when `from_hz == to_hz`, so the
/// identity case never pays for a resampler it doesn't need.
pub struct Resampler {
    inner: Option<SincFixedIn<f64>>,
    pending: Vec<f64>,
}

impl Resampler {
    /// Builds a resampler for a fixed `from_hz -> to_hz` conversion.
    pub fn new(from_hz: u32, to_hz: u32) -> Self {
        if from_hz == to_hz || from_hz == 0 {
            return Self { inner: None, pending: Vec::new() };
        }

        let ratio = to_hz as f64 / from_hz as f64;
        let inner = SincFixedIn::<f64>::new(ratio, MAX_RATIO_RELATIVE, sinc_parameters(), CHUNK_FRAMES, 1)
            .expect("from_hz/to_hz ratio is within the configured resample bounds");

        Self { inner: Some(inner), pending: Vec::new() }
    }

    /// Clears the carried remainder and the resampler's internal delay
    /// line; the next `process()` call starts cold, as if this were a
    /// fresh stream.
    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(inner) = &mut self.inner {
            inner.reset();
        }
    }

    /// Resamples one chunk of PCM16, carrying any remainder short of a
    /// full input chunk so consecutive calls resample as if they were one
    /// continuous stream.
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        let Some(inner) = self.inner.as_mut() else {
            return input.to_vec();
        };

        self.pending.extend(input.iter().map(|&s| s as f64 / i16::MAX as f64));

        let mut out = Vec::new();
        loop {
            let needed = inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }

            let chunk: Vec<f64> = self.pending.drain(..needed).collect();
            let waves_out = inner.process(&[chunk], None).expect("fixed-size sinc resample chunk");

            out.extend(waves_out[0].iter().map(|&s| {
                (s * i16::MAX as f64).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
            }));
        }

        out
    }
}

/// Naive linear-interpolation resampler, the `audio.mode = simple-resample`
/// alternative to the sinc-windowed [`Resampler`] above: no lookahead delay
/// and a fraction of the CPU cost, at the price of audible aliasing on
/// wideband content. Carries the last sample and fractional phase across
/// calls so a frame boundary never introduces a click.
pub struct LinearResampler {
    ratio: f64,
    phase: f64,
    last_sample: f64,
    active: bool,
}

impl LinearResampler {
    /// Builds a resampler for a fixed `from_hz -> to_hz` conversion.
    pub fn new(from_hz: u32, to_hz: u32) -> Self {
        if from_hz == to_hz || from_hz == 0 {
            return Self { ratio: 1.0, phase: 0.0, last_sample: 0.0, active: false };
        }
        Self { ratio: from_hz as f64 / to_hz as f64, phase: 0.0, last_sample: 0.0, active: true }
    }

    /// Clears the carried phase and last-sample state.
    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.last_sample = 0.0;
    }

    /// Resamples one chunk of PCM16 by linear interpolation, carrying the
    /// fractional output phase and the previous call's final sample so
    /// consecutive calls interpolate as one continuous stream.
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        if !self.active || input.is_empty() {
            return input.to_vec();
        }

        let samples: Vec<f64> =
            std::iter::once(self.last_sample).chain(input.iter().map(|&s| s as f64)).collect();
        let last_index = (samples.len() - 1) as f64;

        let mut out = Vec::new();
        while self.phase < last_index {
            let idx = self.phase.floor() as usize;
            let frac = self.phase - idx as f64;
            let interpolated = samples[idx] * (1.0 - frac) + samples[idx + 1] * frac;
            out.push(interpolated.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
            self.phase += self.ratio;
        }
        self.phase -= last_index;
        self.last_sample = *samples.last().unwrap();

        out
    }
}

#[cfg(test)]
mod linear_tests {
    use super::*;

    #[test]
    fn identity_ratio_is_a_no_op() {
        let mut r = LinearResampler::new(8_000, 8_000);
        let input: Vec<i16> = (0..160).map(|i| i as i16).collect();
        assert_eq!(r.process(&input), input);
    }

    #[test]
    fn upsample_produces_expected_output_length_over_time() {
        let mut r = LinearResampler::new(8_000, 24_000);
        let mut total_in = 0usize;
        let mut total_out = 0usize;
        for _ in 0..50 {
            let chunk = vec![0i16; 160];
            total_in += chunk.len();
            total_out += r.process(&chunk).len();
        }
        let ratio = total_out as f64 / total_in as f64;
        assert!((ratio - 3.0).abs() < 0.05, "ratio was {ratio}");
    }

    #[test]
    fn silence_resamples_to_silence() {
        let mut r = LinearResampler::new(8_000, 24_000);
        for _ in 0..10 {
            let out = r.process(&vec![0i16; 160]);
            assert!(out.iter().all(|&s| s == 0));
        }
    }

    #[test]
    fn reset_clears_carried_phase() {
        let mut r = LinearResampler::new(8_000, 24_000);
        let _ = r.process(&vec![3000i16; 17]);
        r.reset();
        assert_eq!(r.phase, 0.0);
        assert_eq!(r.last_sample, 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_ratio_is_a_no_op() {
        let mut r = Resampler::new(8_000, 8_000);
        let input: Vec<i16> = (0..160).map(|i| i as i16).collect();
        assert_eq!(r.process(&input), input);
    }

    #[test]
    fn upsample_produces_expected_output_length_over_time() {
        let mut r = Resampler::new(8_000, 24_000);
        let mut total_in = 0usize;
        let mut total_out = 0usize;
        for _ in 0..50 {
            let chunk = vec![0i16; 160];
            total_in += chunk.len();
            total_out += r.process(&chunk).len();
        }
        // Ratio should converge to 3x (24000/8000) once the resampler's
        // fixed input chunking has amortized over many frames.
        let ratio = total_out as f64 / total_in as f64;
        assert!((ratio - 3.0).abs() < 0.05, "ratio was {ratio}");
    }

    #[test]
    fn reset_clears_pending_remainder() {
        let mut r = Resampler::new(8_000, 24_000);
        let _ = r.process(&vec![3000i16; 17]);
        assert!(!r.pending.is_empty());
        r.reset();
        assert!(r.pending.is_empty());
    }

    #[test]
    fn silence_resamples_to_silence() {
        let mut r = Resampler::new(8_000, 24_000);
        let mut saw_any_output = false;
        for _ in 0..10 {
            let out = r.process(&vec![0i16; 160]);
            saw_any_output |= !out.is_empty();
            assert!(out.iter().all(|&s| s == 0));
        }
        assert!(saw_any_output, "expected at least one full chunk to have resampled by now");
    }
}
