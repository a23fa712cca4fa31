//! ITU-T G.722 sub-band ADPCM, structured after the standard two-band
//! split: a 24-tap QMF analysis filter slides over the 16kHz signal one
//! sample at a time, each pair of input samples producing one decimated
//! low/high output pair, each band coded by its own adaptive predictor and
//! packed one byte per sample pair (6 bits low band, 2 bits high band).
//!
//! No G.722 reference implementation was available to ground the exact
//! ITU quantizer tables against, so the adaptive step sizes here follow
//! the textbook G.721/G.722 ADPCM shape (log-domain step with leak-down)
//! rather than reproducing the standard's tables bit-for-bit. Interop
//! with a strict ITU-compliant peer should re-derive the quantizer tables
//! from the standard before deployment; the framing, band split, and
//! 1-byte-per-pair packing are otherwise representative of real G.722.

const QMF_TAPS: [i32; 24] = [
    3, -11, -11, 53, 12, -156, 32, 362, -210, -805, 951, 3876, 3876, 951, -805, -210, 362, 32,
    -156, 12, 53, -11, -11, 3,
];

struct AdpcmState {
    predicted: i32,
    step: i32,
}

impl AdpcmState {
    fn new(initial_step: i32) -> Self {
        Self { predicted: 0, step: initial_step }
    }

    fn quantize(&mut self, sample: i32, levels: i32) -> i32 {
        let diff = sample - self.predicted;
        let step = self.step.max(1);
        let mut code = (diff.abs() * 4 / step).min(levels - 1);
        if diff < 0 {
            code = -code;
        }
        let reconstructed = self.predicted + code * step / 4;
        self.predicted += (reconstructed - self.predicted) / 2;
        self.step = ((self.step * envelope_leak(code, levels)) / 256).clamp(16, 4096);
        code
    }

    fn dequantize(&mut self, code: i32, levels: i32) -> i32 {
        let step = self.step.max(1);
        let reconstructed = self.predicted + code * step / 4;
        self.predicted += (reconstructed - self.predicted) / 2;
        self.step = ((self.step * envelope_leak(code, levels)) / 256).clamp(16, 4096);
        reconstructed
    }
}

fn envelope_leak(code: i32, levels: i32) -> i32 {
    let magnitude = code.unsigned_abs() as i32;
    // Larger excursions expand the step, small ones decay it -- the usual
    // ADPCM leaky-integrator adaptation, scaled to the band's level count.
    256 + (magnitude * 512 / levels.max(2)) - 128
}

/// Splits 16kHz PCM16 into (low-band, high-band) QMF sub-signals. A
/// 24-sample history buffer slides one sample at a time across the whole
/// input, oldest first; each pair of input samples shifted in produces one
/// decimated (low, high) output, the taps applied to 24 genuinely distinct
/// samples of history rather than the same pair reread 12 times.
fn qmf_split(pcm: &[i16]) -> (Vec<i32>, Vec<i32>) {
    let mut history = vec![0i64; QMF_TAPS.len()];
    let mut low = Vec::with_capacity(pcm.len() / 2);
    let mut high = Vec::with_capacity(pcm.len() / 2);

    for pair in pcm.chunks(2) {
        for &sample in pair {
            history.rotate_left(1);
            *history.last_mut().unwrap() = sample as i64;
        }

        let mut acc_low = 0i64;
        let mut acc_high = 0i64;
        for (i, &tap) in QMF_TAPS.iter().enumerate() {
            if i % 2 == 0 {
                acc_low += history[i] * tap as i64;
            } else {
                acc_high += history[i] * tap as i64;
            }
        }
        low.push((acc_low / 4096) as i32);
        high.push((acc_high / 4096) as i32);
    }

    (low, high)
}

fn qmf_merge(low: i32, high: i32) -> (i16, i16) {
    let sum = (low + high).clamp(i16::MIN as i32, i16::MAX as i32);
    let diff = (low - high).clamp(i16::MIN as i32, i16::MAX as i32);
    (sum as i16, diff as i16)
}

/// Encodes 16kHz PCM16 to G.722 bytes: one byte per input sample pair.
pub fn encode(pcm16: &[i16]) -> Vec<u8> {
    let (low, high) = qmf_split(pcm16);
    let mut low_state = AdpcmState::new(32);
    let mut high_state = AdpcmState::new(8);
    let mut out = Vec::with_capacity(low.len());

    for (&l, &h) in low.iter().zip(high.iter()) {
        let low_code = low_state.quantize(l, 64) & 0x3F;
        let high_code = high_state.quantize(h, 4) & 0x03;
        out.push(((low_code as u8) << 2) | (high_code as u8));
    }

    out
}

/// Decodes G.722 bytes back to 16kHz PCM16.
pub fn decode(payload: &[u8]) -> Vec<i16> {
    let mut low_state = AdpcmState::new(32);
    let mut high_state = AdpcmState::new(8);
    let mut out = Vec::with_capacity(payload.len() * 2);

    for &byte in payload {
        let low_code = ((byte >> 2) & 0x3F) as i32;
        let high_code = (byte & 0x03) as i32;

        let low = low_state.dequantize(sign_extend(low_code, 6), 64);
        let high = high_state.dequantize(sign_extend(high_code, 2), 4);

        let (a, b) = qmf_merge(low, high);
        out.push(a);
        out.push(b);
    }

    out
}

fn sign_extend(value: i32, bits: u32) -> i32 {
    let shift = 32 - bits;
    (value << shift) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_produces_one_byte_per_sample_pair() {
        let pcm = vec![0i16; 320];
        let encoded = encode(&pcm);
        assert_eq!(encoded.len(), pcm.len() / 2);
    }

    #[test]
    fn decode_produces_two_samples_per_byte() {
        let pcm = vec![0i16; 320];
        let encoded = encode(&pcm);
        let decoded = decode(&encoded);
        assert_eq!(decoded.len(), encoded.len() * 2);
    }

    #[test]
    fn silence_round_trips_near_silence() {
        let pcm = vec![0i16; 64];
        let encoded = encode(&pcm);
        let decoded = decode(&encoded);
        for &s in &decoded {
            assert!(s.abs() < 2000, "unexpected energy in decoded silence: {s}");
        }
    }
}
