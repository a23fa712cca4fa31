//! C5 — Audio adapter.
//!
//! Two bounded FIFOs (uplink, downlink) of fixed 20ms PCM16 frames, plus a
//! residual-byte accumulator on the downlink side for the AI's variable-size
//! chunks. Grounded on the driver's `VecDeque`-backed playout buffer
//! (`driver/tasks/udp_rx/playout_buffer.rs`), generalized from RTP-sequenced
//! slots to a plain drop-oldest FIFO since this adapter has no reordering
//! to do — the AI's chunks already arrive in order on one WebSocket.

use crate::codec::{self, CodecKind};
use std::collections::VecDeque;

/// Fixed-capacity FIFO with drop-oldest overflow, used for both the
/// uplink (~100 frames / 2s) and downlink (~200 frames / 4s).
#[derive(Debug)]
pub struct BoundedStream<T> {
    items: VecDeque<T>,
    capacity: usize,
    dropped: u64,
}

impl<T> BoundedStream<T> {
    /// Builds an empty stream holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Self { items: VecDeque::with_capacity(capacity), capacity, dropped: 0 }
    }

    /// Pushes one item, dropping the oldest queued item if already full.
    pub fn push(&mut self, item: T) {
        if self.items.len() >= self.capacity {
            self.items.pop_front();
            self.dropped += 1;
        }
        self.items.push_back(item);
    }

    /// Pops the oldest item, if any.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the stream is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total number of items dropped to overflow over this stream's life.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    /// Drains every queued item, discarding it.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// One 20ms PCM16 mono frame at a fixed byte length, immutable once built.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AudioFrame {
    bytes: Vec<u8>,
}

impl AudioFrame {
    /// Wraps `bytes` as a frame; callers are expected to have already
    /// sized it to the stream's configured frame length.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Borrows the frame's bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the frame, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Downlink-side adapter: accepts the AI's variable-size audio chunks and
/// emits fixed `frame_len`-byte [`AudioFrame`]s, carrying a residual tail
/// across calls to [`FrameAccumulator::feed`].
#[derive(Debug)]
pub struct FrameAccumulator {
    frame_len: usize,
    residual: Vec<u8>,
}

impl FrameAccumulator {
    /// Builds an accumulator emitting frames of exactly `frame_len` bytes
    /// (320 for 8kHz G.711 passthrough, 960 for 24kHz PCM16).
    pub fn new(frame_len: usize) -> Self {
        Self { frame_len, residual: Vec::with_capacity(frame_len) }
    }

    /// Feeds one chunk, returning every complete frame it produced. The
    /// incomplete tail, if any, is kept for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<AudioFrame> {
        self.residual.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while self.residual.len() >= self.frame_len {
            let tail = self.residual.split_off(self.frame_len);
            let frame = std::mem::replace(&mut self.residual, tail);
            frames.push(AudioFrame::new(frame));
        }
        frames
    }

    /// Flushes any partial tail, padded with silence to a full frame.
    /// Called once when the downlink closes; returns `None` if there was
    /// no partial tail to flush.
    pub fn flush(&mut self, silence_byte: u8) -> Option<AudioFrame> {
        if self.residual.is_empty() {
            return None;
        }
        let mut tail = std::mem::take(&mut self.residual);
        tail.resize(self.frame_len, silence_byte);
        Some(AudioFrame::new(tail))
    }

    /// Discards any partial tail without emitting it. Called on barge-in,
    /// where the caller has interrupted and whatever the AI was mid-way
    /// through sending is no longer wanted.
    pub fn reset(&mut self) {
        self.residual.clear();
    }
}

/// Ramps the first [`crate::constants::FADE_IN_SAMPLES`] samples of a new
/// AI response from silence to full gain. Armed by the controller's
/// one-shot `response_audio_pending` flag on `response.created` and
/// consumed frame-by-frame across however many downlink frames it takes to
/// exhaust the ramp, so a response split across frame boundaries still
/// fades smoothly rather than clicking in at full volume on frame two.
pub struct FadeIn {
    remaining: usize,
}

impl FadeIn {
    /// Builds an unarmed fade, a no-op until [`FadeIn::arm`] is called.
    pub fn new() -> Self {
        Self { remaining: 0 }
    }

    /// (Re-)arms the ramp for the next `FADE_IN_SAMPLES` samples.
    pub fn arm(&mut self) {
        self.remaining = crate::constants::FADE_IN_SAMPLES;
    }

    /// True while the ramp still has samples left to apply.
    pub fn is_active(&self) -> bool {
        self.remaining > 0
    }

    /// Applies whatever's left of the ramp to this frame's leading
    /// samples. Decodes/re-encodes through `codec` when `g711_direct`
    /// bytes are the codec's own wire format; otherwise treats `bytes` as
    /// little-endian PCM16.
    pub fn apply(&mut self, bytes: Vec<u8>, codec: CodecKind, g711_direct: bool) -> Vec<u8> {
        if self.remaining == 0 {
            return bytes;
        }

        let mut pcm = if g711_direct {
            match codec.decode(&bytes, 1) {
                Ok(pcm) => pcm,
                Err(_) => return bytes,
            }
        } else {
            codec::bytes_to_pcm16(&bytes)
        };

        let total = crate::constants::FADE_IN_SAMPLES;
        let start_pos = total - self.remaining;
        let ramp_len = self.remaining.min(pcm.len());
        for (i, sample) in pcm.iter_mut().take(ramp_len).enumerate() {
            let gain = ((start_pos + i + 1) as f32 / total as f32).min(1.0);
            *sample = (*sample as f32 * gain) as i16;
        }
        self.remaining -= ramp_len;

        if g711_direct {
            codec.encode(&pcm).unwrap_or(bytes)
        } else {
            codec::pcm16_to_bytes(&pcm)
        }
    }
}

impl Default for FadeIn {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_stream_drops_oldest_on_overflow() {
        let mut s = BoundedStream::new(2);
        s.push(1);
        s.push(2);
        s.push(3);
        assert_eq!(s.len(), 2);
        assert_eq!(s.pop(), Some(2));
        assert_eq!(s.pop(), Some(3));
        assert_eq!(s.dropped_count(), 1);
    }

    #[test]
    fn clear_drains_everything() {
        let mut s: BoundedStream<u8> = BoundedStream::new(4);
        s.push(1);
        s.push(2);
        s.clear();
        assert!(s.is_empty());
    }

    #[test]
    fn accumulator_emits_frames_as_soon_as_full() {
        let mut acc = FrameAccumulator::new(4);
        let frames = acc.feed(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn chunking_is_invariant_to_how_input_is_split() {
        let whole: Vec<u8> = (0..40u8).collect();

        let mut one_at_a_time = FrameAccumulator::new(4);
        let mut frames_a = Vec::new();
        for byte in &whole {
            frames_a.extend(one_at_a_time.feed(std::slice::from_ref(byte)));
        }

        let mut ten_at_a_time = FrameAccumulator::new(4);
        let mut frames_b = Vec::new();
        for chunk in whole.chunks(10) {
            frames_b.extend(ten_at_a_time.feed(chunk));
        }

        assert_eq!(frames_a, frames_b);
    }

    #[test]
    fn flush_pads_partial_tail_with_silence() {
        let mut acc = FrameAccumulator::new(4);
        let _ = acc.feed(&[9, 9]);
        let flushed = acc.flush(0xFF).unwrap();
        assert_eq!(flushed.as_bytes(), &[9, 9, 0xFF, 0xFF]);
        assert!(acc.flush(0xFF).is_none());
    }

    #[test]
    fn every_emitted_frame_has_the_configured_length() {
        let mut acc = FrameAccumulator::new(320);
        let chunk = vec![7u8; 1000];
        for frame in acc.feed(&chunk) {
            assert_eq!(frame.as_bytes().len(), 320);
        }
    }

    #[test]
    fn reset_discards_partial_tail() {
        let mut acc = FrameAccumulator::new(4);
        let _ = acc.feed(&[1, 2]);
        acc.reset();
        assert!(acc.flush(0xAA).is_none());
        let frames = acc.feed(&[3, 4, 5, 6]);
        assert_eq!(frames[0].as_bytes(), &[3, 4, 5, 6]);
    }

    #[test]
    fn fade_in_is_inactive_until_armed() {
        let mut fade = FadeIn::new();
        assert!(!fade.is_active());
        let pcm = codec::pcm16_to_bytes(&[8000i16; 480]);
        let out = fade.apply(pcm.clone(), CodecKind::Pcma, false);
        assert_eq!(out, pcm);
    }

    #[test]
    fn fade_in_ramps_first_samples_toward_silence_then_exhausts() {
        let mut fade = FadeIn::new();
        fade.arm();
        let pcm = codec::pcm16_to_bytes(&[8000i16; crate::constants::FADE_IN_SAMPLES]);
        let faded = fade.apply(pcm, CodecKind::Pcma, false);
        let samples = codec::bytes_to_pcm16(&faded);

        assert!(samples[0].abs() < samples[samples.len() - 1].abs());
        assert!(!fade.is_active());
    }

    #[test]
    fn fade_in_spans_multiple_frames() {
        let mut fade = FadeIn::new();
        fade.arm();
        let half = crate::constants::FADE_IN_SAMPLES / 2;
        let frame_one = codec::pcm16_to_bytes(&vec![8000i16; half]);
        let _ = fade.apply(frame_one, CodecKind::Pcma, false);
        assert!(fade.is_active());

        let frame_two = codec::pcm16_to_bytes(&vec![8000i16; half]);
        let _ = fade.apply(frame_two, CodecKind::Pcma, false);
        assert!(!fade.is_active());
    }
}
