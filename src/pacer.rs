//! C3 — RTP egress pacer.
//!
//! A dedicated high-priority `std::thread`, not a tokio task — grounded on
//! the driver's own mixer thread (`driver/tasks/mixer.rs`), which runs its
//! `cycle()`/`march_deadline()` timing loop on `std::thread::spawn` rather
//! than inside the cooperative runtime, for the same reason this pacer
//! does: packet pacing must not be at the mercy of whatever else the
//! runtime's executor happens to be polling. Finished packets cross back
//! into async land over a `flume` channel to a small UDP-send task,
//! exactly as the mixer thread hands packets to `driver/tasks/udp_tx.rs`.

use crate::constants::{
    PACER_BUSY_WAIT_FLOOR, PACER_DRIFT_RESET_THRESHOLD, PACER_SLEEP_CEILING, PACER_SLEEP_MARGIN,
    TIMESTEP_LENGTH,
};
use crate::rtp::RtpHeader;
use flume::{Receiver, Sender, TryRecvError};
use rand::random;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, trace};

/// Messages the pacer thread accepts from the rest of the call.
enum PacerMessage {
    /// One already-encoded payload ready to go out as the next frame.
    Frame(Vec<u8>),
    /// Barge-in / AI-interrupt: drop everything queued, re-enter buffering.
    Clear,
    /// Stop the thread. Idempotent — a second `shutdown()` is a no-op.
    Shutdown,
}

/// Observable pacer events surfaced to the call handler/controller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PacerEvent {
    /// Fired once on the first underrun of a streak (not on every silence
    /// frame emitted while already buffering).
    QueueEmpty,
}

/// Thin, cloneable handle to a running pacer thread.
#[derive(Clone)]
pub struct PacerHandle {
    tx: Sender<PacerMessage>,
}

impl PacerHandle {
    /// Enqueues one frame for playout. Subject to drop-oldest overflow
    /// inside the thread's own bounded queue.
    pub fn push_frame(&self, payload: Vec<u8>) {
        let _ = self.tx.send(PacerMessage::Frame(payload));
    }

    /// Drains the queue and re-enters the jitter pre-buffer state.
    pub fn clear(&self) {
        let _ = self.tx.send(PacerMessage::Clear);
    }

    /// Stops the pacer thread. Safe to call more than once.
    pub fn shutdown(&self) {
        let _ = self.tx.send(PacerMessage::Shutdown);
    }
}

/// Mutated only by the pacer thread itself, the sole writer
/// invariant for `RtpEgressState`.
struct RtpEgressState {
    next_timestamp: u32,
    frames_sent: u64,
    silence_frames: u64,
    dropped_frames: u64,
    is_buffering: bool,
    cached_silence: Vec<u8>,
}

/// Starts the pacer thread for one call and returns a handle plus a
/// receiver of the UDP frames it produces (payload_type, RTP packet bytes)
/// for a sibling async send task, and a receiver of [`PacerEvent`]s.
/// `prebuffer_frames` is the jitter pre-buffer depth (`audio.jitter_buffer_ms`
/// translated to a frame count) withheld before playout starts or resumes.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(payload_type, frame_samples, prebuffer_frames))]
pub fn spawn(
    payload_type: u8,
    ssrc: u32,
    frame_samples: u32,
    silence_frame: Vec<u8>,
    prebuffer_frames: usize,
    out_tx: Sender<Vec<u8>>,
    events_tx: Sender<PacerEvent>,
) -> PacerHandle {
    let (tx, rx) = flume::bounded::<PacerMessage>(256);

    std::thread::spawn(move || {
        run(payload_type, ssrc, frame_samples, silence_frame, prebuffer_frames, rx, out_tx, events_tx);
    });

    PacerHandle { tx }
}

#[allow(clippy::too_many_arguments)]
fn run(
    payload_type: u8,
    ssrc: u32,
    frame_samples: u32,
    silence_frame: Vec<u8>,
    prebuffer_frames: usize,
    rx: Receiver<PacerMessage>,
    out_tx: Sender<Vec<u8>>,
    events_tx: Sender<PacerEvent>,
) {
    let mut state = RtpEgressState {
        next_timestamp: random::<u32>(),
        frames_sent: 0,
        silence_frames: 0,
        dropped_frames: 0,
        is_buffering: true,
        cached_silence: silence_frame,
    };

    let mut queue: std::collections::VecDeque<Vec<u8>> = std::collections::VecDeque::new();
    let mut sequence: u16 = random();
    let mut underrun_streak = false;

    let mut next_frame_time = Instant::now();

    loop {
        // Wait for the next deadline using the three-tier schedule.
        loop {
            let now = Instant::now();
            if now >= next_frame_time {
                break;
            }
            let wait = next_frame_time - now;
            if wait > PACER_SLEEP_CEILING {
                std::thread::sleep(wait - PACER_SLEEP_MARGIN);
            } else if wait > PACER_BUSY_WAIT_FLOOR {
                std::hint::spin_loop();
            } else {
                break;
            }
        }

        // Drift correction: a huge overrun is a stall, not a burst to
        // catch up on.
        let now = Instant::now();
        if now.saturating_duration_since(next_frame_time) > PACER_DRIFT_RESET_THRESHOLD {
            next_frame_time = now + TIMESTEP_LENGTH;
        }

        // Drain control/frame messages without blocking this tick.
        let mut shutdown = false;
        loop {
            match rx.try_recv() {
                Ok(PacerMessage::Frame(payload)) => {
                    const MAX_QUEUE: usize = 200;
                    if queue.len() >= MAX_QUEUE {
                        queue.pop_front();
                        state.dropped_frames += 1;
                    }
                    queue.push_back(payload);
                },
                Ok(PacerMessage::Clear) => {
                    queue.clear();
                    state.is_buffering = true;
                    underrun_streak = false;
                },
                Ok(PacerMessage::Shutdown) => {
                    shutdown = true;
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    shutdown = true;
                    break;
                },
            }
        }
        if shutdown {
            break;
        }

        if state.is_buffering && queue.len() >= prebuffer_frames {
            state.is_buffering = false;
        }

        let payload: Vec<u8> = if state.is_buffering {
            state.silence_frames += 1;
            state.cached_silence.clone()
        } else {
            match queue.pop_front() {
                Some(frame) => {
                    underrun_streak = false;
                    state.frames_sent += 1;
                    frame
                },
                None => {
                    if !underrun_streak {
                        underrun_streak = true;
                        let _ = events_tx.send(PacerEvent::QueueEmpty);
                    }
                    state.is_buffering = true;
                    state.silence_frames += 1;
                    state.cached_silence.clone()
                },
            }
        };

        let header = RtpHeader {
            marker: false,
            payload_type,
            sequence,
            timestamp: state.next_timestamp,
            ssrc,
        };
        sequence = sequence.wrapping_add(1);
        state.next_timestamp = state.next_timestamp.wrapping_add(frame_samples);

        let packet = header.pack(&payload);
        if out_tx.send(packet).is_err() {
            break;
        }

        next_frame_time += TIMESTEP_LENGTH;
    }

    debug!(
        frames_sent = state.frames_sent,
        silence_frames = state.silence_frames,
        dropped_frames = state.dropped_frames,
        "pacer thread stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::JITTER_PREBUFFER_FRAMES;
    use std::time::Duration as StdDuration;

    #[test]
    fn clear_then_silent_ticks_emit_only_silence() {
        let (out_tx, out_rx) = flume::unbounded();
        let (events_tx, _events_rx) = flume::unbounded();
        let silence = vec![0xFFu8; 160];

        let handle = spawn(0, 1, 160, silence.clone(), JITTER_PREBUFFER_FRAMES, out_tx, events_tx);
        handle.clear();

        std::thread::sleep(StdDuration::from_millis(120));
        handle.shutdown();

        let mut saw_any = false;
        while let Ok(packet) = out_rx.try_recv() {
            saw_any = true;
            let (_, header_len) = RtpHeader::unpack(&packet).unwrap();
            assert_eq!(&packet[header_len..], &silence[..]);
        }
        assert!(saw_any, "expected at least one silence frame to have been emitted");
    }

    #[test]
    fn pushed_frames_eventually_play_once_prebuffered() {
        let (out_tx, out_rx) = flume::unbounded();
        let (events_tx, _events_rx) = flume::unbounded();
        let silence = vec![0xFFu8; 160];

        let handle = spawn(0, 1, 160, silence, JITTER_PREBUFFER_FRAMES, out_tx, events_tx);
        for _ in 0..JITTER_PREBUFFER_FRAMES + 2 {
            handle.push_frame(vec![0x10u8; 160]);
        }

        std::thread::sleep(StdDuration::from_millis(200));
        handle.shutdown();

        let mut saw_audio = false;
        while let Ok(packet) = out_rx.try_recv() {
            let (_, header_len) = RtpHeader::unpack(&packet).unwrap();
            if packet[header_len..] == [0x10u8; 160][..] {
                saw_audio = true;
            }
        }
        assert!(saw_audio, "expected a pushed audio frame to have played out");
    }

    #[test]
    fn emitted_packets_always_have_marker_bit_zero() {
        let (out_tx, out_rx) = flume::unbounded();
        let (events_tx, _events_rx) = flume::unbounded();
        let silence = vec![0xFFu8; 160];

        let handle = spawn(8, 1, 160, silence, JITTER_PREBUFFER_FRAMES, out_tx, events_tx);
        std::thread::sleep(StdDuration::from_millis(60));
        handle.shutdown();

        while let Ok(packet) = out_rx.try_recv() {
            let (header, _) = RtpHeader::unpack(&packet).unwrap();
            assert!(!header.marker);
        }
    }
}
