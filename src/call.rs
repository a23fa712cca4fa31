//! C9 — Call handler.
//!
//! `Call` is a thin handle over a `flume::Sender<CoreMessage>`, exactly the
//! shape of songbird's `Driver`: public methods just construct a
//! `CoreMessage` variant and send it into a background `runner()` task that
//! owns the controller, the AI client, the pacer handle, and the media
//! session outright. Nothing outside `runner()` ever touches those fields
//! directly, which is what breaks the handler→controller→AI-client→handler
//! cycle.

use crate::adapter::{FadeIn, FrameAccumulator};
use crate::ai::{self, AiHandle};
use crate::codec::{self, CodecKind};
use crate::config::{AudioMode, Config};
use crate::controller::{self, Controller, ResponseContext};
use crate::decoder::DecoderPipeline;
use crate::error::Error;
use crate::id::CallId;
use crate::media::{self, SymmetricBinder};
use crate::notify::{Notifier, NotifierEvent, NotifierEventKind};
use crate::pacer::{self, PacerEvent, PacerHandle};
use crate::sdp::{self, SdpOffer};
use flume::Sender;
use rand::random;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tracing::{info, instrument, warn};

/// One in-flight conversation's immutable identity and negotiated media
/// parameters, built once on INVITE acceptance.
#[derive(Clone, Debug)]
pub struct CallRecord {
    pub call_id: CallId,
    pub caller: String,
    pub codec: CodecKind,
    pub clock_rate: u32,
    pub remote_media: SocketAddr,
    pub created_at: Instant,
}

/// SIP-side outcome of an INVITE attempt.
pub enum InviteOutcome {
    /// Call accepted; carries the freshly constructed handle.
    Accepted(Call),
    /// A call is already active; reject with 486 Busy Here.
    Busy,
    /// The offer could not be parsed or negotiated.
    Rejected(Error),
}

enum CoreMessage {
    Answer,
    Bye,
    BargeIn,
    RequestResponse { context: ResponseContext, wait_for_current: bool, max_wait_ms: u64 },
}

/// Thin, cloneable handle to a running call. Safe to hold past the point
/// the call ends; every method is a no-op once the background task has
/// exited.
#[derive(Clone)]
pub struct Call {
    tx: Sender<CoreMessage>,
    record: CallRecord,
    active: Arc<AtomicBool>,
}

impl Call {
    /// This call's immutable record.
    pub fn record(&self) -> &CallRecord {
        &self.record
    }

    /// Whether the call's background task is still running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Answers the call: this bridge always auto-answers once the media
    /// session is constructed, so in practice this just starts the AI
    /// session's initial-greeting request.
    pub fn answer(&self) {
        let _ = self.tx.send(CoreMessage::Answer);
    }

    /// Requests a context-scoped AI response, routed through the
    /// controller's gate.
    pub fn request_response(&self, context: ResponseContext, wait_for_current: bool, max_wait_ms: u64) {
        let _ = self.tx.send(CoreMessage::RequestResponse { context, wait_for_current, max_wait_ms });
    }

    /// Reports caller barge-in to the controller.
    pub fn report_barge_in(&self) {
        let _ = self.tx.send(CoreMessage::BargeIn);
    }

    /// Idempotent hang-up: safe to call more than once, from BYE receipt
    /// or an operator-initiated teardown.
    pub fn hangup(&self) {
        let _ = self.tx.send(CoreMessage::Bye);
    }
}

/// Tracks whether a call is currently active for this bridge instance, so
/// a second INVITE can be rejected with 486 Busy Here rather than
/// silently stomping the first call's media session.
#[derive(Clone, Default)]
pub struct CallSlot {
    occupied: Arc<AtomicBool>,
}

impl CallSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_occupy(&self) -> bool {
        self.occupied.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    fn release(&self) {
        self.occupied.store(false, Ordering::Release);
    }
}

/// Handles one inbound INVITE: parses the SDP offer, negotiates a codec,
/// and — if accepted — constructs the full media/AI/controller wiring and
/// spawns the call's background task.
///
/// SIP dialog mechanics (the actual INVITE/100/180/200/ACK message
/// exchange) are the caller's responsibility; this only decides whether to
/// accept and, if so, builds everything downstream of that decision.
#[instrument(skip(config, slot, sdp_body, notifier))]
pub async fn handle_invite(
    config: &Config,
    slot: &CallSlot,
    caller: String,
    sdp_body: &str,
    notifier: Arc<dyn Notifier>,
) -> InviteOutcome {
    if !slot.try_occupy() {
        return InviteOutcome::Busy;
    }

    match negotiate_and_build(config, slot.clone(), caller, sdp_body, notifier).await {
        Ok(call) => InviteOutcome::Accepted(call),
        Err(e) => {
            slot.release();
            InviteOutcome::Rejected(e)
        },
    }
}

/// Fires one lifecycle notification without blocking the caller on the
/// notifier's own I/O; failures are the notifier implementation's concern
/// to log (see [`crate::notify::HttpNotifier`]).
fn notify_async(notifier: Arc<dyn Notifier>, call_id: CallId, event_kind: NotifierEventKind) {
    let occurred_at_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
    tokio::spawn(async move {
        notifier.notify(NotifierEvent::new(&call_id, event_kind, occurred_at_ms)).await;
    });
}

async fn negotiate_and_build(
    config: &Config,
    slot: CallSlot,
    caller: String,
    sdp_body: &str,
    notifier: Arc<dyn Notifier>,
) -> Result<Call, Error> {
    let offer: SdpOffer = sdp::parse_offer(sdp_body)?;
    let negotiated = sdp::negotiate(&offer.codecs).ok_or(crate::error::SdpError::NoUsableCodec)?;

    let call_id = CallId::generate();
    notify_async(notifier.clone(), call_id.clone(), NotifierEventKind::Ringing);

    let record = CallRecord {
        call_id: call_id.clone(),
        caller,
        codec: negotiated.kind,
        clock_rate: negotiated.clock_rate,
        remote_media: offer.remote_media_addr(),
        created_at: Instant::now(),
    };

    let socket = Arc::new(UdpSocket::bind(("0.0.0.0", 0)).await.map_err(crate::error::NetworkError::Io)?);
    let binder = SymmetricBinder::new(record.remote_media);

    // G.711 passthrough forces direct mode regardless of the separate flag;
    // the two are independent knobs that both land on "skip decode/resample".
    let effective_g711_direct = config.audio.g711_direct || config.audio.mode == AudioMode::Passthrough;
    let simple_resample = config.audio.mode == AudioMode::SimpleResample;
    let prebuffer_frames =
        ((config.audio.jitter_buffer_ms as usize) / crate::constants::FRAME_LEN_MS).max(1);

    let (pacer_out_tx, pacer_out_rx) = flume::unbounded::<Vec<u8>>();
    let (pacer_events_tx, pacer_events_rx) = flume::unbounded::<PacerEvent>();
    let ssrc: u32 = random();
    let frame_samples = (negotiated.kind.rtp_clock_rate() / crate::constants::AUDIO_FRAME_RATE as u32).max(1);
    let silence = negotiated.kind.silence_frame(frame_samples as usize);
    let pacer_handle: PacerHandle = pacer::spawn(
        negotiated.kind.payload_type(),
        ssrc,
        frame_samples,
        silence,
        prebuffer_frames,
        pacer_out_tx,
        pacer_events_tx,
    );

    tokio::spawn(media::run_egress(socket.clone(), binder.clone(), pacer_out_rx));

    let (ai_events_tx, ai_events_rx) = flume::unbounded();
    let (downlink_tx, downlink_rx) = flume::unbounded::<ai::DownlinkChunk>();
    let ai_handle = ai::connect(&config.ai, &call_id, ai_events_tx, downlink_tx).await?;

    let (downlink_clear_tx, downlink_clear_rx) = flume::unbounded::<()>();
    let controller = controller::spawn(ai_handle.clone(), pacer_handle.clone(), downlink_clear_tx);

    let pipeline = DecoderPipeline::new(
        &offer.codecs,
        negotiated.kind,
        crate::constants::DEFAULT_AI_SAMPLE_RATE,
        effective_g711_direct,
        simple_resample,
    );

    // Downlink chunks arrive at whatever size the AI session's transport
    // happens to deliver; the accumulator below re-chunks them to exactly
    // this many bytes before anything reaches the pacer. In G.711-direct
    // mode the AI's bytes are the codec's own payload (1 byte/sample); in
    // the standard pipeline they're PCM16 at the decoder's output rate.
    let downlink_sample_rate = pipeline.output_sample_rate();
    let downlink_frame_samples = (downlink_sample_rate / crate::constants::AUDIO_FRAME_RATE as u32).max(1);
    let downlink_frame_len = if effective_g711_direct {
        downlink_frame_samples as usize
    } else {
        downlink_frame_samples as usize * 2
    };
    let downlink_silence_byte = if effective_g711_direct {
        negotiated.kind.silence_frame(1).first().copied().unwrap_or(0)
    } else {
        0
    };

    let (ingress_frames_tx, ingress_frames_rx) = flume::unbounded();
    let controller_for_ingress = controller.clone();
    tokio::spawn(media::run_ingress(
        socket.clone(),
        binder.clone(),
        pipeline,
        move || controller_for_ingress.snapshot().response_active,
        ingress_frames_tx,
    ));

    let (tx, rx) = flume::unbounded();

    tokio::spawn(forward_ai_events(ai_events_rx, controller.clone(), tx.clone()));
    if config.audio.mode == AudioMode::TestTone {
        tokio::spawn(drain_downlink(downlink_rx, downlink_clear_rx));
        tokio::spawn(run_test_tone(
            pacer_handle.clone(),
            downlink_frame_samples as usize,
            downlink_sample_rate,
            negotiated.kind,
            effective_g711_direct,
            ai_handle.clone(),
        ));
    } else {
        tokio::spawn(forward_downlink_to_pacer(
            downlink_rx,
            downlink_clear_rx,
            pacer_handle.clone(),
            FrameAccumulator::new(downlink_frame_len),
            downlink_silence_byte,
            controller.clone(),
            negotiated.kind,
            effective_g711_direct,
        ));
    }
    tokio::spawn(forward_ingress_to_ai(ingress_frames_rx, controller.clone(), ai_handle.clone()));
    tokio::spawn(log_pacer_underruns(pacer_events_rx, call_id.clone()));

    let active = Arc::new(AtomicBool::new(true));

    tokio::spawn(runner(rx, controller, ai_handle, pacer_handle, active.clone(), notifier, call_id.clone(), slot));

    info!(call_id = call_id.as_str(), codec = ?record.codec, "call accepted");
    Ok(Call { tx, record, active })
}

/// Forwards every parsed AI event to the controller. When this channel
/// closes — the AI receive pump exited, whether on a clean socket close or
/// a transport error — that's a media-session-fatal condition (§7
/// category 4): tell the runner to hang up so the slot, pacer, and socket
/// all get released instead of leaking past a dead AI session.
async fn forward_ai_events(
    rx: flume::Receiver<crate::ai::events::ServerEvent>,
    controller: Controller,
    core_tx: Sender<CoreMessage>,
) {
    while let Ok(event) = rx.recv_async().await {
        controller.on_ai_event(event);
    }
    let _ = core_tx.send(CoreMessage::Bye);
}

/// Re-chunks the AI's arbitrary-size downlink bytes to the adapter's fixed
/// frame length before handing anything to the pacer, and drains the
/// accumulator's carried remainder on barge-in so a caller interruption
/// doesn't leave stale audio to resume from once the gate reopens. Arms a
/// fade-in ramp on every snapshot where the controller's one-shot
/// `response_audio_pending` flag is set, so a new response never starts at
/// full gain.
#[allow(clippy::too_many_arguments)]
async fn forward_downlink_to_pacer(
    rx: flume::Receiver<ai::DownlinkChunk>,
    downlink_clear: flume::Receiver<()>,
    pacer: PacerHandle,
    mut accumulator: FrameAccumulator,
    silence_byte: u8,
    controller: Controller,
    codec: CodecKind,
    g711_direct: bool,
) {
    let mut fade = FadeIn::new();

    loop {
        tokio::select! {
            chunk = rx.recv_async() => {
                match chunk {
                    Ok(chunk) => {
                        if controller.snapshot().response_audio_pending {
                            fade.arm();
                        }
                        for frame in accumulator.feed(&chunk.0) {
                            let bytes = frame.into_bytes();
                            let bytes = if fade.is_active() {
                                fade.apply(bytes, codec, g711_direct)
                            } else {
                                bytes
                            };
                            pacer.push_frame(bytes);
                        }
                    },
                    Err(_) => break,
                }
            },
            cleared = downlink_clear.recv_async() => {
                if cleared.is_err() {
                    break;
                }
                accumulator.reset();
            },
        }
    }

    if let Some(frame) = accumulator.flush(silence_byte) {
        pacer.push_frame(frame.into_bytes());
    }
}

/// `audio.mode = test-tone`: emits a fixed sine wave on the egress pacer in
/// place of AI audio, for wiring checks that don't need a live model. Runs
/// at the same 20ms cadence as the pacer's own deadline schedule and stops
/// as soon as the AI session disconnects.
async fn run_test_tone(
    pacer: PacerHandle,
    frame_samples: usize,
    sample_rate: u32,
    codec: CodecKind,
    g711_direct: bool,
    ai: AiHandle,
) {
    const AMPLITUDE: f64 = 8000.0;

    let phase_step = 2.0 * std::f64::consts::PI * crate::constants::TEST_TONE_HZ / sample_rate as f64;
    let mut phase = 0.0f64;
    let mut ticker = tokio::time::interval(crate::constants::TIMESTEP_LENGTH);

    while ai.is_connected() {
        ticker.tick().await;

        let pcm: Vec<i16> = (0..frame_samples)
            .map(|_| {
                let sample = (phase.sin() * AMPLITUDE) as i16;
                phase += phase_step;
                sample
            })
            .collect();

        let bytes = if g711_direct {
            match codec.encode(&pcm) {
                Ok(bytes) => bytes,
                Err(_) => continue,
            }
        } else {
            codec::pcm16_to_bytes(&pcm)
        };
        pacer.push_frame(bytes);
    }
}

/// Discards downlink audio without forwarding it, for `audio.mode =
/// test-tone` where the AI's audio is generated but never played out.
/// Still has to drain the channel — an unbounded sender with nothing
/// reading it would grow without bound for the life of the call.
async fn drain_downlink(rx: flume::Receiver<ai::DownlinkChunk>, downlink_clear: flume::Receiver<()>) {
    loop {
        tokio::select! {
            chunk = rx.recv_async() => {
                if chunk.is_err() {
                    break;
                }
            },
            cleared = downlink_clear.recv_async() => {
                if cleared.is_err() {
                    break;
                }
            },
        }
    }
}

/// Forwards every decoded caller frame's PCM16 to the AI session's uplink
/// and surfaces barge-in to the controller. The uplink forward happens
/// unconditionally — barge-in detection is C2's concern, not a reason to
/// withhold audio the AI needs to keep transcribing.
async fn forward_ingress_to_ai(rx: flume::Receiver<media::IngressFrame>, controller: Controller, ai: AiHandle) {
    while let Ok(frame) = rx.recv_async().await {
        ai.append_audio(&frame.pcm16_bytes);
        if frame.barge_in {
            controller.on_barge_in();
        }
    }
}

async fn log_pacer_underruns(rx: flume::Receiver<PacerEvent>, call_id: CallId) {
    while let Ok(PacerEvent::QueueEmpty) = rx.recv_async().await {
        warn!(call_id = call_id.as_str(), "pacer underrun");
    }
}

/// The call's background task: owns nothing but the shutdown sequence and
/// forwards lifecycle requests to the controller/AI handle it was given.
#[allow(clippy::too_many_arguments)]
async fn runner(
    rx: flume::Receiver<CoreMessage>,
    controller: Controller,
    ai: AiHandle,
    pacer: PacerHandle,
    active: Arc<AtomicBool>,
    notifier: Arc<dyn Notifier>,
    call_id: CallId,
    slot: CallSlot,
) {
    while let Ok(msg) = rx.recv_async().await {
        match msg {
            CoreMessage::Answer => {
                controller.queue_response_create(ResponseContext::InitialGreeting, false, 0);
                notify_async(notifier.clone(), call_id.clone(), NotifierEventKind::Answered);
            },
            CoreMessage::RequestResponse { context, wait_for_current, max_wait_ms } => {
                controller.queue_response_create(context, wait_for_current, max_wait_ms);
            },
            CoreMessage::BargeIn => controller.on_barge_in(),
            CoreMessage::Bye => {
                shutdown(&controller, &ai, &pacer, &notifier, &call_id).await;
                active.store(false, Ordering::Release);
                slot.release();
                return;
            },
        }
    }
    // Channel closed without an explicit Bye (e.g. every `Call` handle was
    // dropped, or the AI session died and nothing is left to drive further
    // messages through); run the same idempotent teardown regardless.
    shutdown(&controller, &ai, &pacer, &notifier, &call_id).await;
    active.store(false, Ordering::Release);
    slot.release();
}

/// Idempotent teardown: stop the controller, stop the pacer, disconnect
/// the AI session, in that order. Safe to invoke more than once — every
/// step it calls is itself idempotent.
async fn shutdown(
    controller: &Controller,
    ai: &AiHandle,
    pacer: &PacerHandle,
    notifier: &Arc<dyn Notifier>,
    call_id: &CallId,
) {
    controller.call_ended();
    pacer.shutdown();
    ai.disconnect();
    notify_async(notifier.clone(), call_id.clone(), NotifierEventKind::Ended);
    tokio::time::sleep(crate::constants::WS_CLOSE_BUDGET).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_slot_rejects_second_occupant() {
        let slot = CallSlot::new();
        assert!(slot.try_occupy());
        assert!(!slot.try_occupy());
        slot.release();
        assert!(slot.try_occupy());
    }
}
