//! C8 — Turn/lifecycle controller.
//!
//! The hardest subsystem, so it gets the strictest ownership rule in the
//! crate: a single background task owns every field of [`AiLifecycle`]
//! exclusively, exactly the way songbird's `Driver` core owns the call
//! state behind its own mailbox (`driver/core.rs`). [`Controller`] is a
//! thin handle over a `flume::Sender<ControllerMessage>` — nothing outside
//! this module can set `response-active` or emit `response.create`
//! directly, which is what makes the controller the sole permitted
//! emitter in practice, not just by convention.

use crate::ai::AiHandle;
use crate::ai::events::ServerEvent;
use crate::constants::{ECHO_GUARD_INTERVAL, GATE_POST_SPEECH_QUIET, TRANSCRIPT_WATCHDOG};
use crate::error::LifecycleError;
use crate::pacer::PacerHandle;
use flume::{Receiver, Sender};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// The independent fields of the AI lifecycle, set only from the named
/// transitions — never assigned from any other call site.
#[derive(Clone, Copy, Debug)]
struct AiLifecycle {
    response_active: bool,
    response_queued: bool,
    transcript_pending: bool,
    call_ended: bool,
    last_user_speech_at: Option<Instant>,
    last_ai_finished_at: Option<Instant>,
    /// One-shot: true for the single published snapshot right after
    /// `response.created`, so the downlink forwarder can fade in the start
    /// of the new response. Reset at the top of the next message handled.
    response_audio_pending: bool,
}

impl Default for AiLifecycle {
    fn default() -> Self {
        Self {
            response_active: false,
            response_queued: false,
            transcript_pending: false,
            call_ended: false,
            last_user_speech_at: None,
            last_ai_finished_at: None,
            response_audio_pending: false,
        }
    }
}

/// The turn-taking state machine's named states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TurnState {
    Idle,
    Listening,
    AwaitingStt,
    ReadyToReply,
    Requesting,
    Speaking,
    Terminal,
}

/// An immutable snapshot of observable controller state. The only way
/// anything outside the controller task learns lifecycle state — there is
/// no mutable shared field to reach into.
#[derive(Clone, Copy, Debug)]
pub struct ControllerSnapshot {
    pub state: TurnState,
    pub response_active: bool,
    pub response_queued: bool,
    pub transcript_pending: bool,
    pub call_ended: bool,
    /// True for one snapshot right after `response.created`: the downlink
    /// forwarder reads this to fade in the first samples of the new
    /// response instead of starting it at full gain.
    pub response_audio_pending: bool,
}

/// Context a `response.create` request was raised for, each with its own
/// SIP-safe lead-in delay. Only `InitialGreeting` may bypass the gate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResponseContext {
    DataSync,
    Quote,
    Confirmation,
    LateFlush,
    InitialGreeting,
}

impl ResponseContext {
    fn delay(self) -> Duration {
        match self {
            ResponseContext::DataSync => crate::constants::DELAY_DATA_SYNC,
            ResponseContext::Quote => crate::constants::DELAY_QUOTE,
            ResponseContext::Confirmation => crate::constants::DELAY_CONFIRMATION,
            ResponseContext::LateFlush => crate::constants::DELAY_LATE_FLUSH,
            ResponseContext::InitialGreeting => crate::constants::DELAY_INITIAL_GREETING,
        }
    }

    fn bypasses_gate(self) -> bool {
        matches!(self, ResponseContext::InitialGreeting)
    }
}

enum ControllerMessage {
    AiEvent(ServerEvent),
    BargeIn,
    QueueResponseCreate { context: ResponseContext, wait_for_current: bool, max_wait_ms: u64 },
    CallEnded,
}

/// Thin, cloneable handle to a running controller task.
#[derive(Clone)]
pub struct Controller {
    tx: Sender<ControllerMessage>,
    snapshot: Arc<RwLock<ControllerSnapshot>>,
}

impl Controller {
    /// Feeds one parsed AI server event into the state machine.
    pub fn on_ai_event(&self, event: ServerEvent) {
        let _ = self.tx.send(ControllerMessage::AiEvent(event));
    }

    /// Reports caller barge-in, as detected by C2 while a response is
    /// active.
    pub fn on_barge_in(&self) {
        let _ = self.tx.send(ControllerMessage::BargeIn);
    }

    /// Requests a `response.create`, subject to the gate, echo guard, and
    /// context-dependent lead-in delay. Fire-and-forget: the controller
    /// decides whether and when this actually reaches the AI session.
    pub fn queue_response_create(&self, context: ResponseContext, wait_for_current: bool, max_wait_ms: u64) {
        let _ = self.tx.send(ControllerMessage::QueueResponseCreate { context, wait_for_current, max_wait_ms });
    }

    /// Marks the call ended, e.g. on a fatal WebSocket error or BYE.
    pub fn call_ended(&self) {
        let _ = self.tx.send(ControllerMessage::CallEnded);
    }

    /// The latest published snapshot. Lock-free from the caller's point of
    /// view: this reads a `parking_lot::RwLock` the controller task
    /// refreshes after every transition, never blocking on the mailbox.
    pub fn snapshot(&self) -> ControllerSnapshot {
        *self.snapshot.read()
    }
}

/// Spawns the controller task for one call and returns a handle to it.
#[instrument(skip_all)]
pub fn spawn(ai: AiHandle, pacer: PacerHandle, downlink_clear: Sender<()>) -> Controller {
    let (tx, rx) = flume::unbounded();
    let snapshot = Arc::new(RwLock::new(ControllerSnapshot {
        state: TurnState::Idle,
        response_active: false,
        response_queued: false,
        transcript_pending: false,
        call_ended: false,
        response_audio_pending: false,
    }));

    let task_snapshot = snapshot.clone();
    tokio::spawn(run(rx, ai, pacer, downlink_clear, task_snapshot));

    Controller { tx, snapshot }
}

fn publish(snapshot: &Arc<RwLock<ControllerSnapshot>>, state: TurnState, lifecycle: &AiLifecycle) {
    *snapshot.write() = ControllerSnapshot {
        state,
        response_active: lifecycle.response_active,
        response_queued: lifecycle.response_queued,
        transcript_pending: lifecycle.transcript_pending,
        call_ended: lifecycle.call_ended,
        response_audio_pending: lifecycle.response_audio_pending,
    };
}

/// True iff every gate condition holds. Checked fresh at every call site
/// that might open a response — never cached across an await point.
/// `connected` is the AI socket's live state: a response can never be
/// queued against a session that has already gone away.
fn gate_open(lifecycle: &AiLifecycle, now: Instant, connected: bool) -> bool {
    if !connected
        || lifecycle.response_active
        || lifecycle.response_queued
        || lifecycle.transcript_pending
        || lifecycle.call_ended
    {
        return false;
    }
    match lifecycle.last_user_speech_at {
        Some(at) => now.saturating_duration_since(at) > GATE_POST_SPEECH_QUIET,
        None => true,
    }
}

/// Even with the gate open, a response finished too recently risks
/// capturing its own tail audio as caller speech.
fn echo_guard_holds(lifecycle: &AiLifecycle, now: Instant) -> bool {
    match lifecycle.last_ai_finished_at {
        Some(at) => now.saturating_duration_since(at) < ECHO_GUARD_INTERVAL,
        None => false,
    }
}

async fn run(
    rx: Receiver<ControllerMessage>,
    ai: AiHandle,
    pacer: PacerHandle,
    downlink_clear: Sender<()>,
    snapshot: Arc<RwLock<ControllerSnapshot>>,
) {
    let mut lifecycle = AiLifecycle::default();
    let mut state = TurnState::Idle;
    let mut watchdog_deadline: Option<Instant> = None;

    loop {
        let recv = rx.recv_async();
        tokio::pin!(recv);

        let timeout = watchdog_deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_secs(3600));

        let msg = tokio::select! {
            msg = &mut recv => match msg {
                Ok(msg) => msg,
                Err(_) => break,
            },
            _ = tokio::time::sleep(timeout), if watchdog_deadline.is_some() => {
                warn!("transcription watchdog fired, releasing transcript-pending");
                lifecycle.transcript_pending = false;
                watchdog_deadline = None;
                state = TurnState::ReadyToReply;
                publish(&snapshot, state, &lifecycle);
                continue;
            },
        };

        // One-shot: a flag published true by the previous iteration has
        // already had its one chance to be observed, so clear it before
        // handling whatever arrived next (which may set it true again).
        if lifecycle.response_audio_pending {
            lifecycle.response_audio_pending = false;
        }

        match msg {
            ControllerMessage::AiEvent(event) => {
                handle_ai_event(event, &mut lifecycle, &mut state, &mut watchdog_deadline, &ai, &downlink_clear);
            },
            ControllerMessage::BargeIn => {
                if lifecycle.response_active {
                    info!("barge-in during active response, cancelling");
                    ai.response_cancel();
                    pacer.clear();
                    let _ = downlink_clear.send(());
                    state = TurnState::Listening;
                }
            },
            ControllerMessage::QueueResponseCreate { context, wait_for_current, max_wait_ms } => {
                if wait_for_current && lifecycle.response_active {
                    let ended = await_response_done(
                        &rx,
                        &mut lifecycle,
                        &mut state,
                        &mut watchdog_deadline,
                        &ai,
                        &pacer,
                        &downlink_clear,
                        Duration::from_millis(max_wait_ms),
                    )
                    .await;
                    publish(&snapshot, state, &lifecycle);
                    if ended {
                        break;
                    }
                }

                let now = Instant::now();
                if !context.bypasses_gate() {
                    if !gate_open(&lifecycle, now, ai.is_connected()) || echo_guard_holds(&lifecycle, now) {
                        debug!(error = %LifecycleError::GateRefused, ?context, "response-create request refused by gate");
                        continue;
                    }
                }

                tokio::time::sleep(context.delay()).await;

                lifecycle.response_queued = true;
                state = TurnState::Requesting;
                ai.response_create(None, None);
            },
            ControllerMessage::CallEnded => {
                lifecycle.call_ended = true;
                state = TurnState::Terminal;
            },
        }

        publish(&snapshot, state, &lifecycle);

        if state == TurnState::Terminal {
            break;
        }
    }
}

/// Blocks this controller's handling of one `queue_response_create` call on
/// the prior response finishing, up to `max_wait`, while still servicing
/// every other message that can arrive in the meantime (AI events so the
/// lifecycle state stays current, barge-in, call-ended). Returns `true` if
/// the call ended while waiting, so the caller can stop the task outright.
#[allow(clippy::too_many_arguments)]
async fn await_response_done(
    rx: &Receiver<ControllerMessage>,
    lifecycle: &mut AiLifecycle,
    state: &mut TurnState,
    watchdog_deadline: &mut Option<Instant>,
    ai: &AiHandle,
    pacer: &PacerHandle,
    downlink_clear: &Sender<()>,
    max_wait: Duration,
) -> bool {
    let deadline = Instant::now() + max_wait;

    while lifecycle.response_active {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        let next = match tokio::time::timeout(remaining, rx.recv_async()).await {
            Ok(Ok(msg)) => msg,
            Ok(Err(_)) | Err(_) => break, // channel closed, or max_wait elapsed
        };

        if lifecycle.response_audio_pending {
            lifecycle.response_audio_pending = false;
        }

        match next {
            ControllerMessage::AiEvent(event) => {
                handle_ai_event(event, lifecycle, state, watchdog_deadline, ai, downlink_clear);
            },
            ControllerMessage::BargeIn => {
                if lifecycle.response_active {
                    info!("barge-in while awaiting prior response, cancelling");
                    ai.response_cancel();
                    pacer.clear();
                    let _ = downlink_clear.send(());
                    *state = TurnState::Listening;
                }
            },
            ControllerMessage::CallEnded => {
                lifecycle.call_ended = true;
                *state = TurnState::Terminal;
                return true;
            },
            // A newer response-create request raced this wait; the gate's
            // drop-silently policy applies here too rather than queuing it.
            ControllerMessage::QueueResponseCreate { .. } => {},
        }
    }

    false
}

fn handle_ai_event(
    event: ServerEvent,
    lifecycle: &mut AiLifecycle,
    state: &mut TurnState,
    watchdog_deadline: &mut Option<Instant>,
    ai: &AiHandle,
    downlink_clear: &Sender<()>,
) {
    let now = Instant::now();
    match event {
        ServerEvent::InputAudioBufferSpeechStarted => {
            lifecycle.last_user_speech_at = Some(now);
            *state = TurnState::Listening;
        },
        ServerEvent::InputAudioBufferSpeechStopped => {
            lifecycle.last_user_speech_at = Some(now);
            lifecycle.transcript_pending = true;
            *watchdog_deadline = Some(now + TRANSCRIPT_WATCHDOG);
            *state = TurnState::AwaitingStt;
        },
        ServerEvent::ConversationItemInputAudioTranscriptionCompleted { .. } => {
            lifecycle.transcript_pending = false;
            *watchdog_deadline = None;
            *state = TurnState::ReadyToReply;
        },
        ServerEvent::ResponseCreated => {
            lifecycle.response_queued = false;
            lifecycle.response_active = true;
            lifecycle.response_audio_pending = true;
            *state = TurnState::Speaking;
            ai.buffer_clear();
            let _ = downlink_clear; // buffer-clear is an AI-session-side op; downlink FIFO is untouched here
        },
        ServerEvent::ResponseDone => {
            lifecycle.response_active = false;
            lifecycle.last_ai_finished_at = Some(now);
            *state = TurnState::Idle;
        },
        ServerEvent::Error { message } => {
            warn!(%message, "AI session reported an error");
            lifecycle.call_ended = true;
            *state = TurnState::Terminal;
        },
        ServerEvent::ResponseAudioDelta { .. }
        | ServerEvent::ResponseAudioTranscriptDelta { .. }
        | ServerEvent::ResponseAudioTranscriptDone { .. }
        | ServerEvent::Other => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_lifecycle() -> AiLifecycle {
        AiLifecycle::default()
    }

    #[test]
    fn gate_opens_when_idle_and_no_recent_speech() {
        let lifecycle = idle_lifecycle();
        assert!(gate_open(&lifecycle, Instant::now(), true));
    }

    #[test]
    fn gate_closes_while_response_active() {
        let mut lifecycle = idle_lifecycle();
        lifecycle.response_active = true;
        assert!(!gate_open(&lifecycle, Instant::now(), true));
    }

    #[test]
    fn gate_closes_while_transcript_pending() {
        let mut lifecycle = idle_lifecycle();
        lifecycle.transcript_pending = true;
        assert!(!gate_open(&lifecycle, Instant::now(), true));
    }

    #[test]
    fn gate_closes_shortly_after_user_speech() {
        let mut lifecycle = idle_lifecycle();
        lifecycle.last_user_speech_at = Some(Instant::now());
        assert!(!gate_open(&lifecycle, Instant::now(), true));
    }

    #[test]
    fn gate_reopens_after_post_speech_quiet_elapses() {
        let mut lifecycle = idle_lifecycle();
        lifecycle.last_user_speech_at = Some(Instant::now() - GATE_POST_SPEECH_QUIET - Duration::from_millis(1));
        assert!(gate_open(&lifecycle, Instant::now(), true));
    }

    #[test]
    fn gate_closes_when_ai_socket_is_disconnected() {
        let lifecycle = idle_lifecycle();
        assert!(!gate_open(&lifecycle, Instant::now(), false));
    }

    #[test]
    fn echo_guard_holds_immediately_after_response_done() {
        let mut lifecycle = idle_lifecycle();
        lifecycle.last_ai_finished_at = Some(Instant::now());
        assert!(echo_guard_holds(&lifecycle, Instant::now()));
    }

    #[test]
    fn echo_guard_releases_after_interval() {
        let mut lifecycle = idle_lifecycle();
        lifecycle.last_ai_finished_at = Some(Instant::now() - ECHO_GUARD_INTERVAL - Duration::from_millis(1));
        assert!(!echo_guard_holds(&lifecycle, Instant::now()));
    }

    #[test]
    fn response_context_delays_match_configured_constants() {
        assert_eq!(ResponseContext::DataSync.delay(), crate::constants::DELAY_DATA_SYNC);
        assert_eq!(ResponseContext::InitialGreeting.delay(), crate::constants::DELAY_INITIAL_GREETING);
        assert!(ResponseContext::InitialGreeting.bypasses_gate());
        assert!(!ResponseContext::Quote.bypasses_gate());
    }

    #[test]
    fn response_created_transitions_active_and_clears_queued() {
        let mut lifecycle = idle_lifecycle();
        lifecycle.response_queued = true;
        let mut state = TurnState::Requesting;
        let mut watchdog = None;
        let (ai_tx, _ai_rx) = flume::unbounded();
        let ai = AiHandle::test_stub(ai_tx);
        let (clear_tx, _clear_rx) = flume::unbounded();

        handle_ai_event(ServerEvent::ResponseCreated, &mut lifecycle, &mut state, &mut watchdog, &ai, &clear_tx);

        assert!(lifecycle.response_active);
        assert!(!lifecycle.response_queued);
        assert!(lifecycle.response_audio_pending);
        assert_eq!(state, TurnState::Speaking);
    }

    #[test]
    fn response_done_transitions_to_idle_and_stamps_finish_time() {
        let mut lifecycle = idle_lifecycle();
        lifecycle.response_active = true;
        let mut state = TurnState::Speaking;
        let mut watchdog = None;
        let (ai_tx, _ai_rx) = flume::unbounded();
        let ai = AiHandle::test_stub(ai_tx);
        let (clear_tx, _clear_rx) = flume::unbounded();

        handle_ai_event(ServerEvent::ResponseDone, &mut lifecycle, &mut state, &mut watchdog, &ai, &clear_tx);

        assert!(!lifecycle.response_active);
        assert!(lifecycle.last_ai_finished_at.is_some());
        assert_eq!(state, TurnState::Idle);
    }

    #[test]
    fn speech_stopped_sets_transcript_pending_and_watchdog() {
        let mut lifecycle = idle_lifecycle();
        let mut state = TurnState::Listening;
        let mut watchdog = None;
        let (ai_tx, _ai_rx) = flume::unbounded();
        let ai = AiHandle::test_stub(ai_tx);
        let (clear_tx, _clear_rx) = flume::unbounded();

        handle_ai_event(
            ServerEvent::InputAudioBufferSpeechStopped,
            &mut lifecycle,
            &mut state,
            &mut watchdog,
            &ai,
            &clear_tx,
        );

        assert!(lifecycle.transcript_pending);
        assert!(watchdog.is_some());
        assert_eq!(state, TurnState::AwaitingStt);
    }

    #[test]
    fn error_event_ends_the_call() {
        let mut lifecycle = idle_lifecycle();
        let mut state = TurnState::Speaking;
        let mut watchdog = None;
        let (ai_tx, _ai_rx) = flume::unbounded();
        let ai = AiHandle::test_stub(ai_tx);
        let (clear_tx, _clear_rx) = flume::unbounded();

        handle_ai_event(
            ServerEvent::Error { message: "boom".into() },
            &mut lifecycle,
            &mut state,
            &mut watchdog,
            &ai,
            &clear_tx,
        );

        assert!(lifecycle.call_ended);
        assert_eq!(state, TurnState::Terminal);
    }
}
