//! C7 — AI realtime client.
//!
//! A thin [`AiHandle`] message-passes into a background actor exactly the
//! way the driver's `Driver` wraps a `Sender<CoreMessage>`: public methods
//! just construct an [`AiCommand`] and send it, and the actor owns the
//! socket, the send pump, and the receive pump.

pub mod events;
mod transport;

use crate::{
    config::{AiConfig, AiMode},
    error::{Error, NetworkError},
    id::CallId,
};
use events::{AudioFormat, ClientEvent, ServerEvent, SessionConfig};
use flume::{Receiver, Sender};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use transport::{ReceiverExt, SenderExt};
use url::Url;

/// Commands the handle can send into the actor. Only [`AiHandle`]'s typed
/// methods construct these — nothing outside this module builds a
/// `ResponseCreate`/`InputAudioBufferClear` directly, which is what makes
/// the controller (the only caller of those methods) the sole emitter in
/// practice.
enum AiCommand {
    Append(Vec<u8>),
    ResponseCreate { modalities: Option<Vec<String>>, prompt: Option<String> },
    ResponseCancel,
    BufferClear,
    Disconnect,
}

/// One downlink audio chunk, raw decoded bytes at the session's negotiated
/// output format (base64-decoded already).
pub struct DownlinkChunk(pub Vec<u8>);

/// Handle to a live AI session. Cheap to clone; every clone shares the
/// same background actor.
#[derive(Clone)]
pub struct AiHandle {
    tx: Sender<AiCommand>,
    connected: Arc<AtomicBool>,
}

impl AiHandle {
    /// Sends one 20ms uplink PCM16 frame, base64-encoded on the wire.
    pub fn append_audio(&self, pcm16: &[u8]) {
        let _ = self.tx.send(AiCommand::Append(pcm16.to_vec()));
    }

    /// Controller-only: requests a new AI response after the gate passes.
    pub fn response_create(&self, modalities: Option<Vec<String>>, prompt: Option<String>) {
        let _ = self.tx.send(AiCommand::ResponseCreate { modalities, prompt });
    }

    /// Controller-only: cancels the in-flight response on barge-in.
    pub fn response_cancel(&self) {
        let _ = self.tx.send(AiCommand::ResponseCancel);
    }

    /// Controller-only: clears the AI's input audio buffer. Emitted only
    /// in response to `response.created`.
    pub fn buffer_clear(&self) {
        let _ = self.tx.send(AiCommand::BufferClear);
    }

    /// Idempotent: releases the socket and any in-flight sends. Safe to
    /// call more than once.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(AiCommand::Disconnect);
        }
    }

    /// Whether the underlying socket is (believed to be) still open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Builds a handle over a bare command channel with no actor behind
    /// it, for unit tests that only need to observe which commands the
    /// controller sent.
    #[cfg(test)]
    pub fn test_stub(tx: Sender<AiCommand>) -> Self {
        Self { tx, connected: Arc::new(AtomicBool::new(true)) }
    }
}

/// Opens a realtime-AI session and spawns its send/receive pumps.
///
/// `events_out` receives every parsed [`ServerEvent`] so the controller
/// can drive its state machine; `downlink_out` receives decoded audio
/// chunks from `response.audio.delta` for C5 (or direct pacer forwarding
/// in G.711 passthrough mode).
#[instrument(skip(config, events_out, downlink_out))]
pub async fn connect(
    config: &AiConfig,
    call_id: &CallId,
    events_out: Sender<ServerEvent>,
    downlink_out: Sender<DownlinkChunk>,
) -> Result<AiHandle, Error> {
    let mut url = Url::parse(&config.ws_url).map_err(|_| NetworkError::MalformedRtp)?;
    url.query_pairs_mut().append_pair("caller_id", call_id.as_str());

    let bearer = match config.mode {
        AiMode::Direct => config.api_key.as_deref(),
        AiMode::Edge => None,
    };

    let stream = transport::connect(url, bearer).await?;
    let (mut sink, mut source) = stream.split();

    if config.mode == AiMode::Direct {
        let session = SessionConfig {
            model: config.model.clone(),
            voice: config.voice.clone(),
            instructions: config.system_prompt.clone(),
            input_audio_format: Some(AudioFormat::default_pcm()),
            output_audio_format: Some(AudioFormat::default_pcm()),
        };
        sink.send_event(&ClientEvent::SessionUpdate { session }).await?;
    }

    let (tx, rx) = flume::unbounded();
    let connected = Arc::new(AtomicBool::new(true));

    tokio::spawn(send_pump(rx, sink, connected.clone()));
    tokio::spawn(receive_pump(source, events_out, downlink_out, connected.clone()));

    info!(call_id = call_id.as_str(), "AI session connected");
    Ok(AiHandle { tx, connected })
}

async fn send_pump(
    rx: Receiver<AiCommand>,
    mut sink: futures::stream::SplitSink<transport::WsStream, async_tungstenite::tungstenite::Message>,
    connected: Arc<AtomicBool>,
) {
    while let Ok(cmd) = rx.recv_async().await {
        let event = match cmd {
            AiCommand::Append(pcm16) => Some(ClientEvent::InputAudioBufferAppend {
                audio: base64::encode(&pcm16),
            }),
            AiCommand::ResponseCreate { modalities, prompt } =>
                Some(ClientEvent::ResponseCreate { modalities, prompt }),
            AiCommand::ResponseCancel => Some(ClientEvent::ResponseCancel),
            AiCommand::BufferClear => Some(ClientEvent::InputAudioBufferClear),
            AiCommand::Disconnect => None,
        };

        match event {
            Some(event) => {
                if let Err(e) = sink.send_event(&event).await {
                    warn!(error = %e, "AI send failed, dropping event");
                }
            },
            None => {
                let _ = sink.close().await;
                break;
            },
        }
    }

    connected.store(false, Ordering::Release);
    debug!("AI send pump finished");
}

async fn receive_pump(
    mut source: futures::stream::SplitStream<transport::WsStream>,
    events_out: Sender<ServerEvent>,
    downlink_out: Sender<DownlinkChunk>,
    connected: Arc<AtomicBool>,
) {
    use transport::{Recv, ReceiverExt as _};

    loop {
        match source.recv_event().await {
            Ok(Recv::Event(ServerEvent::ResponseAudioDelta { delta })) => {
                if let Ok(bytes) = base64::decode(&delta) {
                    let _ = downlink_out.send(DownlinkChunk(bytes));
                }
            },
            Ok(Recv::Event(event)) => {
                let _ = events_out.send(event);
            },
            Ok(Recv::Ignored) => continue,
            Ok(Recv::Ended) => {
                debug!("AI session closed the socket");
                break;
            },
            Err(e) => {
                warn!(error = %e, "AI receive pump terminating");
                break;
            },
        }
    }

    connected.store(false, Ordering::Release);
}
