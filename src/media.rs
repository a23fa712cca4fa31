//! C4 — Symmetric-RTP binder, plus the UDP socket glue around it.
//!
//! Telephony RTP endpoints frequently sit behind NAT, so the SDP-declared
//! media address is only a starting point: the binder rebinds the egress
//! destination to whatever source address inbound RTP is actually observed
//! coming from, the same "learn the real peer from traffic" trick the
//! driver's own gateway reconnect logic uses when a voice server migration
//! hands it a new, unverified socket address to send to.
//!
//! The socket itself is split into two halves exactly like the driver's
//! `udp_rx`/`udp_tx` tasks: an ingress loop owns the `RecvHalf` and feeds
//! the decoder pipeline, and an egress loop owns the `SendHalf` and drains
//! whatever `flume::Receiver<Vec<u8>>` the pacer thread is producing onto.

use crate::decoder::DecoderPipeline;
use crate::error::NetworkError;
use crate::rtp::RtpHeader;
use flume::Receiver;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, instrument, trace, warn};

/// Shared, thread-safe record of the address this call currently sends
/// egress RTP to. Starts at the SDP-declared address and rebinds the
/// first time inbound RTP is observed from somewhere else.
#[derive(Clone)]
pub struct SymmetricBinder {
    current: Arc<Mutex<SocketAddr>>,
    rebound: Arc<AtomicBool>,
}

impl SymmetricBinder {
    /// Seeds the binder with the address negotiated from the SDP offer.
    pub fn new(initial: SocketAddr) -> Self {
        Self { current: Arc::new(Mutex::new(initial)), rebound: Arc::new(AtomicBool::new(false)) }
    }

    /// The address egress RTP should currently be sent to.
    pub fn destination(&self) -> SocketAddr {
        *self.current.lock()
    }

    /// Records an inbound packet's source address, rebinding the egress
    /// destination if it differs from what's currently bound. Returns
    /// `true` the first time this call's source address changes.
    pub fn observe_source(&self, source: SocketAddr) -> bool {
        let mut current = self.current.lock();
        if *current != source {
            *current = source;
            self.rebound.store(true, Ordering::Release);
            return true;
        }
        false
    }

    /// Whether this call has ever rebound away from its initial address.
    pub fn has_rebound(&self) -> bool {
        self.rebound.load(Ordering::Acquire)
    }
}

/// Runs the egress send loop: drains RTP packets the pacer thread produced
/// and sends each to the binder's current destination. Exits once `rx`
/// disconnects (the pacer thread stopped) or the socket is unusable.
#[instrument(skip_all)]
pub async fn run_egress(socket: Arc<UdpSocket>, binder: SymmetricBinder, rx: Receiver<Vec<u8>>) {
    while let Ok(packet) = rx.recv_async().await {
        let dest = binder.destination();
        if let Err(e) = socket.send_to(&packet, dest).await {
            warn!(error = %e, %dest, "egress RTP send failed");
        }
    }
    debug!("egress RTP loop finished");
}

/// One parsed, decoded inbound RTP frame handed to the call's uplink.
pub struct IngressFrame {
    pub pcm16_bytes: Vec<u8>,
    pub barge_in: bool,
}

/// Runs the ingress receive loop: reads inbound RTP datagrams, rebinds the
/// symmetric-RTP destination on source-address change, decodes each
/// payload through the call's [`DecoderPipeline`], and forwards the
/// result. `ai_speaking` is polled fresh for every packet so the decoder's
/// barge-in/gate logic always sees the controller's latest state.
#[instrument(skip_all)]
pub async fn run_ingress<F>(
    socket: Arc<UdpSocket>,
    binder: SymmetricBinder,
    mut pipeline: DecoderPipeline,
    mut ai_speaking: F,
    on_frame: flume::Sender<IngressFrame>,
) where
    F: FnMut() -> bool,
{
    let mut buf = vec![0u8; crate::constants::VOICE_PACKET_MAX];

    loop {
        let (len, source) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "ingress RTP recv failed, stopping");
                break;
            },
        };

        if binder.observe_source(source) {
            debug!(%source, "symmetric RTP destination rebound");
        }

        match decode_packet(&buf[..len], &mut pipeline, ai_speaking()) {
            Ok(Some(frame)) => {
                if on_frame.send(frame).is_err() {
                    break;
                }
            },
            Ok(None) => trace!("ingress packet produced no frame"),
            Err(e) => warn!(error = %e, "dropping malformed/undecodable inbound RTP packet"),
        }
    }
}

fn decode_packet(
    packet: &[u8],
    pipeline: &mut DecoderPipeline,
    ai_speaking: bool,
) -> Result<Option<IngressFrame>, NetworkError> {
    let (header, header_len) = RtpHeader::unpack(packet)?;
    let payload = &packet[header_len..];

    match pipeline.process(payload, header.payload_type, ai_speaking) {
        Ok(decoded) => Ok(Some(IngressFrame { pcm16_bytes: decoded.pcm16_bytes, barge_in: decoded.barge_in })),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binder_starts_at_initial_address() {
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let binder = SymmetricBinder::new(addr);
        assert_eq!(binder.destination(), addr);
        assert!(!binder.has_rebound());
    }

    #[test]
    fn binder_rebinds_on_new_source() {
        let initial: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let observed: SocketAddr = "203.0.113.9:40000".parse().unwrap();
        let binder = SymmetricBinder::new(initial);

        assert!(binder.observe_source(observed));
        assert_eq!(binder.destination(), observed);
        assert!(binder.has_rebound());
    }

    #[test]
    fn binder_does_not_rebind_on_repeat_source() {
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let binder = SymmetricBinder::new(addr);
        assert!(!binder.observe_source(addr));
        assert!(!binder.has_rebound());
    }

    #[test]
    fn decode_packet_rejects_malformed_header() {
        let mut pipeline = DecoderPipeline::standard(
            &[],
            crate::codec::CodecKind::Pcmu,
        );
        let result = decode_packet(&[0u8; 4], &mut pipeline, false);
        assert!(matches!(result, Err(NetworkError::MalformedRtp)));
    }

    #[test]
    fn decode_packet_drops_unknown_payload_type_without_erroring() {
        let mut pipeline = DecoderPipeline::standard(&[], crate::codec::CodecKind::Pcmu);
        let header = RtpHeader { marker: false, payload_type: 99, sequence: 0, timestamp: 0, ssrc: 1 };
        let packet = header.pack(&[0u8; 160]);
        let result = decode_packet(&packet, &mut pipeline, false).unwrap();
        assert!(result.is_none());
    }
}
