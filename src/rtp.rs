//! Hand-rolled RTP header codec.
//!
//! songbird depends on `discortp`, but its `discord` feature set models
//! Discord's RTP header extensions this bridge has no use for. A plain
//! RFC 3550 header (no CSRC, no extension) is twelve bytes and clearer to
//! pack/unpack by hand than to configure a generic crate around — see
//! `DESIGN.md` for the drop rationale.

use crate::constants::{RTP_HEADER_LEN, RTP_VERSION};
use crate::error::NetworkError;

/// A parsed RTP header, fixed at twelve bytes (no CSRC list, no extension).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RtpHeader {
    /// Always 0 on egress; ignored on ingress beyond loud frames.
    pub marker: bool,
    /// 7-bit RTP payload type.
    pub payload_type: u8,
    /// 16-bit wrapping sequence number.
    pub sequence: u16,
    /// 32-bit wrapping media timestamp.
    pub timestamp: u32,
    /// Synchronization source identifier.
    pub ssrc: u32,
}

impl RtpHeader {
    /// Packs this header followed by `payload` into one contiguous buffer.
    pub fn pack(&self, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RTP_HEADER_LEN + payload.len());
        buf.push((RTP_VERSION << 6) | 0); // P=0, X=0, CC=0
        buf.push(((self.marker as u8) << 7) | (self.payload_type & 0x7F));
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    /// Parses a header and returns it along with the header length in
    /// bytes (accounting for a nonzero CSRC count, though this bridge
    /// never emits one). The caller slices the payload as `&data[len..]`.
    pub fn unpack(data: &[u8]) -> Result<(Self, usize), NetworkError> {
        if data.len() < RTP_HEADER_LEN {
            return Err(NetworkError::MalformedRtp);
        }

        let first = data[0];
        if first >> 6 != RTP_VERSION {
            return Err(NetworkError::MalformedRtp);
        }
        let csrc_count = (first & 0x0F) as usize;

        let second = data[1];
        let marker = (second >> 7) & 1 == 1;
        let payload_type = second & 0x7F;

        let sequence = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let header_len = RTP_HEADER_LEN + csrc_count * 4;
        if data.len() < header_len {
            return Err(NetworkError::MalformedRtp);
        }

        Ok((
            Self { marker, payload_type, sequence, timestamp, ssrc },
            header_len,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_then_unpack_round_trips() {
        let header = RtpHeader {
            marker: false,
            payload_type: 8,
            sequence: 4242,
            timestamp: 0xDEAD_BEEF,
            ssrc: 0x1234_5678,
        };
        let payload = vec![1u8, 2, 3, 4, 5];
        let packet = header.pack(&payload);

        let (parsed, header_len) = RtpHeader::unpack(&packet).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(&packet[header_len..], &payload[..]);
    }

    #[test]
    fn marker_bit_is_always_zero_on_egress_frames() {
        let header = RtpHeader { marker: false, payload_type: 0, sequence: 1, timestamp: 160, ssrc: 1 };
        let packet = header.pack(&[0xFF; 160]);
        assert_eq!(packet[1] & 0x80, 0);
    }

    #[test]
    fn rejects_packet_shorter_than_header() {
        let short = [0u8; 4];
        assert!(matches!(RtpHeader::unpack(&short), Err(NetworkError::MalformedRtp)));
    }

    #[test]
    fn rejects_wrong_rtp_version() {
        let mut packet = RtpHeader { marker: false, payload_type: 0, sequence: 0, timestamp: 0, ssrc: 0 }
            .pack(&[0u8; 4]);
        packet[0] = 0x00; // version 0
        assert!(matches!(RtpHeader::unpack(&packet), Err(NetworkError::MalformedRtp)));
    }
}
