//! Minimal SDP offer parsing and codec negotiation.
//!
//! Only what the call handler needs: the audio `m=` line's payload types,
//! `a=rtpmap` entries for dynamic types, and a negotiation pass that picks
//! the best offered codec by the priority Opus > G.722 > PCMA > PCMU.
//! Session-level fields (`o=`, `s=`, `t=`) are parsed just far enough to
//! recover the connection address and media port; anything else in the
//! offer is ignored.

use crate::codec::CodecKind;
use crate::error::SdpError;
use std::net::{IpAddr, SocketAddr};

/// One codec as offered/negotiated on the wire: its kind, the concrete RTP
/// payload type number it was bound to, clock rate, and channel count.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CodecDescriptor {
    /// Which codec this entry names.
    pub kind: CodecKind,
    /// RTP payload type (7-bit) this codec was offered/bound under.
    pub payload_type: u8,
    /// RTP clock rate, as declared in `a=rtpmap` or the static default.
    pub clock_rate: u32,
    /// Channel count (1 for all codecs this bridge negotiates).
    pub channels: u8,
}

/// The parsed bits of an SDP offer this bridge cares about.
#[derive(Clone, Debug)]
pub struct SdpOffer {
    /// Connection address from the session- or media-level `c=` line.
    pub connection_addr: IpAddr,
    /// Port from the audio `m=` line.
    pub media_port: u16,
    /// Every codec offered on the audio media line, in the order listed.
    pub codecs: Vec<CodecDescriptor>,
}

impl SdpOffer {
    /// The remote media endpoint this offer asked us to send audio to.
    pub fn remote_media_addr(&self) -> SocketAddr {
        SocketAddr::new(self.connection_addr, self.media_port)
    }
}

/// Parses a raw SDP offer body. Deliberately tolerant of unfamiliar
/// attribute lines — an SDP offer from a real carrier trunk always
/// carries more than this bridge needs (ICE, DTLS fingerprints, extmaps),
/// only codec negotiation is in scope here.
pub fn parse_offer(body: &str) -> Result<SdpOffer, SdpError> {
    let mut connection_addr = None;
    let mut media_port = None;
    let mut in_audio_media = false;
    let mut fmt_order: Vec<u8> = Vec::new();
    let mut rtpmaps: std::collections::HashMap<u8, (String, u32, u8)> = std::collections::HashMap::new();

    for line in body.lines() {
        let line = line.trim();
        let Some((tag, rest)) = line.split_once('=') else { continue };

        match tag {
            "c" => {
                // c=IN IP4 <addr>
                if let Some(addr) = rest.split_whitespace().nth(2) {
                    if let Ok(parsed) = addr.parse::<IpAddr>() {
                        connection_addr = Some(parsed);
                    }
                }
            },
            "m" => {
                let mut parts = rest.split_whitespace();
                let kind = parts.next().unwrap_or("");
                in_audio_media = kind == "audio";
                if in_audio_media {
                    media_port = parts.next().and_then(|p| p.parse().ok());
                    // Skip the transport token (e.g. "RTP/AVP"), collect formats.
                    fmt_order = parts.skip(1).filter_map(|f| f.parse().ok()).collect();
                }
            },
            "a" if in_audio_media => {
                if let Some(value) = rest.strip_prefix("rtpmap:") {
                    if let Some((pt_str, desc)) = value.split_once(' ') {
                        if let Ok(pt) = pt_str.parse::<u8>() {
                            let mut desc_parts = desc.split('/');
                            let name = desc_parts.next().unwrap_or("").to_ascii_uppercase();
                            let rate = desc_parts.next().and_then(|r| r.parse().ok()).unwrap_or(8_000);
                            let channels = desc_parts.next().and_then(|c| c.parse().ok()).unwrap_or(1);
                            rtpmaps.insert(pt, (name, rate, channels));
                        }
                    }
                }
            },
            _ => {},
        }
    }

    let connection_addr = connection_addr.ok_or(SdpError::MissingConnectionAddress)?;
    let media_port = media_port.ok_or(SdpError::MissingAudioMediaLine)?;

    let codecs = fmt_order
        .into_iter()
        .filter_map(|pt| codec_for_payload_type(pt, rtpmaps.get(&pt)))
        .collect::<Vec<_>>();

    if codecs.is_empty() {
        return Err(SdpError::NoUsableCodec);
    }

    Ok(SdpOffer { connection_addr, media_port, codecs })
}

fn codec_for_payload_type(pt: u8, rtpmap: Option<&(String, u32, u8)>) -> Option<CodecDescriptor> {
    let kind = match rtpmap.map(|(name, _, _)| name.as_str()) {
        Some("PCMU") => CodecKind::Pcmu,
        Some("PCMA") => CodecKind::Pcma,
        Some("G722") => CodecKind::G722,
        Some("OPUS") => CodecKind::Opus,
        Some(_) => return None,
        // No rtpmap: fall back to the IANA static assignment.
        None => match pt {
            0 => CodecKind::Pcmu,
            8 => CodecKind::Pcma,
            9 => CodecKind::G722,
            _ => return None,
        },
    };

    let clock_rate = rtpmap.map(|(_, rate, _)| *rate).unwrap_or_else(|| kind.rtp_clock_rate());
    let channels = rtpmap.map(|(_, _, ch)| *ch).unwrap_or(1);
    Some(CodecDescriptor { kind, payload_type: pt, clock_rate, channels })
}

/// Picks the best offered codec by priority Opus > G.722 > PCMA > PCMU,
/// per the call handler's negotiation rule.
pub fn negotiate(offer: &[CodecDescriptor]) -> Option<CodecDescriptor> {
    const PRIORITY: [CodecKind; 4] = [CodecKind::Opus, CodecKind::G722, CodecKind::Pcma, CodecKind::Pcmu];
    PRIORITY
        .iter()
        .find_map(|&kind| offer.iter().find(|d| d.kind == kind).copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "\
v=0\r
o=- 1 1 IN IP4 203.0.113.9\r
s=-\r
c=IN IP4 203.0.113.9\r
t=0 0\r
m=audio 40000 RTP/AVP 111 8 0\r
a=rtpmap:111 opus/48000\r
a=rtpmap:8 PCMA/8000\r
a=rtpmap:0 PCMU/8000\r
";

    #[test]
    fn parses_connection_address_and_port() {
        let offer = parse_offer(OFFER).unwrap();
        assert_eq!(offer.media_port, 40000);
        assert_eq!(offer.connection_addr.to_string(), "203.0.113.9");
    }

    #[test]
    fn parses_codec_list_in_offered_order() {
        let offer = parse_offer(OFFER).unwrap();
        assert_eq!(offer.codecs.len(), 3);
        assert_eq!(offer.codecs[0].kind, CodecKind::Opus);
        assert_eq!(offer.codecs[0].payload_type, 111);
        assert_eq!(offer.codecs[1].kind, CodecKind::Pcma);
    }

    #[test]
    fn negotiation_prefers_opus_over_pcma_and_pcmu() {
        let offer = parse_offer(OFFER).unwrap();
        let chosen = negotiate(&offer.codecs).unwrap();
        assert_eq!(chosen.kind, CodecKind::Opus);
    }

    #[test]
    fn negotiation_falls_back_when_opus_not_offered() {
        let offer_without_opus = "\
v=0\r
o=- 1 1 IN IP4 203.0.113.9\r
s=-\r
c=IN IP4 203.0.113.9\r
t=0 0\r
m=audio 40000 RTP/AVP 8 0\r
";
        let offer = parse_offer(offer_without_opus).unwrap();
        let chosen = negotiate(&offer.codecs).unwrap();
        assert_eq!(chosen.kind, CodecKind::Pcma);
    }

    #[test]
    fn missing_audio_media_line_is_rejected() {
        let no_audio = "v=0\r\no=- 1 1 IN IP4 203.0.113.9\r\nc=IN IP4 203.0.113.9\r\n";
        assert!(matches!(parse_offer(no_audio), Err(SdpError::MissingAudioMediaLine)));
    }

    #[test]
    fn rtpmap_channel_count_is_parsed() {
        let stereo_offer = "\
v=0\r
o=- 1 1 IN IP4 203.0.113.9\r
s=-\r
c=IN IP4 203.0.113.9\r
t=0 0\r
m=audio 40000 RTP/AVP 111\r
a=rtpmap:111 opus/48000/2\r
";
        let offer = parse_offer(stereo_offer).unwrap();
        assert_eq!(offer.codecs[0].channels, 2);
    }

    #[test]
    fn missing_channel_count_defaults_to_mono() {
        let offer = parse_offer(OFFER).unwrap();
        assert!(offer.codecs.iter().all(|d| d.channels == 1));
    }

    #[test]
    fn unknown_payload_types_without_rtpmap_are_skipped() {
        let weird = "\
v=0\r
c=IN IP4 203.0.113.9\r
m=audio 40000 RTP/AVP 97\r
";
        assert!(matches!(parse_offer(weird), Err(SdpError::NoUsableCodec)));
    }
}
