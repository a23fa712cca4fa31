#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
//! A media bridge and AI-lifecycle control plane between a SIP trunk and a
//! realtime conversational-AI WebSocket endpoint.
//!
//! A PSTN/SIP caller's RTP audio is decoded, resampled, and forwarded to a
//! realtime-AI session; the AI's synthesized speech is decoded back onto
//! the RTP stream with strict 20ms pacing. The hard parts this crate
//! covers are the ingress/egress media pipeline (codec negotiation,
//! decoding, resampling, pacing, NAT-symmetric socket behaviour) and the
//! conversational turn-taking state machine that keeps caller speech, AI
//! response creation, and input-buffer clears from clipping or
//! overlapping one another.
//!
//! ## Layout
//!
//! * [`codec`] — codec kit (PCMU/PCMA/G.722/Opus) and the polyphase
//!   resampler.
//! * [`dsp`] — per-call ingress DSP: noise gate, DC blocker, AGC,
//!   barge-in detection.
//! * [`pacer`] — the dedicated-thread RTP egress pacer.
//! * [`media`] — the symmetric-RTP binder and UDP socket glue.
//! * [`adapter`] — bounded uplink/downlink audio FIFOs.
//! * [`decoder`] — the per-call decode pipeline tying codec, resampler,
//!   and DSP together.
//! * [`ai`] — the realtime-AI WebSocket client.
//! * [`controller`] — the turn/lifecycle controller.
//! * [`call`] — the call handler wiring everything above together.
//! * [`sdp`] — SDP offer parsing and codec negotiation.
//! * [`rtp`] — the hand-rolled RTP header codec.
//! * [`logger`] — the async, lock-free logging transport.
//! * [`notify`] — fire-and-forget auxiliary HTTP notifications.
//! * [`config`] — typed, validated startup configuration.
//! * [`error`] — the crate-wide error hierarchy.

pub mod adapter;
pub mod ai;
pub mod call;
pub mod codec;
pub mod config;
pub mod constants;
pub mod controller;
pub mod decoder;
pub mod dsp;
pub mod error;
pub mod id;
pub mod logger;
pub mod media;
pub mod notify;
pub mod pacer;
pub mod rtp;
pub mod sdp;

pub use call::{Call, CallRecord, CallSlot, InviteOutcome};
pub use config::Config;
pub use error::{Error, Result};
pub use id::CallId;
