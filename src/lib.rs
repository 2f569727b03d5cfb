//! Real-time media transport engine as defined in RFC 3550.
//!
//! The crate fragments encoded media (H.264/H.265/H.266 video, Opus audio)
//! into RTP packets, transports them over UDP, and reassembles received
//! fragments back into frames. Incoming datagrams pass through an ordered
//! handler chain (ZRTP, SRTP, RTP, media format) owned by a per-stream
//! dispatcher thread. A companion RTCP engine produces periodic sender and
//! receiver reports.

mod error;
mod nal;
mod rtp;

pub mod depacketizer;
pub mod dispatcher;
pub mod formats;
pub mod frame;
pub mod packetizer;
pub mod queue;
pub mod rtcp;
pub mod runner;
pub mod stream;
pub mod zrtp;

pub use self::{
    depacketizer::Depacketizer,
    dispatcher::{HandlerContext, HandlerStatus, PacketDispatcher, PacketHandler},
    error::RtpError,
    frame::{EncodedFrame, MediaFormat, MediaFrame},
    packetizer::Packetizer,
    rtp::{RtpHeader, RtpHeaderExtension, RtpPacket, RtpReceiver, RtpSequencer},
    stream::{MediaStream, StreamConfig},
};

/// Default upper bound on the RTP payload of a single datagram.
///
/// The theoretical maximum is 65535 - IP header size - UDP header size - RTP
/// header size. MTU of the underlying network should be considered instead.
/// For Ethernet it's 1500, for PPPoE, which is also frequently used, it's
/// 1492. The maximum size of an IP packet header is 60 for IPv4 and 40 for
/// IPv6. The size of the UDP header is 8 and the maximum size of an RTP
/// header is 72. A payload limit of 1352 avoids fragmentation on the link
/// and network layer in most of the cases.
pub const MAX_PAYLOAD: usize = 1_352;
