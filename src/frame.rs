//! Media frame model.

use std::net::SocketAddr;

use bytes::Bytes;

use crate::rtp::RtpHeader;

/// Payload format carried by a stream.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MediaFormat {
    /// Opaque payload, one frame per packet.
    Generic,
    /// Opus audio as defined in RFC 7587.
    Opus,
    /// H.264 video as defined in RFC 6184.
    H264,
    /// H.265 video as defined in RFC 7798.
    H265,
    /// H.266 video as defined in draft-ietf-avtcore-rtp-vvc.
    H266,
    /// ZRTP key agreement traffic as defined in RFC 6189.
    Zrtp,
}

impl MediaFormat {
    /// Get the default RTP clock rate of the format.
    pub fn clock_rate(self) -> u32 {
        match self {
            Self::Opus => 48_000,
            Self::H264 | Self::H265 | Self::H266 => 90_000,
            Self::Generic | Self::Zrtp => 8_000,
        }
    }
}

/// Encoded media frame handed to the send path.
///
/// The timestamp is optional; without it the stream derives one from its
/// clock rate and the elapsed wall-clock time.
#[derive(Clone)]
pub struct EncodedFrame {
    data: Bytes,
    timestamp: Option<u32>,
}

impl EncodedFrame {
    /// Create a new encoded frame.
    #[inline]
    pub const fn new(data: Bytes) -> Self {
        Self {
            data,
            timestamp: None,
        }
    }

    /// Set an explicit RTP timestamp for the frame.
    #[inline]
    pub const fn with_timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Get the explicit RTP timestamp (if any).
    #[inline]
    pub fn timestamp(&self) -> Option<u32> {
        self.timestamp
    }

    /// Get the frame data.
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Take the frame data.
    #[inline]
    pub fn into_data(self) -> Bytes {
        self.data
    }
}

impl From<Bytes> for EncodedFrame {
    #[inline]
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

/// Media frame delivered to the user by the receive path.
///
/// The frame owns its payload; the payload is a zero-copy view into the
/// backing datagram wherever reassembly did not have to copy. Dropping the
/// frame releases the payload together with the backing buffer.
#[derive(Clone)]
pub struct MediaFrame {
    header: RtpHeader,
    payload: Bytes,
    padding_len: u8,
    format: MediaFormat,
    source: Option<SocketAddr>,
}

impl MediaFrame {
    /// Create a new media frame.
    #[inline]
    pub const fn new(format: MediaFormat) -> Self {
        Self {
            header: RtpHeader::new(),
            payload: Bytes::new(),
            padding_len: 0,
            format,
            source: None,
        }
    }

    /// Set the RTP header describing the frame.
    #[inline]
    pub fn with_header(mut self, header: RtpHeader) -> Self {
        self.header = header;
        self
    }

    /// Record the padding length of the original packet.
    ///
    /// The payload itself is stored with the padding already stripped.
    #[inline]
    pub fn with_padding_len(mut self, padding_len: u8) -> Self {
        self.padding_len = padding_len;
        self
    }

    /// Set the frame payload.
    #[inline]
    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = payload;
        self
    }

    /// Set the source network address.
    #[inline]
    pub fn with_source(mut self, source: Option<SocketAddr>) -> Self {
        self.source = source;
        self
    }

    /// Get the RTP header describing the frame.
    #[inline]
    pub fn header(&self) -> &RtpHeader {
        &self.header
    }

    /// Get the payload format.
    #[inline]
    pub fn format(&self) -> MediaFormat {
        self.format
    }

    /// Get the source network address (if known).
    #[inline]
    pub fn source(&self) -> Option<SocketAddr> {
        self.source
    }

    /// Get the padding length of the original packet.
    #[inline]
    pub fn padding_len(&self) -> u8 {
        self.padding_len
    }

    /// Get the marker bit value.
    #[inline]
    pub fn marker(&self) -> bool {
        self.header.marker()
    }

    /// Get the RTP timestamp of the frame.
    #[inline]
    pub fn timestamp(&self) -> u32 {
        self.header.timestamp()
    }

    /// Get the SSRC identifier of the source.
    #[inline]
    pub fn ssrc(&self) -> u32 {
        self.header.ssrc()
    }

    /// Get the frame payload.
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Take the frame payload.
    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
