//! ZRTP wire frame recognition.
//!
//! The engine does not implement the ZRTP key agreement itself; it only
//! needs to tell ZRTP datagrams apart from RTP and RTCP traffic so that the
//! dispatcher can route them to an installed ZRTP handler.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::RtpError;

/// The "ZRTP" magic cookie.
pub const ZRTP_MAGIC: u32 = 0x5a52_5450;

/// Byte length of the fixed part of a ZRTP frame.
const FIXED_FRAME_LEN: usize = 12;

/// Check if a datagram carries a ZRTP frame.
///
/// ZRTP frames are recognized by the magic cookie following the 4-bit
/// version and 12 reserved bits of the first word.
pub fn is_zrtp(data: &[u8]) -> bool {
    if data.len() < FIXED_FRAME_LEN {
        return false;
    }

    u32::from_be_bytes([data[4], data[5], data[6], data[7]]) == ZRTP_MAGIC
}

/// ZRTP frame.
#[derive(Clone)]
pub struct ZrtpFrame {
    version: u8,
    sequence_number: u16,
    ssrc: u32,
    payload: Bytes,
}

impl ZrtpFrame {
    /// Create a new ZRTP frame.
    ///
    /// An empty payload is refused.
    pub fn new(sequence_number: u16, ssrc: u32, payload: Bytes) -> Result<Self, RtpError> {
        if payload.is_empty() {
            return Err(RtpError::InvalidValue);
        }

        let res = Self {
            version: 1,
            sequence_number,
            ssrc,
            payload,
        };

        Ok(res)
    }

    /// Decode a ZRTP frame.
    pub fn decode(mut data: Bytes) -> Result<Self, RtpError> {
        if data.len() < FIXED_FRAME_LEN {
            return Err(RtpError::InvalidValue);
        }

        let word = data.get_u16();

        let version = (word >> 12) as u8;

        let sequence_number = data.get_u16();

        if data.get_u32() != ZRTP_MAGIC {
            return Err(RtpError::InvalidValue);
        }

        let ssrc = data.get_u32();

        let res = Self {
            version,
            sequence_number,
            ssrc,
            payload: data,
        };

        Ok(res)
    }

    /// Encode the frame.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.raw_size());

        buf.put_u16((self.version as u16) << 12);
        buf.put_u16(self.sequence_number);
        buf.put_u32(ZRTP_MAGIC);
        buf.put_u32(self.ssrc);
        buf.extend_from_slice(&self.payload);
    }

    /// Get the protocol version.
    #[inline]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Get the frame sequence number.
    #[inline]
    pub fn sequence_number(&self) -> u16 {
        self.sequence_number
    }

    /// Get the SSRC identifier.
    #[inline]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Get the frame payload.
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Get size of the encoded frame.
    #[inline]
    pub fn raw_size(&self) -> usize {
        FIXED_FRAME_LEN + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use super::{is_zrtp, ZrtpFrame};

    #[test]
    fn test_frame_roundtrip() {
        let frame = ZrtpFrame::new(7, 0xabcd, Bytes::from_static(b"Hello   ")).unwrap();

        let mut buf = BytesMut::new();

        frame.encode(&mut buf);

        let data = buf.freeze();

        assert!(is_zrtp(&data));

        let decoded = ZrtpFrame::decode(data).unwrap();

        assert_eq!(decoded.version(), 1);
        assert_eq!(decoded.sequence_number(), 7);
        assert_eq!(decoded.ssrc(), 0xabcd);
        assert_eq!(decoded.payload().as_ref(), b"Hello   ");
    }

    #[test]
    fn test_empty_payload_refused() {
        assert!(ZrtpFrame::new(0, 0, Bytes::new()).is_err());
    }

    #[test]
    fn test_rtp_not_misdetected() {
        // a plausible RTP header
        let data = [0x80, 96, 0, 1, 0, 0, 0, 100, 0, 0, 0, 42];

        assert!(!is_zrtp(&data));
    }
}
