//! Application-defined packets.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    error::RtpError,
    rtcp::{RtcpPacket, RtcpPacketType},
};

/// Application-defined RTCP packet.
///
/// The four character name scopes the packet to an application; the subtype
/// travels in the item count field of the header.
#[derive(Clone)]
pub struct ApplicationPacket {
    subtype: u8,
    ssrc: u32,
    name: [u8; 4],
    data: Bytes,
}

impl ApplicationPacket {
    /// Create a new application-defined packet.
    ///
    /// # Panics
    /// The method panics if the subtype is greater than 31 or if the data
    /// length is not a multiple of four.
    pub fn new(subtype: u8, ssrc: u32, name: [u8; 4], data: Bytes) -> Self {
        assert!(subtype < 32);
        assert_eq!(data.len() & 3, 0);

        Self {
            subtype,
            ssrc,
            name,
            data,
        }
    }

    /// Decode an application-defined packet.
    pub fn decode(packet: &RtcpPacket) -> Result<Self, RtpError> {
        let mut data = packet.stripped_payload();

        if data.len() < 8 {
            return Err(RtpError::InvalidValue);
        }

        let ssrc = data.get_u32();

        let mut name = [0u8; 4];

        data.copy_to_slice(&mut name);

        let res = Self {
            subtype: packet.header().item_count(),
            ssrc,
            name,
            data,
        };

        Ok(res)
    }

    /// Encode the packet.
    pub fn encode(&self) -> RtcpPacket {
        let mut payload = BytesMut::with_capacity(self.raw_size());

        payload.put_u32(self.ssrc);
        payload.extend_from_slice(&self.name);
        payload.extend_from_slice(&self.data);

        RtcpPacket::new(RtcpPacketType::APP)
            .with_item_count(self.subtype)
            .with_payload(payload.freeze(), 0)
    }

    /// Get the packet subtype.
    #[inline]
    pub fn subtype(&self) -> u8 {
        self.subtype
    }

    /// Get the SSRC identifier.
    #[inline]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Get the application name.
    #[inline]
    pub fn name(&self) -> &[u8; 4] {
        &self.name
    }

    /// Get the application data.
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Get size of the encoded packet body.
    #[inline]
    pub fn raw_size(&self) -> usize {
        8 + self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::ApplicationPacket;

    #[test]
    fn test_app_roundtrip() {
        let packet =
            ApplicationPacket::new(3, 42, *b"stat", Bytes::from_static(&[1, 2, 3, 4])).encode();

        let decoded = ApplicationPacket::decode(&packet).unwrap();

        assert_eq!(decoded.subtype(), 3);
        assert_eq!(decoded.ssrc(), 42);
        assert_eq!(decoded.name(), b"stat");
        assert_eq!(decoded.data().as_ref(), &[1, 2, 3, 4]);
    }
}
