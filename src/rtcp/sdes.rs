//! Source description packets.

use bytes::{Buf, BufMut, BytesMut};

use crate::{
    error::RtpError,
    rtcp::{RtcpPacket, RtcpPacketType},
};

/// SDES item type of a canonical name.
const ITEM_CNAME: u8 = 1;

/// Source description.
#[derive(Clone)]
pub struct SourceDescription {
    ssrc: u32,
    cname: String,
}

impl SourceDescription {
    /// Create a new source description.
    ///
    /// # Panics
    /// The method panics if the canonical name is longer than 255 bytes.
    pub fn new<T>(ssrc: u32, cname: T) -> Self
    where
        T: Into<String>,
    {
        let cname = cname.into();

        assert!(cname.len() < 256);

        Self { ssrc, cname }
    }

    /// Get the described SSRC.
    #[inline]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Get the canonical name.
    #[inline]
    pub fn cname(&self) -> &str {
        &self.cname
    }

    /// Encode this source description.
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.ssrc);

        let name = self.cname.as_bytes();

        buf.put_u8(ITEM_CNAME);
        buf.put_u8(name.len() as u8);
        buf.extend_from_slice(name);

        // the item list ends with a null octet and the chunk is padded to
        // the next 32-bit boundary
        buf.put_bytes(0, 4 - ((2 + name.len()) & 3));
    }

    /// Get the source description size in bytes.
    fn raw_size(&self) -> usize {
        8 + ((2 + self.cname.len()) & !3)
    }
}

/// Source description packet.
#[derive(Clone)]
pub struct SourceDescriptionPacket {
    chunks: Vec<SourceDescription>,
}

impl SourceDescriptionPacket {
    /// Create a new source description packet.
    #[inline]
    pub const fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    /// Set the source descriptions.
    ///
    /// # Panics
    /// The method will panic if the number of source descriptions is greater
    /// than 31.
    pub fn with_source_descriptions<T>(mut self, descriptions: T) -> Self
    where
        T: Into<Vec<SourceDescription>>,
    {
        let chunks = descriptions.into();

        assert!(chunks.len() < 32);

        self.chunks = chunks;
        self
    }

    /// Get the source descriptions.
    #[inline]
    pub fn source_descriptions(&self) -> &[SourceDescription] {
        &self.chunks
    }

    /// Decode a source description packet.
    ///
    /// Only the CNAME items are extracted; other item types are skipped.
    pub fn decode(packet: &RtcpPacket) -> Result<Self, RtpError> {
        let header = packet.header();

        let mut data = packet.stripped_payload();

        let mut chunks = Vec::with_capacity(header.item_count() as usize);

        for _ in 0..header.item_count() {
            if data.len() < 4 {
                return Err(RtpError::InvalidValue);
            }

            let chunk_start = data.len();

            let ssrc = data.get_u32();

            let mut cname = String::new();

            loop {
                if data.is_empty() {
                    return Err(RtpError::InvalidValue);
                }

                let item_type = data.get_u8();

                if item_type == 0 {
                    break;
                }

                if data.is_empty() {
                    return Err(RtpError::InvalidValue);
                }

                let item_len = data.get_u8() as usize;

                if data.len() < item_len {
                    return Err(RtpError::InvalidValue);
                }

                let item = data.split_to(item_len);

                if item_type == ITEM_CNAME {
                    cname = String::from_utf8_lossy(&item).into_owned();
                }
            }

            // skip the padding to the next 32-bit boundary
            while ((chunk_start - data.len()) & 0x03) != 0 {
                if data.is_empty() {
                    return Err(RtpError::InvalidValue);
                }

                data.get_u8();
            }

            chunks.push(SourceDescription::new(ssrc, cname));
        }

        Ok(Self { chunks })
    }

    /// Encode the source description packet.
    pub fn encode(&self) -> RtcpPacket {
        let mut payload = BytesMut::with_capacity(self.raw_size());

        for chunk in &self.chunks {
            chunk.encode(&mut payload);
        }

        RtcpPacket::new(RtcpPacketType::SDES)
            .with_item_count(self.chunks.len() as u8)
            .with_payload(payload.freeze(), 0)
    }

    /// Get size of the encoded source description packet.
    pub fn raw_size(&self) -> usize {
        self.chunks.iter().map(|chunk| chunk.raw_size()).sum()
    }
}

impl Default for SourceDescriptionPacket {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{SourceDescription, SourceDescriptionPacket};

    #[test]
    fn test_sdes_roundtrip() {
        let packet = SourceDescriptionPacket::new()
            .with_source_descriptions([SourceDescription::new(0x1234, "host@example.com")])
            .encode();

        let decoded = SourceDescriptionPacket::decode(&packet).unwrap();

        let chunks = decoded.source_descriptions();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ssrc(), 0x1234);
        assert_eq!(chunks[0].cname(), "host@example.com");
    }
}
