//! RTCP types and the report engine.

pub mod app;
pub mod engine;
pub mod report;
pub mod sdes;
pub mod stats;

use std::ops::Deref;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::RtpError;

pub use self::{
    app::ApplicationPacket,
    engine::{RtcpEngine, RtcpReceiver, RtpStatsTap},
    report::{ReceiverReport, ReportBlock, SenderReport},
    sdes::{SourceDescription, SourceDescriptionPacket},
};

/// Compound RTCP packet.
#[derive(Clone)]
pub struct CompoundRtcpPacket {
    inner: Vec<RtcpPacket>,
}

impl CompoundRtcpPacket {
    /// Create a new compound packet.
    #[inline]
    pub fn new<T>(packets: T) -> Self
    where
        T: Into<Vec<RtcpPacket>>,
    {
        Self {
            inner: packets.into(),
        }
    }

    /// Decode a compound RTCP packet.
    #[inline]
    pub fn decode(mut frame: Bytes) -> Result<Self, RtpError> {
        let mut res = Vec::new();

        while !frame.is_empty() {
            res.push(RtcpPacket::decode(&mut frame)?);
        }

        Ok(Self::new(res))
    }

    /// Encode the packet.
    #[inline]
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.raw_size());

        for packet in &self.inner {
            packet.encode(buf);
        }
    }

    /// Get encoded size of the compound packet.
    #[inline]
    pub fn raw_size(&self) -> usize {
        self.inner.iter().map(|packet| packet.length()).sum()
    }
}

impl Deref for CompoundRtcpPacket {
    type Target = [RtcpPacket];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl From<RtcpPacket> for CompoundRtcpPacket {
    #[inline]
    fn from(packet: RtcpPacket) -> Self {
        Self {
            inner: vec![packet],
        }
    }
}

/// RTCP packet type.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RtcpPacketType {
    SR,
    RR,
    SDES,
    BYE,
    APP,
    Other(u8),
}

impl RtcpPacketType {
    /// Get type ID.
    #[inline]
    pub fn raw_id(self) -> u8 {
        match self {
            RtcpPacketType::SR => 200,
            RtcpPacketType::RR => 201,
            RtcpPacketType::SDES => 202,
            RtcpPacketType::BYE => 203,
            RtcpPacketType::APP => 204,
            RtcpPacketType::Other(id) => id,
        }
    }
}

impl From<u8> for RtcpPacketType {
    #[inline]
    fn from(id: u8) -> RtcpPacketType {
        match id {
            200 => RtcpPacketType::SR,
            201 => RtcpPacketType::RR,
            202 => RtcpPacketType::SDES,
            203 => RtcpPacketType::BYE,
            204 => RtcpPacketType::APP,
            id => RtcpPacketType::Other(id),
        }
    }
}

/// RTCP packet header.
#[derive(Copy, Clone)]
pub struct RtcpHeader {
    options: u8,
    packet_type: RtcpPacketType,
    length: u16,
}

impl RtcpHeader {
    /// Create a new packet header.
    #[inline]
    pub const fn new(packet_type: RtcpPacketType) -> Self {
        Self {
            options: 2 << 6,
            packet_type,
            length: 0,
        }
    }

    /// Decode an RTCP header.
    pub fn decode(data: &mut Bytes) -> Result<Self, RtpError> {
        let mut buffer = data.clone();

        if buffer.len() < 4 {
            return Err(RtpError::InvalidValue);
        }

        let options = buffer.get_u8();

        if (options >> 6) != 2 {
            return Err(RtpError::InvalidValue);
        }

        let res = Self {
            options,
            packet_type: buffer.get_u8().into(),
            length: buffer.get_u16(),
        };

        *data = buffer;

        Ok(res)
    }

    /// Encode the header.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.options);
        buf.put_u8(self.packet_type.raw_id());
        buf.put_u16(self.length);
    }

    /// Check if the padding bit is set.
    #[inline]
    pub fn padding(&self) -> bool {
        (self.options & 0x20) != 0
    }

    /// Set the padding bit.
    #[inline]
    pub fn with_padding(mut self, padding: bool) -> Self {
        self.options &= !0x20;
        self.options |= (padding as u8) << 5;
        self
    }

    /// Get packet length in bytes.
    #[inline]
    pub fn packet_length(&self) -> usize {
        ((self.length as usize) + 1) << 2
    }

    /// Set the packet length in bytes.
    ///
    /// Please note that the packet length must be a multiple of four and it
    /// must be from the range `4..=262_144`.
    ///
    /// # Panics
    /// The method panics if the constraints on the packet length mentioned
    /// above are not met.
    #[inline]
    pub fn with_packet_length(mut self, length: usize) -> Self {
        assert!((4..=262_144).contains(&length) && (length & 3) == 0);

        self.length = ((length >> 2) - 1) as u16;
        self
    }

    /// Get RTCP packet type.
    #[inline]
    pub fn packet_type(&self) -> RtcpPacketType {
        self.packet_type
    }

    /// Get number of items in the packet body.
    ///
    /// For APP packets the field carries the packet subtype instead.
    ///
    /// Note: Only the lower 5 bits are actually used.
    #[inline]
    pub fn item_count(&self) -> u8 {
        self.options & 0x1f
    }

    /// Set the number of items in the packet body.
    ///
    /// # Panics
    /// The method panics if the number of items is greater than 31.
    #[inline]
    pub fn with_item_count(mut self, count: u8) -> Self {
        assert!(count < 32);

        self.options &= !0x1f;
        self.options |= count & 0x1f;
        self
    }

    /// Get encoded size of the header.
    #[inline]
    pub fn raw_size(&self) -> usize {
        4
    }
}

/// RTCP packet.
#[derive(Clone)]
pub struct RtcpPacket {
    header: RtcpHeader,
    payload: Bytes,
}

impl RtcpPacket {
    /// Create a new packet.
    #[inline]
    pub const fn new(packet_type: RtcpPacketType) -> Self {
        Self {
            header: RtcpHeader::new(packet_type),
            payload: Bytes::new(),
        }
    }

    /// Create a new RTCP packet from given parts.
    pub fn from_parts(header: RtcpHeader, payload: Bytes) -> Result<Self, RtpError> {
        if header.padding() {
            let padding_len = payload.last().copied().ok_or(RtpError::InvalidValue)? as usize;

            if padding_len == 0 || payload.len() < padding_len {
                return Err(RtpError::InvalidValue);
            }
        }

        if header.packet_length() != (payload.len() + 4) {
            return Err(RtpError::InvalidValue);
        }

        let res = Self { header, payload };

        Ok(res)
    }

    /// Decode an RTCP packet.
    pub fn decode(data: &mut Bytes) -> Result<Self, RtpError> {
        let mut buffer = data.clone();

        let header = RtcpHeader::decode(&mut buffer)?;

        let payload_len = header.packet_length() - 4;

        if buffer.len() < payload_len {
            return Err(RtpError::InvalidValue);
        }

        let res = Self::from_parts(header, buffer.split_to(payload_len))?;

        *data = buffer;

        Ok(res)
    }

    /// Encode the packet.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.header.packet_length());

        self.header.encode(buf);

        buf.extend_from_slice(&self.payload);
    }

    /// Get the packet header.
    #[inline]
    pub fn header(&self) -> &RtcpHeader {
        &self.header
    }

    /// Get the packet type.
    #[inline]
    pub fn packet_type(&self) -> RtcpPacketType {
        self.header.packet_type()
    }

    /// Get number of items in the packet body.
    ///
    /// Note: Only the lower 5 bits are actually used.
    #[inline]
    pub fn item_count(&self) -> u8 {
        self.header.item_count()
    }

    /// Set the number of items in the packet body.
    ///
    /// # Panics
    /// The method panics if the number of items is greater than 31.
    #[inline]
    pub fn with_item_count(mut self, count: u8) -> Self {
        self.header = self.header.with_item_count(count);
        self
    }

    /// Get packet length in bytes.
    #[inline]
    pub fn length(&self) -> usize {
        self.header.packet_length()
    }

    /// Get length of the optional padding.
    ///
    /// Zero means that the padding is not used at all.
    #[inline]
    pub fn padding(&self) -> u8 {
        if self.header.padding() {
            self.payload.last().copied().unwrap_or(0)
        } else {
            0
        }
    }

    /// Get the packet payload including the optional padding.
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Get the packet payload without any padding.
    #[inline]
    pub fn stripped_payload(&self) -> Bytes {
        let payload_len = self.payload.len();
        let padding_len = self.padding() as usize;

        let len = payload_len - padding_len;

        self.payload.slice(..len)
    }

    /// Set the payload and add padding of a given length.
    ///
    /// If the padding is zero, no padding will be added and the padding bit in
    /// the header will be set to zero.
    ///
    /// # Panics
    /// The method panics if the payload length including padding is not a
    /// multiple of four or if the payload length including padding is greater
    /// than 262_140.
    #[inline]
    pub fn with_payload(mut self, mut payload: Bytes, padding: u8) -> Self {
        if padding > 0 {
            let len = payload.len() + (padding as usize);

            let mut buffer = BytesMut::with_capacity(len);

            buffer.extend_from_slice(&payload);
            buffer.resize(len, 0);

            buffer[len - 1] = padding;

            payload = buffer.freeze();

            self.header = self
                .header
                .with_padding(true)
                .with_packet_length(4 + payload.len());
        } else {
            self.header = self
                .header
                .with_padding(false)
                .with_packet_length(4 + payload.len());
        }

        self.payload = payload;

        self
    }

    /// Get encoded size of the packet.
    #[inline]
    pub fn raw_size(&self) -> usize {
        self.length()
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use super::{CompoundRtcpPacket, RtcpPacket, RtcpPacketType};

    #[test]
    fn test_packet_roundtrip() {
        let packet = RtcpPacket::new(RtcpPacketType::BYE)
            .with_item_count(1)
            .with_payload(Bytes::from_static(&[0, 0, 0, 1]), 0);

        let mut buf = BytesMut::new();

        packet.encode(&mut buf);

        let mut data = buf.freeze();

        let decoded = RtcpPacket::decode(&mut data).unwrap();

        assert!(data.is_empty());
        assert_eq!(decoded.packet_type(), RtcpPacketType::BYE);
        assert_eq!(decoded.item_count(), 1);
        assert_eq!(decoded.payload().as_ref(), &[0, 0, 0, 1]);
    }

    #[test]
    fn test_compound_decode() {
        let first = RtcpPacket::new(RtcpPacketType::RR)
            .with_payload(Bytes::from_static(&[0, 0, 0, 2]), 0);
        let second = RtcpPacket::new(RtcpPacketType::BYE)
            .with_item_count(1)
            .with_payload(Bytes::from_static(&[0, 0, 0, 2]), 0);

        let compound = CompoundRtcpPacket::new([first, second]);

        let mut buf = BytesMut::new();

        compound.encode(&mut buf);

        let decoded = CompoundRtcpPacket::decode(buf.freeze()).unwrap();

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].packet_type(), RtcpPacketType::RR);
        assert_eq!(decoded[1].packet_type(), RtcpPacketType::BYE);
    }

    #[test]
    fn test_truncated_packet_rejected() {
        // header claims 8 bytes but only 4 are present
        let data = Bytes::from_static(&[0x80, 201, 0, 1]);

        assert!(CompoundRtcpPacket::decode(data).is_err());
    }
}
