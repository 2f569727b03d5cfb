//! RTP packet serialization/de-serialization + per-stream header management.

use std::time::Instant;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    dispatcher::{HandlerContext, HandlerStatus, PacketHandler},
    error::RtpError,
    zrtp,
};

/// Byte length of the fixed part of an RTP header.
const FIXED_HEADER_LEN: usize = 12;

/// RTP header.
///
/// Bit fields of the first two octets are kept packed in `options`; all
/// multi-byte fields are read and written in network byte order.
#[derive(Clone)]
pub struct RtpHeader {
    options: u16,
    sequence_number: u16,
    timestamp: u32,
    ssrc: u32,
    csrcs: Vec<u32>,
    extension: Option<RtpHeaderExtension>,
}

impl RtpHeader {
    /// Create a new RTP header.
    #[inline]
    pub const fn new() -> Self {
        Self {
            options: 2 << 14,
            sequence_number: 0,
            timestamp: 0,
            ssrc: 0,
            csrcs: Vec::new(),
            extension: None,
        }
    }

    /// Decode an RTP header from given data.
    pub fn decode(data: &mut Bytes) -> Result<Self, RtpError> {
        let mut buffer = data.clone();

        if buffer.len() < FIXED_HEADER_LEN {
            return Err(RtpError::InvalidValue);
        }

        let mut res = Self {
            options: buffer.get_u16(),
            sequence_number: buffer.get_u16(),
            timestamp: buffer.get_u32(),
            ssrc: buffer.get_u32(),
            csrcs: Vec::new(),
            extension: None,
        };

        if (res.options >> 14) != 2 {
            return Err(RtpError::InvalidValue);
        }

        let csrc_count = ((res.options >> 8) & 0xf) as usize;

        if buffer.len() < (csrc_count << 2) {
            return Err(RtpError::InvalidValue);
        }

        res.csrcs = Vec::with_capacity(csrc_count);

        for _ in 0..csrc_count {
            res.csrcs.push(buffer.get_u32());
        }

        if (res.options & 0x1000) != 0 {
            res.extension = Some(RtpHeaderExtension::decode(&mut buffer)?);
        }

        *data = buffer;

        Ok(res)
    }

    /// Encode the header.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.raw_size());

        buf.put_u16(self.options);
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        for csrc in &self.csrcs {
            buf.put_u32(*csrc);
        }

        if let Some(extension) = self.extension.as_ref() {
            extension.encode(buf);
        }
    }

    /// Check if the RTP packet contains any padding.
    #[inline]
    pub fn padding(&self) -> bool {
        (self.options & 0x2000) != 0
    }

    /// Set the padding bit.
    #[inline]
    pub fn with_padding(mut self, padding: bool) -> Self {
        self.options &= !0x2000;
        self.options |= (padding as u16) << 13;
        self
    }

    /// Check if there is an RTP header extension.
    #[inline]
    pub fn extension(&self) -> Option<&RtpHeaderExtension> {
        self.extension.as_ref()
    }

    /// Set the extension bit.
    #[inline]
    pub fn with_extension(mut self, extension: Option<RtpHeaderExtension>) -> Self {
        self.options &= !0x1000;
        self.options |= (extension.is_some() as u16) << 12;
        self.extension = extension;
        self
    }

    /// Check if the RTP marker bit is set.
    #[inline]
    pub fn marker(&self) -> bool {
        (self.options & 0x0080) != 0
    }

    /// Set the marker bit.
    #[inline]
    pub fn with_marker(mut self, marker: bool) -> Self {
        self.options &= !0x0080;
        self.options |= (marker as u16) << 7;
        self
    }

    /// Get RTP payload type.
    ///
    /// Note: Only the lower 7 bits are used.
    #[inline]
    pub fn payload_type(&self) -> u8 {
        (self.options & 0x7f) as u8
    }

    /// Set the payload type.
    ///
    /// # Panics
    /// The method panics if the payload type is greater than 127.
    #[inline]
    pub fn with_payload_type(mut self, payload_type: u8) -> Self {
        assert!(payload_type < 128);

        self.options &= !0x7f;
        self.options |= (payload_type & 0x7f) as u16;
        self
    }

    /// Get RTP sequence number.
    #[inline]
    pub fn sequence_number(&self) -> u16 {
        self.sequence_number
    }

    /// Set the sequence number.
    #[inline]
    pub fn with_sequence_number(mut self, n: u16) -> Self {
        self.sequence_number = n;
        self
    }

    /// Get RTP timestamp.
    #[inline]
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Set RTP timestamp.
    #[inline]
    pub fn with_timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Get the SSRC identifier.
    #[inline]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Set the SSRC identifier.
    #[inline]
    pub fn with_ssrc(mut self, ssrc: u32) -> Self {
        self.ssrc = ssrc;
        self
    }

    /// Get a list of CSRC identifiers.
    #[inline]
    pub fn csrcs(&self) -> &[u32] {
        &self.csrcs
    }

    /// Set the CSRC identifiers.
    ///
    /// # Panics
    /// The method panics if the number of identifiers is greater than 15.
    pub fn with_csrcs<T>(mut self, csrcs: T) -> Self
    where
        T: Into<Vec<u32>>,
    {
        let csrcs = csrcs.into();

        assert!(csrcs.len() <= 0xf);

        self.csrcs = csrcs;
        self.options &= !0xf00;
        self.options |= (self.csrcs.len() as u16) << 8;
        self
    }

    /// Get raw size of the header (i.e. byte length of the encoded header).
    pub fn raw_size(&self) -> usize {
        FIXED_HEADER_LEN
            + (self.csrcs.len() << 2)
            + self.extension.as_ref().map(|e| e.raw_size()).unwrap_or(0)
    }
}

impl Default for RtpHeader {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// RTP header extension.
#[derive(Clone)]
pub struct RtpHeaderExtension {
    profile: u16,
    data: Bytes,
}

impl RtpHeaderExtension {
    /// Create a new header extension.
    #[inline]
    pub const fn new() -> Self {
        Self {
            profile: 0,
            data: Bytes::new(),
        }
    }

    /// Decode RTP header extension from given data.
    pub fn decode(data: &mut Bytes) -> Result<Self, RtpError> {
        let mut buffer = data.clone();

        if buffer.len() < 4 {
            return Err(RtpError::InvalidValue);
        }

        let profile = buffer.get_u16();
        let extension_length = (buffer.get_u16() as usize) << 2;

        if buffer.len() < extension_length {
            return Err(RtpError::InvalidValue);
        }

        let res = Self {
            profile,
            data: buffer.split_to(extension_length),
        };

        *data = buffer;

        Ok(res)
    }

    /// Encode the header extension.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.raw_size());

        buf.put_u16(self.profile);
        buf.put_u16((self.data.len() >> 2) as u16);
        buf.extend_from_slice(&self.data);
    }

    /// Get the profile-defined first 16 bits of the header extension.
    #[inline]
    pub fn profile(&self) -> u16 {
        self.profile
    }

    /// Set the profile-defined first 16 bits of the header extension.
    #[inline]
    pub fn with_profile(mut self, profile: u16) -> Self {
        self.profile = profile;
        self
    }

    /// Get header extension data.
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Set the extension data.
    ///
    /// # Panics
    /// The method panics if the length of the data is not a multiple of four
    /// or if the length is greater than 262140.
    #[inline]
    pub fn with_data(mut self, data: Bytes) -> Self {
        assert_eq!(data.len() & 3, 0);
        assert!((data.len() >> 2) <= (u16::MAX as usize));

        self.data = data;
        self
    }

    /// Get raw size of the header extension (i.e. byte length of the encoded
    /// header extension).
    #[inline]
    pub fn raw_size(&self) -> usize {
        4 + self.data.len()
    }
}

impl Default for RtpHeaderExtension {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// RTP packet.
#[derive(Clone)]
pub struct RtpPacket {
    header: RtpHeader,
    payload: Bytes,
}

impl RtpPacket {
    /// Create a new RTP packet.
    #[inline]
    pub const fn new() -> Self {
        Self {
            header: RtpHeader::new(),
            payload: Bytes::new(),
        }
    }

    /// Create a new RTP packet from given parts.
    pub fn from_parts(header: RtpHeader, payload: Bytes) -> Result<Self, RtpError> {
        if header.padding() {
            let padding_len = payload.last().copied().ok_or(RtpError::InvalidValue)? as usize;

            if padding_len == 0 || payload.len() < padding_len {
                return Err(RtpError::InvalidValue);
            }
        }

        let res = Self { header, payload };

        Ok(res)
    }

    /// Deconstruct the packet into its parts.
    #[inline]
    pub fn deconstruct(self) -> (RtpHeader, Bytes) {
        (self.header, self.payload)
    }

    /// Decode RTP packet from given data frame.
    pub fn decode(mut frame: Bytes) -> Result<Self, RtpError> {
        let header = RtpHeader::decode(&mut frame)?;

        Self::from_parts(header, frame)
    }

    /// Encode the packet.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.raw_size());

        self.header.encode(buf);

        buf.extend_from_slice(&self.payload);
    }

    /// Get the RTP header.
    #[inline]
    pub fn header(&self) -> &RtpHeader {
        &self.header
    }

    /// Replace the RTP header.
    #[inline]
    pub fn with_header(mut self, header: RtpHeader) -> Self {
        self.header = header;
        self
    }

    /// Get the marker bit value.
    #[inline]
    pub fn marker(&self) -> bool {
        self.header.marker()
    }

    /// Set the marker bit.
    #[inline]
    pub fn with_marker(mut self, marker: bool) -> Self {
        self.header = self.header.with_marker(marker);
        self
    }

    /// Get the payload type.
    #[inline]
    pub fn payload_type(&self) -> u8 {
        self.header.payload_type()
    }

    /// Set the payload type.
    ///
    /// # Panics
    /// The method panics if the payload type is greater than 127.
    #[inline]
    pub fn with_payload_type(mut self, payload_type: u8) -> Self {
        self.header = self.header.with_payload_type(payload_type);
        self
    }

    /// Get the RTP sequence number.
    #[inline]
    pub fn sequence_number(&self) -> u16 {
        self.header.sequence_number()
    }

    /// Set the RTP sequence number.
    #[inline]
    pub fn with_sequence_number(mut self, sequence_number: u16) -> Self {
        self.header = self.header.with_sequence_number(sequence_number);
        self
    }

    /// Get the RTP timestamp.
    #[inline]
    pub fn timestamp(&self) -> u32 {
        self.header.timestamp()
    }

    /// Set the RTP timestamp.
    #[inline]
    pub fn with_timestamp(mut self, timestamp: u32) -> Self {
        self.header = self.header.with_timestamp(timestamp);
        self
    }

    /// Get the SSRC identifier.
    #[inline]
    pub fn ssrc(&self) -> u32 {
        self.header.ssrc()
    }

    /// Set the SSRC identifier.
    #[inline]
    pub fn with_ssrc(mut self, ssrc: u32) -> Self {
        self.header = self.header.with_ssrc(ssrc);
        self
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
    /// the RTP header will be set to zero.
    pub fn with_payload(mut self, payload: Bytes, padding: u8) -> Self {
        if padding > 0 {
            let len = payload.len() + (padding as usize);

            let mut buffer = BytesMut::with_capacity(len);

            buffer.extend_from_slice(&payload);
            buffer.resize(len, 0);

            buffer[len - 1] = padding;

            self.header = self.header.with_padding(true);
            self.payload = buffer.freeze();
        } else {
            self.header = self.header.with_padding(false);
            self.payload = payload;
        }

        self
    }

    /// Get raw size of the packet (i.e. byte length of the encoded packet).
    #[inline]
    pub fn raw_size(&self) -> usize {
        self.header.raw_size() + self.payload.len()
    }
}

impl Default for RtpPacket {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// Outgoing RTP header generator.
///
/// The sequencer owns the stream SSRC and the monotonically incrementing
/// sequence number. Timestamps are either supplied by the caller or derived
/// from the configured clock rate and the time elapsed since the sequencer
/// was created.
pub struct RtpSequencer {
    ssrc: u32,
    payload_type: u8,
    clock_rate: u32,
    sequence_number: u16,
    timestamp_origin: u32,
    created_at: Instant,
}

impl RtpSequencer {
    /// Create a new sequencer with a random SSRC, a random initial sequence
    /// number and a random timestamp origin.
    pub fn new(payload_type: u8, clock_rate: u32) -> Self {
        Self {
            ssrc: rand::random(),
            payload_type,
            clock_rate,
            sequence_number: rand::random(),
            timestamp_origin: rand::random(),
            created_at: Instant::now(),
        }
    }

    /// Set the SSRC identifier.
    #[inline]
    pub fn with_ssrc(mut self, ssrc: u32) -> Self {
        self.ssrc = ssrc;
        self
    }

    /// Set the initial sequence number.
    #[inline]
    pub fn with_sequence_number(mut self, n: u16) -> Self {
        self.sequence_number = n;
        self
    }

    /// Get the SSRC identifier.
    #[inline]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Get the payload type.
    #[inline]
    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    /// Get the next sequence number without consuming it.
    #[inline]
    pub fn sequence_number(&self) -> u16 {
        self.sequence_number
    }

    /// Get the current RTP timestamp derived from the configured clock rate.
    pub fn timestamp_now(&self) -> u32 {
        let elapsed = self.created_at.elapsed();

        let secs = elapsed.as_secs().wrapping_mul(self.clock_rate as u64);
        let subs = (elapsed.subsec_nanos() as u64) * (self.clock_rate as u64) / 1_000_000_000;

        self.timestamp_origin
            .wrapping_add(secs.wrapping_add(subs) as u32)
    }

    /// Create the header of the next outgoing packet and advance the sequence
    /// number.
    pub fn next_header(&mut self, timestamp: u32, marker: bool) -> RtpHeader {
        let header = RtpHeader::new()
            .with_payload_type(self.payload_type)
            .with_ssrc(self.ssrc)
            .with_sequence_number(self.sequence_number)
            .with_timestamp(timestamp)
            .with_marker(marker);

        self.sequence_number = self.sequence_number.wrapping_add(1);

        header
    }
}

/// RTP layer of the receive handler chain.
///
/// The handler validates the fixed header (version, length bounds, payload
/// type) and parses the datagram into an [`RtpPacket`] for the media handler
/// that follows it in the chain. It never completes a frame on its own.
pub struct RtpReceiver {
    payload_types: Vec<u8>,
    expected_ssrc: Option<u32>,
}

impl RtpReceiver {
    /// Create a new receive-side RTP handler accepting given payload types.
    pub fn new<T>(payload_types: T) -> Self
    where
        T: Into<Vec<u8>>,
    {
        Self {
            payload_types: payload_types.into(),
            expected_ssrc: None,
        }
    }

    /// Accept packets only from a given remote SSRC.
    ///
    /// Packets from other sources are left to the remaining handlers.
    #[inline]
    pub fn with_expected_ssrc(mut self, ssrc: Option<u32>) -> Self {
        self.expected_ssrc = ssrc;
        self
    }
}

impl PacketHandler for RtpReceiver {
    fn handle(&mut self, ctx: &mut HandlerContext) -> Result<HandlerStatus, RtpError> {
        let data = ctx.data();

        if zrtp::is_zrtp(data) {
            return Ok(HandlerStatus::NotHandled);
        }

        let packet = RtpPacket::decode(data.clone()).map_err(|_| RtpError::Generic)?;

        if !self.payload_types.contains(&packet.payload_type()) {
            return Ok(HandlerStatus::NotHandled);
        }

        if let Some(ssrc) = self.expected_ssrc {
            if packet.ssrc() != ssrc {
                return Ok(HandlerStatus::NotHandled);
            }
        }

        ctx.set_packet(packet);

        Ok(HandlerStatus::Modified)
    }
}
