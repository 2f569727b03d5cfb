//! Sender/receiver reports.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    error::RtpError,
    rtcp::{RtcpPacket, RtcpPacketType},
};

/// Byte length of an encoded report block.
const REPORT_BLOCK_LEN: usize = 24;

/// Sender/receiver report block.
#[derive(Copy, Clone)]
pub struct ReportBlock {
    ssrc: u32,
    loss: u32,
    extended_sequence_number: u32,
    jitter: u32,
    last_sr_timestamp: u32,
    delay_since_last_sr: u32,
}

impl ReportBlock {
    /// Create a new report block.
    #[inline]
    pub const fn new() -> Self {
        Self {
            ssrc: 0,
            loss: 0,
            extended_sequence_number: 0,
            jitter: 0,
            last_sr_timestamp: 0,
            delay_since_last_sr: 0,
        }
    }

    /// Decode a report block from given data.
    pub fn decode(data: &mut Bytes) -> Result<Self, RtpError> {
        if data.len() < REPORT_BLOCK_LEN {
            return Err(RtpError::InvalidValue);
        }

        let res = Self {
            ssrc: data.get_u32(),
            loss: data.get_u32(),
            extended_sequence_number: data.get_u32(),
            jitter: data.get_u32(),
            last_sr_timestamp: data.get_u32(),
            delay_since_last_sr: data.get_u32(),
        };

        Ok(res)
    }

    /// Encode the report block.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.ssrc);
        buf.put_u32(self.loss);
        buf.put_u32(self.extended_sequence_number);
        buf.put_u32(self.jitter);
        buf.put_u32(self.last_sr_timestamp);
        buf.put_u32(self.delay_since_last_sr);
    }

    /// Get SSRC of the reported source.
    #[inline]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Set SSRC of the reported source.
    #[inline]
    pub fn with_ssrc(mut self, ssrc: u32) -> Self {
        self.ssrc = ssrc;
        self
    }

    /// Get fractional loss as a 0.8 fixed point number.
    #[inline]
    pub fn fractional_loss(&self) -> u8 {
        (self.loss >> 24) as u8
    }

    /// Set fractional loss as a 0.8 fixed point number.
    #[inline]
    pub fn with_fractional_loss(mut self, loss: u8) -> Self {
        self.loss &= 0x00ff_ffff;
        self.loss |= (loss as u32) << 24;
        self
    }

    /// Get cumulative packet loss (the precision is only up to 24 bits).
    #[inline]
    pub fn cumulative_loss(&self) -> i32 {
        ((self.loss << 8) as i32) >> 8
    }

    /// Set cumulative packet loss.
    ///
    /// The value saturates at plus/minus 2^23 - 1.
    #[inline]
    pub fn with_cumulative_loss(mut self, loss: i64) -> Self {
        let min = -((1i64 << 23) - 1);
        let max = (1i64 << 23) - 1;

        let loss = loss.clamp(min, max) as u32;

        self.loss &= 0xff00_0000;
        self.loss |= loss & 0x00ff_ffff;
        self
    }

    /// Set both loss fields from interval and cumulative packet counts.
    ///
    /// The fraction is `lost_interval * 256 / expected_interval` clamped to
    /// the 0..=255 range.
    pub fn with_loss(self, expected: u64, received: u64, expected_interval: u64, received_interval: u64) -> Self {
        let lost_interval = expected_interval.saturating_sub(received_interval);

        let fraction = if expected_interval == 0 {
            0
        } else {
            ((lost_interval * 256) / expected_interval).min(255) as u8
        };

        let cumulative = (expected as i64) - (received as i64);

        self.with_fractional_loss(fraction)
            .with_cumulative_loss(cumulative)
    }

    /// Get extended highest sequence number.
    #[inline]
    pub fn extended_sequence_number(&self) -> u32 {
        self.extended_sequence_number
    }

    /// Set the extended sequence number.
    #[inline]
    pub fn with_extended_sequence_number(mut self, n: u32) -> Self {
        self.extended_sequence_number = n;
        self
    }

    /// Get jitter.
    #[inline]
    pub fn jitter(&self) -> u32 {
        self.jitter
    }

    /// Set the jitter.
    #[inline]
    pub fn with_jitter(mut self, jitter: u32) -> Self {
        self.jitter = jitter;
        self
    }

    /// Get NTP timestamp of the last sender report (after truncating to the
    /// middle 32 bits).
    ///
    /// The returned timestamp is a 32.32 fixed point number.
    #[inline]
    pub fn last_sr_timestamp(&self) -> u64 {
        (self.last_sr_timestamp as u64) << 16
    }

    /// Set NTP timestamp of the last sender report.
    ///
    /// The timestamp is expected to be a 32.32 fixed point number and it will
    /// be truncated to the middle 32 bits.
    #[inline]
    pub fn with_last_sr_timestamp(mut self, ts: u64) -> Self {
        self.last_sr_timestamp = (ts >> 16) as u32;
        self
    }

    /// Get delay since the last sender report.
    #[inline]
    pub fn delay_since_last_sr(&self) -> Duration {
        let secs = (self.delay_since_last_sr >> 16) as u64;
        let nanos = ((self.delay_since_last_sr & 0xffff) as u64 * 1_000_000_000) >> 16;

        Duration::new(secs, nanos as u32)
    }

    /// Set delay since the last sender report.
    #[inline]
    pub fn with_delay_since_last_sr(mut self, delay: Duration) -> Self {
        let secs = (delay.as_secs() << 16) as u32;
        let fraction = (((delay.subsec_nanos() as u64) << 16) / 1_000_000_000) as u32;

        self.delay_since_last_sr = secs + fraction;
        self
    }

    /// Get size of the encoded report block.
    #[inline]
    pub fn raw_size(&self) -> usize {
        REPORT_BLOCK_LEN
    }
}

impl Default for ReportBlock {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// Sender report.
#[derive(Clone)]
pub struct SenderReport {
    ssrc: u32,
    ntp_timestamp: u64,
    rtp_timestamp: u32,
    packet_count: u32,
    octet_count: u32,
    blocks: Vec<ReportBlock>,
}

impl SenderReport {
    /// Create a new sender report.
    #[inline]
    pub const fn new() -> Self {
        Self {
            ssrc: 0,
            ntp_timestamp: 0,
            rtp_timestamp: 0,
            packet_count: 0,
            octet_count: 0,
            blocks: Vec::new(),
        }
    }

    /// Decode a sender report.
    pub fn decode(packet: &RtcpPacket) -> Result<Self, RtpError> {
        let header = packet.header();

        let mut data = packet.stripped_payload();

        if data.len() < 24 {
            return Err(RtpError::InvalidValue);
        }

        let mut res = Self {
            ssrc: data.get_u32(),
            ntp_timestamp: data.get_u64(),
            rtp_timestamp: data.get_u32(),
            packet_count: data.get_u32(),
            octet_count: data.get_u32(),
            blocks: Vec::with_capacity(header.item_count() as usize),
        };

        for _ in 0..header.item_count() {
            res.blocks.push(ReportBlock::decode(&mut data)?);
        }

        Ok(res)
    }

    /// Encode the sender report.
    pub fn encode(&self) -> RtcpPacket {
        let mut payload = BytesMut::with_capacity(self.raw_size());

        payload.put_u32(self.ssrc);
        payload.put_u64(self.ntp_timestamp);
        payload.put_u32(self.rtp_timestamp);
        payload.put_u32(self.packet_count);
        payload.put_u32(self.octet_count);

        for block in &self.blocks {
            block.encode(&mut payload);
        }

        RtcpPacket::new(RtcpPacketType::SR)
            .with_item_count(self.blocks.len() as u8)
            .with_payload(payload.freeze(), 0)
    }

    /// Get SSRC identifier of the sender.
    #[inline]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Set the SSRC identifier of the sender.
    #[inline]
    pub fn with_ssrc(mut self, ssrc: u32) -> Self {
        self.ssrc = ssrc;
        self
    }

    /// Get NTP timestamp as a 32.32 fixed point number.
    #[inline]
    pub fn ntp_timestamp(&self) -> u64 {
        self.ntp_timestamp
    }

    /// Set the NTP timestamp as a 32.32 fixed point number.
    #[inline]
    pub fn with_ntp_timestamp(mut self, timestamp: u64) -> Self {
        self.ntp_timestamp = timestamp;
        self
    }

    /// Get RTP timestamp.
    #[inline]
    pub fn rtp_timestamp(&self) -> u32 {
        self.rtp_timestamp
    }

    /// Set the RTP timestamp.
    #[inline]
    pub fn with_rtp_timestamp(mut self, timestamp: u32) -> Self {
        self.rtp_timestamp = timestamp;
        self
    }

    /// Get packet count.
    #[inline]
    pub fn packet_count(&self) -> u32 {
        self.packet_count
    }

    /// Set the packet count.
    #[inline]
    pub fn with_packet_count(mut self, count: u32) -> Self {
        self.packet_count = count;
        self
    }

    /// Get octet count.
    #[inline]
    pub fn octet_count(&self) -> u32 {
        self.octet_count
    }

    /// Set the octet count.
    #[inline]
    pub fn with_octet_count(mut self, count: u32) -> Self {
        self.octet_count = count;
        self
    }

    /// Get report blocks.
    #[inline]
    pub fn report_blocks(&self) -> &[ReportBlock] {
        &self.blocks
    }

    /// Set the report blocks.
    ///
    /// # Panics
    /// The method will panic if the number of report blocks is greater than
    /// 31.
    #[inline]
    pub fn with_report_blocks<T>(mut self, blocks: T) -> Self
    where
        T: Into<Vec<ReportBlock>>,
    {
        let blocks = blocks.into();

        assert!(blocks.len() < 32);

        self.blocks = blocks;
        self
    }

    /// Get size of the encoded sender report.
    #[inline]
    pub fn raw_size(&self) -> usize {
        24 + REPORT_BLOCK_LEN * self.blocks.len()
    }
}

impl Default for SenderReport {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver report.
#[derive(Clone)]
pub struct ReceiverReport {
    ssrc: u32,
    blocks: Vec<ReportBlock>,
}

impl ReceiverReport {
    /// Create a new receiver report.
    #[inline]
    pub const fn new() -> Self {
        Self {
            ssrc: 0,
            blocks: Vec::new(),
        }
    }

    /// Decode a receiver report.
    pub fn decode(packet: &RtcpPacket) -> Result<Self, RtpError> {
        let header = packet.header();

        let mut data = packet.stripped_payload();

        if data.len() < 4 {
            return Err(RtpError::InvalidValue);
        }

        let mut res = Self {
            ssrc: data.get_u32(),
            blocks: Vec::with_capacity(header.item_count() as usize),
        };

        for _ in 0..header.item_count() {
            res.blocks.push(ReportBlock::decode(&mut data)?);
        }

        Ok(res)
    }

    /// Encode the receiver report.
    pub fn encode(&self) -> RtcpPacket {
        let mut payload = BytesMut::with_capacity(self.raw_size());

        payload.put_u32(self.ssrc);

        for block in &self.blocks {
            block.encode(&mut payload);
        }

        RtcpPacket::new(RtcpPacketType::RR)
            .with_item_count(self.blocks.len() as u8)
            .with_payload(payload.freeze(), 0)
    }

    /// Get SSRC identifier of the sender of the report.
    #[inline]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Set the SSRC identifier of the sender of the report.
    #[inline]
    pub fn with_ssrc(mut self, ssrc: u32) -> Self {
        self.ssrc = ssrc;
        self
    }

    /// Get report blocks.
    #[inline]
    pub fn report_blocks(&self) -> &[ReportBlock] {
        &self.blocks
    }

    /// Set the report blocks.
    ///
    /// # Panics
    /// The method will panic if the number of report blocks is greater than
    /// 31.
    #[inline]
    pub fn with_report_blocks<T>(mut self, blocks: T) -> Self
    where
        T: Into<Vec<ReportBlock>>,
    {
        let blocks = blocks.into();

        assert!(blocks.len() < 32);

        self.blocks = blocks;
        self
    }

    /// Get size of the encoded receiver report.
    #[inline]
    pub fn raw_size(&self) -> usize {
        4 + REPORT_BLOCK_LEN * self.blocks.len()
    }
}

impl Default for ReceiverReport {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ReceiverReport, ReportBlock, SenderReport};

    #[test]
    fn test_sender_report_roundtrip() {
        let block = ReportBlock::new()
            .with_ssrc(0xaabb_ccdd)
            .with_fractional_loss(64)
            .with_cumulative_loss(25)
            .with_extended_sequence_number(0x0001_0203)
            .with_jitter(42)
            .with_last_sr_timestamp(0x1122_3344_5566_7788)
            .with_delay_since_last_sr(Duration::from_millis(1_500));

        let report = SenderReport::new()
            .with_ssrc(0x0102_0304)
            .with_ntp_timestamp(0xd000_0000_8000_0000)
            .with_rtp_timestamp(90_000)
            .with_packet_count(100)
            .with_octet_count(100_000)
            .with_report_blocks([block]);

        let packet = report.encode();

        let decoded = SenderReport::decode(&packet).unwrap();

        assert_eq!(decoded.ssrc(), 0x0102_0304);
        assert_eq!(decoded.ntp_timestamp(), 0xd000_0000_8000_0000);
        assert_eq!(decoded.rtp_timestamp(), 90_000);
        assert_eq!(decoded.packet_count(), 100);
        assert_eq!(decoded.octet_count(), 100_000);
        assert_eq!(decoded.report_blocks().len(), 1);

        let block = &decoded.report_blocks()[0];

        assert_eq!(block.ssrc(), 0xaabb_ccdd);
        assert_eq!(block.fractional_loss(), 64);
        assert_eq!(block.cumulative_loss(), 25);
        assert_eq!(block.extended_sequence_number(), 0x0001_0203);
        assert_eq!(block.jitter(), 42);
        assert_eq!(block.last_sr_timestamp(), 0x3344_5566_0000);

        let delay = block.delay_since_last_sr();

        assert!(delay > Duration::from_millis(1_499) && delay < Duration::from_millis(1_501));
    }

    #[test]
    fn test_receiver_report_roundtrip() {
        let report = ReceiverReport::new()
            .with_ssrc(7)
            .with_report_blocks([ReportBlock::new().with_ssrc(8)]);

        let packet = report.encode();

        let decoded = ReceiverReport::decode(&packet).unwrap();

        assert_eq!(decoded.ssrc(), 7);
        assert_eq!(decoded.report_blocks().len(), 1);
        assert_eq!(decoded.report_blocks()[0].ssrc(), 8);
    }

    #[test]
    fn test_cumulative_loss_saturates() {
        let block = ReportBlock::new().with_cumulative_loss(1 << 30);

        assert_eq!(block.cumulative_loss(), (1 << 23) - 1);

        let block = ReportBlock::new().with_cumulative_loss(-(1 << 30));

        assert_eq!(block.cumulative_loss(), -((1 << 23) - 1));
    }
}
