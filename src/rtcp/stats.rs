//! Per-SSRC sender and receiver statistics.

use std::time::{Duration, Instant, SystemTime};

use crate::{
    rtcp::{ReportBlock, SenderReport},
    rtp::RtpPacket,
};

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const UNIX_TO_NTP_OFFSET: u64 = 2_208_988_800;

/// Get the current NTP timestamp as a 32.32 fixed point number.
///
/// The most significant word holds seconds since 1900, the least significant
/// word the binary fraction of a second.
pub fn ntp_timestamp() -> u64 {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);

    let secs = now.as_secs().wrapping_add(UNIX_TO_NTP_OFFSET);
    let fraction = ((now.subsec_nanos() as u64) << 32) / 1_000_000_000;

    (secs << 32) | fraction
}

/// Convert elapsed wall-clock time to RTP clock units.
///
/// The result wraps naturally at 2^32.
fn rtp_elapsed(elapsed: Duration, clock_rate: u32) -> u32 {
    ((elapsed.as_nanos() * (clock_rate as u128)) / 1_000_000_000) as u32
}

/// RTP receiver statistics for a single SSRC.
#[derive(Clone)]
pub struct SSRCRxStats {
    ssrc: u32,
    clock_rate: u32,
    received_packets: u64,
    first_packet: Option<(Instant, u32)>,
    last_transit_time: i32,
    jitter_estimate: u32,
    first_esn: Option<u64>,
    highest_esn: Option<u64>,
    expected_prior: u64,
    received_prior: u64,
    last_sr_at: Option<Instant>,
    last_sr_ntp_timestamp: u64,
    departed: bool,
    create_report: bool,
}

impl SSRCRxStats {
    /// Create new RTP receiver statistics.
    pub fn new(ssrc: u32, clock_rate: u32) -> Self {
        Self {
            ssrc,
            clock_rate,
            received_packets: 0,
            first_packet: None,
            last_transit_time: 0,
            jitter_estimate: 0,
            first_esn: None,
            highest_esn: None,
            expected_prior: 0,
            received_prior: 0,
            last_sr_at: None,
            last_sr_ntp_timestamp: 0,
            departed: false,
            create_report: false,
        }
    }

    /// Process a given incoming RTP packet.
    pub fn process_incoming_rtp_packet(&mut self, packet: &RtpPacket, received_at: Instant) {
        self.received_packets = self.received_packets.wrapping_add(1);

        if self.first_packet.is_none() {
            self.first_packet = Some((received_at, packet.timestamp()));
        }

        let arrival_ts = self.rtp_time_at(received_at);

        let transit_time = arrival_ts.wrapping_sub(packet.timestamp()) as i32;

        self.update_jitter(transit_time);
        self.track_sequence(packet.sequence_number());

        self.last_transit_time = transit_time;
        self.create_report = true;
    }

    /// Process a given sender report.
    pub fn process_incoming_sender_report(&mut self, report: &SenderReport) {
        self.last_sr_at = Some(Instant::now());
        self.last_sr_ntp_timestamp = report.ntp_timestamp();
    }

    /// Mark the source as departed (a BYE naming it was received).
    pub fn mark_departed(&mut self) {
        self.departed = true;
    }

    /// Check if the source has departed.
    pub fn departed(&self) -> bool {
        self.departed
    }

    /// Create an RTCP reception report block.
    ///
    /// The method will generate a reception report block only if there were
    /// any packets received since the last report.
    pub fn create_reception_report(&mut self) -> Option<ReportBlock> {
        let highest_esn = self.highest_esn?;

        if !self.create_report {
            return None;
        }

        self.create_report = false;

        let expected = highest_esn - self.first_esn.unwrap_or(highest_esn) + 1;

        let expected_interval = expected.saturating_sub(self.expected_prior);
        let received_interval = self.received_packets.saturating_sub(self.received_prior);

        self.expected_prior = expected;
        self.received_prior = self.received_packets;

        let delay_since_last_sr = self
            .last_sr_at
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO);

        let res = ReportBlock::new()
            .with_ssrc(self.ssrc)
            .with_loss(
                expected,
                self.received_packets,
                expected_interval,
                received_interval,
            )
            .with_extended_sequence_number(highest_esn as u32)
            .with_jitter(self.jitter_estimate >> 4)
            .with_last_sr_timestamp(self.last_sr_ntp_timestamp)
            .with_delay_since_last_sr(delay_since_last_sr);

        Some(res)
    }

    /// Fold the interarrival deviation of one packet into the running jitter
    /// estimate.
    ///
    /// The estimate follows `J += (|D| - J) / 16` and is kept in 1/16 clock
    /// units so the smoothing fraction survives integer math.
    fn update_jitter(&mut self, transit_time: i32) {
        let deviation = transit_time.wrapping_sub(self.last_transit_time);

        let d = (i32::unsigned_abs(deviation) as i64) << 4;
        let j = self.jitter_estimate as i64;

        self.jitter_estimate = (j + (d - j) / 16).max(0) as u32;
    }

    /// Fold a sequence number into the extended sequence number tracking.
    fn track_sequence(&mut self, sequence_nr: u16) {
        let esn = match self.highest_esn {
            Some(highest) => estimate_esn(highest, sequence_nr),
            None => sequence_nr as u64,
        };

        if self.first_esn.is_none() {
            self.first_esn = Some(esn);
        }

        if self.highest_esn.map_or(true, |highest| esn > highest) {
            self.highest_esn = Some(esn);
        }
    }

    /// Get the RTP time of a given instant on this source's clock.
    ///
    /// The clock is anchored at the first received packet.
    fn rtp_time_at(&self, instant: Instant) -> u32 {
        let Some((first_at, first_ts)) = self.first_packet else {
            return 0;
        };

        first_ts.wrapping_add(rtp_elapsed(
            instant.saturating_duration_since(first_at),
            self.clock_rate,
        ))
    }
}

/// RTP sender statistics for a single SSRC.
#[derive(Clone)]
pub struct SSRCTxStats {
    ssrc: u32,
    clock_rate: u32,
    last_packet: Option<(Instant, u32)>,
    sent_packets: u64,
    sent_bytes: u64,
}

impl SSRCTxStats {
    /// Create new RTP sender statistics.
    #[inline]
    pub const fn new(ssrc: u32, clock_rate: u32) -> Self {
        Self {
            ssrc,
            clock_rate,
            last_packet: None,
            sent_packets: 0,
            sent_bytes: 0,
        }
    }

    /// Process a given outgoing RTP packet.
    pub fn process_outgoing_packet(&mut self, packet: &RtpPacket) {
        self.last_packet = Some((Instant::now(), packet.timestamp()));

        self.sent_packets = self.sent_packets.wrapping_add(1);
        self.sent_bytes = self.sent_bytes.wrapping_add(packet.payload().len() as u64);
    }

    /// Get the total number of packets sent.
    #[inline]
    pub fn sent_packets(&self) -> u64 {
        self.sent_packets
    }

    /// Create an RTCP sender report.
    ///
    /// The RTP timestamp is the stream clock extrapolated from the last
    /// outgoing packet; the packet headers already carry the authoritative
    /// clock, so no separate wall-clock anchor is kept. Reception report
    /// blocks are the caller's business.
    pub fn create_sender_report(&mut self) -> SenderReport {
        SenderReport::new()
            .with_ssrc(self.ssrc)
            .with_ntp_timestamp(ntp_timestamp())
            .with_rtp_timestamp(self.current_rtp_time())
            .with_packet_count(self.sent_packets as u32)
            .with_octet_count(self.sent_bytes as u32)
    }

    /// Extrapolate the current RTP time from the last outgoing packet.
    fn current_rtp_time(&self) -> u32 {
        let Some((at, timestamp)) = self.last_packet else {
            return 0;
        };

        timestamp.wrapping_add(rtp_elapsed(at.elapsed(), self.clock_rate))
    }
}

/// Estimate the extended sequence number of a packet from the highest one
/// observed so far.
///
/// This follows the roll-over counter estimation from RFC 3711, section
/// 3.3.1, with a 48-bit counter.
fn estimate_esn(highest: u64, sequence_nr: u16) -> u64 {
    let last_seq = (highest & 0xffff) as u16;
    let last_roc = highest >> 16;

    let new_roc = if sequence_nr > last_seq {
        if (sequence_nr - last_seq) < 0x8000 {
            last_roc
        } else {
            last_roc.wrapping_sub(1)
        }
    } else if (last_seq - sequence_nr) < 0x8000 {
        last_roc
    } else {
        last_roc.wrapping_add(1)
    };

    (new_roc << 16) | (sequence_nr as u64)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use crate::rtp::RtpPacket;

    use super::{estimate_esn, SSRCRxStats, SSRCTxStats};

    fn make_packet(seq: u16) -> RtpPacket {
        RtpPacket::new()
            .with_payload_type(96)
            .with_sequence_number(seq)
            .with_timestamp((seq as u32) * 3_000)
            .with_ssrc(0xcafe)
    }

    #[test]
    fn test_esn_estimation_wraps() {
        assert_eq!(estimate_esn(0xfffe, 0xffff), 0xffff);
        assert_eq!(estimate_esn(0xffff, 0x0001), 0x1_0001);
        assert_eq!(estimate_esn(0x1_0001, 0xffff), 0xffff);
    }

    #[test]
    fn test_fraction_lost() {
        let mut stats = SSRCRxStats::new(0xcafe, 90_000);

        let now = Instant::now();

        // 100 packets expected, every fourth one starting at seq 1 is lost
        for seq in 0..100u16 {
            if seq % 4 == 1 {
                continue;
            }

            stats.process_incoming_rtp_packet(&make_packet(seq), now);
        }

        let block = stats.create_reception_report().unwrap();

        assert_eq!(block.fractional_loss(), 64);
        assert_eq!(block.cumulative_loss(), 25);
        assert_eq!(block.extended_sequence_number(), 99);

        // nothing new to report
        assert!(stats.create_reception_report().is_none());

        // no further loss, the fraction drops to zero
        for seq in 100..110u16 {
            stats.process_incoming_rtp_packet(&make_packet(seq), now);
        }

        let block = stats.create_reception_report().unwrap();

        assert_eq!(block.fractional_loss(), 0);
        assert_eq!(block.cumulative_loss(), 25);
    }

    #[test]
    fn test_jitter_estimate() {
        let mut stats = SSRCRxStats::new(1, 90_000);

        let base = Instant::now();

        // perfectly paced packets produce no jitter
        for seq in 0..5u32 {
            let packet = RtpPacket::new()
                .with_payload_type(96)
                .with_sequence_number(seq as u16)
                .with_timestamp(seq * 9_000);

            let received_at = base + Duration::from_millis((seq as u64) * 100);

            stats.process_incoming_rtp_packet(&packet, received_at);
        }

        let block = stats.create_reception_report().unwrap();

        assert_eq!(block.jitter(), 0);

        // one packet arriving 50 ms late
        let packet = RtpPacket::new()
            .with_payload_type(96)
            .with_sequence_number(5)
            .with_timestamp(5 * 9_000);

        stats.process_incoming_rtp_packet(&packet, base + Duration::from_millis(550));

        let block = stats.create_reception_report().unwrap();

        // 50 ms is 4500 clock units; J = |D| / 16 after one deviation
        assert_eq!(block.jitter(), 281);
    }

    #[test]
    fn test_departure() {
        let mut stats = SSRCRxStats::new(1, 8_000);

        assert!(!stats.departed());

        stats.mark_departed();

        assert!(stats.departed());
    }

    #[test]
    fn test_sender_report_counts() {
        let mut stats = SSRCTxStats::new(1, 8_000);

        for i in 0..10u16 {
            let packet = make_packet(i).with_payload(bytes::Bytes::from_static(&[0u8; 100]), 0);

            stats.process_outgoing_packet(&packet);
        }

        let report = stats.create_sender_report();

        assert_eq!(report.packet_count(), 10);
        assert_eq!(report.octet_count(), 1_000);
        assert!(report.ntp_timestamp() > 0);

        // the report clock continues from the last packet's timestamp
        assert!(report.rtp_timestamp() >= 9 * 3_000);
    }
}
