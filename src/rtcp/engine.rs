//! Periodic RTCP report emission and incoming RTCP dispatch.

use std::{
    net::{SocketAddr, UdpSocket},
    num::NonZeroUsize,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use bytes::{Buf, BufMut, BytesMut};
use log::{debug, warn};
use lru::LruCache;

use crate::{
    dispatcher::{HandlerContext, HandlerStatus, PacketHandler},
    error::RtpError,
    rtcp::{
        stats::{SSRCRxStats, SSRCTxStats},
        ApplicationPacket, CompoundRtcpPacket, ReceiverReport, RtcpPacket, RtcpPacketType,
        SenderReport, SourceDescription, SourceDescriptionPacket,
    },
    rtp::RtpPacket,
    runner::Runner,
    zrtp,
};

/// Minimum delay between two compound reports from one sender.
const MIN_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Fraction of the session bandwidth available to RTCP.
const RTCP_BANDWIDTH_FRACTION: f64 = 0.05;

/// Granularity of the cancellation checks in the report timer.
const TIMER_SLICE: Duration = Duration::from_millis(200);

/// RTCP engine of a single stream.
///
/// The engine folds outgoing and incoming RTP packets into per-SSRC
/// statistics and emits compound reports (SR or RR followed by an SDES
/// chunk) on its own timer thread. Incoming RTCP traffic is claimed from the
/// handler chain by the companion [`RtcpReceiver`].
pub struct RtcpEngine {
    state: Arc<Mutex<EngineState>>,
    runner: Runner,
}

impl RtcpEngine {
    /// Create a new engine.
    ///
    /// The bandwidth is the session bandwidth in bits per second; the report
    /// interval is derived from it so that RTCP traffic stays within five
    /// percent of it, with at least five seconds between compounds.
    pub fn new<T>(sender_ssrc: u32, cname: T, clock_rate: u32, bandwidth: u32) -> Self
    where
        T: Into<String>,
    {
        let state = EngineState {
            sender_ssrc,
            cname: cname.into(),
            clock_rate,
            bandwidth,
            tx: SSRCTxStats::new(sender_ssrc, clock_rate),
            rx: LruCache::new(NonZeroUsize::new(64).unwrap_or(NonZeroUsize::MIN)),
            avg_rtcp_size: 128,
        };

        Self {
            state: Arc::new(Mutex::new(state)),
            runner: Runner::new(),
        }
    }

    /// Fold a given outgoing RTP packet into the sender statistics.
    pub fn process_outgoing(&self, packet: &RtpPacket) {
        self.state.lock().unwrap().tx.process_outgoing_packet(packet);
    }

    /// Fold a given incoming RTP packet into the receiver statistics.
    pub fn process_incoming(&self, packet: &RtpPacket, received_at: Instant) {
        let mut state = self.state.lock().unwrap();

        let ssrc = packet.ssrc();
        let clock_rate = state.clock_rate;

        state
            .rx
            .get_or_insert_mut(ssrc, || SSRCRxStats::new(ssrc, clock_rate))
            .process_incoming_rtp_packet(packet, received_at);
    }

    /// Create the receive handler claiming RTCP traffic from the chain.
    pub fn receiver(&self) -> RtcpReceiver {
        RtcpReceiver {
            state: self.state.clone(),
        }
    }

    /// Create a pass-through chain handler folding parsed RTP packets into
    /// the receiver statistics.
    ///
    /// The tap never claims a packet; it is meant to sit between the RTP
    /// validator and the media handler.
    pub fn rtp_tap(&self) -> RtpStatsTap {
        RtpStatsTap {
            state: self.state.clone(),
        }
    }

    /// Start the report timer.
    ///
    /// Reports are sent from the given socket to the given peer address.
    pub fn start(&mut self, socket: UdpSocket, peer: SocketAddr) -> Result<(), RtpError> {
        let state = self.state.clone();

        self.runner.start("rtcp-engine", move |active| {
            while active.is_active() {
                let interval = state.lock().unwrap().report_interval();

                let deadline = Instant::now() + interval;

                while active.is_active() {
                    let now = Instant::now();

                    if now >= deadline {
                        break;
                    }

                    thread::sleep(TIMER_SLICE.min(deadline - now));
                }

                if !active.is_active() {
                    break;
                }

                let compound = state.lock().unwrap().create_report();

                let mut buf = BytesMut::new();

                compound.encode(&mut buf);

                match socket.send_to(&buf, peer) {
                    Ok(_) => state.lock().unwrap().note_sent(buf.len()),
                    Err(err) => warn!("unable to send an RTCP report: {}", err),
                }
            }

            // say goodbye
            let bye = state.lock().unwrap().create_bye();

            let mut buf = BytesMut::new();

            bye.encode(&mut buf);

            if let Err(err) = socket.send_to(&buf, peer) {
                debug!("unable to send the BYE packet: {}", err);
            }
        })
    }

    /// Stop the report timer.
    ///
    /// A BYE packet is sent before the timer thread exits; the method returns
    /// only after the thread has exited.
    pub fn stop(&mut self) -> Result<(), RtpError> {
        self.runner.stop()
    }

    /// Check if the engine is running.
    pub fn active(&self) -> bool {
        self.runner.active()
    }
}

/// Internal engine state.
struct EngineState {
    sender_ssrc: u32,
    cname: String,
    clock_rate: u32,
    bandwidth: u32,
    tx: SSRCTxStats,
    rx: LruCache<u32, SSRCRxStats>,
    avg_rtcp_size: usize,
}

impl EngineState {
    /// Get the delay until the next compound report.
    fn report_interval(&self) -> Duration {
        let rtcp_bandwidth = (self.bandwidth as f64) * RTCP_BANDWIDTH_FRACTION / 8.0;

        if rtcp_bandwidth <= 0.0 {
            return MIN_REPORT_INTERVAL;
        }

        let members = 1 + self.rx.len();

        let interval = (self.avg_rtcp_size as f64) * (members as f64) / rtcp_bandwidth;

        MIN_REPORT_INTERVAL.max(Duration::from_secs_f64(interval))
    }

    /// Update the moving average of the compound report size.
    fn note_sent(&mut self, size: usize) {
        self.avg_rtcp_size = (self.avg_rtcp_size * 15 + size) / 16;
    }

    /// Create the next compound report.
    ///
    /// The compound starts with a sender report if at least one RTP packet
    /// has been sent, with a receiver report otherwise, and ends with an
    /// SDES chunk describing the sender.
    fn create_report(&mut self) -> CompoundRtcpPacket {
        let mut blocks = Vec::new();

        for (_, stats) in self.rx.iter_mut() {
            if let Some(block) = stats.create_reception_report() {
                blocks.push(block);

                if blocks.len() == 31 {
                    break;
                }
            }
        }

        let report = if self.tx.sent_packets() > 0 {
            self.tx
                .create_sender_report()
                .with_report_blocks(blocks)
                .encode()
        } else {
            ReceiverReport::new()
                .with_ssrc(self.sender_ssrc)
                .with_report_blocks(blocks)
                .encode()
        };

        let sdes = SourceDescriptionPacket::new()
            .with_source_descriptions([SourceDescription::new(
                self.sender_ssrc,
                self.cname.clone(),
            )])
            .encode();

        CompoundRtcpPacket::new([report, sdes])
    }

    /// Create the parting compound announcing the sender's departure.
    fn create_bye(&self) -> CompoundRtcpPacket {
        let report = ReceiverReport::new().with_ssrc(self.sender_ssrc).encode();

        let mut payload = BytesMut::with_capacity(4);

        payload.put_u32(self.sender_ssrc);

        let bye = RtcpPacket::new(RtcpPacketType::BYE)
            .with_item_count(1)
            .with_payload(payload.freeze(), 0);

        CompoundRtcpPacket::new([report, bye])
    }

    /// Fold a given incoming compound packet into the statistics.
    fn process_compound(&mut self, compound: &CompoundRtcpPacket) {
        for packet in compound.iter() {
            match packet.packet_type() {
                RtcpPacketType::SR => match SenderReport::decode(packet) {
                    Ok(report) => {
                        if let Some(stats) = self.rx.get_mut(&report.ssrc()) {
                            stats.process_incoming_sender_report(&report);
                        }
                    }
                    Err(_) => debug!("dropping a malformed sender report"),
                },
                RtcpPacketType::RR => {
                    if ReceiverReport::decode(packet).is_err() {
                        debug!("dropping a malformed receiver report");
                    }
                }
                RtcpPacketType::SDES => {
                    if SourceDescriptionPacket::decode(packet).is_err() {
                        debug!("dropping a malformed source description");
                    }
                }
                RtcpPacketType::BYE => self.process_bye(packet),
                RtcpPacketType::APP => {
                    if ApplicationPacket::decode(packet).is_err() {
                        debug!("dropping a malformed APP packet");
                    }
                }
                RtcpPacketType::Other(id) => {
                    debug!("ignoring an RTCP packet of unknown type {}", id);
                }
            }
        }
    }

    /// Mark every source named by a BYE packet as departed.
    fn process_bye(&mut self, packet: &RtcpPacket) {
        let mut data = packet.stripped_payload();

        for _ in 0..packet.item_count() {
            if data.len() < 4 {
                debug!("dropping a malformed BYE packet");

                return;
            }

            let ssrc = data.get_u32();

            if let Some(stats) = self.rx.get_mut(&ssrc) {
                stats.mark_departed();
            }
        }
    }
}

/// RTCP layer of the receive handler chain.
///
/// The handler claims compound RTCP datagrams (packet types 200 to 204) and
/// folds them into the engine statistics. Everything else is left to the
/// remaining handlers.
pub struct RtcpReceiver {
    state: Arc<Mutex<EngineState>>,
}

impl PacketHandler for RtcpReceiver {
    fn handle(&mut self, ctx: &mut HandlerContext) -> Result<HandlerStatus, RtpError> {
        let data = ctx.data();

        if zrtp::is_zrtp(data) {
            return Ok(HandlerStatus::NotHandled);
        }

        if data.len() < 4 || (data[0] >> 6) != 2 || !(200..=204).contains(&data[1]) {
            return Ok(HandlerStatus::NotHandled);
        }

        let compound = CompoundRtcpPacket::decode(data.clone()).map_err(|_| RtpError::Generic)?;

        self.state.lock().unwrap().process_compound(&compound);

        Ok(HandlerStatus::Handled)
    }
}

/// Pass-through handler folding parsed RTP packets into the receiver
/// statistics.
pub struct RtpStatsTap {
    state: Arc<Mutex<EngineState>>,
}

impl PacketHandler for RtpStatsTap {
    fn handle(&mut self, ctx: &mut HandlerContext) -> Result<HandlerStatus, RtpError> {
        if let Some(packet) = ctx.packet() {
            let mut state = self.state.lock().unwrap();

            let ssrc = packet.ssrc();
            let clock_rate = state.clock_rate;

            state
                .rx
                .get_or_insert_mut(ssrc, || SSRCRxStats::new(ssrc, clock_rate))
                .process_incoming_rtp_packet(packet, Instant::now());
        }

        Ok(HandlerStatus::NotHandled)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use bytes::{BufMut, Bytes, BytesMut};

    use crate::{
        rtcp::{CompoundRtcpPacket, RtcpPacket, RtcpPacketType},
        rtp::RtpPacket,
    };

    use super::RtcpEngine;

    fn make_packet(seq: u16, ssrc: u32) -> RtpPacket {
        RtpPacket::new()
            .with_payload_type(96)
            .with_sequence_number(seq)
            .with_ssrc(ssrc)
            .with_payload(Bytes::from_static(&[0u8; 16]), 0)
    }

    #[test]
    fn test_minimum_report_interval() {
        let engine = RtcpEngine::new(1, "cname", 90_000, 1_000_000);

        let interval = engine.state.lock().unwrap().report_interval();

        assert_eq!(interval, Duration::from_secs(5));
    }

    #[test]
    fn test_receiver_report_before_any_send() {
        let engine = RtcpEngine::new(1, "cname", 90_000, 64_000);

        engine.process_incoming(&make_packet(1, 0xbeef), Instant::now());

        let compound = engine.state.lock().unwrap().create_report();

        assert_eq!(compound.len(), 2);
        assert_eq!(compound[0].packet_type(), RtcpPacketType::RR);
        assert_eq!(compound[0].item_count(), 1);
        assert_eq!(compound[1].packet_type(), RtcpPacketType::SDES);
    }

    #[test]
    fn test_sender_report_after_send() {
        let engine = RtcpEngine::new(1, "cname", 90_000, 64_000);

        engine.process_outgoing(&make_packet(1, 1));

        let compound = engine.state.lock().unwrap().create_report();

        assert_eq!(compound[0].packet_type(), RtcpPacketType::SR);
    }

    #[test]
    fn test_incoming_bye_marks_source() {
        let engine = RtcpEngine::new(1, "cname", 90_000, 64_000);

        engine.process_incoming(&make_packet(1, 0xbeef), Instant::now());

        let mut payload = BytesMut::new();

        payload.put_u32(0xbeef);

        let bye = RtcpPacket::new(RtcpPacketType::BYE)
            .with_item_count(1)
            .with_payload(payload.freeze(), 0);

        let compound = CompoundRtcpPacket::from(bye);

        engine.state.lock().unwrap().process_compound(&compound);

        let mut state = engine.state.lock().unwrap();

        assert!(state.rx.get_mut(&0xbeef).unwrap().departed());
    }

    #[test]
    fn test_parting_compound() {
        let engine = RtcpEngine::new(0x42, "cname", 90_000, 64_000);

        let compound = engine.state.lock().unwrap().create_bye();

        assert_eq!(compound.len(), 2);
        assert_eq!(compound[0].packet_type(), RtcpPacketType::RR);
        assert_eq!(compound[1].packet_type(), RtcpPacketType::BYE);
        assert_eq!(compound[1].item_count(), 1);
        assert_eq!(compound[1].payload().as_ref(), &0x42u32.to_be_bytes());
    }
}
