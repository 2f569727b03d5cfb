//! Media payload formats.
//!
//! The NAL based video formats (H.264, H.265, H.266) share the fragmentation
//! loop and the reassembler; each format supplies its header layout through
//! the [`NalCodec`] trait. Opus and the generic format map one packet to one
//! frame.

pub mod generic;
pub mod h264;
pub mod h265;
pub mod h266;
pub mod opus;

use std::{
    collections::{HashMap, VecDeque},
    num::NonZeroUsize,
};

use bytes::{Buf, Bytes, BytesMut};
use log::debug;
use lru::LruCache;

use crate::{
    depacketizer::Depacketizer,
    dispatcher::{HandlerContext, HandlerStatus, PacketHandler},
    error::RtpError,
    frame::{EncodedFrame, MediaFormat, MediaFrame},
    nal,
    packetizer::Packetizer,
    queue::{FrameQueue, FuHeaders},
    rtp::{RtpHeader, RtpPacket, RtpSequencer},
    MAX_PAYLOAD,
};

pub use self::{
    generic::{GenericDepacketizer, GenericPacketizer},
    h264::H264,
    h265::H265,
    h266::H266,
    opus::{OpusDepacketizer, OpusPacketizer},
};

/// Classification of a packet payload on the receive path.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FragmentType {
    /// Not a fragmentation unit (e.g. a single NAL unit packet).
    NotFragment,
    /// First fragment of a NAL unit.
    Start,
    /// Neither the first nor the last fragment.
    Middle,
    /// Last fragment of a NAL unit.
    End,
    /// Malformed fragment (e.g. both start and end bits set).
    Invalid,
}

/// Coarse categorization of a NAL unit.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NalKind {
    Intra,
    Inter,
    Other,
}

/// Header layout of one NAL based video codec.
///
/// All byte slices handed to the methods are guaranteed to be at least
/// `nal_header_size` bytes long; `classify_fragment` and
/// `rebuild_nal_header` must do their own bounds checking beyond that.
pub trait NalCodec: Send {
    /// Get the payload format implemented by the codec.
    fn format(&self) -> MediaFormat;

    /// Get byte length of the NAL unit header.
    fn nal_header_size(&self) -> usize;

    /// Get byte length of the FU header.
    fn fu_header_size(&self) -> usize;

    /// Extract the NAL unit type from a NAL unit header.
    fn nal_type(&self, nal: &[u8]) -> u8;

    /// Build the outer NAL unit header carried by every FU packet of a given
    /// NAL unit.
    fn fu_nal_header(&self, nal: &[u8]) -> Vec<u8>;

    /// Classify a packet payload on the receive path.
    fn classify_fragment(&self, payload: &[u8]) -> FragmentType;

    /// Reconstruct the original NAL unit header from the payload of a start
    /// fragment.
    fn rebuild_nal_header(&self, payload: &[u8]) -> Vec<u8>;

    /// Categorize an assembled NAL unit.
    fn nal_kind(&self, nal: &[u8]) -> NalKind;

    /// Check if a packet payload is an aggregation packet.
    ///
    /// Formats without aggregation support keep the default.
    fn is_aggregation(&self, _payload: &[u8]) -> bool {
        false
    }
}

/// Fragment a given NAL unit into FU payloads staged in a given queue.
///
/// The NAL unit header is skipped; its type travels in the FU headers and the
/// outer header built by the codec. Every staged payload fits within
/// `max_payload` bytes including the codec headers. The first fragment gets
/// the start bit, the last one the end bit.
pub fn fragment_nal<C>(
    codec: &C,
    mut nal_unit: Bytes,
    max_payload: usize,
    queue: &mut FrameQueue,
) -> Result<(), RtpError>
where
    C: NalCodec,
{
    let outer = Bytes::from(codec.fu_nal_header(&nal_unit));
    let fu_headers = FuHeaders::new(codec.nal_type(&nal_unit));

    let chunk_size = max_payload - codec.nal_header_size() - codec.fu_header_size();

    nal_unit.advance(codec.nal_header_size());

    let mut first = true;

    while !nal_unit.is_empty() {
        let take = nal_unit.len().min(chunk_size);
        let chunk = nal_unit.split_to(take);

        let fu_header = if first {
            fu_headers.start
        } else if nal_unit.is_empty() {
            fu_headers.end
        } else {
            fu_headers.middle
        };

        first = false;

        queue.enqueue_message([outer.clone(), Bytes::from(vec![fu_header]), chunk])?;
    }

    Ok(())
}

/// Packetizer shared by all NAL based video codecs.
///
/// A pushed frame is either an Annex B byte stream or a single raw NAL unit.
/// NAL units that fit within the payload limit become single NAL unit
/// packets; larger ones are split into fragmentation units. All packets of
/// one frame share a timestamp and the last one carries the marker bit.
pub struct VideoPacketizer<C> {
    codec: C,
    sequencer: RtpSequencer,
    queue: FrameQueue,
    packets: VecDeque<RtpPacket>,
    max_payload: usize,
}

impl<C> VideoPacketizer<C>
where
    C: NalCodec,
{
    /// Create a new packetizer.
    pub fn new(codec: C, sequencer: RtpSequencer) -> Self {
        Self {
            codec,
            sequencer,
            queue: FrameQueue::new(),
            packets: VecDeque::new(),
            max_payload: MAX_PAYLOAD,
        }
    }

    /// Set the payload limit of a single packet.
    ///
    /// # Panics
    /// The method panics if the limit does not leave any room for a payload
    /// beyond the codec headers.
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        assert!(max_payload > self.codec.nal_header_size() + self.codec.fu_header_size());

        self.max_payload = max_payload;
        self
    }

    /// Stage a single NAL unit.
    fn push_nal_unit(&mut self, nal_unit: Bytes) -> Result<(), RtpError> {
        if nal_unit.len() < self.codec.nal_header_size() {
            return Err(RtpError::InvalidValue);
        }

        if nal_unit.len() <= self.max_payload {
            self.queue.enqueue_message([nal_unit])
        } else {
            fragment_nal(&self.codec, nal_unit, self.max_payload, &mut self.queue)
        }
    }
}

impl<C> Packetizer for VideoPacketizer<C>
where
    C: NalCodec,
{
    type Frame = EncodedFrame;
    type Error = RtpError;

    fn push(&mut self, frame: EncodedFrame) -> Result<(), Self::Error> {
        let timestamp = frame
            .timestamp()
            .unwrap_or_else(|| self.sequencer.timestamp_now());

        let data = frame.into_data();

        let res = if data.starts_with(&[0, 0, 1]) || data.starts_with(&[0, 0, 0, 1]) {
            nal::split_nal_units(&data).and_then(|units| {
                units
                    .into_iter()
                    .try_for_each(|nal_unit| self.push_nal_unit(nal_unit))
            })
        } else if !data.is_empty() {
            self.push_nal_unit(data)
        } else {
            Err(RtpError::InvalidValue)
        };

        if res.is_err() {
            self.queue.clear();

            return res;
        }

        self.packets
            .extend(self.queue.flush_queue(&mut self.sequencer, timestamp));

        Ok(())
    }

    #[inline]
    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    #[inline]
    fn take(&mut self) -> Result<Option<RtpPacket>, Self::Error> {
        Ok(self.packets.pop_front())
    }
}

/// Fragment parked in the probation zone.
///
/// Fragments of a frame whose start has not been observed yet are held here
/// until the start arrives; they are then relocated into that frame.
#[derive(Clone)]
struct ProbationFragment {
    timestamp: u32,
    sequence_number: u16,
    end: bool,
    marker: bool,
    data: Bytes,
}

/// NAL unit under reassembly.
struct PartialFrame {
    header: RtpHeader,
    nal_header: Vec<u8>,
    start_seq: u16,
    end_seq: Option<u16>,
    marker: bool,
    fragments: HashMap<u16, Bytes>,
    total_len: usize,
}

impl PartialFrame {
    /// Open a new frame from a start fragment.
    fn new(header: RtpHeader, nal_header: Vec<u8>, start_seq: u16) -> Self {
        Self {
            header,
            nal_header,
            start_seq,
            end_seq: None,
            marker: false,
            fragments: HashMap::new(),
            total_len: 0,
        }
    }

    /// Insert a fragment payload at a given sequence number.
    fn insert(&mut self, sequence_number: u16, data: Bytes) {
        if let Some(old) = self.fragments.insert(sequence_number, data) {
            // duplicate packet, keep the byte accounting right
            self.total_len -= old.len();
        }

        self.total_len += self.fragments[&sequence_number].len();
    }
}

/// Reassembly state of a single synchronization source.
struct SourceState {
    frames: HashMap<u32, PartialFrame>,
    probation: VecDeque<ProbationFragment>,
    last_delivered: Option<u32>,
}

impl SourceState {
    fn new() -> Self {
        Self {
            frames: HashMap::new(),
            probation: VecDeque::new(),
            last_delivered: None,
        }
    }

    /// Record a delivery and advance the staleness reference.
    fn advance_delivery(&mut self, timestamp: u32) {
        let newer = match self.last_delivered {
            Some(last) => timestamp.wrapping_sub(last) < (1 << 31),
            None => true,
        };

        if newer {
            self.last_delivered = Some(timestamp);
        }
    }

    /// Drop in-progress frames and probation fragments that fell behind the
    /// last delivered frame by more than the given window.
    fn prune_stale(&mut self, window: u32) {
        let Some(last) = self.last_delivered else {
            return;
        };

        let is_stale = |timestamp: u32| {
            let age = last.wrapping_sub(timestamp);

            age < (1 << 31) && age > window
        };

        self.frames.retain(|&timestamp, _| {
            let stale = is_stale(timestamp);

            if stale {
                debug!("dropping stale incomplete frame, timestamp {}", timestamp);
            }

            !stale
        });

        self.probation.retain(|frag| !is_stale(frag.timestamp));
    }
}

/// Receive-side reassembler shared by all NAL based video codecs.
///
/// In-progress frames are kept per synchronization source, keyed by the RTP
/// timestamp of their fragments. A frame is delivered once its start and end
/// fragments plus every sequence number in between have been observed.
/// Fragments arriving ahead of their frame's start fragment are parked in a
/// bounded probation zone; frames that fall too far behind the delivery
/// point are dropped. Single NAL unit packets and the units of an
/// aggregation packet are delivered directly.
pub struct NalReassembler<C> {
    codec: C,
    payload_type: u8,
    probation_capacity: usize,
    window: u32,
    sources: LruCache<u32, SourceState>,
    ready: VecDeque<MediaFrame>,
}

impl<C> NalReassembler<C>
where
    C: NalCodec,
{
    /// Default number of fragments held in the probation zone per source.
    pub const DEFAULT_PROBATION_CAPACITY: usize = 16;

    /// Default number of tracked sources.
    pub const DEFAULT_MAX_SOURCES: usize = 64;

    /// Create a new reassembler for a given payload type.
    ///
    /// The staleness window defaults to one second worth of RTP time at the
    /// codec clock rate.
    pub fn new(codec: C, payload_type: u8) -> Self {
        let window = codec.format().clock_rate();

        Self {
            codec,
            payload_type,
            probation_capacity: Self::DEFAULT_PROBATION_CAPACITY,
            window,
            sources: LruCache::new(
                NonZeroUsize::new(Self::DEFAULT_MAX_SOURCES).unwrap_or(NonZeroUsize::MIN),
            ),
            ready: VecDeque::new(),
        }
    }

    /// Set the capacity of the probation zone (in fragments per source).
    ///
    /// The oldest probation fragment is discarded when the zone overflows.
    pub fn with_probation_capacity(mut self, capacity: usize) -> Self {
        self.probation_capacity = capacity;
        self
    }

    /// Set the staleness window in RTP timestamp units.
    pub fn with_reassembly_window(mut self, window: u32) -> Self {
        self.window = window;
        self
    }

    /// Set the maximum number of tracked synchronization sources.
    ///
    /// The least recently used source is evicted when the limit is exceeded.
    pub fn with_max_sources(mut self, max_sources: usize) -> Self {
        self.sources
            .resize(NonZeroUsize::new(max_sources).unwrap_or(NonZeroUsize::MIN));
        self
    }

    /// Deliver a single NAL unit packet as a complete frame.
    fn deliver_single(&mut self, packet: &RtpPacket, payload: Bytes) {
        self.deliver_unit(packet, payload, packet.marker());
    }

    /// Deliver every NAL unit of an aggregation packet as its own frame.
    ///
    /// The packet's marker bit is kept on the last unit only.
    fn deliver_aggregated(&mut self, packet: &RtpPacket, payload: Bytes) {
        let mut data = payload.slice(self.codec.nal_header_size()..);

        let mut units = Vec::new();

        while !data.is_empty() {
            if data.len() < 2 {
                debug!("dropping a truncated aggregation packet");

                return;
            }

            let len = data.get_u16() as usize;

            if data.len() < len {
                debug!("dropping a truncated aggregation packet");

                return;
            }

            let nal_unit = data.split_to(len);

            if !nal_unit.is_empty() {
                units.push(nal_unit);
            }
        }

        let count = units.len();

        for (i, nal_unit) in units.into_iter().enumerate() {
            let marker = packet.marker() && (i + 1) == count;

            self.deliver_unit(packet, nal_unit, marker);
        }
    }

    /// Deliver one NAL unit as a complete frame.
    fn deliver_unit(&mut self, packet: &RtpPacket, payload: Bytes, marker: bool) {
        let timestamp = packet.timestamp();

        let header = packet
            .header()
            .clone()
            .with_padding(false)
            .with_marker(marker);

        let frame = MediaFrame::new(self.codec.format())
            .with_header(header)
            .with_payload(payload)
            .with_padding_len(packet.padding());

        self.ready.push_back(frame);

        let window = self.window;
        let state = self.source_mut(packet.ssrc());

        state.advance_delivery(timestamp);
        state.prune_stale(window);
    }

    /// Process a start fragment.
    fn handle_start(&mut self, packet: &RtpPacket, payload: Bytes) {
        let offset = self.codec.nal_header_size() + self.codec.fu_header_size();

        let timestamp = packet.timestamp();
        let sequence_number = packet.sequence_number();

        let header = packet.header().clone();
        let nal_header = self.codec.rebuild_nal_header(&payload);

        let state = self.source_mut(packet.ssrc());

        let frame = state
            .frames
            .entry(timestamp)
            .or_insert_with(|| PartialFrame::new(header, nal_header, sequence_number));

        frame.start_seq = sequence_number;
        frame.insert(sequence_number, payload.slice(offset..));

        // relocate probation fragments belonging to this frame
        let mut relocated = Vec::new();

        state.probation.retain(|frag| {
            if frag.timestamp == timestamp {
                relocated.push(frag.clone());
                false
            } else {
                true
            }
        });

        for frag in relocated {
            frame.insert(frag.sequence_number, frag.data);

            if frag.end {
                frame.end_seq = Some(frag.sequence_number);
                frame.marker = frag.marker;
            }
        }

        self.try_complete(packet.ssrc(), timestamp);
    }

    /// Process a middle or end fragment.
    fn handle_continuation(&mut self, packet: &RtpPacket, payload: Bytes, end: bool) {
        let offset = self.codec.nal_header_size() + self.codec.fu_header_size();

        let timestamp = packet.timestamp();
        let sequence_number = packet.sequence_number();
        let marker = packet.marker();

        let probation_capacity = self.probation_capacity;

        let state = self.source_mut(packet.ssrc());

        if let Some(frame) = state.frames.get_mut(&timestamp) {
            frame.insert(sequence_number, payload.slice(offset..));

            if end {
                frame.end_seq = Some(sequence_number);
                frame.marker = marker;
            }

            self.try_complete(packet.ssrc(), timestamp);
        } else {
            // the start fragment has not arrived yet
            if state.probation.len() >= probation_capacity {
                debug!("probation zone full, discarding the oldest fragment");

                state.probation.pop_front();
            }

            state.probation.push_back(ProbationFragment {
                timestamp,
                sequence_number,
                end,
                marker,
                data: payload.slice(offset..),
            });
        }
    }

    /// Deliver the frame with a given timestamp if it is complete.
    fn try_complete(&mut self, ssrc: u32, timestamp: u32) {
        let window = self.window;
        let format = self.codec.format();

        let Some(state) = self.sources.get_mut(&ssrc) else {
            return;
        };

        let Some(frame) = state.frames.get(&timestamp) else {
            return;
        };

        let Some(end_seq) = frame.end_seq else {
            return;
        };

        let count = end_seq.wrapping_sub(frame.start_seq).wrapping_add(1);

        let mut seq = frame.start_seq;

        for _ in 0..count {
            if !frame.fragments.contains_key(&seq) {
                return;
            }

            seq = seq.wrapping_add(1);
        }

        let frame = state
            .frames
            .remove(&timestamp)
            .expect("frame presence checked above");

        let mut buf = BytesMut::with_capacity(frame.nal_header.len() + frame.total_len);

        buf.extend_from_slice(&frame.nal_header);

        let mut seq = frame.start_seq;

        for _ in 0..count {
            if let Some(data) = frame.fragments.get(&seq) {
                buf.extend_from_slice(data);
            }

            seq = seq.wrapping_add(1);
        }

        let header = frame
            .header
            .with_sequence_number(frame.start_seq)
            .with_marker(frame.marker)
            .with_padding(false);

        let media = MediaFrame::new(format)
            .with_header(header)
            .with_payload(buf.freeze());

        self.ready.push_back(media);

        state.advance_delivery(timestamp);
        state.prune_stale(window);
    }

    /// Get the reassembly state of a given source.
    fn source_mut(&mut self, ssrc: u32) -> &mut SourceState {
        self.sources.get_or_insert_mut(ssrc, SourceState::new)
    }
}

impl<C> Depacketizer for NalReassembler<C>
where
    C: NalCodec,
{
    type Frame = MediaFrame;
    type Error = RtpError;

    fn push(&mut self, packet: RtpPacket) -> Result<(), Self::Error> {
        if packet.payload_type() != self.payload_type {
            return Ok(());
        }

        let payload = packet.stripped_payload();

        if payload.len() < self.codec.nal_header_size() {
            debug!("dropping a truncated packet");

            return Ok(());
        }

        match self.codec.classify_fragment(&payload) {
            FragmentType::NotFragment if self.codec.is_aggregation(&payload) => {
                self.deliver_aggregated(&packet, payload)
            }
            FragmentType::NotFragment => self.deliver_single(&packet, payload),
            FragmentType::Start => self.handle_start(&packet, payload),
            FragmentType::Middle => self.handle_continuation(&packet, payload, false),
            FragmentType::End => self.handle_continuation(&packet, payload, true),
            FragmentType::Invalid => debug!("dropping an invalid fragment"),
        }

        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        // incomplete frames are dropped, media loss is expected on UDP
        while let Some((ssrc, state)) = self.sources.pop_lru() {
            if !state.frames.is_empty() {
                debug!(
                    "dropping {} incomplete frame(s) of source {:08x}",
                    state.frames.len(),
                    ssrc
                );
            }
        }

        Ok(())
    }

    fn take(&mut self) -> Result<Option<Self::Frame>, Self::Error> {
        Ok(self.ready.pop_front())
    }
}

/// Media layer of the receive handler chain.
///
/// The handler consumes RTP packets parsed by the RTP layer, feeds them into
/// the underlying depacketizer and emits completed frames.
pub struct MediaReceiver<D> {
    depacketizer: D,
}

impl<D> MediaReceiver<D> {
    /// Create a new media receive handler.
    #[inline]
    pub const fn new(depacketizer: D) -> Self {
        Self { depacketizer }
    }
}

impl<D> PacketHandler for MediaReceiver<D>
where
    D: Depacketizer<Frame = MediaFrame, Error = RtpError> + Send,
{
    fn handle(&mut self, ctx: &mut HandlerContext) -> Result<HandlerStatus, RtpError> {
        let Some(packet) = ctx.take_packet() else {
            return Ok(HandlerStatus::NotHandled);
        };

        let source = ctx.source();

        self.depacketizer.push(packet)?;

        let mut frames = Vec::new();

        while let Some(frame) = self.depacketizer.take()? {
            frames.push(frame.with_source(Some(source)));
        }

        if frames.is_empty() {
            Ok(HandlerStatus::Handled)
        } else {
            Ok(HandlerStatus::Ready(frames))
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::{
        depacketizer::Depacketizer,
        frame::EncodedFrame,
        packetizer::Packetizer,
        rtp::{RtpPacket, RtpSequencer},
    };

    use super::{h265::H265, NalCodec, NalReassembler, VideoPacketizer};

    fn make_nal(len: usize) -> Bytes {
        // a TRAIL_R slice header followed by a deterministic payload
        let mut nal = vec![0x02, 0x01];

        for i in 2..len {
            nal.push((i * 31 % 251) as u8);
        }

        Bytes::from(nal)
    }

    fn packetize(nal: Bytes, max_payload: usize) -> Vec<RtpPacket> {
        let sequencer = RtpSequencer::new(96, 90_000).with_sequence_number(100);

        let mut packetizer =
            VideoPacketizer::new(H265, sequencer).with_max_payload(max_payload);

        packetizer
            .push(EncodedFrame::new(nal).with_timestamp(7_000))
            .unwrap();

        let mut packets = Vec::new();

        while let Some(packet) = packetizer.take().unwrap() {
            packets.push(packet);
        }

        packets
    }

    #[test]
    fn test_fragment_payload_identity() {
        let nal = make_nal(6_000);

        let packets = packetize(nal.clone(), 1_400);

        // strip the codec headers and concatenate the payload slices
        let offset = H265.nal_header_size() + H265.fu_header_size();

        let mut assembled = Vec::new();

        assembled.extend_from_slice(&nal[..H265.nal_header_size()]);

        for packet in &packets {
            assembled.extend_from_slice(&packet.payload()[offset..]);
        }

        assert_eq!(assembled, nal.as_ref());
    }

    #[test]
    fn test_probation_zone_interleaved_frames() {
        let nal_a = make_nal(4_000);
        let nal_b = make_nal(4_100);

        let sequencer = RtpSequencer::new(96, 90_000).with_sequence_number(0);

        let mut packetizer = VideoPacketizer::new(H265, sequencer).with_max_payload(1_400);

        packetizer
            .push(EncodedFrame::new(nal_a.clone()).with_timestamp(1_000))
            .unwrap();

        let mut packets_a = Vec::new();

        while let Some(packet) = packetizer.take().unwrap() {
            packets_a.push(packet);
        }

        packetizer
            .push(EncodedFrame::new(nal_b.clone()).with_timestamp(4_000))
            .unwrap();

        let mut packets_b = Vec::new();

        while let Some(packet) = packetizer.take().unwrap() {
            packets_b.push(packet);
        }

        assert!(packets_a.len() >= 3);
        assert!(packets_b.len() >= 3);

        let mut reassembler = NalReassembler::new(H265, 96);

        // frame A stays open while the tail of frame B arrives; those B
        // fragments must survive in the probation zone
        reassembler.push(packets_a[0].clone()).unwrap();
        reassembler.push(packets_b[1].clone()).unwrap();
        reassembler.push(packets_b[2].clone()).unwrap();

        for packet in &packets_a[1..] {
            reassembler.push(packet.clone()).unwrap();
        }

        let frame_a = reassembler.take().unwrap().unwrap();

        assert_eq!(frame_a.payload().as_ref(), nal_a.as_ref());
        assert!(reassembler.take().unwrap().is_none());

        reassembler.push(packets_b[0].clone()).unwrap();

        for packet in &packets_b[3..] {
            reassembler.push(packet.clone()).unwrap();
        }

        let frame_b = reassembler.take().unwrap().unwrap();

        assert_eq!(frame_b.payload().as_ref(), nal_b.as_ref());
        assert_eq!(frame_b.timestamp(), 4_000);
    }

    #[test]
    fn test_stale_frame_dropped() {
        let nal = make_nal(4_000);

        let packets = packetize(nal, 1_400);

        let mut reassembler = NalReassembler::new(H265, 96).with_reassembly_window(1_000);

        // open a frame but never finish it
        reassembler.push(packets[0].clone()).unwrap();

        // a complete single NAL unit frame far in the future
        let single = RtpPacket::new()
            .with_payload_type(96)
            .with_timestamp(100_000)
            .with_sequence_number(50_000)
            .with_marker(true)
            .with_payload(Bytes::from_static(&[0x02, 0x01, 0xaa]), 0);

        reassembler.push(single).unwrap();

        let frame = reassembler.take().unwrap().unwrap();

        assert_eq!(frame.timestamp(), 100_000);

        // the stale frame is gone; completing it must not deliver anything
        for packet in &packets[1..] {
            reassembler.push(packet.clone()).unwrap();
        }

        assert!(reassembler.take().unwrap().is_none());
    }

    #[test]
    fn test_probation_zone_overflow() {
        let nal = make_nal(20_000);

        let packets = packetize(nal, 1_400);

        assert!(packets.len() > 5);

        let mut reassembler = NalReassembler::new(H265, 96).with_probation_capacity(2);

        // feed continuation fragments only; the zone keeps the two most
        // recent ones
        for packet in &packets[1..] {
            reassembler.push(packet.clone()).unwrap();
        }

        reassembler.push(packets[0].clone()).unwrap();

        // the frame cannot complete because the zone overflowed
        assert!(reassembler.take().unwrap().is_none());
    }
}
