//! H.264 video packetization as defined in RFC 6184.

use crate::{
    formats::{FragmentType, NalCodec, NalKind},
    frame::MediaFormat,
};

/// RTP clock rate.
pub const CLOCK_RATE: u32 = 90_000;

/// Packetization mode used by the packetizer as defined in RFC 6184.
pub const PACKETIZATION_MODE: u8 = 1;

/// NAL unit type of a STAP-A packet.
const STAP_A: u8 = 24;

/// NAL unit type of an FU-A packet.
const FU_A: u8 = 28;

/// H.264 codec descriptor.
///
/// The NAL unit header is a single octet; its lower five bits carry the NAL
/// unit type. Large NAL units travel as FU-A packets where the first octet
/// keeps the F and NRI bits of the original header.
#[derive(Debug, Copy, Clone, Default)]
pub struct H264;

impl NalCodec for H264 {
    #[inline]
    fn format(&self) -> MediaFormat {
        MediaFormat::H264
    }

    #[inline]
    fn nal_header_size(&self) -> usize {
        1
    }

    #[inline]
    fn fu_header_size(&self) -> usize {
        1
    }

    #[inline]
    fn nal_type(&self, nal: &[u8]) -> u8 {
        nal[0] & 0x1f
    }

    fn fu_nal_header(&self, nal: &[u8]) -> Vec<u8> {
        vec![(nal[0] & 0xe0) | FU_A]
    }

    fn classify_fragment(&self, payload: &[u8]) -> FragmentType {
        if (payload[0] & 0x1f) != FU_A {
            return FragmentType::NotFragment;
        }

        if payload.len() < 2 {
            return FragmentType::Invalid;
        }

        let start = (payload[1] & 0x80) != 0;
        let end = (payload[1] & 0x40) != 0;

        match (start, end) {
            (true, true) => FragmentType::Invalid,
            (true, false) => FragmentType::Start,
            (false, true) => FragmentType::End,
            (false, false) => FragmentType::Middle,
        }
    }

    fn rebuild_nal_header(&self, payload: &[u8]) -> Vec<u8> {
        vec![(payload[0] & 0xe0) | (payload[1] & 0x1f)]
    }

    fn nal_kind(&self, nal: &[u8]) -> NalKind {
        match nal[0] & 0x1f {
            5 => NalKind::Intra,
            1 => NalKind::Inter,
            _ => NalKind::Other,
        }
    }

    fn is_aggregation(&self, payload: &[u8]) -> bool {
        (payload[0] & 0x1f) == STAP_A
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::{
        depacketizer::Depacketizer,
        formats::{FragmentType, NalCodec, NalReassembler, VideoPacketizer},
        frame::EncodedFrame,
        packetizer::Packetizer,
        rtp::{RtpPacket, RtpSequencer},
    };

    use super::H264;

    #[test]
    fn test_header_layout() {
        // an IDR slice with NRI set
        let nal = [0x65, 0xaa, 0xbb];

        assert_eq!(H264.nal_type(&nal), 5);
        assert_eq!(H264.fu_nal_header(&nal), vec![0x60 | 28]);

        let start = [0x60 | 28, 0x80 | 5];
        let middle = [0x60 | 28, 5];
        let end = [0x60 | 28, 0x40 | 5];
        let invalid = [0x60 | 28, 0xc0 | 5];

        assert_eq!(H264.classify_fragment(&start), FragmentType::Start);
        assert_eq!(H264.classify_fragment(&middle), FragmentType::Middle);
        assert_eq!(H264.classify_fragment(&end), FragmentType::End);
        assert_eq!(H264.classify_fragment(&invalid), FragmentType::Invalid);
        assert_eq!(H264.classify_fragment(&nal), FragmentType::NotFragment);

        assert_eq!(H264.rebuild_nal_header(&start), vec![0x65]);
    }

    #[test]
    fn test_stap_a_receive() {
        let sps = [0x67, 1, 2, 3];
        let pps = [0x68, 4, 5];

        // STAP-A: indicator octet followed by length-prefixed NAL units
        let mut payload = vec![0x18];

        for nal in [&sps[..], &pps[..]] {
            payload.extend_from_slice(&(nal.len() as u16).to_be_bytes());
            payload.extend_from_slice(nal);
        }

        let packet = RtpPacket::new()
            .with_payload_type(96)
            .with_timestamp(500)
            .with_marker(true)
            .with_payload(Bytes::from(payload), 0);

        let mut reassembler = NalReassembler::new(H264, 96);

        reassembler.push(packet).unwrap();

        let first = reassembler.take().unwrap().unwrap();
        let second = reassembler.take().unwrap().unwrap();

        assert_eq!(first.payload().as_ref(), &sps);
        assert!(!first.marker());

        assert_eq!(second.payload().as_ref(), &pps);
        assert!(second.marker());

        assert!(reassembler.take().unwrap().is_none());
    }

    #[test]
    fn test_truncated_stap_a_dropped() {
        // the second length prefix overruns the payload
        let packet = RtpPacket::new()
            .with_payload_type(96)
            .with_payload(Bytes::from_static(&[0x18, 0, 2, 0x67, 1, 0, 9, 0x68]), 0);

        let mut reassembler = NalReassembler::new(H264, 96);

        reassembler.push(packet).unwrap();

        assert!(reassembler.take().unwrap().is_none());
    }

    #[test]
    fn test_annex_b_stream_roundtrip() {
        let sps = &[0x67, 1, 2, 3];
        let pps = &[0x68, 4, 5];

        let mut idr = vec![0x65];

        for i in 0..3_000usize {
            idr.push((i % 250) as u8);
        }

        let mut stream = Vec::new();

        for nal in [&sps[..], &pps[..], &idr[..]] {
            stream.extend_from_slice(&[0, 0, 0, 1]);
            stream.extend_from_slice(nal);
        }

        let sequencer = RtpSequencer::new(96, 90_000).with_sequence_number(0);

        let mut packetizer = VideoPacketizer::new(H264, sequencer).with_max_payload(1_200);

        packetizer
            .push(EncodedFrame::new(Bytes::from(stream)).with_timestamp(42))
            .unwrap();

        let mut reassembler = NalReassembler::new(H264, 96);

        let mut frames = Vec::new();
        let mut last_marker = false;

        while let Some(packet) = packetizer.take().unwrap() {
            last_marker = packet.marker();

            reassembler.push(packet).unwrap();

            while let Some(frame) = reassembler.take().unwrap() {
                frames.push(frame);
            }
        }

        // the last packet of the access unit carries the marker bit
        assert!(last_marker);

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].payload().as_ref(), sps);
        assert_eq!(frames[1].payload().as_ref(), pps);
        assert_eq!(frames[2].payload().as_ref(), idr.as_slice());

        for frame in &frames {
            assert_eq!(frame.timestamp(), 42);
        }
    }
}
