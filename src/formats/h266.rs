//! H.266 video packetization as defined in draft-ietf-avtcore-rtp-vvc.

use crate::{
    formats::{FragmentType, NalCodec, NalKind},
    frame::MediaFormat,
};

/// RTP clock rate.
pub const CLOCK_RATE: u32 = 90_000;

/// NAL unit type of an FU packet.
const FU: u8 = 29;

/// H.266 codec descriptor.
///
/// The NAL unit header is two octets with the NAL unit type in the upper
/// five bits of the second octet. FU packets overwrite the type with 29 and
/// keep the forbidden/reserved bits, the layer id and the TID; the FU header
/// follows as a third octet.
#[derive(Debug, Copy, Clone, Default)]
pub struct H266;

impl NalCodec for H266 {
    #[inline]
    fn format(&self) -> MediaFormat {
        MediaFormat::H266
    }

    #[inline]
    fn nal_header_size(&self) -> usize {
        2
    }

    #[inline]
    fn fu_header_size(&self) -> usize {
        1
    }

    #[inline]
    fn nal_type(&self, nal: &[u8]) -> u8 {
        (nal[1] >> 3) & 0x1f
    }

    fn fu_nal_header(&self, nal: &[u8]) -> Vec<u8> {
        vec![nal[0], (FU << 3) | (nal[1] & 0x7)]
    }

    fn classify_fragment(&self, payload: &[u8]) -> FragmentType {
        if ((payload[1] >> 3) & 0x1f) != FU {
            return FragmentType::NotFragment;
        }

        if payload.len() < 3 {
            return FragmentType::Invalid;
        }

        let start = (payload[2] & 0x80) != 0;
        let end = (payload[2] & 0x40) != 0;

        match (start, end) {
            (true, true) => FragmentType::Invalid,
            (true, false) => FragmentType::Start,
            (false, true) => FragmentType::End,
            (false, false) => FragmentType::Middle,
        }
    }

    fn rebuild_nal_header(&self, payload: &[u8]) -> Vec<u8> {
        vec![
            payload[0],
            ((payload[2] & 0x1f) << 3) | (payload[1] & 0x7),
        ]
    }

    fn nal_kind(&self, nal: &[u8]) -> NalKind {
        match (nal[1] >> 3) & 0x1f {
            19 => NalKind::Intra,
            1 => NalKind::Inter,
            _ => NalKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::{
        depacketizer::Depacketizer,
        formats::{FragmentType, NalCodec, NalKind, NalReassembler, VideoPacketizer},
        frame::EncodedFrame,
        packetizer::Packetizer,
        rtp::RtpSequencer,
    };

    use super::H266;

    fn make_nal(len: usize) -> Bytes {
        // NAL unit type 19, layer id 0, TID 2
        let mut nal = vec![0x00, (19 << 3) | 0x02];

        for i in 2..len {
            nal.push((i * 13 % 255) as u8);
        }

        Bytes::from(nal)
    }

    #[test]
    fn test_header_layout() {
        let nal = make_nal(8);

        assert_eq!(H266.nal_type(&nal), 19);

        // the FU packet keeps the reserved/layer bits and the TID
        assert_eq!(H266.fu_nal_header(&nal), vec![0x00, (29 << 3) | 0x02]);

        let start = [0x00, (29 << 3) | 0x02, 0x80 | 19];
        let middle = [0x00, (29 << 3) | 0x02, 19];
        let end = [0x00, (29 << 3) | 0x02, 0x40 | 19];
        let invalid = [0x00, (29 << 3) | 0x02, 0xc0 | 19];

        assert_eq!(H266.classify_fragment(&start), FragmentType::Start);
        assert_eq!(H266.classify_fragment(&middle), FragmentType::Middle);
        assert_eq!(H266.classify_fragment(&end), FragmentType::End);
        assert_eq!(H266.classify_fragment(&invalid), FragmentType::Invalid);
        assert_eq!(H266.classify_fragment(&nal), FragmentType::NotFragment);

        assert_eq!(H266.rebuild_nal_header(&start), vec![0x00, (19 << 3) | 0x02]);

        assert_eq!(H266.nal_kind(&nal), NalKind::Intra);
        assert_eq!(H266.nal_kind(&[0x00, 1 << 3]), NalKind::Inter);
        assert_eq!(H266.nal_kind(&[0x00, 5 << 3]), NalKind::Other);
    }

    #[test]
    fn test_fragmented_roundtrip() {
        let nal = make_nal(5_000);

        let sequencer = RtpSequencer::new(97, 90_000).with_sequence_number(0xfffe);

        let mut packetizer = VideoPacketizer::new(H266, sequencer).with_max_payload(1_200);

        packetizer
            .push(EncodedFrame::new(nal.clone()).with_timestamp(360_000))
            .unwrap();

        let mut reassembler = NalReassembler::new(H266, 97);

        // sequence numbers wrap in the middle of the frame
        while let Some(packet) = packetizer.take().unwrap() {
            reassembler.push(packet).unwrap();
        }

        let frame = reassembler.take().unwrap().unwrap();

        assert_eq!(frame.payload().as_ref(), nal.as_ref());
        assert!(frame.marker());
    }
}
