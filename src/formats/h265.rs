//! H.265 video packetization as defined in RFC 7798.

use crate::{
    formats::{FragmentType, NalCodec, NalKind},
    frame::MediaFormat,
};

/// RTP clock rate.
pub const CLOCK_RATE: u32 = 90_000;

/// NAL unit type of an AP packet.
const AP: u8 = 48;

/// NAL unit type of an FU packet.
const FU: u8 = 49;

/// H.265 codec descriptor.
///
/// The NAL unit header is two octets with the NAL unit type in bits 1..7 of
/// the first octet. FU packets replace the type with 49 and keep the layer
/// and TID fields; the FU header follows as a third octet.
#[derive(Debug, Copy, Clone, Default)]
pub struct H265;

impl NalCodec for H265 {
    #[inline]
    fn format(&self) -> MediaFormat {
        MediaFormat::H265
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
        (nal[0] >> 1) & 0x3f
    }

    fn fu_nal_header(&self, nal: &[u8]) -> Vec<u8> {
        vec![(nal[0] & 0x81) | (FU << 1), nal[1]]
    }

    fn classify_fragment(&self, payload: &[u8]) -> FragmentType {
        if ((payload[0] >> 1) & 0x3f) != FU {
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
            (payload[0] & 0x81) | ((payload[2] & 0x3f) << 1),
            payload[1],
        ]
    }

    fn nal_kind(&self, nal: &[u8]) -> NalKind {
        match (nal[0] >> 1) & 0x3f {
            // IRAP pictures (BLA, IDR, CRA)
            16..=21 => NalKind::Intra,
            0..=15 => NalKind::Inter,
            _ => NalKind::Other,
        }
    }

    fn is_aggregation(&self, payload: &[u8]) -> bool {
        ((payload[0] >> 1) & 0x3f) == AP
    }
}
