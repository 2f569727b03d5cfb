//! Opus audio (de)packetizer as defined in RFC 7587.
//!
//! Each RTP packet carries exactly one Opus packet. RFC 7587 defines no
//! payload header; the one octet header slot from earlier drafts stays
//! reserved and unused.

use crate::{
    depacketizer::Depacketizer,
    error::RtpError,
    frame::{EncodedFrame, MediaFormat, MediaFrame},
    packetizer::Packetizer,
    rtp::{RtpPacket, RtpSequencer},
};

/// RTP clock rate.
pub const CLOCK_RATE: u32 = 48_000;

/// Opus packetizer.
pub struct OpusPacketizer {
    sequencer: RtpSequencer,
    packet: Option<RtpPacket>,
}

impl OpusPacketizer {
    /// Create a new Opus packetizer.
    #[inline]
    pub const fn new(sequencer: RtpSequencer) -> Self {
        Self {
            sequencer,
            packet: None,
        }
    }
}

impl Packetizer for OpusPacketizer {
    type Frame = EncodedFrame;
    type Error = RtpError;

    fn push(&mut self, frame: EncodedFrame) -> Result<(), Self::Error> {
        assert!(self.packet.is_none());

        let timestamp = frame
            .timestamp()
            .unwrap_or_else(|| self.sequencer.timestamp_now());

        let data = frame.into_data();

        if data.is_empty() {
            return Err(RtpError::InvalidValue);
        }

        let header = self.sequencer.next_header(timestamp, true);

        self.packet = Some(RtpPacket::new().with_header(header).with_payload(data, 0));

        Ok(())
    }

    #[inline]
    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    #[inline]
    fn take(&mut self) -> Result<Option<RtpPacket>, Self::Error> {
        Ok(self.packet.take())
    }
}

/// Opus depacketizer.
pub struct OpusDepacketizer {
    payload_type: u8,
    frame: Option<MediaFrame>,
}

impl OpusDepacketizer {
    /// Create a new Opus depacketizer.
    #[inline]
    pub const fn new(payload_type: u8) -> Self {
        Self {
            payload_type,
            frame: None,
        }
    }
}

impl Depacketizer for OpusDepacketizer {
    type Frame = MediaFrame;
    type Error = RtpError;

    fn push(&mut self, packet: RtpPacket) -> Result<(), Self::Error> {
        if packet.payload_type() != self.payload_type {
            return Ok(());
        }

        let payload = packet.stripped_payload();

        let header = packet.header().clone().with_padding(false);

        self.frame = Some(
            MediaFrame::new(MediaFormat::Opus)
                .with_header(header)
                .with_payload(payload)
                .with_padding_len(packet.padding()),
        );

        Ok(())
    }

    #[inline]
    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    #[inline]
    fn take(&mut self) -> Result<Option<Self::Frame>, Self::Error> {
        Ok(self.frame.take())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::{
        depacketizer::Depacketizer, frame::EncodedFrame, packetizer::Packetizer,
        rtp::RtpSequencer,
    };

    use super::{OpusDepacketizer, OpusPacketizer};

    #[test]
    fn test_one_packet_per_frame() {
        let sequencer = RtpSequencer::new(111, 48_000).with_sequence_number(7);

        let mut packetizer = OpusPacketizer::new(sequencer);
        let mut depacketizer = OpusDepacketizer::new(111);

        packetizer
            .push(EncodedFrame::new(Bytes::from_static(b"opus-data")).with_timestamp(960))
            .unwrap();

        let packet = packetizer.take().unwrap().unwrap();

        assert!(packetizer.take().unwrap().is_none());

        assert!(packet.marker());
        assert_eq!(packet.sequence_number(), 7);
        assert_eq!(packet.timestamp(), 960);

        depacketizer.push(packet).unwrap();

        let frame = depacketizer.take().unwrap().unwrap();

        assert_eq!(frame.payload().as_ref(), b"opus-data");
        assert_eq!(frame.timestamp(), 960);
    }

    #[test]
    fn test_foreign_payload_type_ignored() {
        let mut depacketizer = OpusDepacketizer::new(111);

        let packet = crate::rtp::RtpPacket::new()
            .with_payload_type(96)
            .with_payload(Bytes::from_static(b"x"), 0);

        depacketizer.push(packet).unwrap();

        assert!(depacketizer.take().unwrap().is_none());
    }
}
