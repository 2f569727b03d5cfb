//! Passthrough (de)packetizer for opaque payloads.

use crate::{
    depacketizer::Depacketizer,
    error::RtpError,
    frame::{EncodedFrame, MediaFormat, MediaFrame},
    packetizer::Packetizer,
    rtp::{RtpPacket, RtpSequencer},
};

/// Generic packetizer mapping one frame to one RTP packet.
///
/// Frames larger than a single datagram are the caller's problem; the
/// packetizer performs no fragmentation.
pub struct GenericPacketizer {
    sequencer: RtpSequencer,
    packet: Option<RtpPacket>,
}

impl GenericPacketizer {
    /// Create a new generic packetizer.
    #[inline]
    pub const fn new(sequencer: RtpSequencer) -> Self {
        Self {
            sequencer,
            packet: None,
        }
    }
}

impl Packetizer for GenericPacketizer {
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

/// Generic depacketizer mapping one RTP packet to one frame.
pub struct GenericDepacketizer {
    payload_type: u8,
    frame: Option<MediaFrame>,
}

impl GenericDepacketizer {
    /// Create a new generic depacketizer.
    #[inline]
    pub const fn new(payload_type: u8) -> Self {
        Self {
            payload_type,
            frame: None,
        }
    }
}

impl Depacketizer for GenericDepacketizer {
    type Frame = MediaFrame;
    type Error = RtpError;

    fn push(&mut self, packet: RtpPacket) -> Result<(), Self::Error> {
        if packet.payload_type() != self.payload_type {
            return Ok(());
        }

        let payload = packet.stripped_payload();

        let header = packet.header().clone().with_padding(false);

        self.frame = Some(
            MediaFrame::new(MediaFormat::Generic)
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

    use super::{GenericDepacketizer, GenericPacketizer};

    #[test]
    fn test_passthrough_roundtrip() {
        let sequencer = RtpSequencer::new(8, 8_000).with_sequence_number(0);

        let mut packetizer = GenericPacketizer::new(sequencer);
        let mut depacketizer = GenericDepacketizer::new(8);

        packetizer
            .push(EncodedFrame::new(Bytes::from_static(&[1, 2, 3, 4])).with_timestamp(160))
            .unwrap();

        let packet = packetizer.take().unwrap().unwrap();

        depacketizer.push(packet).unwrap();

        let frame = depacketizer.take().unwrap().unwrap();

        assert_eq!(frame.payload().as_ref(), &[1, 2, 3, 4]);
        assert_eq!(frame.timestamp(), 160);
    }
}
