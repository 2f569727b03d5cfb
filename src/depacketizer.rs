//! Common types for RTP to media framing.

use crate::rtp::RtpPacket;

/// Common trait for de-packetizers.
///
/// Depacketizers are responsible for converting RTP packets into media frames.
///
/// # Usage
/// 1. Push an RTP packet into the depacketizer.
/// 2. Take all media frames from the depacketizer.
/// 3. Repeat from (1) if needed.
/// 4. Flush the depacketizer.
/// 5. Take all media frames from the depacketizer.
pub trait Depacketizer {
    type Frame;
    type Error;

    /// Process a given RTP packet.
    fn push(&mut self, packet: RtpPacket) -> Result<(), Self::Error>;

    /// Flush the depacketizer.
    fn flush(&mut self) -> Result<(), Self::Error>;

    /// Take the next available media frame.
    fn take(&mut self) -> Result<Option<Self::Frame>, Self::Error>;
}

impl<T> Depacketizer for Box<T>
where
    T: Depacketizer + ?Sized,
{
    type Frame = T::Frame;
    type Error = T::Error;

    #[inline]
    fn push(&mut self, packet: RtpPacket) -> Result<(), Self::Error> {
        <T as Depacketizer>::push(self, packet)
    }

    #[inline]
    fn flush(&mut self) -> Result<(), Self::Error> {
        <T as Depacketizer>::flush(self)
    }

    #[inline]
    fn take(&mut self) -> Result<Option<Self::Frame>, Self::Error> {
        <T as Depacketizer>::take(self)
    }
}
