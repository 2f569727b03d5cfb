//! Send-side frame queue.
//!
//! The queue gathers the scatter buffers of one access unit (codec headers
//! and payload slices) and seals them into RTP packets on flush. Payload
//! slices are staged without copying; the chunks of each segment are joined
//! only once, when the packet payload is materialized.

use bytes::{Bytes, BytesMut};

use crate::{
    error::RtpError,
    rtp::{RtpPacket, RtpSequencer},
};

/// Preallocated fragmentation unit header variants for one NAL unit.
///
/// The three variants differ only in the start/end bits; the payload type
/// bits carry the type of the fragmented NAL unit.
#[derive(Debug, Copy, Clone)]
pub struct FuHeaders {
    pub start: u8,
    pub middle: u8,
    pub end: u8,
}

impl FuHeaders {
    /// Initialize the header variants for a given NAL unit type.
    #[inline]
    pub const fn new(nal_type: u8) -> Self {
        Self {
            start: (1 << 7) | nal_type,
            middle: nal_type,
            end: (1 << 6) | nal_type,
        }
    }
}

/// One staged RTP payload composed of an ordered chunk list.
struct Segment {
    chunks: Vec<Bytes>,
}

impl Segment {
    /// Join the chunks into a single payload buffer.
    fn into_payload(self) -> Bytes {
        if self.chunks.len() == 1 {
            return self.chunks.into_iter().next().unwrap();
        }

        let len = self.chunks.iter().map(|c| c.len()).sum();

        let mut buf = BytesMut::with_capacity(len);

        for chunk in &self.chunks {
            buf.extend_from_slice(chunk);
        }

        buf.freeze()
    }
}

/// Scatter/gather staging area for the packets of one access unit.
pub struct FrameQueue {
    segments: Vec<Segment>,
}

impl FrameQueue {
    /// Create a new empty queue.
    #[inline]
    pub const fn new() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Stage one RTP payload for the current access unit.
    ///
    /// The chunks are joined in order when the queue is flushed.
    pub fn enqueue_message<T>(&mut self, chunks: T) -> Result<(), RtpError>
    where
        T: Into<Vec<Bytes>>,
    {
        let chunks = chunks.into();

        if chunks.is_empty() || chunks.iter().all(|c| c.is_empty()) {
            return Err(RtpError::InvalidValue);
        }

        self.segments.push(Segment { chunks });

        Ok(())
    }

    /// Get the number of staged payloads.
    #[inline]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Check if the queue is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Discard all staged payloads.
    #[inline]
    pub fn clear(&mut self) {
        self.segments.clear();
    }

    /// Seal the current access unit into RTP packets.
    ///
    /// Each staged payload becomes one packet. All packets share the given
    /// timestamp and carry consecutive sequence numbers taken from the
    /// sequencer; the last packet of the access unit has the marker bit set.
    /// The queue is empty after this call.
    pub fn flush_queue(&mut self, sequencer: &mut RtpSequencer, timestamp: u32) -> Vec<RtpPacket> {
        let count = self.segments.len();

        let mut packets = Vec::with_capacity(count);

        for (i, segment) in self.segments.drain(..).enumerate() {
            let marker = (i + 1) == count;

            let header = sequencer.next_header(timestamp, marker);

            let packet = RtpPacket::new()
                .with_header(header)
                .with_payload(segment.into_payload(), 0);

            packets.push(packet);
        }

        packets
    }
}

impl Default for FrameQueue {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
