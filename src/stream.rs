//! Media stream facade.
//!
//! A [`MediaStream`] ties together the send path (packetizer, frame queue,
//! socket) and the receive path (dispatcher, handler chain, reassembly) of
//! one RTP session over a caller-supplied UDP socket. Creating and binding
//! the socket is the caller's business; the stream only clones it for its
//! worker threads.

use std::{
    net::{SocketAddr, UdpSocket},
    time::Duration,
};

use bytes::{Bytes, BytesMut};

use crate::{
    dispatcher::{PacketDispatcher, PacketHandler},
    error::RtpError,
    formats::{
        GenericDepacketizer, GenericPacketizer, MediaReceiver, NalCodec, NalReassembler,
        OpusDepacketizer, OpusPacketizer, VideoPacketizer, H264, H265, H266,
    },
    frame::{EncodedFrame, MediaFormat, MediaFrame},
    packetizer::Packetizer,
    rtcp::RtcpEngine,
    rtp::{RtpPacket, RtpReceiver, RtpSequencer},
    MAX_PAYLOAD,
};

/// Stream configuration.
#[derive(Clone)]
pub struct StreamConfig {
    payload_type: u8,
    clock_rate: Option<u32>,
    ssrc: Option<u32>,
    expected_ssrc: Option<u32>,
    max_payload: usize,
    probation_capacity: usize,
    reassembly_window: Option<u32>,
    max_sources: usize,
    rtcp: bool,
    bandwidth: u32,
    cname: Option<String>,
}

impl StreamConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self {
            payload_type: 96,
            clock_rate: None,
            ssrc: None,
            expected_ssrc: None,
            max_payload: MAX_PAYLOAD,
            probation_capacity: 16,
            reassembly_window: None,
            max_sources: 64,
            rtcp: false,
            bandwidth: 64_000,
            cname: None,
        }
    }

    /// Set the RTP payload type (default 96).
    ///
    /// # Panics
    /// The method panics if the payload type is greater than 127.
    pub fn with_payload_type(mut self, payload_type: u8) -> Self {
        assert!(payload_type < 128);

        self.payload_type = payload_type;
        self
    }

    /// Override the RTP clock rate.
    ///
    /// The default is the clock rate of the stream format.
    pub fn with_clock_rate(mut self, clock_rate: u32) -> Self {
        self.clock_rate = Some(clock_rate);
        self
    }

    /// Set the sender SSRC (random by default).
    pub fn with_ssrc(mut self, ssrc: u32) -> Self {
        self.ssrc = Some(ssrc);
        self
    }

    /// Accept RTP packets only from a given remote SSRC.
    pub fn with_expected_ssrc(mut self, ssrc: u32) -> Self {
        self.expected_ssrc = Some(ssrc);
        self
    }

    /// Set the payload limit of a single outgoing packet.
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Set the capacity of the reassembly probation zone (in fragments).
    pub fn with_probation_capacity(mut self, capacity: usize) -> Self {
        self.probation_capacity = capacity;
        self
    }

    /// Set the reassembly staleness window in RTP timestamp units.
    ///
    /// The default is one second worth of RTP time.
    pub fn with_reassembly_window(mut self, window: u32) -> Self {
        self.reassembly_window = Some(window);
        self
    }

    /// Set the maximum number of tracked remote sources.
    pub fn with_max_sources(mut self, max_sources: usize) -> Self {
        self.max_sources = max_sources;
        self
    }

    /// Enable or disable the RTCP engine (disabled by default).
    pub fn with_rtcp(mut self, rtcp: bool) -> Self {
        self.rtcp = rtcp;
        self
    }

    /// Set the session bandwidth in bits per second (default 64 kbit/s).
    ///
    /// The RTCP report interval is derived from this value.
    pub fn with_bandwidth(mut self, bandwidth: u32) -> Self {
        self.bandwidth = bandwidth;
        self
    }

    /// Set the canonical name used in RTCP source descriptions.
    ///
    /// A random name is generated by default.
    pub fn with_cname<T>(mut self, cname: T) -> Self
    where
        T: Into<String>,
    {
        self.cname = Some(cname.into());
        self
    }
}

impl Default for StreamConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// Packetizer of any supported format.
enum AnyPacketizer {
    Generic(GenericPacketizer),
    Opus(OpusPacketizer),
    H264(VideoPacketizer<H264>),
    H265(VideoPacketizer<H265>),
    H266(VideoPacketizer<H266>),
}

impl Packetizer for AnyPacketizer {
    type Frame = EncodedFrame;
    type Error = RtpError;

    fn push(&mut self, frame: EncodedFrame) -> Result<(), Self::Error> {
        match self {
            Self::Generic(p) => p.push(frame),
            Self::Opus(p) => p.push(frame),
            Self::H264(p) => p.push(frame),
            Self::H265(p) => p.push(frame),
            Self::H266(p) => p.push(frame),
        }
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        match self {
            Self::Generic(p) => p.flush(),
            Self::Opus(p) => p.flush(),
            Self::H264(p) => p.flush(),
            Self::H265(p) => p.flush(),
            Self::H266(p) => p.flush(),
        }
    }

    fn take(&mut self) -> Result<Option<RtpPacket>, Self::Error> {
        match self {
            Self::Generic(p) => p.take(),
            Self::Opus(p) => p.take(),
            Self::H264(p) => p.take(),
            Self::H265(p) => p.take(),
            Self::H266(p) => p.take(),
        }
    }
}

/// One RTP media session over a UDP socket.
pub struct MediaStream {
    format: MediaFormat,
    config: StreamConfig,
    socket: UdpSocket,
    peer: SocketAddr,
    ssrc: u32,
    packetizer: AnyPacketizer,
    dispatcher: PacketDispatcher,
    rtcp: Option<RtcpEngine>,
    started: bool,
}

impl MediaStream {
    /// Create a new stream.
    ///
    /// The socket must be bound already; outgoing packets are sent to the
    /// given peer address. The `Zrtp` format tag is not a media format and
    /// is refused.
    pub fn new(
        socket: UdpSocket,
        peer: SocketAddr,
        format: MediaFormat,
        config: StreamConfig,
    ) -> Result<Self, RtpError> {
        if format == MediaFormat::Zrtp {
            return Err(RtpError::InvalidValue);
        }

        let clock_rate = config.clock_rate.unwrap_or_else(|| format.clock_rate());

        let mut sequencer = RtpSequencer::new(config.payload_type, clock_rate);

        if let Some(ssrc) = config.ssrc {
            sequencer = sequencer.with_ssrc(ssrc);
        }

        let ssrc = sequencer.ssrc();

        let packetizer = match format {
            MediaFormat::Generic => AnyPacketizer::Generic(GenericPacketizer::new(sequencer)),
            MediaFormat::Opus => AnyPacketizer::Opus(OpusPacketizer::new(sequencer)),
            MediaFormat::H264 => AnyPacketizer::H264(
                VideoPacketizer::new(H264, sequencer).with_max_payload(config.max_payload),
            ),
            MediaFormat::H265 => AnyPacketizer::H265(
                VideoPacketizer::new(H265, sequencer).with_max_payload(config.max_payload),
            ),
            MediaFormat::H266 => AnyPacketizer::H266(
                VideoPacketizer::new(H266, sequencer).with_max_payload(config.max_payload),
            ),
            MediaFormat::Zrtp => unreachable!(),
        };

        let rtcp = if config.rtcp {
            let cname = config
                .cname
                .clone()
                .unwrap_or_else(|| format!("{:016x}", rand::random::<u64>()));

            Some(RtcpEngine::new(ssrc, cname, clock_rate, config.bandwidth))
        } else {
            None
        };

        let res = Self {
            format,
            config,
            socket,
            peer,
            ssrc,
            packetizer,
            dispatcher: PacketDispatcher::new(),
            rtcp,
            started: false,
        };

        Ok(res)
    }

    /// Get the stream format.
    #[inline]
    pub fn format(&self) -> MediaFormat {
        self.format
    }

    /// Get the sender SSRC.
    #[inline]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Get the RTCP engine (if enabled).
    #[inline]
    pub fn rtcp(&self) -> Option<&RtcpEngine> {
        self.rtcp.as_ref()
    }

    /// Append a handler to the receive chain.
    ///
    /// User handlers (e.g. ZRTP and SRTP) run before the built-in RTCP, RTP
    /// and media layers, in installation order. Handlers can be installed
    /// only before the stream is started.
    pub fn install_handler(&mut self, handler: Box<dyn PacketHandler>) -> Result<(), RtpError> {
        if self.started {
            return Err(RtpError::InvalidValue);
        }

        self.dispatcher.install_handler(handler)
    }

    /// Install a receive hook.
    ///
    /// The hook runs on the dispatcher thread and takes ownership of every
    /// completed frame; `pull_frame` never returns anything while a hook is
    /// installed.
    pub fn install_receive_hook<F>(&mut self, hook: F) -> Result<(), RtpError>
    where
        F: FnMut(MediaFrame) + Send + 'static,
    {
        if self.started {
            return Err(RtpError::InvalidValue);
        }

        self.dispatcher.install_receive_hook(hook)
    }

    /// Start the stream.
    ///
    /// The built-in receive layers are appended to the handler chain, the
    /// dispatcher thread is spawned and, if enabled, the RTCP engine timer
    /// starts.
    pub fn start(&mut self) -> Result<(), RtpError> {
        if self.started {
            return Err(RtpError::InvalidValue);
        }

        if let Some(rtcp) = &self.rtcp {
            self.dispatcher.install_handler(Box::new(rtcp.receiver()))?;
        }

        let rtp = RtpReceiver::new([self.config.payload_type])
            .with_expected_ssrc(self.config.expected_ssrc);

        self.dispatcher.install_handler(Box::new(rtp))?;

        if let Some(rtcp) = &self.rtcp {
            self.dispatcher.install_handler(Box::new(rtcp.rtp_tap()))?;
        }

        self.dispatcher.install_handler(self.media_receiver())?;

        if let Some(rtcp) = &mut self.rtcp {
            let socket = self.socket.try_clone().map_err(|_| RtpError::Generic)?;

            rtcp.start(socket, self.peer)?;
        }

        let socket = self.socket.try_clone().map_err(|_| RtpError::Generic)?;

        self.dispatcher.start(socket)?;

        self.started = true;

        Ok(())
    }

    /// Stop the stream.
    ///
    /// The method returns only after the dispatcher thread (and the RTCP
    /// timer, if enabled) have fully exited.
    pub fn stop(&mut self) -> Result<(), RtpError> {
        self.dispatcher.stop()?;

        if let Some(rtcp) = &mut self.rtcp {
            rtcp.stop()?;
        }

        Ok(())
    }

    /// Check if the stream is active.
    pub fn active(&self) -> bool {
        self.dispatcher.active()
    }

    /// Send an encoded media frame.
    ///
    /// Video frames are either Annex B byte streams or single raw NAL
    /// units. The RTP timestamp is derived from the stream clock.
    pub fn push_frame(&mut self, data: Bytes) -> Result<(), RtpError> {
        self.push(EncodedFrame::new(data))
    }

    /// Send an encoded media frame with an explicit RTP timestamp.
    pub fn push_frame_with_timestamp(&mut self, data: Bytes, timestamp: u32) -> Result<(), RtpError> {
        self.push(EncodedFrame::new(data).with_timestamp(timestamp))
    }

    /// Pull the next received frame.
    ///
    /// The call blocks until a frame arrives or the stream becomes inactive.
    pub fn pull_frame(&self) -> Option<MediaFrame> {
        self.dispatcher.pull_frame()
    }

    /// Pull the next received frame with a timeout.
    pub fn pull_frame_timeout(&self, timeout: Duration) -> Option<MediaFrame> {
        self.dispatcher.pull_frame_timeout(timeout)
    }

    /// Packetize and send one frame.
    fn push(&mut self, frame: EncodedFrame) -> Result<(), RtpError> {
        self.packetizer.push(frame)?;

        let mut buf = BytesMut::new();

        let mut res = Ok(());

        while let Some(packet) = self.packetizer.take()? {
            if res.is_err() {
                // drain the rest of the access unit, nothing else is sent
                continue;
            }

            buf.clear();

            packet.encode(&mut buf);

            match self.socket.send_to(&buf, self.peer) {
                Ok(_) => {
                    if let Some(rtcp) = &self.rtcp {
                        rtcp.process_outgoing(&packet);
                    }
                }
                Err(_) => res = Err(RtpError::SendFailed),
            }
        }

        res
    }

    /// Build the media layer of the receive chain.
    fn media_receiver(&self) -> Box<dyn PacketHandler> {
        let payload_type = self.config.payload_type;

        match self.format {
            MediaFormat::Generic => {
                Box::new(MediaReceiver::new(GenericDepacketizer::new(payload_type)))
            }
            MediaFormat::Opus => Box::new(MediaReceiver::new(OpusDepacketizer::new(payload_type))),
            MediaFormat::H264 => Box::new(MediaReceiver::new(self.reassembler(H264))),
            MediaFormat::H265 => Box::new(MediaReceiver::new(self.reassembler(H265))),
            MediaFormat::H266 => Box::new(MediaReceiver::new(self.reassembler(H266))),
            MediaFormat::Zrtp => unreachable!(),
        }
    }

    /// Build a reassembler configured for this stream.
    fn reassembler<C>(&self, codec: C) -> NalReassembler<C>
    where
        C: NalCodec,
    {
        let window = self
            .config
            .reassembly_window
            .unwrap_or_else(|| self.config.clock_rate.unwrap_or_else(|| self.format.clock_rate()));

        NalReassembler::new(codec, self.config.payload_type)
            .with_probation_capacity(self.config.probation_capacity)
            .with_reassembly_window(window)
            .with_max_sources(self.config.max_sources)
    }
}

#[cfg(test)]
mod tests {
    use std::{net::UdpSocket, time::Duration};

    use bytes::Bytes;

    use crate::frame::MediaFormat;

    use super::{MediaStream, StreamConfig};

    fn loopback_stream(format: MediaFormat, config: StreamConfig) -> MediaStream {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();

        let addr = socket.local_addr().unwrap();

        MediaStream::new(socket, addr, format, config).unwrap()
    }

    #[test]
    fn test_h264_loopback() {
        let mut stream = loopback_stream(MediaFormat::H264, StreamConfig::new());

        stream.start().unwrap();

        assert!(stream.active());

        let mut idr = vec![0x65u8];

        for i in 0..4_000usize {
            idr.push((i % 251) as u8);
        }

        let mut data = vec![0, 0, 0, 1];

        data.extend_from_slice(&idr);

        stream
            .push_frame_with_timestamp(Bytes::from(data), 3_000)
            .unwrap();

        let frame = stream
            .pull_frame_timeout(Duration::from_secs(2))
            .expect("the frame must come back");

        assert_eq!(frame.format(), MediaFormat::H264);
        assert_eq!(frame.payload().as_ref(), idr.as_slice());
        assert_eq!(frame.timestamp(), 3_000);
        assert_eq!(frame.ssrc(), stream.ssrc());

        stream.stop().unwrap();

        assert!(!stream.active());
    }

    #[test]
    fn test_opus_loopback_with_rtcp() {
        let config = StreamConfig::new()
            .with_payload_type(111)
            .with_rtcp(true)
            .with_cname("test@localhost");

        let mut stream = loopback_stream(MediaFormat::Opus, config);

        stream.start().unwrap();

        assert!(stream.rtcp().is_some());

        stream
            .push_frame_with_timestamp(Bytes::from_static(b"opus-frame"), 960)
            .unwrap();

        let frame = stream
            .pull_frame_timeout(Duration::from_secs(2))
            .expect("the frame must come back");

        assert_eq!(frame.format(), MediaFormat::Opus);
        assert_eq!(frame.payload().as_ref(), b"opus-frame");

        stream.stop().unwrap();
    }

    #[test]
    fn test_zrtp_is_not_a_media_format() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();

        let addr = socket.local_addr().unwrap();

        assert!(MediaStream::new(socket, addr, MediaFormat::Zrtp, StreamConfig::new()).is_err());
    }

    #[test]
    fn test_install_after_start_refused() {
        let mut stream = loopback_stream(MediaFormat::Generic, StreamConfig::new());

        stream.start().unwrap();

        assert!(stream.install_receive_hook(|_| ()).is_err());

        stream.stop().unwrap();
    }
}
