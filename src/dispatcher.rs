//! Packet dispatcher.
//!
//! The dispatcher owns one UDP socket and one ordered chain of packet
//! handlers. A dedicated reader thread pulls datagrams from the socket and
//! walks the chain for each of them; the layers of the engine (ZRTP, SRTP,
//! RTCP, RTP, media format) stay isolated from each other because every
//! handler only claims the traffic belonging to its layer. Completed frames
//! are either handed to an installed receive hook or queued for
//! [`PacketDispatcher::pull_frame`].

use std::{
    collections::VecDeque,
    io,
    mem,
    net::{SocketAddr, UdpSocket},
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

use bytes::Bytes;
use log::{debug, error};

use crate::{
    error::RtpError,
    frame::MediaFrame,
    rtp::RtpPacket,
    runner::{ActiveFlag, Runner},
};

/// Timeout of a single socket wait in the reader loop.
const SOCKET_WAIT: Duration = Duration::from_micros(1_500);

/// Size of the stack-resident datagram buffer.
const RECV_BUFFER_LEN: usize = 8_192;

/// Polling granularity of the blocking [`PacketDispatcher::pull_frame`].
const PULL_WAIT: Duration = Duration::from_millis(20);

/// Polling granularity of [`PacketDispatcher::pull_frame_timeout`].
const PULL_TIMEOUT_WAIT: Duration = Duration::from_millis(1);

/// Result of one handler invocation.
pub enum HandlerStatus {
    /// The packet was fully handled; no further handlers are called.
    Handled,

    /// The handler completed one or more frames; they are delivered and no
    /// further handlers are called.
    ///
    /// A datagram usually completes a single frame, but an aggregation
    /// packet can finish several at once.
    Ready(Vec<MediaFrame>),

    /// The handler transformed the packet in place; the next handler
    /// proceeds with the modified packet.
    Modified,

    /// The packet does not belong to the handler's layer.
    NotHandled,
}

/// State shared by the handlers of one datagram.
///
/// Handlers may replace the datagram bytes (e.g. an SRTP transform) or leave
/// a parsed RTP packet behind for the handlers that follow them in the
/// chain.
pub struct HandlerContext {
    data: Bytes,
    source: SocketAddr,
    packet: Option<RtpPacket>,
}

impl HandlerContext {
    /// Create a new context for a received datagram.
    pub fn new(data: Bytes, source: SocketAddr) -> Self {
        Self {
            data,
            source,
            packet: None,
        }
    }

    /// Get the datagram bytes.
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Replace the datagram bytes.
    #[inline]
    pub fn replace_data(&mut self, data: Bytes) {
        self.data = data;
    }

    /// Get the source network address of the datagram.
    #[inline]
    pub fn source(&self) -> SocketAddr {
        self.source
    }

    /// Get the parsed RTP packet (if a previous handler left one behind).
    #[inline]
    pub fn packet(&self) -> Option<&RtpPacket> {
        self.packet.as_ref()
    }

    /// Leave a parsed RTP packet behind for the following handlers.
    #[inline]
    pub fn set_packet(&mut self, packet: RtpPacket) {
        self.packet = Some(packet);
    }

    /// Take the parsed RTP packet.
    #[inline]
    pub fn take_packet(&mut self) -> Option<RtpPacket> {
        self.packet.take()
    }
}

/// One layer of the receive chain.
///
/// Handlers are invoked in installation order for every received datagram;
/// returning an error marks the datagram as corrupted and drops it.
pub trait PacketHandler: Send {
    /// Process a given datagram.
    fn handle(&mut self, ctx: &mut HandlerContext) -> Result<HandlerStatus, RtpError>;
}

/// Packet handler backed by a closure.
pub struct FnHandler<F> {
    inner: F,
}

impl<F> FnHandler<F>
where
    F: FnMut(&mut HandlerContext) -> Result<HandlerStatus, RtpError> + Send,
{
    /// Create a new handler from a given closure.
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

impl<F> PacketHandler for FnHandler<F>
where
    F: FnMut(&mut HandlerContext) -> Result<HandlerStatus, RtpError> + Send,
{
    #[inline]
    fn handle(&mut self, ctx: &mut HandlerContext) -> Result<HandlerStatus, RtpError> {
        (self.inner)(ctx)
    }
}

/// Receive hook taking ownership of delivered frames.
pub type ReceiveHook = Box<dyn FnMut(MediaFrame) + Send>;

/// Queue of completed frames awaiting a pull.
struct FrameFifo {
    frames: Mutex<VecDeque<MediaFrame>>,
    available: Condvar,
}

impl FrameFifo {
    fn new() -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Append a frame and wake one waiting puller.
    fn push(&self, frame: MediaFrame) {
        self.frames.lock().unwrap().push_back(frame);

        self.available.notify_one();
    }

    /// Wake all waiting pullers.
    fn wake_all(&self) {
        let _frames = self.frames.lock().unwrap();

        self.available.notify_all();
    }

    /// Wait until a frame is available or the dispatcher goes inactive.
    fn pull(&self, active: &ActiveFlag) -> Option<MediaFrame> {
        let mut frames = self.frames.lock().unwrap();

        loop {
            if let Some(frame) = frames.pop_front() {
                return Some(frame);
            }

            if !active.is_active() {
                return None;
            }

            frames = self.available.wait_timeout(frames, PULL_WAIT).unwrap().0;
        }
    }

    /// Wait until a frame is available, the dispatcher goes inactive or the
    /// timeout expires.
    fn pull_timeout(&self, active: &ActiveFlag, timeout: Duration) -> Option<MediaFrame> {
        let deadline = Instant::now() + timeout;

        let mut frames = self.frames.lock().unwrap();

        loop {
            if let Some(frame) = frames.pop_front() {
                return Some(frame);
            }

            if !active.is_active() {
                return None;
            }

            let now = Instant::now();

            if now >= deadline {
                return None;
            }

            let wait = PULL_TIMEOUT_WAIT.min(deadline - now);

            frames = self.available.wait_timeout(frames, wait).unwrap().0;
        }
    }
}

/// Receive-side packet dispatcher of a single stream.
pub struct PacketDispatcher {
    runner: Runner,
    handlers: Vec<Box<dyn PacketHandler>>,
    hook: Option<ReceiveHook>,
    fifo: Arc<FrameFifo>,
}

impl PacketDispatcher {
    /// Create a new dispatcher with an empty handler chain.
    pub fn new() -> Self {
        Self {
            runner: Runner::new(),
            handlers: Vec::new(),
            hook: None,
            fifo: Arc::new(FrameFifo::new()),
        }
    }

    /// Append a handler to the chain.
    ///
    /// Handlers can be installed only before the dispatcher is started; the
    /// chain is read-only while the reader thread runs.
    pub fn install_handler(&mut self, handler: Box<dyn PacketHandler>) -> Result<(), RtpError> {
        if self.runner.active() {
            return Err(RtpError::InvalidValue);
        }

        self.handlers.push(handler);

        Ok(())
    }

    /// Install a receive hook.
    ///
    /// The hook runs on the dispatcher thread and takes ownership of every
    /// completed frame; no frames are queued for `pull_frame` while a hook
    /// is installed. The hook must not block.
    pub fn install_receive_hook<F>(&mut self, hook: F) -> Result<(), RtpError>
    where
        F: FnMut(MediaFrame) + Send + 'static,
    {
        if self.runner.active() {
            return Err(RtpError::InvalidValue);
        }

        self.hook = Some(Box::new(hook));

        Ok(())
    }

    /// Start the reader thread on a given socket.
    pub fn start(&mut self, socket: UdpSocket) -> Result<(), RtpError> {
        socket
            .set_read_timeout(Some(SOCKET_WAIT))
            .map_err(|_| RtpError::Generic)?;

        let handlers = mem::take(&mut self.handlers);
        let hook = self.hook.take();
        let fifo = self.fifo.clone();

        self.runner.start("pkt-dispatcher", move |active| {
            run(&socket, handlers, hook, &fifo, &active);
        })
    }

    /// Stop the dispatcher.
    ///
    /// The method returns only after the reader thread has fully exited; no
    /// handler invocations are possible afterwards.
    pub fn stop(&mut self) -> Result<(), RtpError> {
        self.runner.active_flag().deactivate();

        self.fifo.wake_all();

        self.runner.stop()
    }

    /// Check if the reader thread is running.
    pub fn active(&self) -> bool {
        self.runner.active()
    }

    /// Pull the next completed frame.
    ///
    /// The call blocks until a frame arrives or the dispatcher becomes
    /// inactive; `None` is returned in the latter case.
    pub fn pull_frame(&self) -> Option<MediaFrame> {
        self.fifo.pull(&self.runner.active_flag())
    }

    /// Pull the next completed frame with a timeout.
    ///
    /// `None` is returned when the timeout expires or the dispatcher becomes
    /// inactive.
    pub fn pull_frame_timeout(&self, timeout: Duration) -> Option<MediaFrame> {
        self.fifo.pull_timeout(&self.runner.active_flag(), timeout)
    }
}

impl Default for PacketDispatcher {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// Reader thread body.
fn run(
    socket: &UdpSocket,
    mut handlers: Vec<Box<dyn PacketHandler>>,
    mut hook: Option<ReceiveHook>,
    fifo: &FrameFifo,
    active: &ActiveFlag,
) {
    let mut buffer = [0u8; RECV_BUFFER_LEN];

    while active.is_active() {
        match socket.recv_from(&mut buffer) {
            Ok((len, source)) => {
                let data = Bytes::copy_from_slice(&buffer[..len]);

                dispatch(&mut handlers, &mut hook, fifo, data, source);
            }
            Err(err) if is_transient(&err) => (),
            Err(err) => {
                error!("socket receive failed, dispatcher cannot continue: {}", err);

                break;
            }
        }
    }

    // pullers must not stay parked when the reader dies on its own
    active.deactivate();

    fifo.wake_all();
}

/// Check if a receive error only indicates an empty socket.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Walk the handler chain for one datagram.
fn dispatch(
    handlers: &mut [Box<dyn PacketHandler>],
    hook: &mut Option<ReceiveHook>,
    fifo: &FrameFifo,
    data: Bytes,
    source: SocketAddr,
) {
    let mut ctx = HandlerContext::new(data, source);

    for handler in handlers.iter_mut() {
        match handler.handle(&mut ctx) {
            Ok(HandlerStatus::Handled) => break,
            Ok(HandlerStatus::Ready(frames)) => {
                for frame in frames {
                    deliver(hook, fifo, frame);
                }

                break;
            }
            Ok(HandlerStatus::Modified) | Ok(HandlerStatus::NotHandled) => (),
            Err(err) => {
                debug!("dropping a corrupted packet: {}", err);

                break;
            }
        }
    }
}

/// Hand a completed frame over to the user.
fn deliver(hook: &mut Option<ReceiveHook>, fifo: &FrameFifo, frame: MediaFrame) {
    if let Some(hook) = hook.as_mut() {
        hook(frame);
    } else {
        fifo.push(frame);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::UdpSocket,
        sync::{
            atomic::{AtomicUsize, Ordering},
            mpsc, Arc, Mutex,
        },
        thread,
        time::Duration,
    };

    use bytes::{Bytes, BytesMut};

    use crate::{
        formats::{generic::GenericDepacketizer, h264::H264, MediaReceiver, NalReassembler},
        frame::MediaFormat,
        rtp::{RtpPacket, RtpReceiver},
        zrtp::{self, ZrtpFrame},
    };

    use super::{FnHandler, HandlerStatus, PacketDispatcher};

    fn encode(packet: &RtpPacket) -> Vec<u8> {
        let mut buf = BytesMut::new();

        packet.encode(&mut buf);

        buf.to_vec()
    }

    #[test]
    fn test_handler_chain_order() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();

        let log = Arc::new(Mutex::new(Vec::<&'static str>::new()));

        let mut dispatcher = PacketDispatcher::new();

        let chain_log = log.clone();

        dispatcher
            .install_handler(Box::new(FnHandler::new(move |ctx| {
                if zrtp::is_zrtp(ctx.data()) {
                    chain_log.lock().unwrap().push("zrtp");

                    Ok(HandlerStatus::Handled)
                } else {
                    chain_log.lock().unwrap().push("zrtp-pass");

                    Ok(HandlerStatus::NotHandled)
                }
            })))
            .unwrap();

        let chain_log = log.clone();

        dispatcher
            .install_handler(Box::new(FnHandler::new(move |ctx| {
                // identity "decryption"
                let data = ctx.data().clone();

                ctx.replace_data(data);

                chain_log.lock().unwrap().push("srtp");

                Ok(HandlerStatus::Modified)
            })))
            .unwrap();

        dispatcher
            .install_handler(Box::new(RtpReceiver::new([96u8])))
            .unwrap();

        dispatcher
            .install_handler(Box::new(MediaReceiver::new(NalReassembler::new(H264, 96))))
            .unwrap();

        dispatcher.start(socket).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

        // a ZRTP datagram is consumed by the first handler
        let mut buf = BytesMut::new();

        ZrtpFrame::new(1, 2, Bytes::from_static(b"Hello   "))
            .unwrap()
            .encode(&mut buf);

        sender.send_to(&buf, addr).unwrap();

        // a valid RTP datagram passes ZRTP and SRTP and completes in the
        // media handler
        let packet = RtpPacket::new()
            .with_payload_type(96)
            .with_sequence_number(3)
            .with_timestamp(1_000)
            .with_marker(true)
            .with_ssrc(9)
            .with_payload(Bytes::from_static(&[0x65, 1, 2, 3]), 0);

        sender.send_to(&encode(&packet), addr).unwrap();

        let frame = dispatcher
            .pull_frame_timeout(Duration::from_secs(2))
            .expect("one frame must be delivered");

        assert_eq!(frame.format(), MediaFormat::H264);
        assert_eq!(frame.payload().as_ref(), &[0x65, 1, 2, 3]);
        assert_eq!(frame.timestamp(), 1_000);
        assert_eq!(frame.source(), Some(sender.local_addr().unwrap()));

        // exactly one frame
        assert!(dispatcher
            .pull_frame_timeout(Duration::from_millis(50))
            .is_none());

        dispatcher.stop().unwrap();

        let log = log.lock().unwrap();

        assert_eq!(log.as_slice(), &["zrtp", "zrtp-pass", "srtp"]);
    }

    #[test]
    fn test_stop_handshake() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();

        let invocations = Arc::new(AtomicUsize::new(0));

        let mut dispatcher = PacketDispatcher::new();

        let counter = invocations.clone();

        dispatcher
            .install_handler(Box::new(FnHandler::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);

                Ok(HandlerStatus::Handled)
            })))
            .unwrap();

        dispatcher.start(socket).unwrap();

        assert!(dispatcher.active());

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

        sender.send_to(b"ping", addr).unwrap();

        thread::sleep(Duration::from_millis(50));

        assert_eq!(invocations.load(Ordering::SeqCst), 1);

        let worker = thread::spawn(move || {
            dispatcher.stop().unwrap();

            assert!(!dispatcher.active());

            dispatcher
        });

        let dispatcher = worker.join().unwrap();

        // the reader has fully exited, no handler invocations are possible
        sender.send_to(b"ping", addr).unwrap();

        thread::sleep(Duration::from_millis(50));

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert!(!dispatcher.active());
    }

    #[test]
    fn test_receive_hook_delivery() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();

        let (tx, rx) = mpsc::channel();

        let mut dispatcher = PacketDispatcher::new();

        dispatcher
            .install_handler(Box::new(RtpReceiver::new([8u8])))
            .unwrap();

        dispatcher
            .install_handler(Box::new(MediaReceiver::new(GenericDepacketizer::new(8))))
            .unwrap();

        dispatcher
            .install_receive_hook(move |frame| {
                tx.send(frame).unwrap_or_default();
            })
            .unwrap();

        dispatcher.start(socket).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

        let packet = RtpPacket::new()
            .with_payload_type(8)
            .with_sequence_number(1)
            .with_payload(Bytes::from_static(b"audio"), 0);

        sender.send_to(&encode(&packet), addr).unwrap();

        let frame = rx.recv_timeout(Duration::from_secs(2)).unwrap();

        assert_eq!(frame.payload().as_ref(), b"audio");

        // hooked frames bypass the pull queue
        assert!(dispatcher
            .pull_frame_timeout(Duration::from_millis(20))
            .is_none());

        dispatcher.stop().unwrap();
    }

    #[test]
    fn test_pull_from_inactive_dispatcher() {
        let dispatcher = PacketDispatcher::new();

        assert!(dispatcher.pull_frame().is_none());
        assert!(dispatcher
            .pull_frame_timeout(Duration::from_millis(10))
            .is_none());
    }
}
