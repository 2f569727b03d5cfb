//! Error taxonomy shared by all components of the engine.

use std::fmt::{self, Display, Formatter};

/// Error returned by the transport engine.
///
/// This is a closed set; every fallible operation in the crate reports one of
/// these values. Packet-handler flow control (packet ready, packet modified,
/// packet not handled) is not an error and is expressed by
/// [`HandlerStatus`](crate::dispatcher::HandlerStatus) instead.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RtpError {
    /// Allocation failure or an exhausted internal buffer.
    Memory,

    /// Invalid argument or malformed input.
    InvalidValue,

    /// Unspecified failure (e.g. a corrupted packet).
    Generic,

    /// The operation cannot produce output yet; more input is needed.
    NotReady,

    /// The operation was interrupted before completion.
    Interrupted,

    /// The operation did not complete within the given time.
    Timeout,

    /// The underlying socket refused to send data.
    SendFailed,

    /// The underlying socket refused to receive data.
    RecvFailed,

    /// Packet authentication failed.
    AuthFailed,

    /// Two sources picked the same SSRC identifier.
    SsrcCollision,
}

impl Display for RtpError {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        let msg = match self {
            Self::Memory => "out of memory",
            Self::InvalidValue => "invalid value",
            Self::Generic => "generic error",
            Self::NotReady => "not ready",
            Self::Interrupted => "interrupted",
            Self::Timeout => "timed out",
            Self::SendFailed => "send failed",
            Self::RecvFailed => "receive failed",
            Self::AuthFailed => "authentication failed",
            Self::SsrcCollision => "SSRC collision",
        };

        f.write_str(msg)
    }
}

impl std::error::Error for RtpError {}
