use meshwork_protocol::{PeerId, ProtocolError};
use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by the endpoint backends.
///
/// A policy rejecting a connection is deliberately absent: that is a normal
/// negative outcome, not an error.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A payload too large to ever fit a frame, rejected at enqueue time.
    #[error("payload of {len} bytes exceeds the {max}-byte frame payload limit")]
    Oversize { len: usize, max: usize },

    /// A loopback send addressed to a participant that cannot exist there.
    #[error("no participant {to} on a loopback endpoint")]
    InvalidTarget { to: PeerId },
}
