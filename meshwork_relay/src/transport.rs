// The transport collaborator: the black-box datagram layer the networked
// endpoints drive.
//
// Everything below the frame bytes — connection detection, retransmission,
// congestion control — belongs to the transport. The endpoints only need
// the six operations of this trait: create a host, connect outward, service
// one round of events, send a frame, disconnect a peer, destroy the host.
//
// A `Transport` value doubles as the transport context: construct it once
// at process start and share it (behind an `Arc`) into every endpoint. Any
// library-wide setup/teardown lives in the implementation's constructor and
// `Drop`, not in a process-global counter.

use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use meshwork_protocol::DeliveryClass;
use thiserror::Error;

/// One event observed during a service round.
#[derive(Debug)]
pub enum TransportEvent<P> {
    /// A peer finished connecting. On a client host this is the connection
    /// to the server; on a server host, a newly arrived peer.
    Connected(P),
    /// A frame arrived from `peer`.
    Received { peer: P, frame: Vec<u8> },
    /// `peer` is gone, gracefully or not.
    Disconnected(P),
    /// Nothing happened within the timeout.
    Idle,
}

/// Resource failures reported by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to create transport host: {0}")]
    Host(String),

    #[error("failed to connect to {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),
}

/// Black-box reliable/unreliable datagram transport.
///
/// `Peer` is an opaque per-connection handle; the endpoints use it only as
/// a key (roster lookups) and as the address for sends and disconnects.
pub trait Transport: Send + Sync + 'static {
    type Host: Send + 'static;
    type Peer: Copy + Eq + Hash + Debug + Send + 'static;

    /// Create a host. `bind` of `None` means a connect-only host (client);
    /// `Some(address)` listens for incoming peers.
    fn create_host(
        &self,
        bind: Option<&str>,
        max_peers: usize,
        channels: usize,
    ) -> Result<Self::Host, TransportError>;

    /// Begin connecting `host` to a remote listener. The returned handle is
    /// valid immediately; a `Connected` event follows once the link is up.
    fn connect(&self, host: &mut Self::Host, remote: &str) -> Result<Self::Peer, TransportError>;

    /// Service one round of transport events, blocking at most `timeout`.
    fn service_once(&self, host: &mut Self::Host, timeout: Duration) -> TransportEvent<Self::Peer>;

    /// Send one frame to a peer.
    fn send(
        &self,
        peer: &Self::Peer,
        frame: &[u8],
        class: DeliveryClass,
    ) -> Result<(), TransportError>;

    /// Ask for a graceful disconnect. Both ends observe a `Disconnected`
    /// event once the transport completes it.
    fn disconnect_gracefully(&self, host: &mut Self::Host, peer: &Self::Peer);

    /// Release a host and anything still attached to it.
    fn destroy_host(&self, host: Self::Host);
}
