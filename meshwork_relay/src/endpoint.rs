// Shared endpoint lifecycle: the status state machine and the one trait all
// three backends implement.
//
// The point of the toolkit is that application code is written once against
// `Endpoint` and runs unchanged whether the other participants are across a
// network (client), hosted here (relay server), or absent entirely
// (loopback). The status machine is the part every backend shares:
//
//   NOT_ACTIVE -> ACTIVE          start()
//   ACTIVE     -> DISCONNECTING   stop()
//   DISCONNECTING -> NOT_ACTIVE   teardown complete (last peer drained, or
//                                 the drain grace period elapsed)
//
// A client can also drop straight from ACTIVE to NOT_ACTIVE when the remote
// end disconnects it. `start`/`stop` outside their valid source state are
// silent no-ops, never errors.

use std::time::Duration;

use meshwork_protocol::{DeliveryClass, Envelope, Packet, PeerId};

use crate::error::RelayError;

/// Per-endpoint lifecycle state. Not a network-wide property.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Active,
    Disconnecting,
    NotActive,
}

/// Upper bound on one transport service round. Short enough that a `stop()`
/// request is observed promptly by the worker.
pub(crate) const SERVICE_TIMEOUT: Duration = Duration::from_millis(10);

/// How long a disconnecting endpoint waits for peers to drain before it
/// forces the transition to `NotActive`.
pub(crate) const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// The unified surface of all three backends.
pub trait Endpoint {
    /// Bring the endpoint up. Only effective from `NotActive`: clears both
    /// queues, acquires the transport host, transitions to `Active`.
    /// Resource failures are returned synchronously and leave the endpoint
    /// `NotActive`. Calling on an already-running endpoint is a no-op.
    fn start(&mut self) -> Result<(), RelayError>;

    /// Request graceful teardown. Only effective from `Active`: transitions
    /// to `Disconnecting` and asks the transport to drop every known peer.
    /// Cooperative — the worker exits once drains complete or the grace
    /// period runs out. A no-op in any other state.
    fn stop(&self);

    /// Queue a payload for sending. `to` of [`PeerId::ALL`] broadcasts,
    /// [`PeerId::SERVER`] addresses the relay itself, any other id routes to
    /// that one participant. Payloads over [`meshwork_protocol::MAX_PAYLOAD_LEN`]
    /// are rejected here, before anything reaches a transport; empty
    /// payloads are silently ignored.
    fn enqueue_send(
        &self,
        payload: Packet,
        class: DeliveryClass,
        to: PeerId,
    ) -> Result<(), RelayError>;

    /// Pull the next received envelope, if any. Non-blocking.
    fn dequeue_receive(&self) -> Option<Envelope>;

    /// This endpoint's identity: `None` until the server has assigned one
    /// (clients start unassigned).
    fn id(&self) -> Option<PeerId>;

    /// Currently known participant ids: the last roster a client received,
    /// the live roster on a server, the own id on a loopback.
    fn peers(&self) -> Vec<PeerId>;

    fn status(&self) -> Status;
}
