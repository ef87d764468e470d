// Authoritative relay server backend.
//
// A `RelayServer` owns the roster, allocates ids, and routes every DATA
// frame between peers. The worker thread drives the transport; all
// authoritative decisions are delegated to the `Policy` collaborator —
// admission, server-addressed payloads, disconnect notification, and the
// optional per-frame forwarding filter.
//
// Per service round: apply the transport event (connect / receive /
// disconnect), then flush the outbound queue. The queue is shared between
// the forwarding path and the application's own `enqueue_send`, so relative
// FIFO order holds across both. Roster broadcasts go straight to the
// transport from the membership event that caused them, keeping them
// strictly ordered before any later traffic.
//
// The worker never holds the queue mutex across a transport call or a
// policy hook. A policy living on another thread (`PolicyCourier`) may
// therefore call `enqueue_send` from inside a callback without deadlock,
// while the worker stays blocked until the verdict arrives — one
// synchronized turn per transport event.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, info, warn};

use meshwork_protocol::{
    DeliveryClass, Envelope, Frame, MAX_PAYLOAD_LEN, Packet, PeerId, frame,
};

use crate::channel::SharedState;
use crate::client::CHANNEL_COUNT;
use crate::endpoint::{DRAIN_GRACE, Endpoint, SERVICE_TIMEOUT, Status};
use crate::error::RelayError;
use crate::policy::{ForwardEvent, Policy};
use crate::transport::{Transport, TransportEvent};

/// Configuration for a relay server.
pub struct ServerConfig {
    /// Address handed to the transport's `create_host`.
    pub bind: String,
    /// Most peers the transport will hold at once.
    pub max_peers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:7878".into(),
            max_peers: 32,
        }
    }
}

type SharedPolicy = Arc<Mutex<Box<dyn Policy>>>;

/// Multi-peer authoritative endpoint: id allocation, roster broadcast,
/// fan-out routing, policy consultation.
pub struct RelayServer<T: Transport> {
    transport: Arc<T>,
    config: ServerConfig,
    policy: SharedPolicy,
    state: Arc<SharedState>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Transport> RelayServer<T> {
    pub fn new(transport: Arc<T>, config: ServerConfig, policy: Box<dyn Policy>) -> Self {
        Self {
            transport,
            config,
            policy: Arc::new(Mutex::new(policy)),
            state: Arc::new(SharedState::new()),
            worker: None,
        }
    }

    /// `start()` under its contract-level name.
    pub fn listen(&mut self) -> Result<(), RelayError> {
        self.start()
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl<T: Transport> Endpoint for RelayServer<T> {
    fn start(&mut self) -> Result<(), RelayError> {
        if self.state.status() != Status::NotActive {
            return Ok(());
        }
        self.join_worker();

        let host = self
            .transport
            .create_host(Some(&self.config.bind), self.config.max_peers, CHANNEL_COUNT)?;
        info!(addr = %self.config.bind, "relay listening");

        self.state.reset();
        self.state.set_id(Some(PeerId::SERVER));
        self.state.set_status(Status::Active);

        let transport = self.transport.clone();
        let state = self.state.clone();
        let policy = self.policy.clone();
        self.worker = Some(thread::spawn(move || {
            server_worker(transport, state, policy, host);
        }));
        Ok(())
    }

    fn stop(&self) {
        if self.state.transition(Status::Active, Status::Disconnecting) {
            debug!("relay stop requested");
        }
    }

    fn enqueue_send(
        &self,
        payload: Packet,
        class: DeliveryClass,
        to: PeerId,
    ) -> Result<(), RelayError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(RelayError::Oversize {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        if payload.is_empty() {
            return Ok(());
        }
        if to == PeerId::ALL {
            // A server-authored broadcast also reaches the server's own
            // application queue.
            self.state.push_recv(Envelope::new(
                payload.clone(),
                PeerId::SERVER,
                PeerId::ALL,
                class,
            ));
        }
        self.state
            .enqueue_send(Envelope::new(payload, PeerId::SERVER, to, class));
        Ok(())
    }

    fn dequeue_receive(&self) -> Option<Envelope> {
        self.state.dequeue_recv()
    }

    fn id(&self) -> Option<PeerId> {
        Some(PeerId::SERVER)
    }

    fn peers(&self) -> Vec<PeerId> {
        self.state.roster()
    }

    fn status(&self) -> Status {
        self.state.status()
    }
}

impl<T: Transport> Drop for RelayServer<T> {
    fn drop(&mut self) {
        self.stop();
        self.join_worker();
    }
}

fn lock_policy(policy: &SharedPolicy) -> std::sync::MutexGuard<'_, Box<dyn Policy>> {
    policy.lock().unwrap_or_else(|e| e.into_inner())
}

/// The server's transport-servicing loop.
fn server_worker<T: Transport>(
    transport: Arc<T>,
    state: Arc<SharedState>,
    policy: SharedPolicy,
    mut host: T::Host,
) {
    let mut roster: BTreeMap<PeerId, T::Peer> = BTreeMap::new();
    // The id to hand to the next accepted peer; wraps to 0 when the one-byte
    // id space is spent, after which connects are refused (ids are never
    // reused within a run).
    let mut next_id: u8 = PeerId::first_client().0;
    let mut outbound = Vec::new();
    let mut drain_deadline: Option<Instant> = None;

    loop {
        match transport.service_once(&mut host, SERVICE_TIMEOUT) {
            TransportEvent::Connected(peer) => handle_connect(
                transport.as_ref(),
                &state,
                &policy,
                &mut host,
                &mut roster,
                &mut next_id,
                peer,
            ),
            TransportEvent::Received { peer, frame } => {
                handle_receive(
                    transport.as_ref(),
                    &state,
                    &policy,
                    &mut host,
                    &roster,
                    peer,
                    &frame,
                );
            }
            TransportEvent::Disconnected(peer) => {
                handle_disconnect(transport.as_ref(), &state, &policy, &mut roster, peer);
                if state.status() == Status::Disconnecting && roster.is_empty() {
                    state.set_status(Status::NotActive);
                }
            }
            TransportEvent::Idle => {}
        }

        // Flush phase: drain the outbound queue in FIFO order. Runs before
        // any teardown disconnects go out so a graceful stop still delivers
        // what was already queued.
        outbound.clear();
        state.drain_send(&mut outbound);
        for envelope in outbound.drain(..) {
            flush_envelope(transport.as_ref(), &policy, &roster, envelope);
        }

        match state.status() {
            Status::NotActive => break,
            Status::Disconnecting => {
                if drain_deadline.is_none() {
                    drain_deadline = Some(Instant::now() + DRAIN_GRACE);
                    if roster.is_empty() {
                        state.set_status(Status::NotActive);
                        break;
                    }
                    let peers: Vec<T::Peer> = roster.values().copied().collect();
                    for peer in &peers {
                        transport.disconnect_gracefully(&mut host, peer);
                    }
                } else if drain_deadline.is_some_and(|d| Instant::now() >= d) {
                    warn!(
                        remaining = roster.len(),
                        "drain grace elapsed; forcing teardown"
                    );
                    state.set_status(Status::NotActive);
                    break;
                }
            }
            Status::Active => {}
        }
    }

    info!("relay stopped");
    transport.destroy_host(host);
}

/// A peer finished connecting: refuse during teardown, otherwise consult
/// the policy and either register + broadcast the roster or turn it away.
fn handle_connect<T: Transport>(
    transport: &T,
    state: &SharedState,
    policy: &SharedPolicy,
    host: &mut T::Host,
    roster: &mut BTreeMap<PeerId, T::Peer>,
    next_id: &mut u8,
    peer: T::Peer,
) {
    if state.status() == Status::Disconnecting {
        transport.disconnect_gracefully(host, &peer);
        return;
    }
    if *next_id == 0 {
        warn!("id space exhausted; refusing connect");
        transport.disconnect_gracefully(host, &peer);
        return;
    }

    let candidate = PeerId(*next_id);
    let accepted = lock_policy(policy).on_connect_attempt(candidate);
    if !accepted {
        debug!(id = %candidate, "connect refused by policy");
        transport.disconnect_gracefully(host, &peer);
        return;
    }

    roster.insert(candidate, peer);
    *next_id = next_id.wrapping_add(1);
    state.set_roster(roster.keys().copied().collect());
    info!(id = %candidate, peers = roster.len(), "peer admitted");
    broadcast_roster(transport, roster);
}

/// Route one received frame. The sender's id comes from the roster, never
/// from the frame bytes; the address byte is the target the sender chose.
fn handle_receive<T: Transport>(
    transport: &T,
    state: &SharedState,
    policy: &SharedPolicy,
    host: &mut T::Host,
    roster: &BTreeMap<PeerId, T::Peer>,
    peer: T::Peer,
    bytes: &[u8],
) {
    let Some(from) = id_of(roster, &peer) else {
        warn!("frame from unregistered peer; disconnecting it");
        transport.disconnect_gracefully(host, &peer);
        return;
    };

    match frame::decode(bytes) {
        Ok(Frame::Data { address: to, payload }) => {
            if payload.is_empty() {
                return;
            }
            if !lock_policy(policy).should_forward(&payload, from, to, ForwardEvent::Data) {
                debug!(%from, %to, "frame vetoed by policy");
                return;
            }
            if to == PeerId::SERVER {
                // Addressed to the relay itself: policy only, never
                // forwarded.
                lock_policy(policy).on_receive_at_server(payload, from);
            } else if to == PeerId::ALL {
                state.push_recv(Envelope::new(
                    payload.clone(),
                    from,
                    PeerId::ALL,
                    DeliveryClass::Reliable,
                ));
                state.enqueue_send(Envelope::new(
                    payload,
                    from,
                    PeerId::ALL,
                    DeliveryClass::Reliable,
                ));
            } else {
                state.enqueue_send(Envelope::new(payload, from, to, DeliveryClass::Reliable));
            }
        }
        Ok(Frame::Roster { .. }) => {
            warn!(%from, "client sent a roster frame; disconnecting it");
            transport.disconnect_gracefully(host, &peer);
        }
        Err(e) => {
            warn!(%from, error = %e, "undecodable frame; disconnecting sender");
            transport.disconnect_gracefully(host, &peer);
        }
    }
}

/// A peer is gone: notify the policy, drop the roster entry, re-broadcast.
fn handle_disconnect<T: Transport>(
    transport: &T,
    state: &SharedState,
    policy: &SharedPolicy,
    roster: &mut BTreeMap<PeerId, T::Peer>,
    peer: T::Peer,
) {
    let Some(id) = id_of(roster, &peer) else {
        // A refused or already-removed connection winding down.
        return;
    };
    lock_policy(policy).on_disconnect(id);
    roster.remove(&id);
    state.set_roster(roster.keys().copied().collect());
    info!(%id, peers = roster.len(), "peer disconnected");
    broadcast_roster(transport, roster);
}

/// Send one queued envelope: broadcasts reach every peer except the origin,
/// targeted entries exactly their peer, and server-addressed entries the
/// policy. Outgoing DATA frames carry the origin id in byte 1.
fn flush_envelope<T: Transport>(
    transport: &T,
    policy: &SharedPolicy,
    roster: &BTreeMap<PeerId, T::Peer>,
    envelope: Envelope,
) {
    if envelope.to == PeerId::SERVER {
        let Envelope { payload, from, .. } = envelope;
        lock_policy(policy).on_receive_at_server(payload, from);
        return;
    }

    let bytes = match frame::encode_data(&envelope.payload, envelope.from) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "dropping unencodable outbound frame");
            return;
        }
    };

    if envelope.to == PeerId::ALL {
        for (id, peer) in roster {
            if *id == envelope.from {
                continue;
            }
            if let Err(e) = transport.send(peer, &bytes, envelope.class) {
                warn!(to = %id, error = %e, "broadcast leg failed");
            }
        }
    } else if let Some(peer) = roster.get(&envelope.to) {
        if let Err(e) = transport.send(peer, &bytes, envelope.class) {
            warn!(to = %envelope.to, error = %e, "targeted send failed");
        }
    }
    // A targeted entry whose peer has left is dropped here.
}

/// Send each connected peer the current roster, stamped with that peer's
/// own id in byte 1. Ids go out in ascending order.
fn broadcast_roster<T: Transport>(transport: &T, roster: &BTreeMap<PeerId, T::Peer>) {
    let ids: Vec<PeerId> = roster.keys().copied().collect();
    for (id, peer) in roster {
        match frame::encode_roster(*id, &ids) {
            Ok(bytes) => {
                if let Err(e) = transport.send(peer, &bytes, DeliveryClass::Reliable) {
                    warn!(to = %id, error = %e, "roster send failed");
                }
            }
            Err(e) => warn!(error = %e, "roster frame too large"),
        }
    }
}

fn id_of<P: Eq>(roster: &BTreeMap<PeerId, P>, peer: &P) -> Option<PeerId> {
    roster
        .iter()
        .find(|(_, candidate)| *candidate == peer)
        .map(|(id, _)| *id)
}
