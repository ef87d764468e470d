// Directly-connected client backend.
//
// A `ClientEndpoint` connects outward to a relay server and then mirrors the
// unified `Endpoint` contract: the application enqueues payloads and polls
// for envelopes; a background worker services the transport at a fixed short
// cadence.
//
// - `start()` creates the host and begins the connect on the calling thread
//   (so resource failures surface synchronously), then hands both to the
//   worker.
// - The worker records its peer handle on the connect event, adopts its id
//   from the first ROSTER frame, queues decoded DATA frames for the
//   application, and flushes the send queue — but only once an id has been
//   assigned. Until the server has admitted this client into the roster,
//   outbound envelopes stay queued.
// - A disconnect observed from the transport (graceful completion or a
//   remote drop) resets the id and forces `NotActive`.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, info, warn};

use meshwork_protocol::{
    DeliveryClass, Envelope, Frame, MAX_PAYLOAD_LEN, Packet, PeerId, frame,
};

use crate::channel::SharedState;
use crate::endpoint::{DRAIN_GRACE, Endpoint, SERVICE_TIMEOUT, Status};
use crate::error::RelayError;
use crate::transport::{Transport, TransportEvent};

/// Transport channel count requested by every networked endpoint: one for
/// reliable traffic, one for unreliable.
pub(crate) const CHANNEL_COUNT: usize = 2;

/// Single-peer endpoint that connects outward to a relay server.
pub struct ClientEndpoint<T: Transport> {
    transport: Arc<T>,
    server_addr: String,
    state: Arc<SharedState>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Transport> ClientEndpoint<T> {
    /// Build a client that will connect to `server_addr` once started.
    pub fn new(transport: Arc<T>, server_addr: impl Into<String>) -> Self {
        Self {
            transport,
            server_addr: server_addr.into(),
            state: Arc::new(SharedState::new()),
            worker: None,
        }
    }

    /// `start()` under its contract-level name.
    pub fn connect(&mut self) -> Result<(), RelayError> {
        self.start()
    }

    /// `stop()` under its contract-level name.
    pub fn disconnect(&self) {
        self.stop()
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl<T: Transport> Endpoint for ClientEndpoint<T> {
    fn start(&mut self) -> Result<(), RelayError> {
        if self.state.status() != Status::NotActive {
            return Ok(());
        }
        // A previous run has fully wound down; reap its thread.
        self.join_worker();

        let mut host = self.transport.create_host(None, 1, CHANNEL_COUNT)?;
        let peer = match self.transport.connect(&mut host, &self.server_addr) {
            Ok(peer) => peer,
            Err(e) => {
                self.transport.destroy_host(host);
                return Err(e.into());
            }
        };
        info!(addr = %self.server_addr, "connecting to relay");

        self.state.reset();
        self.state.set_status(Status::Active);

        let transport = self.transport.clone();
        let state = self.state.clone();
        self.worker = Some(thread::spawn(move || {
            client_worker(transport, state, host, peer);
        }));
        Ok(())
    }

    fn stop(&self) {
        if self.state.transition(Status::Active, Status::Disconnecting) {
            debug!("client disconnect requested");
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
        let from = self.state.id().unwrap_or(PeerId::ALL);
        self.state.enqueue_send(Envelope::new(payload, from, to, class));
        Ok(())
    }

    fn dequeue_receive(&self) -> Option<Envelope> {
        self.state.dequeue_recv()
    }

    fn id(&self) -> Option<PeerId> {
        self.state.id()
    }

    fn peers(&self) -> Vec<PeerId> {
        self.state.roster()
    }

    fn status(&self) -> Status {
        self.state.status()
    }
}

impl<T: Transport> Drop for ClientEndpoint<T> {
    fn drop(&mut self) {
        self.stop();
        self.join_worker();
    }
}

/// The client's transport-servicing loop. Exits once status reaches
/// `NotActive`, then destroys the host.
fn client_worker<T: Transport>(
    transport: Arc<T>,
    state: Arc<SharedState>,
    mut host: T::Host,
    mut peer: T::Peer,
) {
    let mut outbound = Vec::new();
    let mut drain_deadline: Option<Instant> = None;

    loop {
        match transport.service_once(&mut host, SERVICE_TIMEOUT) {
            TransportEvent::Connected(p) => {
                peer = p;
                debug!("link to relay established");
            }
            TransportEvent::Received { frame, .. } => handle_frame(&state, &frame),
            TransportEvent::Disconnected(_) => {
                info!("disconnected from relay");
                state.set_id(None);
                state.set_roster(Vec::new());
                state.set_status(Status::NotActive);
            }
            TransportEvent::Idle => {}
        }

        // Flush, withholding everything until the server has assigned an id.
        // Runs before any disconnect request goes out so a graceful stop
        // drains what is already queued.
        if state.status() != Status::NotActive && state.id().is_some() {
            outbound.clear();
            state.drain_send(&mut outbound);
            for envelope in outbound.drain(..) {
                match frame::encode_data(&envelope.payload, envelope.to) {
                    Ok(bytes) => {
                        if let Err(e) = transport.send(&peer, &bytes, envelope.class) {
                            warn!(error = %e, "dropping outbound frame");
                        }
                    }
                    Err(e) => warn!(error = %e, "rejecting oversized outbound frame"),
                }
            }
        }

        match state.status() {
            Status::NotActive => break,
            Status::Disconnecting => {
                if drain_deadline.is_none() {
                    drain_deadline = Some(Instant::now() + DRAIN_GRACE);
                    transport.disconnect_gracefully(&mut host, &peer);
                } else if drain_deadline.is_some_and(|d| Instant::now() >= d) {
                    // The transport never confirmed; force the teardown.
                    warn!("drain grace elapsed; forcing teardown");
                    state.set_id(None);
                    state.set_roster(Vec::new());
                    state.set_status(Status::NotActive);
                    break;
                }
            }
            Status::Active => {}
        }
    }

    transport.destroy_host(host);
}

/// Apply one frame from the relay to the shared state.
fn handle_frame(state: &SharedState, bytes: &[u8]) {
    match frame::decode(bytes) {
        Ok(Frame::Roster { own_id, ids }) => {
            debug!(id = %own_id, peers = ids.len(), "roster update");
            // Roster before id: anyone polling for the id assignment must
            // find the matching roster already in place.
            state.set_roster(ids);
            state.set_id(Some(own_id));
        }
        Ok(Frame::Data { address, payload }) => {
            if !payload.is_empty() {
                // Byte 1 on this leg is the origin id stamped by the relay.
                state.push_recv(Envelope::new(
                    payload,
                    address,
                    PeerId::ALL,
                    DeliveryClass::Reliable,
                ));
            }
        }
        Err(e) => warn!(error = %e, "ignoring malformed frame from relay"),
    }
}
