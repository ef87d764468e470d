// Same-process loopback backend.
//
// A `LocalEndpoint` is what offline / single-player deployments use: no
// transport, no worker thread, everything on the caller's thread. The
// routing table mirrors what a relay server plus a single connected client
// would observe, so application code behaves identically online and off:
//
//   to == ALL      deliver to the local receive queue (self-echo) AND
//                  invoke the policy's server-side receive hook
//   to == SERVER   policy hook only, nothing queued locally
//   to == own id   local receive queue only
//   anything else  contract violation — there is only one participant
//
// The endpoint's own id is the id a relay would assign its first client
// (`SERVER_ID + 1`), which keeps the SERVER and own-id routing rows
// distinct. Lifecycle is the two-state subset Active/NotActive: with no
// peer to drain, Disconnecting is unreachable.
//
// Policy hooks run synchronously while the endpoint holds its policy lock.
// A callback may re-enter `enqueue_send` targeting the own id (queue only);
// re-entering with ALL or SERVER would consult the policy again and
// self-deadlock.

use std::sync::Mutex;

use tracing::debug;

use meshwork_protocol::{DeliveryClass, Envelope, MAX_PAYLOAD_LEN, Packet, PeerId};

use crate::channel::SharedState;
use crate::endpoint::{Endpoint, Status};
use crate::error::RelayError;
use crate::policy::Policy;

/// In-process endpoint bypassing the transport entirely.
pub struct LocalEndpoint {
    state: SharedState,
    policy: Mutex<Box<dyn Policy>>,
    own_id: PeerId,
}

impl LocalEndpoint {
    pub fn new(policy: Box<dyn Policy>) -> Self {
        Self {
            state: SharedState::new(),
            policy: Mutex::new(policy),
            own_id: PeerId::first_client(),
        }
    }

    fn with_policy(&self, f: impl FnOnce(&mut dyn Policy)) {
        let mut guard = self.policy.lock().unwrap_or_else(|e| e.into_inner());
        f(guard.as_mut());
    }
}

impl Endpoint for LocalEndpoint {
    fn start(&mut self) -> Result<(), RelayError> {
        if self.state.transition(Status::NotActive, Status::Active) {
            self.state.reset();
        }
        Ok(())
    }

    fn stop(&self) {
        // Two-state machine: no peer to drain, so teardown is immediate.
        self.state.transition(Status::Active, Status::NotActive);
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
        if self.state.status() != Status::Active {
            debug!("discarding send on inactive loopback");
            return Ok(());
        }

        match to {
            PeerId::ALL => {
                self.state.push_recv(Envelope::new(
                    payload.clone(),
                    self.own_id,
                    PeerId::ALL,
                    class,
                ));
                self.with_policy(|policy| policy.on_receive_at_server(payload, self.own_id));
                Ok(())
            }
            PeerId::SERVER => {
                self.with_policy(|policy| policy.on_receive_at_server(payload, self.own_id));
                Ok(())
            }
            id if id == self.own_id => {
                self.state
                    .push_recv(Envelope::new(payload, self.own_id, id, class));
                Ok(())
            }
            other => Err(RelayError::InvalidTarget { to: other }),
        }
    }

    fn dequeue_receive(&self) -> Option<Envelope> {
        self.state.dequeue_recv()
    }

    fn id(&self) -> Option<PeerId> {
        Some(self.own_id)
    }

    fn peers(&self) -> Vec<PeerId> {
        vec![self.own_id]
    }

    fn status(&self) -> Status {
        self.state.status()
    }
}
