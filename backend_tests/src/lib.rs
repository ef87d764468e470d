// Shared helpers for the backend integration tests.
//
// `RecordingPolicy` is a real `Policy` implementation whose hooks append to
// a shared journal, with pluggable admission and forwarding verdicts. The
// polling helpers wrap the endpoints' non-blocking queue API in bounded
// blocking loops so scenario tests read top to bottom.
//
// Only the wrappers are test-specific; everything they drive is the same
// endpoint code the real application uses.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use meshwork_protocol::{Envelope, Packet, PeerId};
use meshwork_relay::{Endpoint, ForwardEvent, Policy};

/// Default timeout for blocking poll operations.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Everything a `RecordingPolicy` has been consulted about, in call order.
#[derive(Clone, Default)]
pub struct Journal {
    pub connect_attempts: Vec<PeerId>,
    pub server_received: Vec<(Vec<u8>, PeerId)>,
    pub disconnects: Vec<PeerId>,
}

type AdmissionFn = dyn Fn(PeerId) -> bool + Send + Sync;
type ForwardFn = dyn Fn(&[u8], PeerId, PeerId) -> bool + Send + Sync;

/// A `Policy` that records every consultation and answers with the
/// configured verdict functions.
#[derive(Clone)]
pub struct RecordingPolicy {
    journal: Arc<Mutex<Journal>>,
    admit: Arc<AdmissionFn>,
    forward: Arc<ForwardFn>,
}

impl RecordingPolicy {
    /// Admit everyone, forward everything.
    pub fn accept_all() -> Self {
        Self::with_admission(|_| true)
    }

    /// Custom admission verdicts; everything is forwarded.
    pub fn with_admission(admit: impl Fn(PeerId) -> bool + Send + Sync + 'static) -> Self {
        Self {
            journal: Arc::new(Mutex::new(Journal::default())),
            admit: Arc::new(admit),
            forward: Arc::new(|_, _, _| true),
        }
    }

    /// Replace the forwarding filter.
    pub fn with_forward_filter(
        mut self,
        forward: impl Fn(&[u8], PeerId, PeerId) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.forward = Arc::new(forward);
        self
    }

    /// Snapshot of everything recorded so far.
    pub fn journal(&self) -> Journal {
        self.journal.lock().unwrap().clone()
    }
}

impl Policy for RecordingPolicy {
    fn on_connect_attempt(&mut self, candidate: PeerId) -> bool {
        self.journal.lock().unwrap().connect_attempts.push(candidate);
        (self.admit)(candidate)
    }

    fn on_receive_at_server(&mut self, payload: Packet, from: PeerId) {
        self.journal
            .lock()
            .unwrap()
            .server_received
            .push((payload.as_bytes().to_vec(), from));
    }

    fn on_disconnect(&mut self, id: PeerId) {
        self.journal.lock().unwrap().disconnects.push(id);
    }

    fn should_forward(
        &mut self,
        payload: &Packet,
        from: PeerId,
        to: PeerId,
        _event: ForwardEvent,
    ) -> bool {
        (self.forward)(payload.as_bytes(), from, to)
    }
}

/// Shorthand for building a payload.
pub fn packet(bytes: &[u8]) -> Packet {
    Packet::from_slice(bytes).expect("test payload fits a packet")
}

/// Poll `cond` until it holds or the timeout expires.
pub fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + POLL_TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return;
        }
        thread::sleep(POLL_INTERVAL);
    }
    panic!("timed out waiting for {what}");
}

/// Block until the endpoint yields an envelope.
pub fn recv_one(endpoint: &dyn Endpoint) -> Envelope {
    let deadline = Instant::now() + POLL_TIMEOUT;
    while Instant::now() < deadline {
        if let Some(envelope) = endpoint.dequeue_receive() {
            return envelope;
        }
        thread::sleep(POLL_INTERVAL);
    }
    panic!("timed out waiting for an envelope");
}

/// Assert nothing arrives on the endpoint's receive queue for a short
/// settling window.
pub fn assert_silent(endpoint: &dyn Endpoint) {
    thread::sleep(Duration::from_millis(60));
    assert!(
        endpoint.dequeue_receive().is_none(),
        "expected no envelope on this endpoint"
    );
}
