// The synchronized channel: the queue pair every endpoint shares between
// its worker thread and arbitrary caller threads, plus the rendezvous
// primitive used for cross-thread policy calls.
//
// `SharedState` holds both queues, the status flag, the assigned id, and
// the known roster behind a single mutex. Callers get atomic enqueue/
// dequeue operations only — the queues are never iterated across threads.
// Workers snapshot what they need under the lock and do all transport I/O
// with the lock released.
//
// `rendezvous()` is a one-question-at-a-time request/response channel: the
// asking side blocks on a dedicated reply slot per question, the answering
// side drains questions whenever it chooses to service them. Compared to a
// condition variable shared with an unrelated critical section, the
// hand-off contract is explicit and there is no wakeup to lose: a reply
// arrives on its own `sync_channel`, or the asker learns the other side is
// gone.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::time::Duration;

use meshwork_protocol::{Envelope, PeerId};

use crate::endpoint::Status;

/// Queue pair and lifecycle flags shared between a worker thread and the
/// application. One mutex guards everything; no lock is held across
/// transport I/O.
pub(crate) struct SharedState {
    inner: Mutex<Inner>,
}

struct Inner {
    send: VecDeque<Envelope>,
    recv: VecDeque<Envelope>,
    status: Status,
    id: Option<PeerId>,
    roster: Vec<PeerId>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                send: VecDeque::new(),
                recv: VecDeque::new(),
                status: Status::NotActive,
                id: None,
                roster: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned mutex means a worker panicked mid-update; the queues
        // are still structurally sound, so keep serving.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> Status {
        self.lock().status
    }

    pub fn set_status(&self, status: Status) {
        self.lock().status = status;
    }

    /// Compare-and-set on the status flag. Returns whether the transition
    /// happened, making start/stop idempotence a one-liner for callers.
    pub fn transition(&self, from: Status, to: Status) -> bool {
        let mut inner = self.lock();
        if inner.status == from {
            inner.status = to;
            true
        } else {
            false
        }
    }

    pub fn id(&self) -> Option<PeerId> {
        self.lock().id
    }

    pub fn set_id(&self, id: Option<PeerId>) {
        self.lock().id = id;
    }

    pub fn roster(&self) -> Vec<PeerId> {
        self.lock().roster.clone()
    }

    pub fn set_roster(&self, roster: Vec<PeerId>) {
        self.lock().roster = roster;
    }

    /// Reset for a fresh `start()`: drop stale queue contents, the assigned
    /// id, and the known roster.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.send.clear();
        inner.recv.clear();
        inner.id = None;
        inner.roster.clear();
    }

    pub fn enqueue_send(&self, envelope: Envelope) {
        self.lock().send.push_back(envelope);
    }

    /// Move every queued outbound envelope into `out`, preserving FIFO
    /// order. The worker calls this under one lock acquisition and then
    /// performs the sends unlocked.
    pub fn drain_send(&self, out: &mut Vec<Envelope>) {
        out.extend(self.lock().send.drain(..));
    }

    pub fn push_recv(&self, envelope: Envelope) {
        self.lock().recv.push_back(envelope);
    }

    pub fn dequeue_recv(&self) -> Option<Envelope> {
        self.lock().recv.pop_front()
    }
}

/// Create a rendezvous channel: the `Caller` side asks and blocks, the
/// `Responder` side answers when serviced.
pub fn rendezvous<Q, R>() -> (Caller<Q, R>, Responder<Q, R>) {
    let (tx, rx) = mpsc::channel();
    (Caller { tx }, Responder { rx })
}

struct Exchange<Q, R> {
    question: Q,
    reply: SyncSender<R>,
}

/// Asking side of a rendezvous. Cloneable; each question gets its own reply
/// slot, so concurrent askers cannot steal each other's answers.
pub struct Caller<Q, R> {
    tx: Sender<Exchange<Q, R>>,
}

impl<Q, R> Clone for Caller<Q, R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<Q, R> Caller<Q, R> {
    /// Post a question and block until the responder answers it. `None`
    /// when the responder side has been dropped.
    pub fn ask(&self, question: Q) -> Option<R> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.tx
            .send(Exchange {
                question,
                reply: reply_tx,
            })
            .ok()?;
        reply_rx.recv().ok()
    }
}

/// Answering side of a rendezvous.
pub struct Responder<Q, R> {
    rx: Receiver<Exchange<Q, R>>,
}

impl<Q, R> Responder<Q, R> {
    /// Answer every question currently waiting, without blocking. Returns
    /// how many were served.
    pub fn serve_pending(&self, mut answer: impl FnMut(Q) -> R) -> usize {
        let mut served = 0;
        while let Ok(exchange) = self.rx.try_recv() {
            // A vanished asker is fine; it gave up waiting.
            let _ = exchange.reply.send(answer(exchange.question));
            served += 1;
        }
        served
    }

    /// Wait up to `timeout` for one question and answer it. Returns whether
    /// a question was served.
    pub fn serve_one(&self, timeout: Duration, answer: impl FnOnce(Q) -> R) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(exchange) => {
                let _ = exchange.reply.send(answer(exchange.question));
                true
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }
}
