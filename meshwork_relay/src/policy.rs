// The Policy collaborator: the application-side decision maker the relay
// server and the loopback consult for admission, server-addressed payloads,
// and (optionally) per-frame forwarding.
//
// Two ways to wire a policy in:
// - Hand the endpoint a `Policy` implementation directly. Hooks then run on
//   the endpoint's worker thread (or the caller's thread, for a loopback).
// - Keep the policy on the application's own thread and hand the endpoint a
//   `PolicyCourier`. Each hook call becomes a rendezvous question answered
//   by a `PolicyStation` the application services; the worker processes no
//   further transport events until the answer arrives, so events are never
//   handled out of arrival order relative to decisions. The policy thread
//   may call the server's `enqueue_send` from inside a callback — that only
//   touches the queue mutex, which the waiting worker does not hold.

use meshwork_protocol::{Packet, PeerId};

use crate::channel::{Caller, Responder, rendezvous};

/// Which server-side event a `should_forward` consultation concerns.
/// Mirrors the three moments the server talks to its policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForwardEvent {
    Connect,
    Data,
    Disconnect,
}

/// Authoritative hooks consumed by the relay server and the loopback.
pub trait Policy: Send {
    /// A peer wants in and would be assigned `candidate`. Return `false` to
    /// refuse; the peer is then disconnected without joining the roster.
    fn on_connect_attempt(&mut self, candidate: PeerId) -> bool;

    /// A DATA frame addressed to the server itself.
    fn on_receive_at_server(&mut self, payload: Packet, from: PeerId);

    /// A roster member disconnected.
    fn on_disconnect(&mut self, id: PeerId);

    /// Per-frame forwarding filter, consulted in arrival order before a
    /// received frame is routed. Deployments without per-frame enforcement
    /// keep the default.
    fn should_forward(
        &mut self,
        _payload: &Packet,
        _from: PeerId,
        _to: PeerId,
        _event: ForwardEvent,
    ) -> bool {
        true
    }
}

/// The trivial policy: admit everyone, ignore everything.
pub struct AcceptAll;

impl Policy for AcceptAll {
    fn on_connect_attempt(&mut self, _candidate: PeerId) -> bool {
        true
    }

    fn on_receive_at_server(&mut self, _payload: Packet, _from: PeerId) {}

    fn on_disconnect(&mut self, _id: PeerId) {}
}

/// One policy consultation in flight across the rendezvous.
#[derive(Debug)]
pub enum PolicyQuery {
    ConnectAttempt {
        candidate: PeerId,
    },
    ServerReceive {
        payload: Packet,
        from: PeerId,
    },
    Disconnect {
        id: PeerId,
    },
    ForwardCheck {
        payload: Packet,
        from: PeerId,
        to: PeerId,
        event: ForwardEvent,
    },
}

/// Answer to a `PolicyQuery`. Notification-style queries answer `Done`.
#[derive(Debug)]
pub enum PolicyReply {
    Verdict(bool),
    Done,
}

/// Build a connected courier/station pair.
pub fn policy_channel() -> (PolicyCourier, PolicyStation) {
    let (caller, responder) = rendezvous();
    (PolicyCourier { caller }, PolicyStation { responder })
}

/// Worker-side half: a `Policy` whose every hook crosses the rendezvous to
/// wherever the matching `PolicyStation` is being serviced.
///
/// If the station has been dropped, admission fails closed (connects are
/// refused, forwards vetoed) — with the application side gone there is no
/// one left to authorize anything.
pub struct PolicyCourier {
    caller: Caller<PolicyQuery, PolicyReply>,
}

impl PolicyCourier {
    fn verdict(&self, query: PolicyQuery) -> bool {
        matches!(self.caller.ask(query), Some(PolicyReply::Verdict(true)))
    }
}

impl Policy for PolicyCourier {
    fn on_connect_attempt(&mut self, candidate: PeerId) -> bool {
        self.verdict(PolicyQuery::ConnectAttempt { candidate })
    }

    fn on_receive_at_server(&mut self, payload: Packet, from: PeerId) {
        let _ = self.caller.ask(PolicyQuery::ServerReceive { payload, from });
    }

    fn on_disconnect(&mut self, id: PeerId) {
        let _ = self.caller.ask(PolicyQuery::Disconnect { id });
    }

    fn should_forward(
        &mut self,
        payload: &Packet,
        from: PeerId,
        to: PeerId,
        event: ForwardEvent,
    ) -> bool {
        self.verdict(PolicyQuery::ForwardCheck {
            payload: payload.clone(),
            from,
            to,
            event,
        })
    }
}

/// Application-side half: pumps queued consultations into a real `Policy`.
pub struct PolicyStation {
    responder: Responder<PolicyQuery, PolicyReply>,
}

impl PolicyStation {
    /// Answer every consultation currently waiting, without blocking.
    /// Returns how many were served. Call this from the application's
    /// regular update loop.
    pub fn service<P: Policy>(&self, policy: &mut P) -> usize {
        self.responder
            .serve_pending(|query| Self::dispatch(policy, query))
    }

    /// Wait up to `timeout` for one consultation and answer it.
    pub fn service_one<P: Policy>(&self, timeout: std::time::Duration, policy: &mut P) -> bool {
        self.responder
            .serve_one(timeout, |query| Self::dispatch(policy, query))
    }

    fn dispatch<P: Policy>(policy: &mut P, query: PolicyQuery) -> PolicyReply {
        match query {
            PolicyQuery::ConnectAttempt { candidate } => {
                PolicyReply::Verdict(policy.on_connect_attempt(candidate))
            }
            PolicyQuery::ServerReceive { payload, from } => {
                policy.on_receive_at_server(payload, from);
                PolicyReply::Done
            }
            PolicyQuery::Disconnect { id } => {
                policy.on_disconnect(id);
                PolicyReply::Done
            }
            PolicyQuery::ForwardCheck {
                payload,
                from,
                to,
                event,
            } => PolicyReply::Verdict(policy.should_forward(&payload, from, to, event)),
        }
    }
}
