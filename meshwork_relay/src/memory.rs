// In-process reference implementation of the `Transport` trait.
//
// A `MemoryTransport` is a hub of named hosts living in one process. Hosts
// bind string addresses instead of sockets; `connect` wires two opaque peer
// handles together and every frame crosses an `mpsc` channel into the other
// host's event inbox. Both delivery classes are in-order and lossless —
// the class is carried through as a tag only.
//
// This exists so the integration tests (and same-process embeddings) can
// exercise the real client/server endpoint code paths without a network.
// Clone the transport to hand the same hub to several endpoints.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use meshwork_protocol::DeliveryClass;

use crate::transport::{Transport, TransportError, TransportEvent};

/// Opaque handle for one end of an in-process link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MemoryPeer(u64);

/// One host's view of the hub: its event inbox plus bookkeeping.
#[derive(Debug)]
pub struct MemoryHost {
    id: u64,
    bind: Option<String>,
    inbox_tx: Sender<TransportEvent<MemoryPeer>>,
    inbox_rx: Receiver<TransportEvent<MemoryPeer>>,
}

struct Listener {
    host_id: u64,
    max_peers: usize,
    inbox: Sender<TransportEvent<MemoryPeer>>,
}

/// Where frames sent through one peer handle come out.
struct LinkEnd {
    owner_host: u64,
    remote_token: u64,
    remote_inbox: Sender<TransportEvent<MemoryPeer>>,
}

#[derive(Default)]
struct Hub {
    listeners: Mutex<HashMap<String, Listener>>,
    links: Mutex<HashMap<u64, LinkEnd>>,
    next_token: AtomicU64,
}

/// In-process transport hub. Cheap to clone; clones share the hub.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    hub: Arc<Hub>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_token(&self) -> u64 {
        self.hub.next_token.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn listeners(&self) -> MutexGuard<'_, HashMap<String, Listener>> {
        self.hub.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn links(&self) -> MutexGuard<'_, HashMap<u64, LinkEnd>> {
        self.hub.links.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Tear down one link, notifying the far side (and, when requested, the
    /// near side) with `Disconnected` events.
    fn sever(
        &self,
        token: u64,
        near_inbox: Option<&Sender<TransportEvent<MemoryPeer>>>,
    ) {
        let mut links = self.links();
        let Some(end) = links.remove(&token) else {
            return;
        };
        links.remove(&end.remote_token);
        drop(links);

        let _ = end
            .remote_inbox
            .send(TransportEvent::Disconnected(MemoryPeer(end.remote_token)));
        if let Some(inbox) = near_inbox {
            let _ = inbox.send(TransportEvent::Disconnected(MemoryPeer(token)));
        }
    }
}

impl Transport for MemoryTransport {
    type Host = MemoryHost;
    type Peer = MemoryPeer;

    fn create_host(
        &self,
        bind: Option<&str>,
        max_peers: usize,
        _channels: usize,
    ) -> Result<Self::Host, TransportError> {
        let (inbox_tx, inbox_rx) = mpsc::channel();
        let id = self.next_token();

        if let Some(addr) = bind {
            let mut listeners = self.listeners();
            if listeners.contains_key(addr) {
                return Err(TransportError::Host(format!("{addr} is already bound")));
            }
            listeners.insert(
                addr.to_string(),
                Listener {
                    host_id: id,
                    max_peers,
                    inbox: inbox_tx.clone(),
                },
            );
        }

        Ok(MemoryHost {
            id,
            bind: bind.map(String::from),
            inbox_tx,
            inbox_rx,
        })
    }

    fn connect(&self, host: &mut Self::Host, remote: &str) -> Result<Self::Peer, TransportError> {
        let (listener_host, max_peers, listener_inbox) = {
            let listeners = self.listeners();
            let listener = listeners
                .get(remote)
                .ok_or_else(|| TransportError::Connect(format!("{remote}: no such host")))?;
            (listener.host_id, listener.max_peers, listener.inbox.clone())
        };

        let near = self.next_token();
        let far = self.next_token();
        {
            let mut links = self.links();
            let occupied = links
                .values()
                .filter(|end| end.owner_host == listener_host)
                .count();
            if occupied >= max_peers {
                return Err(TransportError::Connect(format!("{remote}: host is full")));
            }
            links.insert(
                near,
                LinkEnd {
                    owner_host: host.id,
                    remote_token: far,
                    remote_inbox: listener_inbox.clone(),
                },
            );
            links.insert(
                far,
                LinkEnd {
                    owner_host: listener_host,
                    remote_token: near,
                    remote_inbox: host.inbox_tx.clone(),
                },
            );
        }

        let _ = listener_inbox.send(TransportEvent::Connected(MemoryPeer(far)));
        let _ = host.inbox_tx.send(TransportEvent::Connected(MemoryPeer(near)));
        Ok(MemoryPeer(near))
    }

    fn service_once(&self, host: &mut Self::Host, timeout: Duration) -> TransportEvent<Self::Peer> {
        match host.inbox_rx.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => TransportEvent::Idle,
        }
    }

    fn send(
        &self,
        peer: &Self::Peer,
        frame: &[u8],
        _class: DeliveryClass,
    ) -> Result<(), TransportError> {
        let remote = {
            let links = self.links();
            let end = links
                .get(&peer.0)
                .ok_or_else(|| TransportError::Send(format!("{peer:?} is gone")))?;
            (end.remote_token, end.remote_inbox.clone())
        };
        remote
            .1
            .send(TransportEvent::Received {
                peer: MemoryPeer(remote.0),
                frame: frame.to_vec(),
            })
            .map_err(|_| TransportError::Send(format!("{peer:?}: remote host destroyed")))
    }

    fn disconnect_gracefully(&self, host: &mut Self::Host, peer: &Self::Peer) {
        self.sever(peer.0, Some(&host.inbox_tx));
    }

    fn destroy_host(&self, host: Self::Host) {
        if let Some(addr) = &host.bind {
            self.listeners().remove(addr);
        }

        // Cut every link this host still owns; far sides learn via
        // Disconnected, the host itself is going away.
        let owned: Vec<u64> = self
            .links()
            .iter()
            .filter(|(_, end)| end.owner_host == host.id)
            .map(|(token, _)| *token)
            .collect();
        for token in owned {
            self.sever(token, None);
        }
    }
}
