// Integration smoke test for the relay server and client endpoints.
//
// Runs a relay and two clients over the in-process transport and exercises
// the full lifecycle: admission, id assignment, roster broadcasts,
// broadcast and targeted routing, disconnect, and graceful shutdown. Every
// participant uses the real endpoint code paths — the only test double is
// the transport hub.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use meshwork_protocol::{DeliveryClass, Envelope, Packet, PeerId};
use meshwork_relay::{
    AcceptAll, ClientEndpoint, Endpoint, MemoryTransport, RelayServer, ServerConfig, Status,
};

const POLL_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

fn packet(bytes: &[u8]) -> Packet {
    Packet::from_slice(bytes).unwrap()
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
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
fn recv_one(endpoint: &dyn Endpoint) -> Envelope {
    let deadline = Instant::now() + POLL_TIMEOUT;
    while Instant::now() < deadline {
        if let Some(envelope) = endpoint.dequeue_receive() {
            return envelope;
        }
        thread::sleep(POLL_INTERVAL);
    }
    panic!("timed out waiting for an envelope");
}

/// Assert nothing shows up on the endpoint's receive queue for a while.
fn assert_silent(endpoint: &dyn Endpoint) {
    thread::sleep(Duration::from_millis(60));
    assert!(
        endpoint.dequeue_receive().is_none(),
        "expected no envelope on this endpoint"
    );
}

fn start_relay(transport: &Arc<MemoryTransport>, bind: &str) -> RelayServer<MemoryTransport> {
    let mut server = RelayServer::new(
        transport.clone(),
        ServerConfig {
            bind: bind.into(),
            max_peers: 8,
        },
        Box::new(AcceptAll),
    );
    server.listen().unwrap();
    server
}

#[test]
fn full_relay_lifecycle() {
    let transport = Arc::new(MemoryTransport::new());
    let server = start_relay(&transport, "relay:main");

    // 1. First client connects, adopts id 2, sees the roster [2].
    let mut alice = ClientEndpoint::new(transport.clone(), "relay:main");
    alice.connect().unwrap();
    wait_until("alice id assignment", || alice.id().is_some());
    assert_eq!(alice.id(), Some(PeerId(2)));
    assert_eq!(alice.peers(), vec![PeerId(2)]);

    // 2. Second client gets 3; both now see the roster [2, 3].
    let mut bob = ClientEndpoint::new(transport.clone(), "relay:main");
    bob.connect().unwrap();
    wait_until("bob id assignment", || bob.id() == Some(PeerId(3)));
    wait_until("alice roster refresh", || {
        alice.peers() == vec![PeerId(2), PeerId(3)]
    });
    assert_eq!(bob.peers(), vec![PeerId(2), PeerId(3)]);

    // 3. Alice broadcasts: bob and the server's own queue receive it,
    //    stamped with alice's id. Alice never gets her own frame back.
    alice
        .enqueue_send(packet(&[10, 20]), DeliveryClass::Reliable, PeerId::ALL)
        .unwrap();
    let at_bob = recv_one(&bob);
    assert_eq!(at_bob.payload.as_bytes(), &[10, 20]);
    assert_eq!(at_bob.from, PeerId(2));
    let at_server = recv_one(&server);
    assert_eq!(at_server.payload.as_bytes(), &[10, 20]);
    assert_eq!(at_server.from, PeerId(2));
    assert_silent(&alice);

    // 4. Bob routes to alice specifically: only alice receives, the
    //    server's queue stays empty for that frame.
    bob.enqueue_send(packet(&[77]), DeliveryClass::Reliable, PeerId(2))
        .unwrap();
    let at_alice = recv_one(&alice);
    assert_eq!(at_alice.payload.as_bytes(), &[77]);
    assert_eq!(at_alice.from, PeerId(3));
    assert_silent(&server);

    // 5. A server-authored broadcast reaches both clients and self-echoes
    //    into the server's own queue.
    server
        .enqueue_send(packet(&[5]), DeliveryClass::Reliable, PeerId::ALL)
        .unwrap();
    assert_eq!(recv_one(&alice).from, PeerId::SERVER);
    assert_eq!(recv_one(&bob).from, PeerId::SERVER);
    assert_eq!(recv_one(&server).from, PeerId::SERVER);

    // 6. Alice leaves; bob's roster shrinks to [3].
    alice.disconnect();
    wait_until("alice teardown", || alice.status() == Status::NotActive);
    assert_eq!(alice.id(), None);
    wait_until("bob roster shrink", || bob.peers() == vec![PeerId(3)]);

    // 7. Graceful server stop drains bob and lands everyone NotActive.
    server.stop();
    wait_until("server teardown", || server.status() == Status::NotActive);
    wait_until("bob teardown", || bob.status() == Status::NotActive);
    assert_eq!(bob.id(), None);
}

#[test]
fn ids_keep_increasing_across_churn() {
    let transport = Arc::new(MemoryTransport::new());
    let server = start_relay(&transport, "relay:churn");

    let mut alice = ClientEndpoint::new(transport.clone(), "relay:churn");
    alice.connect().unwrap();
    wait_until("alice id", || alice.id() == Some(PeerId(2)));

    let mut bob = ClientEndpoint::new(transport.clone(), "relay:churn");
    bob.connect().unwrap();
    wait_until("bob id", || bob.id() == Some(PeerId(3)));

    // Alice's slot is never recycled: the next arrival gets 4, not 2.
    alice.disconnect();
    wait_until("alice teardown", || alice.status() == Status::NotActive);
    wait_until("bob roster shrink", || bob.peers() == vec![PeerId(3)]);

    let mut carol = ClientEndpoint::new(transport.clone(), "relay:churn");
    carol.connect().unwrap();
    wait_until("carol id", || carol.id() == Some(PeerId(4)));
    assert_eq!(carol.peers(), vec![PeerId(3), PeerId(4)]);

    server.stop();
    wait_until("server teardown", || server.status() == Status::NotActive);
}

#[test]
fn client_reconnect_after_stop() {
    let transport = Arc::new(MemoryTransport::new());
    let server = start_relay(&transport, "relay:reconnect");

    let mut client = ClientEndpoint::new(transport.clone(), "relay:reconnect");
    client.connect().unwrap();
    wait_until("first id", || client.id() == Some(PeerId(2)));

    client.disconnect();
    wait_until("teardown", || client.status() == Status::NotActive);

    // Same endpoint, fresh connection: the server hands out a new id.
    client.connect().unwrap();
    wait_until("second id", || client.id() == Some(PeerId(3)));

    server.stop();
    wait_until("server teardown", || server.status() == Status::NotActive);
}
