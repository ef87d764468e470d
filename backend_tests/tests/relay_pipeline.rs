// Relay server scenarios: admission policy, routing, forwarding filter,
// protocol violations, and send ordering — all over the in-process
// transport with real client endpoints (plus one raw transport host for
// injecting malformed frames).

use std::sync::Arc;
use std::time::Duration;

use backend_tests::{RecordingPolicy, assert_silent, packet, recv_one, wait_until};
use meshwork_protocol::{DeliveryClass, PeerId, frame};
use meshwork_relay::{
    ClientEndpoint, Endpoint, MemoryTransport, RelayServer, ServerConfig, Status, Transport,
    TransportEvent,
};

fn start_relay(
    transport: &Arc<MemoryTransport>,
    bind: &str,
    policy: RecordingPolicy,
) -> RelayServer<MemoryTransport> {
    let mut server = RelayServer::new(
        transport.clone(),
        ServerConfig {
            bind: bind.into(),
            max_peers: 8,
        },
        Box::new(policy),
    );
    server.listen().unwrap();
    server
}

#[test]
fn rejected_peer_never_joins_the_roster() {
    let transport = Arc::new(MemoryTransport::new());
    let policy = RecordingPolicy::with_admission(|candidate| candidate != PeerId(3));
    let server = start_relay(&transport, "relay:admission", policy.clone());

    let mut alice = ClientEndpoint::new(transport.clone(), "relay:admission");
    alice.connect().unwrap();
    wait_until("alice admitted", || alice.id() == Some(PeerId(2)));

    // Candidate 3 is refused: the peer is dropped without joining and the
    // roster the others see stays [2].
    let mut mallory = ClientEndpoint::new(transport.clone(), "relay:admission");
    mallory.connect().unwrap();
    wait_until("mallory turned away", || {
        mallory.status() == Status::NotActive
    });
    assert_eq!(mallory.id(), None);
    assert_eq!(alice.peers(), vec![PeerId(2)]);

    let journal = policy.journal();
    assert_eq!(journal.connect_attempts, vec![PeerId(2), PeerId(3)]);
    // A refused candidate never produces a disconnect notification.
    assert!(journal.disconnects.is_empty());

    // Rejection does not advance the id counter: the next arrival is
    // offered candidate 3 again, and this time it is admitted.
    let mut carol = ClientEndpoint::new(transport.clone(), "relay:admission");
    carol.connect().unwrap();
    wait_until("carol admitted", || carol.id() == Some(PeerId(3)));

    server.stop();
    wait_until("server teardown", || server.status() == Status::NotActive);
}

#[test]
fn server_addressed_frames_reach_the_policy_only() {
    let transport = Arc::new(MemoryTransport::new());
    let policy = RecordingPolicy::accept_all();
    let server = start_relay(&transport, "relay:to-server", policy.clone());

    let mut alice = ClientEndpoint::new(transport.clone(), "relay:to-server");
    alice.connect().unwrap();
    wait_until("alice admitted", || alice.id() == Some(PeerId(2)));
    let mut bob = ClientEndpoint::new(transport.clone(), "relay:to-server");
    bob.connect().unwrap();
    wait_until("bob admitted", || bob.id() == Some(PeerId(3)));

    alice
        .enqueue_send(packet(&[42]), DeliveryClass::Reliable, PeerId::SERVER)
        .unwrap();

    wait_until("policy consulted", || {
        !policy.journal().server_received.is_empty()
    });
    assert_eq!(
        policy.journal().server_received,
        vec![(vec![42], PeerId(2))]
    );
    // Never forwarded, never queued for the server application.
    assert_silent(&server);
    assert_silent(&bob);

    server.stop();
    wait_until("server teardown", || server.status() == Status::NotActive);
}

#[test]
fn forwarding_filter_vetoes_single_frames() {
    let transport = Arc::new(MemoryTransport::new());
    let policy =
        RecordingPolicy::accept_all().with_forward_filter(|payload, _, _| payload != &[13]);
    let server = start_relay(&transport, "relay:filter", policy);

    let mut alice = ClientEndpoint::new(transport.clone(), "relay:filter");
    alice.connect().unwrap();
    wait_until("alice admitted", || alice.id() == Some(PeerId(2)));
    let mut bob = ClientEndpoint::new(transport.clone(), "relay:filter");
    bob.connect().unwrap();
    wait_until("bob admitted", || bob.id() == Some(PeerId(3)));

    // The vetoed frame vanishes; the one after it still flows.
    alice
        .enqueue_send(packet(&[13]), DeliveryClass::Reliable, PeerId::ALL)
        .unwrap();
    alice
        .enqueue_send(packet(&[14]), DeliveryClass::Reliable, PeerId::ALL)
        .unwrap();

    assert_eq!(recv_one(&bob).payload.as_bytes(), &[14]);
    assert_eq!(recv_one(&server).payload.as_bytes(), &[14]);
    assert_silent(&bob);

    server.stop();
    wait_until("server teardown", || server.status() == Status::NotActive);
}

#[test]
fn send_order_is_preserved_end_to_end() {
    let transport = Arc::new(MemoryTransport::new());
    let server = start_relay(&transport, "relay:fifo", RecordingPolicy::accept_all());

    let mut alice = ClientEndpoint::new(transport.clone(), "relay:fifo");
    alice.connect().unwrap();
    wait_until("alice admitted", || alice.id() == Some(PeerId(2)));
    let mut bob = ClientEndpoint::new(transport.clone(), "relay:fifo");
    bob.connect().unwrap();
    wait_until("bob admitted", || bob.id() == Some(PeerId(3)));

    for n in 1..=5u8 {
        alice
            .enqueue_send(packet(&[n]), DeliveryClass::Reliable, PeerId(3))
            .unwrap();
    }
    for n in 1..=5u8 {
        let envelope = recv_one(&bob);
        assert_eq!(envelope.payload.as_bytes(), &[n]);
        assert_eq!(envelope.from, PeerId(2));
    }

    server.stop();
    wait_until("server teardown", || server.status() == Status::NotActive);
}

#[test]
fn malformed_frames_get_the_sender_disconnected() {
    let transport = Arc::new(MemoryTransport::new());
    let policy = RecordingPolicy::accept_all();
    let server = start_relay(&transport, "relay:violation", policy.clone());

    // A raw transport host stands in for a peer that breaks protocol.
    let mut raw = transport.create_host(None, 1, 2).unwrap();
    let to_server = transport.connect(&mut raw, "relay:violation").unwrap();
    wait_until("raw peer admitted", || {
        !policy.journal().connect_attempts.is_empty()
    });

    // An unknown frame kind is a protocol violation: the relay drops the
    // connection and notifies the policy of the departure.
    transport
        .send(&to_server, &[0xFF, 0, 1, 2], DeliveryClass::Reliable)
        .unwrap();

    let mut disconnected = false;
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        match transport.service_once(&mut raw, Duration::from_millis(20)) {
            TransportEvent::Disconnected(_) => {
                disconnected = true;
                break;
            }
            _ => continue,
        }
    }
    assert!(disconnected, "relay should disconnect a protocol violator");
    wait_until("policy told of departure", || {
        policy.journal().disconnects == vec![PeerId(2)]
    });
    transport.destroy_host(raw);

    server.stop();
    wait_until("server teardown", || server.status() == Status::NotActive);
}

#[test]
fn roster_frames_from_clients_are_a_violation() {
    let transport = Arc::new(MemoryTransport::new());
    let policy = RecordingPolicy::accept_all();
    let server = start_relay(&transport, "relay:bad-roster", policy.clone());

    let mut raw = transport.create_host(None, 1, 2).unwrap();
    let to_server = transport.connect(&mut raw, "relay:bad-roster").unwrap();
    wait_until("raw peer admitted", || {
        !policy.journal().connect_attempts.is_empty()
    });

    // Only the server may author ROSTER frames.
    let bogus = frame::encode_roster(PeerId(2), &[PeerId(2)]).unwrap();
    transport
        .send(&to_server, &bogus, DeliveryClass::Reliable)
        .unwrap();

    wait_until("violator dropped", || {
        policy.journal().disconnects == vec![PeerId(2)]
    });
    transport.destroy_host(raw);

    server.stop();
    wait_until("server teardown", || server.status() == Status::NotActive);
}

#[test]
fn targeted_frame_to_a_departed_peer_is_dropped() {
    let transport = Arc::new(MemoryTransport::new());
    let server = start_relay(&transport, "relay:departed", RecordingPolicy::accept_all());

    let mut alice = ClientEndpoint::new(transport.clone(), "relay:departed");
    alice.connect().unwrap();
    wait_until("alice admitted", || alice.id() == Some(PeerId(2)));
    let mut bob = ClientEndpoint::new(transport.clone(), "relay:departed");
    bob.connect().unwrap();
    wait_until("bob admitted", || bob.id() == Some(PeerId(3)));

    bob.disconnect();
    wait_until("bob gone", || alice.peers() == vec![PeerId(2)]);

    // Alice still addresses 3; the relay scans its roster, finds no such
    // peer, and drops the frame without touching anyone else's queue.
    alice
        .enqueue_send(packet(&[1]), DeliveryClass::Reliable, PeerId(3))
        .unwrap();
    assert_silent(&server);
    assert_silent(&alice);

    server.stop();
    wait_until("server teardown", || server.status() == Status::NotActive);
}
