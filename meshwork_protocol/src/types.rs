// Core identity and addressing types for the relay protocol.
//
// These are lightweight newtypes shared by the codec (`frame.rs`) and the
// endpoint backends in `meshwork_relay`. Ids are one byte wide because that
// is their wire representation (byte 1 of every frame header).

use crate::packet::Packet;

/// A participant identity, assigned by the relay server.
///
/// Two values are reserved: [`PeerId::ALL`] is a routing sentinel ("every
/// participant"), never a real identity, and [`PeerId::SERVER`] is the relay
/// server itself. Client ids are allocated strictly increasing from
/// `SERVER.0 + 1` and are immutable for the lifetime of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u8);

impl PeerId {
    /// Broadcast sentinel: route to every participant.
    pub const ALL: PeerId = PeerId(0);

    /// The relay server's fixed id.
    pub const SERVER: PeerId = PeerId(1);

    /// The first id a server hands out to a client.
    pub fn first_client() -> PeerId {
        PeerId(Self::SERVER.0 + 1)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Delivery guarantee requested for a send, passed through to the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryClass {
    Reliable,
    Unreliable,
}

/// In-memory carrier for a payload moving through the send/receive queues.
///
/// Envelopes never appear on the wire; the codec flattens them into frames.
/// Each recipient of a broadcast gets its own clone — queues never share a
/// single envelope between consumers.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub payload: Packet,
    pub from: PeerId,
    pub to: PeerId,
    pub class: DeliveryClass,
}

impl Envelope {
    pub fn new(payload: Packet, from: PeerId, to: PeerId, class: DeliveryClass) -> Self {
        Self {
            payload,
            from,
            to,
            class,
        }
    }
}
