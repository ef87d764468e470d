// meshwork_protocol — wire protocol for the Meshwork relay toolkit.
//
// This crate defines the byte-exact frame format and the types that cross
// the boundary between application code and the endpoint backends in
// `meshwork_relay`. It has no I/O and no threads, so it is testable in
// isolation and shared by every backend.
//
// Module overview:
// - `types.rs`:  `PeerId`, `DeliveryClass`, and the internal `Envelope`
//                carrier moving payloads through endpoint queues.
// - `packet.rs`: `Packet` — fixed 128-byte payload container with
//                independent append/read cursors.
// - `frame.rs`:  The 2-byte-header wire codec (ROSTER and DATA frames) and
//                the size constants it enforces.
// - `error.rs`:  `ProtocolError` — overflow, truncated frame, unknown kind.
//
// Design decisions:
// - **Hand-packed frames.** The format is two header bytes plus raw payload;
//   ids are one byte wide because that is their wire width. No serializer
//   sits between the application and the wire.
// - **Errors before I/O.** Encoding checks sizes before building a frame, so
//   an oversized payload can never reach a transport half-written.

pub mod error;
pub mod frame;
pub mod packet;
pub mod types;

pub use error::ProtocolError;
pub use frame::{Frame, HEADER_LEN, MAX_FRAME_LEN, MAX_PAYLOAD_LEN, decode, encode_data, encode_roster};
pub use packet::Packet;
pub use types::{DeliveryClass, Envelope, PeerId};
