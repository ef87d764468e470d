// meshwork_relay — the endpoint backends of the Meshwork relay toolkit.
//
// Three deployment modes sit behind one `Endpoint` abstraction so
// application code is written once:
// - `ClientEndpoint`: connects outward to a relay, waits for its id
//   assignment, forwards and accepts frames.
// - `RelayServer`: the authoritative hub — admits peers via the `Policy`
//   collaborator, allocates ids, broadcasts the roster, routes DATA frames.
// - `LocalEndpoint`: same-process loopback for offline play; no transport,
//   policy hooks called directly on the caller's thread.
//
// Module overview:
// - `endpoint.rs`:  `Status` lifecycle machine and the shared `Endpoint`
//                   trait.
// - `channel.rs`:   The synchronized channel — the mutex-guarded send/
//                   receive queue pair plus the `rendezvous()` request/
//                   response primitive for cross-thread policy calls.
// - `policy.rs`:    The `Policy` collaborator trait and the
//                   `PolicyCourier`/`PolicyStation` pair for servicing
//                   hooks on the application's own thread.
// - `transport.rs`: The black-box datagram `Transport` trait the networked
//                   backends drive.
// - `memory.rs`:    In-process `MemoryTransport` used by the test suite and
//                   for same-process embedding.
// - `client.rs` / `server.rs` / `local.rs`: the three backends.
//
// Design decisions:
// - **One worker thread per networked endpoint.** The worker services the
//   transport with a short bounded timeout; callers interact only through
//   the shared queue state. No lock is held across transport I/O or a
//   policy hook.
// - **No async runtime.** Blocking threads and `std::sync::mpsc` channels,
//   matching the transports this toolkit targets.
// - **Explicit transport context.** A `Transport` value is constructed once
//   and shared (`Arc`) into every endpoint; there is no process-global
//   transport state.

pub mod channel;
pub mod client;
pub mod endpoint;
pub mod error;
pub mod local;
pub mod memory;
pub mod policy;
pub mod server;
pub mod transport;

pub use client::ClientEndpoint;
pub use endpoint::{Endpoint, Status};
pub use error::RelayError;
pub use local::LocalEndpoint;
pub use memory::{MemoryPeer, MemoryTransport};
pub use policy::{AcceptAll, ForwardEvent, Policy, PolicyCourier, PolicyStation, policy_channel};
pub use server::{RelayServer, ServerConfig};
pub use transport::{Transport, TransportError, TransportEvent};
