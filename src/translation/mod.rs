//! # Translation Relay Core
//!
//! Everything that happens between an accepted client socket and the
//! upstream speech engine, independent of actix.
//!
//! ## Data flow:
//! ```text
//! client PCM ──▶ UpstreamSession ──▶ engine
//! engine events ──▶ ResponseRouter ──▶ {audio queue, transcript queue}
//! queues ──▶ forwarders ──▶ DownstreamSink (client)
//! ```
//!
//! ## Modules:
//! - `events`: upstream wire codec
//! - `messages`: downstream client protocol
//! - `languages`: display names and the interpreter instruction
//! - `session`: per-connection identity and active flag
//! - `upstream`: handshake state machine and outbound framing
//! - `router`: inbound event routing and the speculative-text latch
//! - `forwarder`: queue drain loops
//! - `lifecycle`: startup, main loop, teardown
//! - `transport`: the engine connection

pub mod events;
pub mod forwarder;
pub mod languages;
pub mod lifecycle;
pub mod messages;
pub mod router;
pub mod session;
pub mod transport;
pub mod upstream;

pub use forwarder::DownstreamSink;
pub use lifecycle::{run_session, ClientFrame};
pub use messages::ServerMessage;
pub use session::Session;
