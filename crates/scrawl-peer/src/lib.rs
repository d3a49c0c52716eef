//! Scrawl-Live Peer Runtime
//!
//! Everything between the game core and the wire: the transport adapter
//! contract with matchbox and in-memory implementations, the connection
//! registry and handshake, the session lifecycle state machine, the message
//! router with join-time catch-up, and display-name persistence.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod peer;
pub mod registry;
pub mod session;
pub mod storage;
pub mod transport;

pub use peer::{IntentError, PeerSession};
pub use registry::{Connection, ConnectionRegistry};
pub use session::{SessionEvent, SessionState, SessionStatus};
pub use storage::{FileNameStore, MemoryNameStore, NameStore};
pub use transport::{MatchboxTransport, MemoryHub, MemoryTransport, Transport, TransportEvent};
