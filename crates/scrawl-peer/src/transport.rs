//! Transport adapter contract.
//!
//! Wraps the underlying peer-to-peer data-channel machinery behind a small
//! poll-based surface: the runtime drains events once per turn and issues
//! connect/send calls, never blocking. Delivery is best-effort: ordered per
//! link, possibly never delivered, no acknowledgments.

use scrawl_core::PeerId;

pub mod matchbox;
pub mod memory;

pub use matchbox::MatchboxTransport;
pub use memory::{MemoryHub, MemoryTransport};

/// Asynchronous notifications from the transport, drained via
/// [`Transport::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The rendezvous service accepted us and assigned our identity.
    Opened { assigned: PeerId },
    /// The rendezvous service rejected the identity request. `id_taken`
    /// conflicts are recoverable by retrying with a fresh id.
    OpenFailed { id_taken: bool, reason: String },
    /// The rendezvous link dropped. Existing peer links keep working.
    ServerClosed,
    /// A direct peer link finished opening.
    LinkOpen { peer: PeerId, incoming: bool },
    /// A direct peer link closed or failed.
    LinkClosed { peer: PeerId },
    /// One packet from one link.
    Message { from: PeerId, bytes: Vec<u8> },
}

/// The peer-to-peer data-channel contract.
pub trait Transport {
    /// Request a local identity from the rendezvous service. The outcome
    /// arrives as [`TransportEvent::Opened`] or [`TransportEvent::OpenFailed`].
    fn open(&mut self, desired_id: &PeerId);

    /// Open a direct link to a remote peer. Best-effort; success arrives as
    /// [`TransportEvent::LinkOpen`].
    fn connect(&mut self, remote: &PeerId);

    /// Fire-and-forget send on an open link. Silently dropped if the link is
    /// gone.
    fn send_to(&mut self, remote: &PeerId, bytes: Vec<u8>);

    /// Tear down the identity and every link.
    fn close(&mut self);

    /// Drain pending events. Called once per event-handling turn.
    fn poll(&mut self) -> Vec<TransportEvent>;
}
