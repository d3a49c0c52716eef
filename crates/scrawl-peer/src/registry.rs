//! Live peer links and their handshake progress.

use std::collections::BTreeMap;

use scrawl_core::PeerId;

/// One transport link to a peer.
///
/// A link is *trusted* only once three independent acknowledgments are all
/// in: the transport confirmed delivery (link open), our identity intro went
/// out, and the remote's intro came back. The three events carry no ordering
/// guarantee, so trust is always recomputed from the flags, never latched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub remote: PeerId,
    pub incoming: bool,
    pub confirmed: bool,
    pub intro_sent: bool,
    pub intro_received: bool,
    /// Marks the link to the authoritative host. At most one per registry.
    pub host_link: bool,
}

impl Connection {
    pub fn new(remote: PeerId, incoming: bool) -> Self {
        Self {
            remote,
            incoming,
            confirmed: false,
            intro_sent: false,
            intro_received: false,
            host_link: false,
        }
    }

    /// Pure function of the three handshake flags.
    pub fn trusted(&self) -> bool {
        self.confirmed && self.intro_sent && self.intro_received
    }
}

/// The set of live links, keyed by remote peer id. Owned by the event loop;
/// every mutation happens inside the turn that owns it.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<PeerId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a link. Adding a second host link is a logic error upstream
    /// and fatal here.
    pub fn add(&mut self, mut connection: Connection, host_link: bool) {
        assert!(
            !(host_link && self.host_connection().is_some()),
            "second host link for {}",
            connection.remote
        );
        connection.host_link = host_link;
        if let Some(previous) = self
            .connections
            .insert(connection.remote.clone(), connection)
        {
            tracing::warn!(remote = %previous.remote, "replaced an existing link");
        }
    }

    /// Drop a link. An unknown remote signals a desync upstream: reported,
    /// never fatal.
    pub fn remove(&mut self, remote: &PeerId) -> Option<Connection> {
        let removed = self.connections.remove(remote);
        if removed.is_none() {
            tracing::error!(remote = %remote, "remove of unknown connection");
        }
        removed
    }

    pub fn by_peer_id(&self, remote: &PeerId) -> Option<&Connection> {
        self.connections.get(remote)
    }

    pub fn by_peer_id_mut(&mut self, remote: &PeerId) -> Option<&mut Connection> {
        self.connections.get_mut(remote)
    }

    pub fn all(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn host_connection(&self) -> Option<&Connection> {
        self.connections.values().find(|c| c.host_link)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn clear(&mut self) {
        self.connections.clear();
    }
}
