//! Matchbox-backed transport: WebRTC data channels with a signaling
//! rendezvous room.
//!
//! The signaling room is full-mesh, so links open as peers show up rather
//! than on demand; [`Transport::connect`] records the expectation and is what
//! lets the runtime distinguish dialed links from incoming ones. The
//! embedding application must spawn [`MatchboxTransport::take_message_loop`]
//! on its executor and keep it alive for as long as the socket is in use.

use std::collections::{BTreeSet, HashMap};

use matchbox_socket::{MessageLoopFuture, PeerState, WebRtcSocket};
use scrawl_core::{PeerId, SignalingConfig};

use super::{Transport, TransportEvent};

pub struct MatchboxTransport {
    config: SignalingConfig,
    socket: Option<WebRtcSocket>,
    message_loop: Option<MessageLoopFuture>,
    opened_reported: bool,
    /// Peers we dialed; anything else that shows up is incoming.
    expected: BTreeSet<PeerId>,
    by_id: HashMap<PeerId, matchbox_socket::PeerId>,
}

impl MatchboxTransport {
    pub fn new(config: SignalingConfig) -> Self {
        Self {
            config,
            socket: None,
            message_loop: None,
            opened_reported: false,
            expected: BTreeSet::new(),
            by_id: HashMap::new(),
        }
    }

    /// The socket's message loop, to be spawned by the embedder. Present
    /// after [`Transport::open`] until taken.
    pub fn take_message_loop(&mut self) -> Option<MessageLoopFuture> {
        self.message_loop.take()
    }

    fn core_id(peer: matchbox_socket::PeerId) -> PeerId {
        PeerId::new(peer.0.to_string())
    }
}

impl Transport for MatchboxTransport {
    /// Matchbox assigns identities itself, so `desired_id` is advisory only
    /// and identity conflicts cannot occur on this transport.
    fn open(&mut self, desired_id: &PeerId) {
        if self.socket.is_some() {
            return;
        }
        let url = self.config.url();
        tracing::info!(url = %url, desired = %desired_id, "connecting to signaling room");
        let (socket, message_loop) = WebRtcSocket::new_reliable(&url);
        self.socket = Some(socket);
        self.message_loop = Some(message_loop);
        self.opened_reported = false;
    }

    fn connect(&mut self, remote: &PeerId) {
        // The room auto-opens links; remember who we meant to dial.
        self.expected.insert(remote.clone());
    }

    fn send_to(&mut self, remote: &PeerId, bytes: Vec<u8>) {
        let Some(socket) = &mut self.socket else {
            return;
        };
        let Some(&peer) = self.by_id.get(remote) else {
            tracing::debug!(remote = %remote, "send to unknown link dropped");
            return;
        };
        socket.channel_mut(0).send(bytes.into_boxed_slice(), peer);
    }

    fn close(&mut self) {
        self.socket = None;
        self.message_loop = None;
        self.opened_reported = false;
        self.expected.clear();
        self.by_id.clear();
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        let Some(socket) = &mut self.socket else {
            return events;
        };

        if !self.opened_reported {
            if let Some(id) = socket.id() {
                self.opened_reported = true;
                events.push(TransportEvent::Opened {
                    assigned: Self::core_id(id),
                });
            }
        }

        for (peer, state) in socket.update_peers() {
            let id = Self::core_id(peer);
            match state {
                PeerState::Connected => {
                    let incoming = !self.expected.remove(&id);
                    self.by_id.insert(id.clone(), peer);
                    events.push(TransportEvent::LinkOpen { peer: id, incoming });
                }
                PeerState::Disconnected => {
                    self.by_id.remove(&id);
                    events.push(TransportEvent::LinkClosed { peer: id });
                }
            }
        }

        for (peer, packet) in socket.channel_mut(0).receive() {
            events.push(TransportEvent::Message {
                from: Self::core_id(peer),
                bytes: packet.to_vec(),
            });
        }

        events
    }
}
