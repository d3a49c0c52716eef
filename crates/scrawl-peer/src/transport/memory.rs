//! In-process transport for tests and local simulation.
//!
//! A [`MemoryHub`] plays the rendezvous service for any number of endpoints.
//! Each link delivers in FIFO order; nothing orders deliveries across
//! different links, matching the real transport contract.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::rc::Rc;

use scrawl_core::PeerId;

use super::{Transport, TransportEvent};

#[derive(Default)]
struct Endpoint {
    queue: VecDeque<TransportEvent>,
    links: BTreeSet<PeerId>,
}

#[derive(Default)]
struct HubState {
    endpoints: HashMap<PeerId, Endpoint>,
}

impl HubState {
    fn push(&mut self, to: &PeerId, event: TransportEvent) {
        if let Some(endpoint) = self.endpoints.get_mut(to) {
            endpoint.queue.push_back(event);
        }
    }
}

/// Shared rendezvous state for a set of [`MemoryTransport`] endpoints.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Rc<RefCell<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh, unopened endpoint on this hub.
    pub fn endpoint(&self) -> MemoryTransport {
        MemoryTransport {
            state: Rc::clone(&self.state),
            local: None,
            pending: VecDeque::new(),
        }
    }

    /// Drop a peer without the courtesy close, simulating a crash: partners
    /// see the link close, the victim's queue is gone.
    pub fn kill(&self, id: &PeerId) {
        let mut state = self.state.borrow_mut();
        let Some(endpoint) = state.endpoints.remove(id) else {
            return;
        };
        for partner in endpoint.links {
            state.push(&partner, TransportEvent::LinkClosed { peer: id.clone() });
        }
    }
}

/// One endpoint of a [`MemoryHub`].
pub struct MemoryTransport {
    state: Rc<RefCell<HubState>>,
    local: Option<PeerId>,
    /// Events produced before the endpoint is registered with the hub.
    pending: VecDeque<TransportEvent>,
}

impl Transport for MemoryTransport {
    fn open(&mut self, desired_id: &PeerId) {
        let mut state = self.state.borrow_mut();
        if state.endpoints.contains_key(desired_id) {
            self.pending.push_back(TransportEvent::OpenFailed {
                id_taken: true,
                reason: format!("id {desired_id} already registered"),
            });
            return;
        }
        state.endpoints.insert(desired_id.clone(), Endpoint::default());
        self.local = Some(desired_id.clone());
        self.pending.push_back(TransportEvent::Opened {
            assigned: desired_id.clone(),
        });
    }

    fn connect(&mut self, remote: &PeerId) {
        let Some(local) = self.local.clone() else {
            return;
        };
        let mut state = self.state.borrow_mut();
        if !state.endpoints.contains_key(remote) || local == *remote {
            // Best-effort: dialing an unknown peer just never opens.
            return;
        }
        let already = state
            .endpoints
            .get(&local)
            .is_some_and(|endpoint| endpoint.links.contains(remote));
        if already {
            return;
        }
        if let Some(endpoint) = state.endpoints.get_mut(&local) {
            endpoint.links.insert(remote.clone());
        }
        if let Some(endpoint) = state.endpoints.get_mut(remote) {
            endpoint.links.insert(local.clone());
        }
        state.push(
            remote,
            TransportEvent::LinkOpen {
                peer: local.clone(),
                incoming: true,
            },
        );
        state.push(
            &local,
            TransportEvent::LinkOpen {
                peer: remote.clone(),
                incoming: false,
            },
        );
    }

    fn send_to(&mut self, remote: &PeerId, bytes: Vec<u8>) {
        let Some(local) = self.local.clone() else {
            return;
        };
        let mut state = self.state.borrow_mut();
        let linked = state
            .endpoints
            .get(&local)
            .is_some_and(|endpoint| endpoint.links.contains(remote));
        if linked {
            state.push(remote, TransportEvent::Message { from: local, bytes });
        }
        // No link: the packet is silently lost, as on the wire.
    }

    fn close(&mut self) {
        let Some(local) = self.local.take() else {
            return;
        };
        let mut state = self.state.borrow_mut();
        let Some(endpoint) = state.endpoints.remove(&local) else {
            return;
        };
        for partner in endpoint.links {
            if let Some(remote) = state.endpoints.get_mut(&partner) {
                remote.links.remove(&local);
            }
            state.push(&partner, TransportEvent::LinkClosed { peer: local.clone() });
        }
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut events: Vec<TransportEvent> = self.pending.drain(..).collect();
        if let Some(local) = &self.local {
            if let Some(endpoint) = self.state.borrow_mut().endpoints.get_mut(local) {
                events.extend(endpoint.queue.drain(..));
            }
        }
        events
    }
}
