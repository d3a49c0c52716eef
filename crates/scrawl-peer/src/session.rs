//! Session lifecycle: the local peer's relationship to the network.

use std::fmt;

/// Exactly one value at a time, process-wide, mutated only here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    NotConnected,
    ShouldConnectToServer,
    ConnectingToServer,
    /// Registered with the rendezvous service, reachable by peers.
    Listening,
    ShouldConnectToHost,
    ConnectingToHost,
    ConnectedToHost,
    ShouldDisconnect,
    Disconnecting,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotConnected => "notConnected",
            Self::ShouldConnectToServer => "shouldConnectToServer",
            Self::ConnectingToServer => "connectingToServer",
            Self::Listening => "listening",
            Self::ShouldConnectToHost => "shouldConnectToHost",
            Self::ConnectingToHost => "connectingToHost",
            Self::ConnectedToHost => "connectedToHost",
            Self::ShouldDisconnect => "shouldDisconnect",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Inputs that can move the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Explicit retry after a disconnect. There is no automatic backoff.
    RetryConnect,
    /// The turn handed the identity request to the transport.
    ServerDialing,
    ServerAccepted,
    /// Rendezvous failure or close, from any connected state.
    ServerFailed,
    /// The user supplied a target host id.
    HostChosen,
    /// The turn handed the host dial to the transport.
    HostDialing,
    /// The host link handshake completed (confirmed + both intros).
    HostTrusted,
    /// The host link dropped.
    LinkFailed,
    DisconnectRequested,
    TeardownStarted,
    TeardownFinished,
}

/// Pure transition function. Unlisted pairs leave the status unchanged.
pub fn step(status: SessionStatus, event: SessionEvent) -> SessionStatus {
    use SessionEvent as E;
    use SessionStatus as S;
    match (status, event) {
        (S::NotConnected, E::RetryConnect) => S::ShouldConnectToServer,
        (S::ShouldConnectToServer, E::ServerDialing) => S::ConnectingToServer,
        (S::ConnectingToServer, E::ServerAccepted) => S::Listening,
        (S::Listening, E::HostChosen) => S::ShouldConnectToHost,
        (S::ShouldConnectToHost, E::HostDialing) => S::ConnectingToHost,
        (S::ConnectingToHost, E::HostTrusted) => S::ConnectedToHost,
        (
            S::ConnectingToServer
            | S::Listening
            | S::ShouldConnectToHost
            | S::ConnectingToHost
            | S::ConnectedToHost,
            E::ServerFailed,
        ) => S::NotConnected,
        (S::ConnectingToHost | S::ConnectedToHost, E::LinkFailed) => S::NotConnected,
        (_, E::DisconnectRequested) => S::ShouldDisconnect,
        (S::ShouldDisconnect, E::TeardownStarted) => S::Disconnecting,
        (S::Disconnecting, E::TeardownFinished) => S::NotConnected,
        (unchanged, _) => unchanged,
    }
}

/// Thin stateful wrapper that logs rejected transitions.
#[derive(Debug)]
pub struct SessionState {
    status: SessionStatus,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// A fresh tab session wants to register immediately.
    pub fn new() -> Self {
        Self {
            status: SessionStatus::ShouldConnectToServer,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Apply an event; returns whether the status changed.
    pub fn apply(&mut self, event: SessionEvent) -> bool {
        let next = step(self.status, event);
        if next == self.status {
            tracing::debug!(status = %self.status, ?event, "session event left status unchanged");
            return false;
        }
        tracing::info!(from = %self.status, to = %next, ?event, "session transition");
        self.status = next;
        true
    }
}
