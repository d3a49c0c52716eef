//! Wire protocol for scrawl-live peer sessions.
//!
//! Every peer-to-peer packet is one JSON envelope `{ "type": ..., "payload":
//! ... }`. The envelope is a closed tagged union: each message kind carries
//! its own strongly-typed payload and is decoded exactly once, at the router
//! boundary. Unknown kinds fail decoding and are dropped by the caller,
//! never fatally.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

use chrono::{DateTime, Utc};
use scrawl_core::{DrawnLine, GameSnapshot, PeerId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Decode (or encode) failure. The payload did not match the closed union.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// All message kinds exchanged between peers.
///
/// Sends are fire-and-forget: no acknowledgment and no retry at this layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WireMessage {
    /// Identity intro and partial player upsert. Absent fields keep the
    /// receiver's previous values.
    LocalPlayerData {
        peer_id: PeerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Full-history snapshot (host to a freshly trusted joiner, and host
    /// broadcast at game end).
    GameState(GameSnapshot),
    StartGameSignal,
    /// The drawer named here picks its phrase locally; the phrase never
    /// rides this signal.
    StartRoundSignal {
        round_starting_time: DateTime<Utc>,
        drawer_peer_id: PeerId,
    },
    /// A batch of strokes for the open trial, replicated verbatim.
    NewLines { lines: Vec<DrawnLine> },
    ClearCanvasCommand,
    /// Reveals the phrase and closes the round everywhere.
    RoundSolvedSignal {
        phrase: String,
        solver_peer_id: PeerId,
        solved_at: DateTime<Utc>,
    },
    ChatMessage { text: String },
    /// Mesh formation: ids the receiver should open direct links to.
    PeerList { peer_ids: Vec<PeerId> },
}

impl WireMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Message kind for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LocalPlayerData { .. } => "localPlayerData",
            Self::GameState(_) => "gameState",
            Self::StartGameSignal => "startGameSignal",
            Self::StartRoundSignal { .. } => "startRoundSignal",
            Self::NewLines { .. } => "newLines",
            Self::ClearCanvasCommand => "clearCanvasCommand",
            Self::RoundSolvedSignal { .. } => "roundSolvedSignal",
            Self::ChatMessage { .. } => "chatMessage",
            Self::PeerList { .. } => "peerList",
        }
    }
}
