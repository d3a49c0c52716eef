//! Full-history snapshot for join-time catch-up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::GameSession;
use crate::player::{PeerId, Player};
use crate::round::Round;

/// Everything a late joiner needs to reproduce the host's view: game flags,
/// the ids of every other participant (for mesh formation) and the complete
/// round history including all lines and guesses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub is_started: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub peer_ids: Vec<PeerId>,
    pub rounds: Vec<Round>,
}

impl GameSnapshot {
    /// Capture the session for a given recipient. The recipient's own id is
    /// left out of `peer_ids`. Names and scores are not shipped: names
    /// travel with each peer's identity intro, and scores are derived from
    /// the round history on arrival.
    pub fn capture(session: &GameSession, recipient: Option<&PeerId>) -> Self {
        Self {
            is_started: session.started,
            started_at: session.started_at,
            ended_at: session.ended_at,
            peer_ids: session
                .player_ids()
                .into_iter()
                .filter(|id| recipient != Some(id))
                .collect(),
            rounds: session.rounds.clone(),
        }
    }
}

impl GameSession {
    /// Adopt a snapshot wholesale, overwriting any local default state, and
    /// rebuild scores from the adopted history. Players named only by id get
    /// placeholder entries until their identity intro arrives.
    pub fn apply_snapshot(&mut self, snapshot: GameSnapshot) {
        self.started = snapshot.is_started;
        self.started_at = snapshot.started_at;
        self.ended_at = snapshot.ended_at;
        for id in &snapshot.peer_ids {
            if *id != self.local.id && !self.remote_players.contains_key(id) {
                self.remote_players
                    .insert(id.clone(), Player::unnamed(id.clone()));
            }
        }
        self.adopt_rounds(snapshot.rounds);
        self.rebuild_scores();
    }
}
