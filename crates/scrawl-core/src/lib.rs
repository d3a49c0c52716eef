//! Scrawl-Live Core Library
//!
//! Game and session state for the peer-to-peer drawing-and-guessing game:
//! round/trial lifecycle, drawer rotation, scoring, guess evaluation and the
//! join-time catch-up snapshot. Pure logic; transport and rendering live in
//! the sibling crates.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod chat;
pub mod config;
pub mod game;
pub mod phrase;
pub mod player;
pub mod round;
pub mod sync;

pub use chat::{ChatEntry, ChatLog};
pub use config::{GameConfig, SignalingConfig};
pub use game::GameSession;
pub use phrase::{PhraseSource, WordList};
pub use player::{PeerId, Player};
pub use round::{DrawnLine, Guess, Round, Trial, TrialResult};
pub use sync::GameSnapshot;
