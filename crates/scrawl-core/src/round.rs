//! Rounds, trials, strokes and guesses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::player::PeerId;

/// One line segment of a drawing, with coordinates normalized to [0, 1] so
/// peers can render at any resolution. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawnLine {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub color: String,
}

/// One chat attempt at the phrase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guess {
    pub guesser: PeerId,
    pub text: String,
    pub at: DateTime<Utc>,
    pub is_correct: bool,
}

/// Outcome of a single trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrialResult {
    /// Countdown running, drawing has not begun.
    Starting,
    /// Drawing in progress.
    Ongoing,
    /// Canvas was cleared; a fresh trial follows in the same round.
    Cleared,
    /// A guesser found the phrase.
    Solved,
    /// Time ran out.
    Failed,
}

/// One attempt within a round. A round restarts as a new trial when the
/// canvas is cleared before anyone solves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trial {
    pub starting_time: DateTime<Utc>,
    /// When drawing actually began, after the countdown.
    pub started_time: Option<DateTime<Utc>>,
    pub finished_time: Option<DateTime<Utc>>,
    pub lines: Vec<DrawnLine>,
    pub guesses: Vec<Guess>,
    pub result: TrialResult,
}

impl Trial {
    /// A trial in its countdown window.
    pub fn starting(starting_time: DateTime<Utc>) -> Self {
        Self {
            starting_time,
            started_time: None,
            finished_time: None,
            lines: Vec::new(),
            guesses: Vec::new(),
            result: TrialResult::Starting,
        }
    }

    /// A trial that skips the countdown (opened by a canvas clear).
    pub fn ongoing(at: DateTime<Utc>) -> Self {
        Self {
            starting_time: at,
            started_time: Some(at),
            finished_time: None,
            lines: Vec::new(),
            guesses: Vec::new(),
            result: TrialResult::Ongoing,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.result, TrialResult::Starting | TrialResult::Ongoing)
    }

    /// The reference instant for guess admission and scoring: when drawing
    /// began, or the countdown start if drawing never did.
    pub fn start_reference(&self) -> DateTime<Utc> {
        self.started_time.unwrap_or(self.starting_time)
    }

    /// Close the trial with the given result.
    pub fn finish(&mut self, result: TrialResult, at: DateTime<Utc>) {
        self.result = result;
        self.finished_time = Some(at);
    }
}

/// One drawing/guessing unit. The phrase is `None` on every peer except the
/// drawer until the round resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    pub phrase: Option<String>,
    pub drawer: PeerId,
    pub solver: Option<PeerId>,
    pub trials: Vec<Trial>,
}

impl Round {
    pub fn new(drawer: PeerId, phrase: Option<String>, starting_time: DateTime<Utc>) -> Self {
        Self {
            phrase,
            drawer,
            solver: None,
            trials: vec![Trial::starting(starting_time)],
        }
    }

    /// Round-level status is the status of the last trial.
    pub fn status(&self) -> TrialResult {
        self.trials.last().map_or(TrialResult::Failed, |t| t.result)
    }

    pub fn is_open(&self) -> bool {
        self.trials.last().is_some_and(Trial::is_open)
    }
}
