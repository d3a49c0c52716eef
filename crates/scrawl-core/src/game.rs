//! Game session state machine: round lifecycle, drawer rotation, scoring
//! and guess evaluation.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::seq::IndexedRandom;

use crate::config::GameConfig;
use crate::player::{PeerId, Player};
use crate::round::{DrawnLine, Guess, Round, Trial, TrialResult};

/// Explicit handle to the open trial. Maintained on round/trial open and
/// close so call sites never re-derive "last round, last trial" from the
/// history vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TrialCursor {
    round: usize,
    trial: usize,
}

/// The local replica of the shared game state. Mutated only inside the
/// event-handling turn that owns it; peers influence it exclusively through
/// decoded wire messages.
#[derive(Debug, Clone)]
pub struct GameSession {
    pub config: GameConfig,
    pub started: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub local: Player,
    /// Remote participants, keyed by peer id.
    pub remote_players: BTreeMap<PeerId, Player>,
    /// Append-only round history.
    pub rounds: Vec<Round>,
    active: Option<TrialCursor>,
}

impl GameSession {
    pub fn new(local_id: PeerId, name: impl Into<String>, config: GameConfig) -> Self {
        Self {
            config,
            started: false,
            started_at: None,
            ended_at: None,
            local: Player::new(local_id, name),
            remote_players: BTreeMap::new(),
            rounds: Vec::new(),
            active: None,
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local.id
    }

    // ---- players ----------------------------------------------------------

    /// Create or update a player entry. Absent fields keep their previous
    /// value, so a bare identity announcement never resets a name.
    pub fn upsert_player(&mut self, id: &PeerId, name: Option<String>) {
        if *id == self.local.id {
            if let Some(name) = name {
                self.local.name = name;
            }
            return;
        }
        let player = self
            .remote_players
            .entry(id.clone())
            .or_insert_with(|| Player::unnamed(id.clone()));
        if let Some(name) = name {
            player.name = name;
        }
    }

    /// Drop a remote player on disconnect. The round history keeps any
    /// rounds they drew or solved.
    pub fn remove_player(&mut self, id: &PeerId) -> bool {
        self.remote_players.remove(id).is_some()
    }

    pub fn player(&self, id: &PeerId) -> Option<&Player> {
        if *id == self.local.id {
            Some(&self.local)
        } else {
            self.remote_players.get(id)
        }
    }

    fn player_mut(&mut self, id: &PeerId) -> Option<&mut Player> {
        if *id == self.local.id {
            Some(&mut self.local)
        } else {
            self.remote_players.get_mut(id)
        }
    }

    /// All known player ids, local first, remotes in key order.
    pub fn player_ids(&self) -> Vec<PeerId> {
        let mut ids = Vec::with_capacity(self.remote_players.len() + 1);
        ids.push(self.local.id.clone());
        ids.extend(self.remote_players.keys().cloned());
        ids
    }

    // ---- game lifecycle ---------------------------------------------------

    pub fn start_game(&mut self, now: DateTime<Utc>) -> bool {
        if self.started {
            return false;
        }
        self.started = true;
        self.started_at = Some(now);
        self.ended_at = None;
        true
    }

    pub fn end_game(&mut self, now: DateTime<Utc>) -> bool {
        if !self.started {
            return false;
        }
        if let Some(cursor) = self.active.take() {
            self.rounds[cursor.round].trials[cursor.trial].finish(TrialResult::Failed, now);
        }
        self.started = false;
        self.ended_at = Some(now);
        true
    }

    /// Whether the total game length has elapsed. Checked by the host on its
    /// poll turn.
    pub fn game_expired(&self, now: DateTime<Utc>) -> bool {
        self.started
            && self.started_at.is_some_and(|started| {
                now - started >= Duration::seconds(self.config.game_secs)
            })
    }

    // ---- round lifecycle --------------------------------------------------

    /// Open a new round. Any trial still open is closed as `Failed` first:
    /// there is no round-failed message on the wire, so a fresh round-start
    /// signal is how peers learn the previous round timed out.
    ///
    /// `phrase` is `Some` only on the drawer itself.
    pub fn start_round(
        &mut self,
        drawer: PeerId,
        starting_time: DateTime<Utc>,
        phrase: Option<String>,
    ) -> bool {
        if !self.started {
            tracing::warn!(drawer = %drawer, "round start ignored: game not started");
            return false;
        }
        if let Some(cursor) = self.active.take() {
            self.rounds[cursor.round].trials[cursor.trial]
                .finish(TrialResult::Failed, starting_time);
        }
        self.rounds.push(Round::new(drawer, phrase, starting_time));
        self.active = Some(TrialCursor {
            round: self.rounds.len() - 1,
            trial: 0,
        });
        true
    }

    pub fn active_round(&self) -> Option<&Round> {
        self.active.map(|c| &self.rounds[c.round])
    }

    pub fn active_trial(&self) -> Option<&Trial> {
        self.active.map(|c| &self.rounds[c.round].trials[c.trial])
    }

    fn active_trial_mut(&mut self) -> Option<&mut Trial> {
        self.active
            .map(|c| &mut self.rounds[c.round].trials[c.trial])
    }

    /// Whether the local player draws the active round.
    pub fn is_drawer(&self, id: &PeerId) -> bool {
        self.active_round().is_some_and(|round| round.drawer == *id)
    }

    /// Countdown over? Then move the open trial from `Starting` to `Ongoing`.
    /// The drawing-start timestamp is derived from the round-start signal
    /// (`starting_time + countdown`), not the local poll instant, so every
    /// peer records the same one.
    pub fn begin_drawing(&mut self, now: DateTime<Utc>) -> bool {
        let countdown = Duration::seconds(self.config.countdown_secs);
        let Some(trial) = self.active_trial_mut() else {
            return false;
        };
        if trial.result != TrialResult::Starting || now < trial.starting_time + countdown {
            return false;
        }
        trial.started_time = Some(trial.starting_time + countdown);
        trial.result = TrialResult::Ongoing;
        true
    }

    /// Append replicated strokes to the open trial. Strokes that arrive with
    /// no open trial (cross-connection reordering) are dropped.
    pub fn append_lines(&mut self, lines: Vec<DrawnLine>) -> usize {
        let count = lines.len();
        match self.active_trial_mut() {
            Some(trial) => {
                trial.lines.extend(lines);
                count
            }
            None => {
                tracing::warn!(dropped = count, "stroke batch with no open trial");
                0
            }
        }
    }

    /// Strokes on the open trial.
    pub fn stroke_count(&self) -> usize {
        self.active_trial().map_or(0, |trial| trial.lines.len())
    }

    /// Close the open trial as `Cleared` and immediately open a fresh
    /// `Ongoing` trial in the same round. Returns the cleared stroke count so
    /// the caller can suppress the chat notice when nothing was on the canvas.
    pub fn clear_canvas(&mut self, now: DateTime<Utc>) -> Option<usize> {
        let cursor = self.active?;
        let trial = &mut self.rounds[cursor.round].trials[cursor.trial];
        if !trial.is_open() {
            return None;
        }
        let cleared = trial.lines.len();
        trial.finish(TrialResult::Cleared, now);
        self.rounds[cursor.round].trials.push(Trial::ongoing(now));
        self.active = Some(TrialCursor {
            round: cursor.round,
            trial: cursor.trial + 1,
        });
        Some(cleared)
    }

    /// Record a guess against the open trial.
    pub fn record_guess(
        &mut self,
        guesser: PeerId,
        text: impl Into<String>,
        at: DateTime<Utc>,
        is_correct: bool,
    ) -> bool {
        match self.active_trial_mut() {
            Some(trial) => {
                trial.guesses.push(Guess {
                    guesser,
                    text: text.into(),
                    at,
                    is_correct,
                });
                true
            }
            None => false,
        }
    }

    /// Correct iff the trimmed, case-folded text contains the active phrase,
    /// the guesser is not the drawer, and the guess is not older than the
    /// open trial (a cleared trial's guesses never count retroactively).
    ///
    /// Only the drawer knows the phrase, so only the drawer can get `true`
    /// here for a round in progress.
    pub fn evaluate_guess(&self, guesser: &PeerId, text: &str, at: DateTime<Utc>) -> bool {
        let Some(round) = self.active_round() else {
            return false;
        };
        if round.drawer == *guesser {
            return false;
        }
        let Some(phrase) = round.phrase.as_deref() else {
            return false;
        };
        let Some(trial) = self.active_trial() else {
            return false;
        };
        if at < trial.start_reference() {
            return false;
        }
        text.trim()
            .to_lowercase()
            .contains(&phrase.trim().to_lowercase())
    }

    /// Close the active round as solved, reveal the phrase and award points
    /// to drawer and solver. An unknown solver id still closes the round; the
    /// inconsistency is logged and only the drawer is scored.
    pub fn solve_round(
        &mut self,
        phrase: impl Into<String>,
        solver: &PeerId,
        solved_at: DateTime<Utc>,
    ) -> bool {
        let Some(cursor) = self.active.take() else {
            tracing::warn!("round-solved signal with no open round");
            return false;
        };
        let round = &mut self.rounds[cursor.round];
        let trial = &mut round.trials[cursor.trial];
        let elapsed = (solved_at - trial.start_reference()).num_seconds();
        trial.finish(TrialResult::Solved, solved_at);
        round.phrase = Some(phrase.into());
        round.solver = Some(solver.clone());
        let drawer = round.drawer.clone();

        let points = self.solve_score(elapsed);
        self.award(&drawer, points);
        if self.player(solver).is_some() {
            self.award(solver, points);
        } else {
            tracing::error!(solver = %solver, "round solved by unknown peer");
        }
        true
    }

    /// Close the open trial as failed (timeout).
    pub fn fail_round(&mut self, now: DateTime<Utc>) -> bool {
        match self.active.take() {
            Some(cursor) => {
                self.rounds[cursor.round].trials[cursor.trial].finish(TrialResult::Failed, now);
                true
            }
            None => false,
        }
    }

    /// Whether the open trial has run out of time: per-trial window from
    /// drawing start, and a hard per-round cap across cleared trials.
    pub fn trial_expired(&self, now: DateTime<Utc>) -> bool {
        let Some(cursor) = self.active else {
            return false;
        };
        let round = &self.rounds[cursor.round];
        let trial = &round.trials[cursor.trial];
        if trial.result != TrialResult::Ongoing {
            return false;
        }
        let trial_over = now - trial.start_reference() >= Duration::seconds(self.config.round_secs);
        let round_over = round.trials.first().is_some_and(|first| {
            now - first.starting_time >= Duration::seconds(self.config.extension_secs)
        });
        trial_over || round_over
    }

    // ---- scoring and rotation ---------------------------------------------

    /// Points for a solve after `elapsed` seconds of drawing.
    pub fn solve_score(&self, elapsed: i64) -> u32 {
        u32::try_from(self.config.round_secs - elapsed).unwrap_or(0)
    }

    fn award(&mut self, id: &PeerId, points: u32) {
        if let Some(player) = self.player_mut(id) {
            player.score += points;
        }
    }

    /// Rounds drawn per known player. Players with no rounds count zero.
    pub fn draw_counts(&self) -> BTreeMap<PeerId, usize> {
        let mut counts: BTreeMap<PeerId, usize> =
            self.player_ids().into_iter().map(|id| (id, 0)).collect();
        for round in &self.rounds {
            if let Some(count) = counts.get_mut(&round.drawer) {
                *count += 1;
            }
        }
        counts
    }

    /// Pick who draws next: everyone strictly behind the most-frequent drawer
    /// is a candidate; when all are tied, everyone is. Uniform pick among
    /// candidates, so turns stay balanced while tolerating peers joining and
    /// leaving mid-game.
    pub fn next_drawer<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<PeerId> {
        let counts = self.draw_counts();
        if counts.is_empty() {
            return None;
        }
        let max = counts.values().copied().max().unwrap_or(0);
        let behind: Vec<&PeerId> = counts
            .iter()
            .filter(|&(_, &count)| count + 1 <= max)
            .map(|(id, _)| id)
            .collect();
        let pool: Vec<&PeerId> = if behind.is_empty() {
            counts.keys().collect()
        } else {
            behind
        };
        pool.choose(rng).map(|id| (*id).clone())
    }

    /// Replace the round history and re-point the cursor at the open trial,
    /// if any. Snapshot-adoption path.
    pub(crate) fn adopt_rounds(&mut self, rounds: Vec<Round>) {
        self.rounds = rounds;
        self.active = self.rounds.len().checked_sub(1).and_then(|round| {
            let trials = &self.rounds[round].trials;
            let trial = trials.len().checked_sub(1)?;
            trials[trial]
                .is_open()
                .then_some(TrialCursor { round, trial })
        });
    }

    /// Recompute every score from the round history. Used after adopting a
    /// snapshot, where scores are derived rather than shipped.
    pub fn rebuild_scores(&mut self) {
        self.local.score = 0;
        for player in self.remote_players.values_mut() {
            player.score = 0;
        }
        let awards: Vec<(PeerId, Option<PeerId>, u32)> = self
            .rounds
            .iter()
            .filter(|round| round.status() == TrialResult::Solved)
            .filter_map(|round| {
                let trial = round.trials.last()?;
                let finished = trial.finished_time?;
                let elapsed = (finished - trial.start_reference()).num_seconds();
                Some((
                    round.drawer.clone(),
                    round.solver.clone(),
                    self.solve_score(elapsed),
                ))
            })
            .collect();
        for (drawer, solver, points) in awards {
            self.award(&drawer, points);
            if let Some(solver) = solver {
                self.award(&solver, points);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn session() -> GameSession {
        let mut session = GameSession::new(PeerId::new("host"), "Host", GameConfig::default());
        session.upsert_player(&PeerId::new("guest"), Some("Guest".to_string()));
        session.start_game(at(0));
        session
    }

    #[test]
    fn test_upsert_is_partial() {
        let mut session = session();
        let id = PeerId::new("guest");
        session.upsert_player(&id, None);
        assert_eq!(session.player(&id).unwrap().name, "Guest");

        session.upsert_player(&id, Some("Renamed".to_string()));
        assert_eq!(session.player(&id).unwrap().name, "Renamed");
    }

    #[test]
    fn test_countdown_then_drawing() {
        let mut session = session();
        session.start_round(PeerId::new("host"), at(0), Some("cat".to_string()));

        assert!(!session.begin_drawing(at(2)));
        assert!(session.begin_drawing(at(3)));
        assert_eq!(
            session.active_trial().unwrap().started_time,
            Some(at(3)),
        );
        // A second call is a no-op.
        assert!(!session.begin_drawing(at(4)));
    }

    #[test]
    fn test_scoring_forty_five_seconds() {
        let mut session = session();
        session.start_round(PeerId::new("host"), at(0), Some("cat".to_string()));
        session.begin_drawing(at(3));

        assert!(session.solve_round("cat", &PeerId::new("guest"), at(48)));
        assert_eq!(session.player(&PeerId::new("host")).unwrap().score, 15);
        assert_eq!(session.player(&PeerId::new("guest")).unwrap().score, 15);
        assert_eq!(session.rounds[0].status(), TrialResult::Solved);
        assert_eq!(session.rounds[0].phrase.as_deref(), Some("cat"));
    }

    #[test]
    fn test_scoring_floors_at_zero() {
        let mut session = session();
        session.start_round(PeerId::new("host"), at(0), Some("cat".to_string()));
        session.begin_drawing(at(3));

        session.solve_round("cat", &PeerId::new("guest"), at(3 + 75));
        assert_eq!(session.player(&PeerId::new("host")).unwrap().score, 0);
        assert_eq!(session.player(&PeerId::new("guest")).unwrap().score, 0);
    }

    #[test]
    fn test_unknown_solver_still_closes_round() {
        let mut session = session();
        session.start_round(PeerId::new("host"), at(0), Some("cat".to_string()));
        session.begin_drawing(at(3));

        assert!(session.solve_round("cat", &PeerId::new("nobody"), at(10)));
        assert_eq!(session.rounds[0].status(), TrialResult::Solved);
        assert_eq!(session.rounds[0].solver, Some(PeerId::new("nobody")));
        // Drawer still gets the points.
        assert_eq!(session.player(&PeerId::new("host")).unwrap().score, 53);
    }

    #[test]
    fn test_guess_evaluation() {
        let mut session = session();
        session.start_round(PeerId::new("host"), at(0), Some("cat".to_string()));
        session.begin_drawing(at(3));

        let guest = PeerId::new("guest");
        assert!(session.evaluate_guess(&guest, "it's a CAT!", at(10)));
        assert!(!session.evaluate_guess(&guest, "a dog?", at(10)));
        // The drawer never solves its own round.
        assert!(!session.evaluate_guess(&PeerId::new("host"), "cat", at(10)));
        // Guesses from before the trial started never count.
        assert!(!session.evaluate_guess(&guest, "cat", at(1)));
    }

    #[test]
    fn test_clear_opens_new_trial_without_countdown() {
        let mut session = session();
        session.start_round(PeerId::new("host"), at(0), Some("cat".to_string()));
        session.begin_drawing(at(3));
        session.append_lines(vec![DrawnLine {
            x1: 0.1,
            y1: 0.1,
            x2: 0.5,
            y2: 0.5,
            color: "#000".to_string(),
        }]);

        assert_eq!(session.clear_canvas(at(10)), Some(1));
        let round = &session.rounds[0];
        assert_eq!(round.trials.len(), 2);
        assert_eq!(round.trials[0].result, TrialResult::Cleared);
        assert_eq!(round.trials[1].result, TrialResult::Ongoing);
        assert_eq!(session.stroke_count(), 0);

        // Guesses from the cleared trial would predate the new one.
        assert!(!session.evaluate_guess(&PeerId::new("guest"), "cat", at(5)));
        assert!(session.evaluate_guess(&PeerId::new("guest"), "cat", at(11)));
    }

    #[test]
    fn test_replayed_batches_are_not_deduplicated() {
        // Sends are at-most-once with no de-dup on receipt; a replayed batch
        // really does double the strokes.
        let mut session = session();
        session.start_round(PeerId::new("host"), at(0), Some("cat".to_string()));
        session.begin_drawing(at(3));

        let batch = vec![DrawnLine {
            x1: 0.1,
            y1: 0.1,
            x2: 0.2,
            y2: 0.2,
            color: "#000".to_string(),
        }];
        session.append_lines(batch.clone());
        session.append_lines(batch);
        assert_eq!(session.stroke_count(), 2);
    }

    #[test]
    fn test_lines_without_open_trial_are_dropped() {
        let mut session = session();
        let dropped = session.append_lines(vec![DrawnLine {
            x1: 0.0,
            y1: 0.0,
            x2: 1.0,
            y2: 1.0,
            color: "#f00".to_string(),
        }]);
        assert_eq!(dropped, 0);
        assert!(session.rounds.is_empty());
    }

    #[test]
    fn test_new_round_fails_stale_trial() {
        let mut session = session();
        session.start_round(PeerId::new("host"), at(0), Some("cat".to_string()));
        session.begin_drawing(at(3));

        session.start_round(PeerId::new("guest"), at(70), None);
        assert_eq!(session.rounds[0].status(), TrialResult::Failed);
        assert_eq!(session.rounds.len(), 2);
        // Nobody scored on the timeout.
        assert_eq!(session.player(&PeerId::new("host")).unwrap().score, 0);
    }

    #[test]
    fn test_trial_expiry_windows() {
        let mut session = session();
        session.start_round(PeerId::new("host"), at(0), Some("cat".to_string()));
        session.begin_drawing(at(3));

        assert!(!session.trial_expired(at(30)));
        assert!(session.trial_expired(at(63)));

        // Clearing restarts the per-trial window but not the round cap.
        session.clear_canvas(at(60));
        assert!(!session.trial_expired(at(80)));
        assert!(session.trial_expired(at(121)));
    }

    #[test]
    fn test_next_drawer_prefers_players_behind() {
        let mut session = GameSession::new(PeerId::new("a"), "A", GameConfig::default());
        session.upsert_player(&PeerId::new("b"), Some("B".to_string()));
        session.upsert_player(&PeerId::new("c"), Some("C".to_string()));
        session.start_game(at(0));

        // A and B have drawn twice, C never.
        for (idx, drawer) in ["a", "b", "a", "b"].iter().enumerate() {
            let when = at(idx as i64 * 100);
            session.start_round(PeerId::new(*drawer), when, None);
            session.fail_round(when + Duration::seconds(60));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..20 {
            assert_eq!(session.next_drawer(&mut rng), Some(PeerId::new("c")));
        }
    }

    #[test]
    fn test_next_drawer_tie_means_everyone() {
        let mut session = GameSession::new(PeerId::new("a"), "A", GameConfig::default());
        session.upsert_player(&PeerId::new("b"), Some("B".to_string()));
        session.start_game(at(0));
        session.start_round(PeerId::new("a"), at(0), None);
        session.fail_round(at(60));
        session.start_round(PeerId::new("b"), at(70), None);
        session.fail_round(at(130));

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut picked = std::collections::BTreeSet::new();
        for _ in 0..50 {
            picked.insert(session.next_drawer(&mut rng).unwrap());
        }
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn test_game_end_closes_open_round() {
        let mut session = session();
        session.start_round(PeerId::new("host"), at(0), Some("cat".to_string()));
        session.begin_drawing(at(3));

        assert!(session.game_expired(at(600)));
        session.end_game(at(600));
        assert!(!session.started);
        assert_eq!(session.ended_at, Some(at(600)));
        assert_eq!(session.rounds[0].status(), TrialResult::Failed);
    }
}
