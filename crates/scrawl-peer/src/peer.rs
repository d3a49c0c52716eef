//! The peer-session runtime.
//!
//! One [`PeerSession::poll`] call is one event-handling turn: drain the
//! transport, dispatch decoded messages into state mutations, advance the
//! clock-driven parts of the round, flush the stroke batch. All state lives
//! on one logical thread; invariants hold at the end of every turn.

use chrono::{DateTime, Duration, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;
use uuid::Uuid;

use scrawl_core::{
    ChatLog, DrawnLine, GameConfig, GameSession, GameSnapshot, PeerId, PhraseSource, TrialResult,
    WordList,
};
use scrawl_proto::WireMessage;

use crate::registry::{Connection, ConnectionRegistry};
use crate::session::{SessionEvent, SessionState, SessionStatus};
use crate::storage::NameStore;
use crate::transport::{Transport, TransportEvent};

/// A local request the session cannot honor right now.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntentError {
    #[error("only the host can do this")]
    NotHost,
    #[error("only the current drawer can do this")]
    NotDrawer,
    #[error("the game is already running")]
    AlreadyStarted,
    #[error("no trial is open")]
    NoOpenTrial,
    #[error("not listening on the rendezvous service")]
    NotListening,
}

/// One peer's entire view of the session: transport, link registry, session
/// lifecycle, game state and chat. Mutated only inside its own turns.
pub struct PeerSession<T: Transport> {
    transport: T,
    registry: ConnectionRegistry,
    session: SessionState,
    game: GameSession,
    chat: ChatLog,
    phrases: Box<dyn PhraseSource>,
    name_store: Option<Box<dyn NameStore>>,
    rng: StdRng,
    /// Host id supplied by the user, to be dialed on the next turn.
    pending_host: Option<PeerId>,
    /// Strokes drawn locally since the last wire flush.
    pending_lines: Vec<DrawnLine>,
    batch_started: Option<DateTime<Utc>>,
}

impl<T: Transport> PeerSession<T> {
    pub fn new(transport: T, name: impl Into<String>, config: GameConfig) -> Self {
        let local_id = PeerId::new(Uuid::new_v4().to_string());
        Self {
            transport,
            registry: ConnectionRegistry::new(),
            session: SessionState::new(),
            game: GameSession::new(local_id, name, config),
            chat: ChatLog::new(),
            phrases: Box::new(WordList::builtin()),
            name_store: None,
            rng: StdRng::from_os_rng(),
            pending_host: None,
            pending_lines: Vec::new(),
            batch_started: None,
        }
    }

    /// Use a fixed local id instead of a generated one.
    pub fn with_peer_id(mut self, id: PeerId) -> Self {
        self.game.local.id = id;
        self
    }

    pub fn with_phrases(mut self, phrases: Box<dyn PhraseSource>) -> Self {
        self.phrases = phrases;
        self
    }

    /// Seed the internal RNG; drawer and phrase picks become deterministic.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Attach a display-name store; a previously saved name replaces the
    /// constructor's.
    pub fn with_name_store(mut self, store: Box<dyn NameStore>) -> Self {
        if let Some(saved) = store.load() {
            self.game.local.name = saved;
        }
        self.name_store = Some(store);
        self
    }

    // ---- read surface -----------------------------------------------------

    pub fn game(&self) -> &GameSession {
        &self.game
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn local_id(&self) -> &PeerId {
        &self.game.local.id
    }

    /// The host is a listening peer anchored to nobody: it has no host link.
    pub fn is_host(&self) -> bool {
        self.session.status() == SessionStatus::Listening
            && self.registry.host_connection().is_none()
    }

    // ---- the event-handling turn ------------------------------------------

    /// Run one turn at `now`.
    pub fn poll(&mut self, now: DateTime<Utc>) {
        self.drive_lifecycle();
        for event in self.transport.poll() {
            self.handle_transport_event(event, now);
        }
        self.advance_time(now);
        self.flush_strokes(now);
    }

    fn drive_lifecycle(&mut self) {
        match self.session.status() {
            SessionStatus::ShouldConnectToServer => {
                let id = self.local_id().clone();
                self.transport.open(&id);
                self.session.apply(SessionEvent::ServerDialing);
            }
            SessionStatus::ShouldConnectToHost => {
                if let Some(host) = self.pending_host.clone() {
                    self.transport.connect(&host);
                    self.session.apply(SessionEvent::HostDialing);
                }
            }
            SessionStatus::ShouldDisconnect => {
                self.session.apply(SessionEvent::TeardownStarted);
                self.transport.close();
                self.registry.clear();
                self.game.remote_players.clear();
                self.pending_host = None;
                self.pending_lines.clear();
                self.session.apply(SessionEvent::TeardownFinished);
            }
            _ => {}
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent, now: DateTime<Utc>) {
        match event {
            TransportEvent::Opened { assigned } => {
                if assigned != *self.local_id() {
                    tracing::info!(assigned = %assigned, "transport assigned a different local id");
                    self.game.local.id = assigned;
                }
                self.session.apply(SessionEvent::ServerAccepted);
            }
            TransportEvent::OpenFailed { id_taken, reason } => {
                tracing::warn!(%reason, id_taken, "identity request failed");
                self.session.apply(SessionEvent::ServerFailed);
                if id_taken {
                    // Recoverable locally: retry with a longer generated id.
                    let longer = format!(
                        "{}-{}",
                        self.local_id(),
                        &Uuid::new_v4().simple().to_string()[..6]
                    );
                    self.game.local.id = PeerId::new(longer);
                    self.session.apply(SessionEvent::RetryConnect);
                }
            }
            TransportEvent::ServerClosed => {
                tracing::warn!("rendezvous connection closed");
                self.session.apply(SessionEvent::ServerFailed);
            }
            TransportEvent::LinkOpen { peer, incoming } => self.on_link_open(&peer, incoming, now),
            TransportEvent::LinkClosed { peer } => self.on_link_closed(&peer, now),
            TransportEvent::Message { from, bytes } => match WireMessage::decode(&bytes) {
                Ok(message) => self.handle_message(&from, message, now),
                Err(err) => {
                    tracing::warn!(from = %from, %err, "protocol violation, message dropped");
                }
            },
        }
    }

    fn on_link_open(&mut self, peer: &PeerId, incoming: bool, now: DateTime<Utc>) {
        let host_link = !incoming && self.pending_host.as_ref() == Some(peer);
        let mut connection = Connection::new(peer.clone(), incoming);
        connection.confirmed = true;
        self.registry.add(connection, host_link);

        // Identity intro goes out on every fresh link.
        let intro = WireMessage::LocalPlayerData {
            peer_id: self.local_id().clone(),
            name: Some(self.game.local.name.clone()),
        };
        self.send_to(peer, &intro);
        if let Some(connection) = self.registry.by_peer_id_mut(peer) {
            connection.intro_sent = true;
        }
        self.check_trusted(peer, now);
    }

    fn on_link_closed(&mut self, peer: &PeerId, now: DateTime<Utc>) {
        let Some(connection) = self.registry.remove(peer) else {
            return;
        };
        let name = self
            .game
            .player(peer)
            .map_or_else(|| format!("Player-{}", peer.short()), |p| p.name.clone());
        self.game.remove_player(peer);
        self.chat.system(format!("{name} left"), now);
        if connection.host_link {
            self.pending_host = None;
            self.session.apply(SessionEvent::LinkFailed);
        }
    }

    /// Re-derive the link's trusted state after a handshake flag flipped.
    /// Callers only invoke this on an actual false-to-true flip, so the
    /// completion side effects run exactly once per link.
    fn check_trusted(&mut self, peer: &PeerId, now: DateTime<Utc>) {
        let Some(connection) = self.registry.by_peer_id(peer) else {
            return;
        };
        if !connection.trusted() {
            return;
        }
        let host_link = connection.host_link;
        tracing::info!(peer = %peer, host_link, "link handshake complete");

        if host_link {
            self.session.apply(SessionEvent::HostTrusted);
        }
        let name = self
            .game
            .player(peer)
            .map_or_else(|| format!("Player-{}", peer.short()), |p| p.name.clone());
        self.chat.system(format!("{name} joined"), now);

        if self.is_host() {
            // Catch the newcomer up and hand it the mesh.
            let snapshot = GameSnapshot::capture(&self.game, Some(peer));
            self.send_to(peer, &WireMessage::GameState(snapshot));
            let peer_ids: Vec<PeerId> = self
                .registry
                .all()
                .map(|c| c.remote.clone())
                .filter(|id| id != peer)
                .collect();
            if !peer_ids.is_empty() {
                self.send_to(peer, &WireMessage::PeerList { peer_ids });
            }
        }
    }

    // ---- inbound routing --------------------------------------------------

    fn handle_message(&mut self, from: &PeerId, message: WireMessage, now: DateTime<Utc>) {
        tracing::debug!(from = %from, kind = message.kind(), "inbound message");
        match message {
            WireMessage::LocalPlayerData { peer_id, name } => {
                if peer_id != *from {
                    tracing::warn!(claimed = %peer_id, link = %from, "intro id differs from link id");
                }
                self.game.upsert_player(&peer_id, name);
                if let Some(connection) = self.registry.by_peer_id_mut(from) {
                    if !connection.intro_received {
                        connection.intro_received = true;
                        self.check_trusted(from, now);
                    }
                }
            }
            WireMessage::GameState(snapshot) => self.adopt_snapshot(snapshot, now),
            WireMessage::StartGameSignal => {
                if self.game.start_game(now) {
                    self.chat.system("The game has started", now);
                }
            }
            WireMessage::StartRoundSignal {
                round_starting_time,
                drawer_peer_id,
            } => self.apply_round_start(drawer_peer_id, round_starting_time, now),
            WireMessage::NewLines { lines } => {
                self.game.append_lines(lines);
            }
            WireMessage::ClearCanvasCommand => self.apply_clear(now),
            WireMessage::RoundSolvedSignal {
                phrase,
                solver_peer_id,
                solved_at,
            } => self.apply_solved(&phrase, &solver_peer_id, solved_at, now),
            WireMessage::ChatMessage { text } => self.apply_remote_chat(from, &text, now),
            WireMessage::PeerList { peer_ids } => self.dial_unknown(&peer_ids),
        }
    }

    /// Join-time catch-up: adopt the host's history wholesale, then dial
    /// every listed peer to complete the mesh.
    fn adopt_snapshot(&mut self, snapshot: GameSnapshot, now: DateTime<Utc>) {
        self.game.apply_snapshot(snapshot);
        let unknown: Vec<PeerId> = self
            .game
            .remote_players
            .keys()
            .filter(|id| self.registry.by_peer_id(id).is_none())
            .cloned()
            .collect();
        self.dial_unknown(&unknown);
        if self.game.started {
            self.chat.system("Joined a game in progress", now);
        }
    }

    fn dial_unknown(&mut self, peer_ids: &[PeerId]) {
        for id in peer_ids {
            if id != self.local_id() && self.registry.by_peer_id(id).is_none() {
                self.transport.connect(id);
            }
        }
    }

    fn apply_round_start(
        &mut self,
        drawer: PeerId,
        starting_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        // Tolerate a drawer we have not been introduced to yet.
        self.game.upsert_player(&drawer, None);
        // The phrase is picked locally, and only by the drawer itself; it
        // never crosses the wire before the round resolves.
        let phrase = if drawer == *self.local_id() {
            self.phrases.pick(&mut self.rng)
        } else {
            None
        };
        self.pending_lines.clear();
        self.batch_started = None;
        if self.game.start_round(drawer.clone(), starting_time, phrase) {
            let name = self
                .game
                .player(&drawer)
                .map_or_else(|| drawer.to_string(), |p| p.name.clone());
            self.chat.system(format!("{name} is drawing"), now);
        }
    }

    fn apply_clear(&mut self, now: DateTime<Utc>) {
        match self.game.clear_canvas(now) {
            // Without the stroke-count guard an empty-canvas clear would
            // still print a notice.
            Some(cleared) if cleared > 0 => {
                self.chat.system("The canvas was cleared", now);
            }
            Some(_) => {}
            None => tracing::warn!("clear command with no open trial"),
        }
    }

    /// Close the round and append the reveal notice inside the same turn; no
    /// observer sees one without the other.
    fn apply_solved(
        &mut self,
        phrase: &str,
        solver: &PeerId,
        solved_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        if !self.game.solve_round(phrase, solver, solved_at) {
            return;
        }
        let name = self
            .game
            .player(solver)
            .map_or_else(|| solver.to_string(), |p| p.name.clone());
        self.chat
            .system(format!("{name} guessed it: \"{phrase}\""), solved_at);
        self.pending_lines.clear();
        self.batch_started = None;
        if self.is_host() && self.game.started {
            self.start_next_round(now);
        }
    }

    fn apply_remote_chat(&mut self, from: &PeerId, text: &str, now: DateTime<Utc>) {
        self.chat.user(from.clone(), text, now);
        let local = self.local_id().clone();
        if self.game.is_drawer(&local) {
            // Only the drawer knows the phrase, so only the drawer judges.
            let correct = self.game.evaluate_guess(from, text, now);
            self.game.record_guess(from.clone(), text, now, correct);
            if correct {
                self.resolve_local_solve(from.clone(), now);
            }
        } else if self.game.active_trial().is_some() && !self.game.is_drawer(from) {
            self.game.record_guess(from.clone(), text, now, false);
        }
    }

    /// The drawer saw a correct guess: announce it and close the round
    /// locally through the same path the announcement takes elsewhere.
    fn resolve_local_solve(&mut self, solver: PeerId, now: DateTime<Utc>) {
        let Some(phrase) = self.game.active_round().and_then(|r| r.phrase.clone()) else {
            return;
        };
        self.broadcast(&WireMessage::RoundSolvedSignal {
            phrase: phrase.clone(),
            solver_peer_id: solver.clone(),
            solved_at: now,
        });
        self.apply_solved(&phrase, &solver, now, now);
    }

    // ---- clock-driven duties ----------------------------------------------

    fn advance_time(&mut self, now: DateTime<Utc>) {
        self.game.begin_drawing(now);
        if !self.is_host() {
            return;
        }
        if self.game.game_expired(now) {
            self.game.end_game(now);
            self.chat.system("The game is over", now);
            self.pending_lines.clear();
            self.batch_started = None;
            let snapshot = GameSnapshot::capture(&self.game, None);
            self.broadcast(&WireMessage::GameState(snapshot));
        } else if self.game.trial_expired(now) {
            self.game.fail_round(now);
            self.chat.system("Time ran out, round over", now);
            if self.game.started {
                self.start_next_round(now);
            }
        }
    }

    fn start_next_round(&mut self, now: DateTime<Utc>) {
        let Some(drawer) = self.game.next_drawer(&mut self.rng) else {
            return;
        };
        self.broadcast(&WireMessage::StartRoundSignal {
            round_starting_time: now,
            drawer_peer_id: drawer.clone(),
        });
        self.apply_round_start(drawer, now, now);
    }

    fn flush_strokes(&mut self, now: DateTime<Utc>) {
        if self.pending_lines.is_empty() {
            return;
        }
        let due = self.batch_started.is_some_and(|started| {
            now - started >= Duration::milliseconds(self.game.config.flush_interval_ms)
        });
        if !due {
            return;
        }
        let lines = std::mem::take(&mut self.pending_lines);
        self.batch_started = None;
        self.broadcast(&WireMessage::NewLines { lines });
    }

    // ---- local intents ----------------------------------------------------

    /// Explicit retry after a disconnect; there is no automatic backoff.
    pub fn retry_connect(&mut self) {
        self.session.apply(SessionEvent::RetryConnect);
    }

    /// Supply the host to anchor to. Dialing happens on the next turn.
    pub fn connect_to_host(&mut self, host: PeerId) -> Result<(), IntentError> {
        if self.session.status() != SessionStatus::Listening {
            return Err(IntentError::NotListening);
        }
        self.pending_host = Some(host);
        self.session.apply(SessionEvent::HostChosen);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.session.apply(SessionEvent::DisconnectRequested);
    }

    /// Rename the local player, persist it and tell everyone.
    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.game.local.name.clone_from(&name);
        if let Some(store) = self.name_store.as_mut() {
            store.save(&name);
        }
        let intro = WireMessage::LocalPlayerData {
            peer_id: self.local_id().clone(),
            name: Some(name),
        };
        self.broadcast(&intro);
    }

    /// Host intent: start the game and open the first round.
    pub fn start_game(&mut self, now: DateTime<Utc>) -> Result<(), IntentError> {
        if !self.is_host() {
            return Err(IntentError::NotHost);
        }
        if self.game.started {
            return Err(IntentError::AlreadyStarted);
        }
        self.game.start_game(now);
        self.chat.system("The game has started", now);
        self.broadcast(&WireMessage::StartGameSignal);
        self.start_next_round(now);
        Ok(())
    }

    /// Send a chat line. A drawer message that would reveal the phrase stays
    /// local and is never broadcast.
    pub fn send_chat(&mut self, text: impl Into<String>, now: DateTime<Utc>) {
        let text = text.into();
        let local = self.local_id().clone();
        if self.game.is_drawer(&local) {
            let reveals = self
                .game
                .active_round()
                .and_then(|round| round.phrase.as_deref())
                .is_some_and(|phrase| {
                    text.trim()
                        .to_lowercase()
                        .contains(&phrase.trim().to_lowercase())
                });
            if reveals {
                tracing::info!("drawer message withheld, it contains the phrase");
                self.chat
                    .system("Message not sent: it gives the phrase away", now);
                return;
            }
        }
        self.chat.user(local.clone(), text.clone(), now);
        if self.game.active_trial().is_some() && !self.game.is_drawer(&local) {
            self.game.record_guess(local, text.clone(), now, false);
        }
        self.broadcast(&WireMessage::ChatMessage { text });
    }

    /// Drawer intent: one stroke. Applied locally at once, batched for the
    /// wire.
    pub fn draw(&mut self, line: DrawnLine, now: DateTime<Utc>) -> Result<(), IntentError> {
        let local = self.local_id().clone();
        if !self.game.is_drawer(&local) {
            return Err(IntentError::NotDrawer);
        }
        let ongoing = self
            .game
            .active_trial()
            .is_some_and(|trial| trial.result == TrialResult::Ongoing);
        if !ongoing {
            return Err(IntentError::NoOpenTrial);
        }
        self.game.append_lines(vec![line.clone()]);
        if self.pending_lines.is_empty() {
            self.batch_started = Some(now);
        }
        self.pending_lines.push(line);
        Ok(())
    }

    /// Drawer intent: wipe the canvas and restart the trial.
    pub fn request_clear(&mut self, now: DateTime<Utc>) -> Result<(), IntentError> {
        let local = self.local_id().clone();
        if !self.game.is_drawer(&local) {
            return Err(IntentError::NotDrawer);
        }
        if self.game.active_trial().is_none() {
            return Err(IntentError::NoOpenTrial);
        }
        self.pending_lines.clear();
        self.batch_started = None;
        self.broadcast(&WireMessage::ClearCanvasCommand);
        self.apply_clear(now);
        Ok(())
    }

    // ---- outbound ---------------------------------------------------------

    fn send_to(&mut self, remote: &PeerId, message: &WireMessage) {
        match message.encode() {
            Ok(bytes) => self.transport.send_to(remote, bytes),
            Err(err) => tracing::error!(%err, kind = message.kind(), "encode failed"),
        }
    }

    /// Fire-and-forget to every current link, trusted or not.
    fn broadcast(&mut self, message: &WireMessage) {
        match message.encode() {
            Ok(bytes) => {
                let targets: Vec<PeerId> =
                    self.registry.all().map(|c| c.remote.clone()).collect();
                for remote in targets {
                    self.transport.send_to(&remote, bytes.clone());
                }
            }
            Err(err) => tracing::error!(%err, kind = message.kind(), "encode failed"),
        }
    }
}
