//! End-to-end session tests over the in-memory transport: handshake,
//! catch-up, a full drawn-and-guessed round, and mesh formation for a late
//! joiner.

use chrono::{DateTime, TimeZone, Utc};
use scrawl_core::{DrawnLine, GameConfig, PeerId, TrialResult};
use scrawl_peer::transport::{MemoryHub, MemoryTransport};
use scrawl_peer::{PeerSession, SessionStatus};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn line(x: f32) -> DrawnLine {
    DrawnLine {
        x1: x,
        y1: 0.2,
        x2: x + 0.1,
        y2: 0.4,
        color: "#223344".to_string(),
    }
}

fn session(hub: &MemoryHub, id: &str, name: &str, seed: u64) -> PeerSession<MemoryTransport> {
    PeerSession::new(hub.endpoint(), name, GameConfig::default())
        .with_peer_id(PeerId::new(id))
        .with_seed(seed)
}

/// Poll every session a few times so multi-hop exchanges settle.
fn settle(sessions: &mut [&mut PeerSession<MemoryTransport>], now: DateTime<Utc>) {
    for _ in 0..6 {
        for session in sessions.iter_mut() {
            session.poll(now);
        }
    }
}

#[test]
fn test_handshake_and_catch_up() {
    let hub = MemoryHub::new();
    let mut host = session(&hub, "host", "Hanna", 1);
    let mut guest = session(&hub, "guest", "Greta", 2);

    settle(&mut [&mut host, &mut guest], at(0));
    assert_eq!(host.status(), SessionStatus::Listening);
    assert_eq!(guest.status(), SessionStatus::Listening);

    guest.connect_to_host(PeerId::new("host")).unwrap();
    settle(&mut [&mut host, &mut guest], at(1));

    assert_eq!(guest.status(), SessionStatus::ConnectedToHost);
    assert!(host.is_host());
    assert!(!guest.is_host());

    // Intros landed on both sides.
    assert_eq!(
        host.game().player(&PeerId::new("guest")).unwrap().name,
        "Greta"
    );
    assert_eq!(
        guest.game().player(&PeerId::new("host")).unwrap().name,
        "Hanna"
    );

    // The host link is the only host link, and it is trusted.
    let link = host.registry().by_peer_id(&PeerId::new("guest")).unwrap();
    assert!(link.trusted());
    assert!(guest.registry().host_connection().unwrap().trusted());
}

#[test]
fn test_full_round_over_the_wire() {
    let hub = MemoryHub::new();
    let mut host = session(&hub, "host", "Hanna", 1);
    let mut guest = session(&hub, "guest", "Greta", 2);

    settle(&mut [&mut host, &mut guest], at(0));
    guest.connect_to_host(PeerId::new("host")).unwrap();
    settle(&mut [&mut host, &mut guest], at(1));

    host.start_game(at(10)).unwrap();
    settle(&mut [&mut host, &mut guest], at(10));

    assert!(guest.game().started);
    let drawer_id = host.game().active_round().unwrap().drawer.clone();
    assert_eq!(
        guest.game().active_round().unwrap().drawer,
        drawer_id,
        "both peers agree on the drawer"
    );

    let (drawer, guesser) = if drawer_id == PeerId::new("host") {
        (&mut host, &mut guest)
    } else {
        (&mut guest, &mut host)
    };

    // The phrase exists only on the drawer until the round resolves.
    let phrase = drawer.game().active_round().unwrap().phrase.clone().unwrap();
    assert!(guesser.game().active_round().unwrap().phrase.is_none());

    // Countdown runs out at +3s, then the drawer draws three strokes.
    settle(&mut [&mut *drawer, &mut *guesser], at(13));
    drawer.draw(line(0.1), at(13)).unwrap();
    drawer.draw(line(0.3), at(13)).unwrap();
    drawer.draw(line(0.5), at(13)).unwrap();
    assert_eq!(drawer.game().stroke_count(), 3);

    // The batch flushes after the configured interval.
    settle(&mut [&mut *drawer, &mut *guesser], at(14));
    assert_eq!(guesser.game().stroke_count(), 3);

    // A mixed-case guess containing the phrase solves the round.
    let guess = format!("is it a {}?!", phrase.to_uppercase());
    guesser.send_chat(guess, at(33));
    settle(&mut [&mut *drawer, &mut *guesser], at(33));
    settle(&mut [&mut *drawer, &mut *guesser], at(34));

    for session in [&*drawer, &*guesser] {
        let round = &session.game().rounds[0];
        assert_eq!(round.status(), TrialResult::Solved);
        assert_eq!(round.phrase.as_deref(), Some(phrase.as_str()));
        // Drawing started at +13s, solved at +33s: 60 - 20 = 40 points each.
        assert_eq!(session.game().player(&PeerId::new("host")).unwrap().score, 40);
        assert_eq!(session.game().player(&PeerId::new("guest")).unwrap().score, 40);
    }

    // A fresh round opened, and the turn went to the player who has not
    // drawn yet.
    for session in [&*drawer, &*guesser] {
        assert_eq!(session.game().rounds.len(), 2);
        assert_eq!(session.game().rounds[1].drawer, guesser.game().local.id);
    }

    // The solve and its chat reveal landed in the same turn.
    let reveal = format!("guessed it: \"{phrase}\"");
    assert!(
        guesser
            .chat()
            .entries()
            .iter()
            .any(|entry| entry.author.is_none() && entry.text.contains(&reveal))
    );
}

#[test]
fn test_late_joiner_adopts_history_and_meshes() {
    let hub = MemoryHub::new();
    let mut host = session(&hub, "host", "Hanna", 1);
    let mut guest = session(&hub, "guest", "Greta", 2);

    settle(&mut [&mut host, &mut guest], at(0));
    guest.connect_to_host(PeerId::new("host")).unwrap();
    settle(&mut [&mut host, &mut guest], at(1));
    host.start_game(at(10)).unwrap();
    settle(&mut [&mut host, &mut guest], at(13));

    // Resolve the first round so there is history worth replicating.
    let drawer_id = host.game().active_round().unwrap().drawer.clone();
    let (drawer, guesser) = if drawer_id == PeerId::new("host") {
        (&mut host, &mut guest)
    } else {
        (&mut guest, &mut host)
    };
    drawer.draw(line(0.2), at(14)).unwrap();
    settle(&mut [&mut *drawer, &mut *guesser], at(15));
    let phrase = drawer.game().rounds[0].phrase.clone().unwrap();
    guesser.send_chat(format!("{phrase}!"), at(20));
    settle(&mut [&mut *drawer, &mut *guesser], at(20));
    settle(&mut [&mut *drawer, &mut *guesser], at(21));

    let mut late = session(&hub, "late", "Lena", 3);
    settle(&mut [&mut host, &mut guest, &mut late], at(30));
    late.connect_to_host(PeerId::new("host")).unwrap();
    settle(&mut [&mut host, &mut guest, &mut late], at(31));
    settle(&mut [&mut host, &mut guest, &mut late], at(32));

    // The snapshot reproduced the host's history verbatim.
    assert_eq!(late.game().rounds, host.game().rounds);
    assert!(late.game().started);

    // Scores were rebuilt from the adopted history.
    for id in ["host", "guest"] {
        assert_eq!(
            late.game().player(&PeerId::new(id)).unwrap().score,
            host.game().player(&PeerId::new(id)).unwrap().score
        );
    }

    // Full mesh: the joiner holds links to both existing peers, and they
    // learned its identity through the fanned-out intro.
    assert!(late.registry().by_peer_id(&PeerId::new("host")).is_some());
    assert!(late.registry().by_peer_id(&PeerId::new("guest")).is_some());
    assert_eq!(
        guest.game().player(&PeerId::new("late")).unwrap().name,
        "Lena"
    );
    assert_eq!(
        host.game().player(&PeerId::new("late")).unwrap().name,
        "Lena"
    );
}

#[test]
fn test_clear_restarts_trial_and_notices_once() {
    let hub = MemoryHub::new();
    let mut host = session(&hub, "host", "Hanna", 1);
    let mut guest = session(&hub, "guest", "Greta", 2);

    settle(&mut [&mut host, &mut guest], at(0));
    guest.connect_to_host(PeerId::new("host")).unwrap();
    settle(&mut [&mut host, &mut guest], at(1));
    host.start_game(at(10)).unwrap();
    settle(&mut [&mut host, &mut guest], at(13));

    let drawer_id = host.game().active_round().unwrap().drawer.clone();
    let (drawer, other) = if drawer_id == PeerId::new("host") {
        (&mut host, &mut guest)
    } else {
        (&mut guest, &mut host)
    };

    drawer.draw(line(0.4), at(14)).unwrap();
    settle(&mut [&mut *drawer, &mut *other], at(15));

    drawer.request_clear(at(16)).unwrap();
    settle(&mut [&mut *drawer, &mut *other], at(16));

    for session in [&*drawer, &*other] {
        let round = &session.game().rounds[0];
        assert_eq!(round.trials.len(), 2);
        assert_eq!(round.trials[0].result, TrialResult::Cleared);
        assert_eq!(round.status(), TrialResult::Ongoing);
    }

    let notices = |s: &PeerSession<MemoryTransport>| {
        s.chat()
            .entries()
            .iter()
            .filter(|e| e.text.contains("canvas was cleared"))
            .count()
    };
    assert_eq!(notices(drawer), 1);
    assert_eq!(notices(other), 1);

    // A second clear on the already-empty canvas restarts the trial but
    // stays quiet.
    drawer.request_clear(at(17)).unwrap();
    settle(&mut [&mut *drawer, &mut *other], at(17));
    assert_eq!(notices(drawer), 1);
    assert_eq!(notices(other), 1);
}

#[test]
fn test_drawer_cannot_leak_the_phrase() {
    let hub = MemoryHub::new();
    let mut host = session(&hub, "host", "Hanna", 1);
    let mut guest = session(&hub, "guest", "Greta", 2);

    settle(&mut [&mut host, &mut guest], at(0));
    guest.connect_to_host(PeerId::new("host")).unwrap();
    settle(&mut [&mut host, &mut guest], at(1));
    host.start_game(at(10)).unwrap();
    settle(&mut [&mut host, &mut guest], at(13));

    let drawer_id = host.game().active_round().unwrap().drawer.clone();
    let (drawer, other) = if drawer_id == PeerId::new("host") {
        (&mut host, &mut guest)
    } else {
        (&mut guest, &mut host)
    };

    let phrase = drawer.game().rounds[0].phrase.clone().unwrap();
    let before = other.chat().len();
    drawer.send_chat(format!("psst, it is {phrase}"), at(14));
    settle(&mut [&mut *drawer, &mut *other], at(14));

    // Nothing reached the other peer and the round is still open.
    assert_eq!(other.chat().len(), before);
    assert_eq!(other.game().rounds[0].status(), TrialResult::Ongoing);

    // Harmless drawer banter still goes through.
    drawer.send_chat("good luck!", at(15));
    settle(&mut [&mut *drawer, &mut *other], at(15));
    assert!(
        other
            .chat()
            .entries()
            .iter()
            .any(|entry| entry.text == "good luck!")
    );
}

#[test]
fn test_disconnect_returns_to_not_connected() {
    let hub = MemoryHub::new();
    let mut host = session(&hub, "host", "Hanna", 1);
    let mut guest = session(&hub, "guest", "Greta", 2);

    settle(&mut [&mut host, &mut guest], at(0));
    guest.connect_to_host(PeerId::new("host")).unwrap();
    settle(&mut [&mut host, &mut guest], at(1));

    guest.disconnect();
    settle(&mut [&mut guest], at(2));
    assert_eq!(guest.status(), SessionStatus::NotConnected);
    assert!(guest.registry().is_empty());

    // The host saw the link die and dropped the player.
    settle(&mut [&mut host], at(3));
    assert!(host.game().player(&PeerId::new("guest")).is_none());
    assert!(host.registry().is_empty());

    // Explicit retry re-enters the lifecycle.
    guest.retry_connect();
    settle(&mut [&mut guest], at(4));
    assert_eq!(guest.status(), SessionStatus::Listening);
}

#[test]
fn test_host_link_loss_regresses_the_session() {
    let hub = MemoryHub::new();
    let mut host = session(&hub, "host", "Hanna", 1);
    let mut guest = session(&hub, "guest", "Greta", 2);

    settle(&mut [&mut host, &mut guest], at(0));
    guest.connect_to_host(PeerId::new("host")).unwrap();
    settle(&mut [&mut host, &mut guest], at(1));
    assert_eq!(guest.status(), SessionStatus::ConnectedToHost);

    hub.kill(&PeerId::new("host"));
    settle(&mut [&mut guest], at(2));
    assert_eq!(guest.status(), SessionStatus::NotConnected);
}
