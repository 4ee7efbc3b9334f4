mod common;

use std::path::PathBuf;
use std::time::Duration;

use common::{harness, probe_hidden, supergroup, user};
use minefield_board::{Board, BoardState};
use minefield_server::clock::Clock;
use minefield_server::registry::{GcReport, RegistryConfig, SessionRegistry};
use minefield_server::session::{Fingerprint, Phase};
use tokio::time::sleep;

fn temp_snapshot() -> PathBuf {
    std::env::temp_dir().join(format!("minefield-{}.json", uuid::Uuid::new_v4()))
}

fn snapshot_config(path: &PathBuf) -> RegistryConfig {
    RegistryConfig {
        snapshot_path: Some(path.clone()),
        ..RegistryConfig::default()
    }
}

fn add(registry: &SessionRegistry, seed: u64) -> Fingerprint {
    let board = Board::new(8, 8, 9, seed).unwrap();
    let fingerprint = Fingerprint(board.fingerprint());
    registry
        .create(board, fingerprint, supergroup(), user(1, "ada"))
        .unwrap();
    fingerprint
}

/// Adds a session whose opening tap at `(0, 0)` left the board in play.
fn in_play(registry: &SessionRegistry, mines: usize, first_seed: u64) -> Fingerprint {
    for seed in first_seed.. {
        let board = Board::new(8, 8, mines, seed).unwrap();
        let fingerprint = Fingerprint(board.fingerprint());
        let session = registry
            .create(board, fingerprint, supergroup(), user(1, "ada"))
            .unwrap();
        let state = session.lock().board.reveal((0, 0)).unwrap();
        if state == BoardState::Playing {
            return fingerprint;
        }
        registry.remove(fingerprint);
    }
    unreachable!()
}

#[test_timeout::timeout]
fn collection_frees_only_sessions_past_retention() {
    let registry = SessionRegistry::new(RegistryConfig::default(), Clock::new());
    let id = add(&registry, 1);
    let created = registry.get(id).unwrap().created_at();
    let retention = Duration::from_secs(10 * 24 * 60 * 60);
    let at = |offset: i64| {
        created + chrono::Duration::from_std(retention).unwrap() + chrono::Duration::seconds(offset)
    };

    assert_eq!(
        registry.garbage_collect(retention, at(-1)),
        GcReport { checked: 1, freed: 0 }
    );
    assert_eq!(registry.garbage_collect(retention, at(0)).freed, 0);
    assert_eq!(
        registry.garbage_collect(retention, at(1)),
        GcReport { checked: 1, freed: 1 }
    );
    assert!(registry.get(id).is_none());
    assert_eq!(registry.garbage_collect(retention, at(2)).checked, 0);
}

#[test_timeout::tokio_timeout_test(paused)]
async fn collector_runs_on_schedule() {
    let h = harness();
    let session = h.start_game(8, 8, 9, 1);
    let collector = h.registry.spawn_collector();

    sleep(Duration::from_secs(31)).await;
    assert!(h.registry.get(session.id()).is_some());

    sleep(Duration::from_secs(10 * 24 * 60 * 60)).await;
    assert!(h.registry.get(session.id()).is_none());
    collector.abort();
}

#[test_timeout::tokio_timeout_test]
async fn snapshot_survives_a_restart() {
    let path = temp_snapshot();
    let clock = Clock::new();
    let registry = SessionRegistry::new(snapshot_config(&path), clock);
    let played = add(&registry, 1);
    let fresh = add(&registry, 2);

    let session = registry.get(played).unwrap();
    session.set_message_id(77);
    session.lock().board.reveal((0, 0)).unwrap();
    session.record_action(&user(2, "bob"), (0, 0));
    assert_eq!(registry.flush().await.unwrap(), 2);

    let restored = SessionRegistry::restore(snapshot_config(&path), clock);
    assert_eq!(restored.count(), 2);
    assert!(restored.get(fresh).is_some());
    let back = restored.get(played).unwrap();
    assert_eq!(back.message_id(), Some(77));
    assert_eq!(back.creator().id, 1);
    assert_eq!(back.lock().board.grid(), session.lock().board.grid());
    assert_eq!(back.actions().total(), 1);
    assert_eq!(back.display_token(), session.display_token());

    let _ = std::fs::remove_file(&path);
}

#[test_timeout::tokio_timeout_test]
async fn unreadable_snapshots_start_empty() {
    let clock = Clock::new();

    let missing = temp_snapshot();
    assert_eq!(SessionRegistry::restore(snapshot_config(&missing), clock).count(), 0);

    let corrupt = temp_snapshot();
    std::fs::write(&corrupt, b"{ not json").unwrap();
    assert_eq!(SessionRegistry::restore(snapshot_config(&corrupt), clock).count(), 0);

    let future = temp_snapshot();
    std::fs::write(&future, br#"{"version": 9, "sessions": []}"#).unwrap();
    assert_eq!(SessionRegistry::restore(snapshot_config(&future), clock).count(), 0);

    let _ = std::fs::remove_file(&corrupt);
    let _ = std::fs::remove_file(&future);
}

#[test_timeout::tokio_timeout_test]
async fn removal_is_reflected_in_the_next_snapshot() {
    let path = temp_snapshot();
    let clock = Clock::new();
    let registry = SessionRegistry::new(snapshot_config(&path), clock);
    let kept = add(&registry, 1);
    let gone = add(&registry, 2);

    assert!(registry.remove(gone));
    assert!(!registry.remove(gone));
    assert_eq!(registry.flush().await.unwrap(), 1);

    let restored = SessionRegistry::restore(snapshot_config(&path), clock);
    assert!(restored.get(kept).is_some());
    assert!(restored.get(gone).is_none());

    let _ = std::fs::remove_file(&path);
}

#[test_timeout::tokio_timeout_test]
async fn sessions_caught_mid_settlement_restore_playable() {
    let path = temp_snapshot();
    let clock = Clock::new();
    let registry = SessionRegistry::new(snapshot_config(&path), clock);

    let settling = in_play(&registry, 9, 1);
    let stepped = in_play(&registry, 9, 100);
    let stopped = in_play(&registry, 9, 200);
    let last_life = in_play(&registry, 2, 300);
    for id in [settling, stepped, stopped, last_life] {
        registry.get(id).unwrap().lock().phase = Phase::Transitioning;
    }
    for id in [stepped, last_life] {
        let session = registry.get(id).unwrap();
        let (mines, _) = probe_hidden(&session);
        let state = session.lock().board.reveal(mines[0]).unwrap();
        assert_eq!(state, BoardState::Lost);
    }
    registry.get(stopped).unwrap().lock().phase = Phase::Stopped;
    registry.flush().await.unwrap();

    let restored = SessionRegistry::restore(snapshot_config(&path), clock);
    assert_eq!(restored.count(), 2);
    assert!(restored.get(stopped).is_none());
    assert!(restored.get(last_life).is_none());

    let session = restored.get(settling).unwrap();
    assert_eq!(session.lock().phase, Phase::Playing);
    assert_eq!(session.lock().lives, 3);

    let session = restored.get(stepped).unwrap();
    let state = session.lock();
    assert_eq!(state.phase, Phase::Playing);
    assert_eq!(state.board.state(), BoardState::Playing);
    assert_eq!((state.lives, state.total_lives), (2, 3));
    drop(state);

    let _ = std::fs::remove_file(&path);
}
