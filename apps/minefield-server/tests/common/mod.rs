#![allow(dead_code)]

use std::sync::Arc;

use minefield_board::{Board, BoardState, Cell, Coord};
use minefield_server::clock::Clock;
use minefield_server::coordinator::{MoveOutcome, MoveTarget};
use minefield_server::players::{MemoryPlayerStore, PlayerStore};
use minefield_server::registry::{RegistryConfig, SessionRegistry};
use minefield_server::render::{RenderConfig, RenderScheduler};
use minefield_server::reward::RewardEngine;
use minefield_server::service::{GameService, MAX_GAMES_PER_USER};
use minefield_server::session::{Fingerprint, Session};
use minefield_server::transport::{ChatKind, ChatRef, MemoryTransport, MessageId, UserRef};
use rand::rngs::StdRng;
use rand::SeedableRng;

pub const KEYBOARD_MESSAGE: MessageId = 1_000;

pub struct Harness {
    pub clock: Clock,
    pub transport: Arc<MemoryTransport>,
    pub players: Arc<MemoryPlayerStore>,
    pub rewards: Arc<RewardEngine>,
    pub registry: SessionRegistry,
    pub service: Arc<GameService>,
}

pub fn harness() -> Harness {
    harness_with(RegistryConfig::default(), MAX_GAMES_PER_USER)
}

pub fn harness_with(config: RegistryConfig, max_games_per_user: usize) -> Harness {
    let players = Arc::new(MemoryPlayerStore::new());
    build(config, max_games_per_user, players.clone(), players)
}

/// Harness whose reward engine goes through `store`, which is expected to
/// wrap `players`.
pub fn harness_with_store(players: Arc<MemoryPlayerStore>, store: Arc<dyn PlayerStore>) -> Harness {
    build(RegistryConfig::default(), MAX_GAMES_PER_USER, players, store)
}

fn build(
    config: RegistryConfig,
    max_games_per_user: usize,
    players: Arc<MemoryPlayerStore>,
    store: Arc<dyn PlayerStore>,
) -> Harness {
    let clock = Clock::new();
    let transport = Arc::new(MemoryTransport::new());
    let rewards = Arc::new(RewardEngine::with_rng(
        store,
        clock,
        StdRng::seed_from_u64(7),
    ));
    let registry = SessionRegistry::new(config, clock);
    let renderer = RenderScheduler::new(transport.clone(), clock, RenderConfig::default());
    let service = Arc::new(GameService::new(
        registry.clone(),
        renderer,
        Arc::clone(&rewards),
        transport.clone(),
        max_games_per_user,
    ));
    Harness {
        clock,
        transport,
        players,
        rewards,
        registry,
        service,
    }
}

pub fn supergroup() -> ChatRef {
    ChatRef {
        id: -1_001_234_567_890,
        kind: ChatKind::Supergroup,
        username: None,
    }
}

pub fn user(id: i64, name: &str) -> UserRef {
    UserRef {
        id,
        first_name: name.to_string(),
        last_name: None,
        username: None,
    }
}

impl Harness {
    /// Registers a game as if its keyboard had been posted as
    /// [`KEYBOARD_MESSAGE`].
    pub fn start_game(&self, height: usize, width: usize, mines: usize, seed: u64) -> Arc<Session> {
        let board = Board::new(height, width, mines, seed).unwrap();
        let fingerprint = Fingerprint(board.fingerprint());
        let session = self
            .registry
            .create(board, fingerprint, supergroup(), user(1, "ada"))
            .unwrap();
        session.set_message_id(KEYBOARD_MESSAGE);
        session
    }

    /// Taps with the token of the keyboard currently on screen.
    pub async fn tap(&self, session: &Session, player: &UserRef, cell: Coord) -> MoveOutcome {
        self.tap_with_token(session, player, cell, session.display_token())
            .await
    }

    pub async fn tap_with_token(
        &self,
        session: &Session,
        player: &UserRef,
        cell: Coord,
        token: u8,
    ) -> MoveOutcome {
        self.service
            .coordinator()
            .apply_move(
                session.id(),
                player,
                cell,
                token,
                MoveTarget {
                    chat: session.group().id,
                    message: KEYBOARD_MESSAGE,
                },
            )
            .await
    }
}

/// Splits the hidden cells of a laid out board into mines and safe cells by
/// probing copies of it.
pub fn probe_hidden(session: &Session) -> (Vec<Coord>, Vec<Coord>) {
    let board = session.lock().board.clone();
    let mut mines = Vec::new();
    let mut safe = Vec::new();
    for row in 0..board.height() {
        for col in 0..board.width() {
            if board.cell((row, col)) != Some(Cell::Hidden) {
                continue;
            }
            let mut probe = board.clone();
            match probe.reveal((row, col)) {
                Ok(BoardState::Lost) => mines.push((row, col)),
                _ => safe.push((row, col)),
            }
        }
    }
    (mines, safe)
}

pub fn is_hidden(session: &Session, cell: Coord) -> bool {
    session.lock().board.cell(cell) == Some(Cell::Hidden)
}

impl Harness {
    /// Starts games until the opening tap at `(0, 0)` leaves the board in
    /// play, so tests never depend on a lucky one-tap win.
    pub async fn start_playing(
        &self,
        height: usize,
        width: usize,
        mines: usize,
        opener: &UserRef,
    ) -> Arc<Session> {
        for seed in 1..100 {
            let session = self.start_game(height, width, mines, seed);
            if self.tap(&session, opener, (0, 0)).await == MoveOutcome::Continued {
                return session;
            }
        }
        panic!("every seed cleared the board on the first tap");
    }
}
