use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use minefield_board::{Board, BoardState, Coord};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::transport::{ChatRef, MessageId, UserId, UserRef};

/// Registry key derived from the board's initial configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Fingerprint)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Playing,
    /// The board hit a terminal state and the round is being settled. Taps
    /// are ignored until the session is either re-armed or stopped.
    Transitioning,
    Stopped,
}

/// Everything guarded by the session's mutation lock.
#[derive(Debug)]
pub struct GameState {
    pub board: Board,
    pub lives: u32,
    pub total_lives: u32,
    pub phase: Phase,
}

/// Lives granted for a board: one per three mines, at least one.
pub fn lives_for(mines: usize) -> u32 {
    ((mines / 3) as u32).max(1)
}

/// Who played which cells, in play order. Only used for end-of-game
/// statistics; never replayed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionLog {
    moves: Vec<(UserId, Vec<Coord>)>,
    participants: HashMap<UserId, UserRef>,
    last_player: Option<UserId>,
}

impl ActionLog {
    pub fn record(&mut self, player: &UserRef, cell: Coord) {
        self.participants.insert(player.id, player.clone());
        self.last_player = Some(player.id);
        match self.moves.iter_mut().find(|(id, _)| *id == player.id) {
            Some((_, cells)) => cells.push(cell),
            None => self.moves.push((player.id, vec![cell])),
        }
    }

    pub fn total(&self) -> usize {
        self.moves.iter().map(|(_, cells)| cells.len()).sum()
    }

    /// Per-participant action counts in order of first appearance.
    pub fn counts(&self) -> Vec<(UserRef, usize)> {
        self.moves
            .iter()
            .filter_map(|(id, cells)| {
                self.participants
                    .get(id)
                    .map(|user| (user.clone(), cells.len()))
            })
            .collect()
    }

    pub fn last_player(&self) -> Option<&UserRef> {
        self.last_player.and_then(|id| self.participants.get(&id))
    }
}

pub struct Session {
    id: Fingerprint,
    group: ChatRef,
    creator: UserRef,
    created_at: DateTime<Utc>,
    message_id: OnceLock<MessageId>,
    state: Mutex<GameState>,
    log: Mutex<ActionLog>,
    last_action_token: AtomicU64,
    timeout_count: AtomicU64,
}

/// Serializable image of a session. Locks and other runtime-only state are
/// rebuilt by [`Session::from_record`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Fingerprint,
    pub group: ChatRef,
    pub creator: UserRef,
    pub created_at: DateTime<Utc>,
    pub message_id: Option<MessageId>,
    pub board: Board,
    pub lives: u32,
    pub total_lives: u32,
    pub phase: Phase,
    pub log: ActionLog,
    pub last_action_token: u64,
    pub timeout_count: u64,
}

impl SessionRecord {
    /// Brings a record written while its round was being settled back into
    /// play. Records of finished rounds yield `None`.
    pub fn into_playable(mut self) -> Option<Self> {
        match (self.phase, self.board.state()) {
            (Phase::Stopped, _) | (_, BoardState::Won) => None,
            // Lives are only taken once the reward is settled, so the mine
            // that was hit has not been paid for yet.
            (_, BoardState::Lost) if self.lives <= 1 => None,
            (_, BoardState::Lost) => {
                self.lives -= 1;
                self.board.resume();
                self.phase = Phase::Playing;
                Some(self)
            }
            _ => {
                self.phase = Phase::Playing;
                Some(self)
            }
        }
    }
}

impl Session {
    pub fn new(
        id: Fingerprint,
        board: Board,
        group: ChatRef,
        creator: UserRef,
        created_at: DateTime<Utc>,
        token: u64,
    ) -> Self {
        let total_lives = lives_for(board.mines());
        Self {
            id,
            group,
            creator,
            created_at,
            message_id: OnceLock::new(),
            state: Mutex::new(GameState {
                board,
                lives: total_lives,
                total_lives,
                phase: Phase::Playing,
            }),
            log: Mutex::new(ActionLog::default()),
            last_action_token: AtomicU64::new(token),
            timeout_count: AtomicU64::new(0),
        }
    }

    pub fn from_record(record: SessionRecord) -> Self {
        let message_id = OnceLock::new();
        if let Some(id) = record.message_id {
            let _ = message_id.set(id);
        }
        Self {
            id: record.id,
            group: record.group,
            creator: record.creator,
            created_at: record.created_at,
            message_id,
            state: Mutex::new(GameState {
                board: record.board,
                lives: record.lives,
                total_lives: record.total_lives,
                phase: record.phase,
            }),
            log: Mutex::new(record.log),
            last_action_token: AtomicU64::new(record.last_action_token),
            timeout_count: AtomicU64::new(record.timeout_count),
        }
    }

    pub fn to_record(&self) -> SessionRecord {
        let state = self.state.lock();
        SessionRecord {
            id: self.id,
            group: self.group.clone(),
            creator: self.creator.clone(),
            created_at: self.created_at,
            message_id: self.message_id(),
            board: state.board.clone(),
            lives: state.lives,
            total_lives: state.total_lives,
            phase: state.phase,
            log: self.log.lock().clone(),
            last_action_token: self.last_action_token(),
            timeout_count: self.timeout_count(),
        }
    }

    pub fn id(&self) -> Fingerprint {
        self.id
    }

    pub fn group(&self) -> &ChatRef {
        &self.group
    }

    pub fn creator(&self) -> &UserRef {
        &self.creator
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn message_id(&self) -> Option<MessageId> {
        self.message_id.get().copied()
    }

    /// Records the rendered message. Only the first call has an effect.
    pub fn set_message_id(&self, id: MessageId) -> bool {
        self.message_id.set(id).is_ok()
    }

    /// Takes the mutation lock. Never hold the guard across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, GameState> {
        self.state.lock()
    }

    pub fn record_action(&self, player: &UserRef, cell: Coord) {
        self.log.lock().record(player, cell);
    }

    /// Copy of the action log.
    pub fn actions(&self) -> ActionLog {
        self.log.lock().clone()
    }

    pub fn last_action_token(&self) -> u64 {
        self.last_action_token.load(Ordering::SeqCst)
    }

    pub fn set_last_action_token(&self, token: u64) {
        self.last_action_token.store(token, Ordering::SeqCst);
    }

    /// Short token embedded in rendered buttons to spot taps on stale renders.
    pub fn display_token(&self) -> u8 {
        display_token(self.last_action_token())
    }

    pub fn timeout_count(&self) -> u64 {
        self.timeout_count.load(Ordering::Relaxed)
    }

    pub fn record_timeout(&self) -> u64 {
        self.timeout_count.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("group", &self.group.id)
            .field("creator", &self.creator.id)
            .field("message_id", &self.message_id())
            .finish_non_exhaustive()
    }
}

pub fn display_token(token: u64) -> u8 {
    (token % 100) as u8
}
