//! Applies one tap to a shared board and drives the round to its end.
//!
//! The session lock is held only around the board mutation and the phase
//! changes. Rendering, rewards and report delivery all happen outside it,
//! while the session sits in [`Phase::Transitioning`] so concurrent taps are
//! ignored until the round is settled.

use std::sync::Arc;

use metrics::counter;
use minefield_board::{BoardState, Coord};
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::registry::SessionRegistry;
use crate::render::RenderScheduler;
use crate::reports::{Report, ReportKind};
use crate::reward::{RewardEngine, RewardKind};
use crate::session::{Fingerprint, Phase, Session};
use crate::transport::{ChatId, ChatTransport, MessageId, UserRef};

/// Where the tapped keyboard lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveTarget {
    pub chat: ChatId,
    pub message: MessageId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownSession,
    NotPlaying,
    OutOfBounds,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The player is benched; nothing was touched.
    Restricted { remaining_secs: i64 },
    Ignored(IgnoreReason),
    /// Same grid and same token as the last render.
    Duplicate,
    Continued,
    Won,
    LifeLost { remaining: u32, total: u32 },
    Lost,
}

impl MoveOutcome {
    fn label(&self) -> &'static str {
        match self {
            MoveOutcome::Restricted { .. } => "restricted",
            MoveOutcome::Ignored(_) => "ignored",
            MoveOutcome::Duplicate => "duplicate",
            MoveOutcome::Continued => "continued",
            MoveOutcome::Won => "won",
            MoveOutcome::LifeLost { .. } => "life_lost",
            MoveOutcome::Lost => "lost",
        }
    }
}

pub struct MoveCoordinator {
    registry: SessionRegistry,
    renderer: RenderScheduler,
    rewards: Arc<RewardEngine>,
    transport: Arc<dyn ChatTransport>,
    clock: Clock,
}

impl MoveCoordinator {
    pub fn new(
        registry: SessionRegistry,
        renderer: RenderScheduler,
        rewards: Arc<RewardEngine>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        let clock = registry.clock();
        Self {
            registry,
            renderer,
            rewards,
            transport,
            clock,
        }
    }

    pub async fn apply_move(
        &self,
        fingerprint: Fingerprint,
        player: &UserRef,
        cell: Coord,
        claimed_token: u8,
        target: MoveTarget,
    ) -> MoveOutcome {
        let outcome = self
            .apply(fingerprint, player, cell, claimed_token, target)
            .await;
        counter!("minefield_moves_total", 1, "outcome" => outcome.label());
        outcome
    }

    async fn apply(
        &self,
        fingerprint: Fingerprint,
        player: &UserRef,
        cell: Coord,
        claimed_token: u8,
        target: MoveTarget,
    ) -> MoveOutcome {
        if let Some(remaining_secs) = self.rewards.restriction(player.id) {
            return MoveOutcome::Restricted { remaining_secs };
        }
        let Some(session) = self.registry.get(fingerprint) else {
            debug!(session = %fingerprint, "tap on unknown session");
            return MoveOutcome::Ignored(IgnoreReason::UnknownSession);
        };

        let (state, changed) = {
            let mut game = session.lock();
            if game.phase != Phase::Playing {
                return MoveOutcome::Ignored(IgnoreReason::NotPlaying);
            }
            let before = (game.board.state() != BoardState::Fresh).then(|| game.board.grid().to_vec());
            let Ok(state) = game.board.reveal(cell) else {
                return MoveOutcome::Ignored(IgnoreReason::OutOfBounds);
            };
            let changed = before.map_or(true, |grid| grid.as_slice() != game.board.grid());
            if state.is_terminal() {
                game.phase = Phase::Transitioning;
            }
            (state, changed)
        };
        let stale = session.display_token() != claimed_token;

        if !state.is_terminal() {
            if !changed && !stale {
                return MoveOutcome::Duplicate;
            }
            session.record_action(player, cell);
            self.renderer
                .request_render(&session, target.chat, target.message)
                .await;
            return MoveOutcome::Continued;
        }

        session.record_action(player, cell);
        if changed || stale {
            self.renderer
                .request_render(&session, target.chat, target.message)
                .await;
        }
        self.settle(&session, player, state, target).await
    }

    /// Rewards the tapper, re-arms or stops the session, and posts the report.
    async fn settle(
        &self,
        session: &Arc<Session>,
        player: &UserRef,
        state: BoardState,
        target: MoveTarget,
    ) -> MoveOutcome {
        let stats = session.lock().board.statistics();
        let complexity = stats.bbbv.max(1) as f64;

        let (kind, reward, outcome) = if state == BoardState::Won {
            let reward = self
                .rewards
                .reward(player.id, complexity / 2.0, RewardKind::Win)
                .await;
            session.lock().phase = Phase::Stopped;
            (ReportKind::Won, reward, MoveOutcome::Won)
        } else {
            let reward = self
                .rewards
                .reward(player.id, 12.0 / complexity, RewardKind::Loss)
                .await;
            let mut game = session.lock();
            game.lives = game.lives.saturating_sub(1);
            if game.lives > 0 {
                game.board.resume();
                game.phase = Phase::Playing;
                let (remaining, total) = (game.lives, game.total_lives);
                (
                    ReportKind::Step {
                        remain: remaining,
                        ttl: total,
                    },
                    reward,
                    MoveOutcome::LifeLost { remaining, total },
                )
            } else {
                game.phase = Phase::Stopped;
                (ReportKind::Lost, reward, MoveOutcome::Lost)
            }
        };
        let stopped = !matches!(kind, ReportKind::Step { .. });

        let actions = session.actions();
        if stopped {
            for (participant, _) in actions.counts() {
                self.rewards.count_game(participant.id).await;
            }
        }
        let elapsed = (self.clock.now() - session.created_at())
            .to_std()
            .unwrap_or_default();
        let report = Report {
            kind,
            stats,
            actions,
            elapsed,
            timeouts: session.timeout_count(),
            reward,
        };
        self.deliver_report(session, &report.render(), target).await;

        if stopped && self.registry.remove(session.id()) {
            info!(session = %session.id(), outcome = outcome.label(), "session finished");
        }
        outcome
    }

    async fn deliver_report(&self, session: &Session, text: &str, target: MoveTarget) {
        match self
            .transport
            .send_message(target.chat, text, None, Some(target.message))
            .await
        {
            Ok(_) => {}
            Err(err) if err.is_transient() => {
                debug!(session = %session.id(), error = %err, "report delivery failed");
                counter!("minefield_delivery_failures_total", 1, "kind" => err.metric_label());
            }
            Err(err) => {
                error!(session = %session.id(), error = %err, "report delivery failed");
                counter!("minefield_delivery_failures_total", 1, "kind" => err.metric_label());
            }
        }
    }
}
