//! Immunity card economics.
//!
//! Winners earn cards with diminishing returns as their pile grows; losers pay
//! a log-scaled number of cards, or get benched for a while when they cannot
//! pay.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use crate::clock::Clock;
use crate::players::{PlayerProfile, PlayerStore};
use crate::transport::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardKind {
    Win,
    Loss,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewardOutcome {
    Granted { granted: i64, total: i64 },
    Spent { spent: i64, remaining: i64 },
    Restricted { seconds: i64 },
}

impl fmt::Display for RewardOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewardOutcome::Granted { granted: 0, total } => {
                write!(f, "holds {total} immunity cards")
            }
            RewardOutcome::Granted { granted, total } => {
                write!(f, "was awarded {granted} immunity cards, {total} in total")
            }
            RewardOutcome::Spent { spent, remaining } => {
                write!(f, "used {spent} immunity cards, {remaining} left")
            }
            RewardOutcome::Restricted { seconds } => {
                write!(f, "ran out of immunity cards and is benched for {seconds} seconds")
            }
        }
    }
}

/// Random factor in `[0.8, 1.2)`.
fn floating<R: Rng + ?Sized>(rng: &mut R, value: f64) -> f64 {
    rng.gen_range(0.8..1.2) * value
}

fn chance<R: Rng + ?Sized>(rng: &mut R, probability: f64) -> bool {
    rng.gen::<f64>() < probability
}

fn cards_lost<R: Rng + ?Sized>(rng: &mut R, cards: i64, base: f64) -> i64 {
    if cards <= 6 {
        return 1;
    }
    let lost = base * floating(rng, (cards as f64).log2());
    (lost as i64).max(1)
}

fn cards_won<R: Rng + ?Sized>(rng: &mut R, cards: i64, base: f64) -> i64 {
    if cards < 2 {
        return floating(rng, 8.0) as i64;
    }
    let won = base * floating(rng, 1.0 / (cards as f64).log(100.0));
    if won > 1.0 {
        won as i64
    } else {
        i64::from(chance(rng, won))
    }
}

/// Settles one game for `profile`. Pure apart from the random draws.
pub fn apply_reward<R: Rng + ?Sized>(
    rng: &mut R,
    profile: &mut PlayerProfile,
    base: f64,
    kind: RewardKind,
    now: DateTime<Utc>,
) -> RewardOutcome {
    match kind {
        RewardKind::Loss => {
            profile.deaths += 1;
            let spent = cards_lost(rng, profile.cards, base);
            if profile.cards - spent >= 0 {
                profile.cards -= spent;
                RewardOutcome::Spent {
                    spent,
                    remaining: profile.cards,
                }
            } else {
                let seconds = rng.gen_range(30..=120);
                profile.restricted_until = Some(now + Duration::seconds(seconds));
                RewardOutcome::Restricted { seconds }
            }
        }
        RewardKind::Win => {
            profile.wins += 1;
            let granted = cards_won(rng, profile.cards, base);
            profile.cards += granted;
            RewardOutcome::Granted {
                granted,
                total: profile.cards,
            }
        }
    }
}

/// Applies rewards against the player store.
pub struct RewardEngine {
    store: Arc<dyn PlayerStore>,
    rng: Mutex<StdRng>,
    clock: Clock,
}

impl RewardEngine {
    pub fn new(store: Arc<dyn PlayerStore>, clock: Clock) -> Self {
        Self::with_rng(store, clock, StdRng::from_entropy())
    }

    pub fn with_rng(store: Arc<dyn PlayerStore>, clock: Clock, rng: StdRng) -> Self {
        Self {
            store,
            rng: Mutex::new(rng),
            clock,
        }
    }

    /// Rewards or penalises `user` and persists the profile. A store failure
    /// is logged; the computed outcome is returned either way.
    ///
    /// The store is written from the blocking pool, with an RNG forked per
    /// call so no lock is held across the write.
    pub async fn reward(&self, user: UserId, base: f64, kind: RewardKind) -> RewardOutcome {
        let now = self.clock.now();
        let mut rng = self.fork_rng();
        let store = Arc::clone(&self.store);
        let settled = tokio::task::spawn_blocking(move || {
            let mut outcome = None;
            let result = store.update(user, &mut |profile| {
                outcome = Some(apply_reward(&mut rng, profile, base, kind, now));
            });
            (result.err(), outcome)
        })
        .await;
        let outcome = match settled {
            Ok((None, Some(outcome))) => Some(outcome),
            Ok((Some(err), outcome)) => {
                warn!(error = %err, user_id = user, "failed to persist reward");
                outcome
            }
            Ok((None, None)) => None,
            Err(err) => {
                warn!(error = %err, user_id = user, "reward task failed");
                None
            }
        };
        let outcome = outcome.unwrap_or_else(|| {
            apply_reward(&mut self.fork_rng(), &mut PlayerProfile::new(user), base, kind, now)
        });
        let label = match &outcome {
            RewardOutcome::Granted { .. } => "granted",
            RewardOutcome::Spent { .. } => "spent",
            RewardOutcome::Restricted { .. } => "restricted",
        };
        counter!("minefield_rewards_total", 1, "outcome" => label);
        outcome
    }

    fn fork_rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.rng.lock().gen())
    }

    /// Seconds until `user` may play again, if restricted.
    pub fn restriction(&self, user: UserId) -> Option<i64> {
        match self.store.load(user) {
            Ok(profile) => profile.restriction_remaining(self.clock.now()),
            Err(err) => {
                warn!(error = %err, user_id = user, "failed to load player profile");
                None
            }
        }
    }

    /// Counts a finished game for a participant.
    pub async fn count_game(&self, user: UserId) {
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || {
            store.update(user, &mut |profile| profile.games += 1).err()
        })
        .await;
        match result {
            Ok(None) => {}
            Ok(Some(err)) => warn!(error = %err, user_id = user, "failed to persist game count"),
            Err(err) => warn!(error = %err, user_id = user, "game count task failed"),
        }
    }

    pub fn profile(&self, user: UserId) -> PlayerProfile {
        self.store.load(user).unwrap_or_else(|err| {
            warn!(error = %err, user_id = user, "failed to load player profile");
            PlayerProfile::new(user)
        })
    }
}
