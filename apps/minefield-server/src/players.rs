use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::transport::UserId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub user_id: UserId,
    /// Immunity cards, the in-game currency.
    #[serde(default)]
    pub cards: i64,
    #[serde(default)]
    pub wins: u64,
    #[serde(default)]
    pub deaths: u64,
    #[serde(default)]
    pub games: u64,
    #[serde(default)]
    pub restricted_until: Option<DateTime<Utc>>,
}

impl PlayerProfile {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            cards: 0,
            wins: 0,
            deaths: 0,
            games: 0,
            restricted_until: None,
        }
    }

    /// Whole seconds left on a restriction, if one is active at `now`.
    pub fn restriction_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        let until = self.restricted_until?;
        if until <= now {
            return None;
        }
        let millis = (until - now).num_milliseconds();
        Some(((millis + 999) / 1000).max(1))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("player store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("player store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Profile persistence. Implementations apply `update` atomically per user
/// and persist before returning.
pub trait PlayerStore: Send + Sync {
    /// Profile for `user`, or a fresh one if the user never played.
    fn load(&self, user: UserId) -> Result<PlayerProfile, StoreError>;

    /// Runs `apply` on the user's profile and persists the result. `apply`
    /// has run whenever the error is a persistence failure.
    fn update(
        &self,
        user: UserId,
        apply: &mut dyn FnMut(&mut PlayerProfile),
    ) -> Result<PlayerProfile, StoreError>;
}

#[derive(Default)]
pub struct MemoryPlayerStore {
    profiles: DashMap<UserId, PlayerProfile>,
}

impl MemoryPlayerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlayerStore for MemoryPlayerStore {
    fn load(&self, user: UserId) -> Result<PlayerProfile, StoreError> {
        Ok(self
            .profiles
            .get(&user)
            .map(|p| p.value().clone())
            .unwrap_or_else(|| PlayerProfile::new(user)))
    }

    fn update(
        &self,
        user: UserId,
        apply: &mut dyn FnMut(&mut PlayerProfile),
    ) -> Result<PlayerProfile, StoreError> {
        let mut entry = self
            .profiles
            .entry(user)
            .or_insert_with(|| PlayerProfile::new(user));
        apply(entry.value_mut());
        Ok(entry.value().clone())
    }
}

/// Profiles kept in memory and mirrored to a JSON file on every update.
///
/// Reads only take the profile lock. Each update encodes the whole map under
/// that lock and writes it under a separate writer lock, skipping the write
/// when a newer encoding already reached the disk.
pub struct JsonPlayerStore {
    path: PathBuf,
    profiles: Mutex<Profiles>,
    written: Mutex<u64>,
}

#[derive(Default)]
struct Profiles {
    by_user: HashMap<UserId, PlayerProfile>,
    generation: u64,
}

impl JsonPlayerStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let by_user: HashMap<UserId, PlayerProfile> = match std::fs::read(&path) {
            Ok(bytes) => {
                let list: Vec<PlayerProfile> = serde_json::from_slice(&bytes)?;
                list.into_iter().map(|p| (p.user_id, p)).collect()
            }
            Err(err) if err.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        info!(
            path = %path.display(),
            players = by_user.len(),
            "player store opened"
        );
        Ok(Self {
            path,
            profiles: Mutex::new(Profiles {
                by_user,
                generation: 0,
            }),
            written: Mutex::new(0),
        })
    }

    fn encode(profiles: &HashMap<UserId, PlayerProfile>) -> Result<Vec<u8>, StoreError> {
        let mut list: Vec<&PlayerProfile> = profiles.values().collect();
        list.sort_by_key(|p| p.user_id);
        Ok(serde_json::to_vec_pretty(&list)?)
    }

    fn persist(&self, generation: u64, bytes: &[u8]) -> Result<(), StoreError> {
        let mut written = self.written.lock();
        if *written >= generation {
            return Ok(());
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        *written = generation;
        Ok(())
    }
}

impl PlayerStore for JsonPlayerStore {
    fn load(&self, user: UserId) -> Result<PlayerProfile, StoreError> {
        Ok(self
            .profiles
            .lock()
            .by_user
            .get(&user)
            .cloned()
            .unwrap_or_else(|| PlayerProfile::new(user)))
    }

    fn update(
        &self,
        user: UserId,
        apply: &mut dyn FnMut(&mut PlayerProfile),
    ) -> Result<PlayerProfile, StoreError> {
        let (updated, generation, bytes) = {
            let mut profiles = self.profiles.lock();
            let profile = profiles
                .by_user
                .entry(user)
                .or_insert_with(|| PlayerProfile::new(user));
            apply(profile);
            let updated = profile.clone();
            profiles.generation += 1;
            (updated, profiles.generation, Self::encode(&profiles.by_user)?)
        };
        if let Err(err) = self.persist(generation, &bytes) {
            warn!(error = %err, user_id = user, "failed to write player store");
            return Err(err);
        }
        Ok(updated)
    }
}
