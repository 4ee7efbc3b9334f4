use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use metrics::{counter, gauge};
use minefield_board::Board;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::session::{Fingerprint, Session, SessionRecord};
use crate::transport::{ChatId, ChatRef, UserId, UserRef};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a session with fingerprint {0} already exists")]
    DuplicateSession(Fingerprint),
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unsupported snapshot version {0}")]
    Version(u32),
}

#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Where the snapshot lives. `None` keeps the registry memory-only.
    pub snapshot_path: Option<PathBuf>,
    /// How long a background snapshot waits for the writer lock.
    pub snapshot_lock_timeout: Duration,
    /// Sessions older than this are evicted by garbage collection.
    pub retention: Duration,
    pub gc_interval: Duration,
    pub gc_first_delay: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            snapshot_lock_timeout: Duration::from_secs(1),
            retention: Duration::from_secs(10 * 24 * 60 * 60),
            gc_interval: Duration::from_secs(24 * 60 * 60),
            gc_first_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    pub checked: usize,
    pub freed: usize,
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    sessions: Vec<SessionRecord>,
}

/// Owns every live session, keyed by board fingerprint.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sessions: DashMap<Fingerprint, Arc<Session>>,
    config: RegistryConfig,
    clock: Clock,
    snapshot_lock: Mutex<()>,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig, clock: Clock) -> Self {
        Self::with_sessions(config, clock, Vec::new())
    }

    fn with_sessions(config: RegistryConfig, clock: Clock, sessions: Vec<Session>) -> Self {
        let map = DashMap::new();
        for session in sessions {
            map.insert(session.id(), Arc::new(session));
        }
        let registry = Self {
            inner: Arc::new(RegistryInner {
                sessions: map,
                config,
                clock,
                snapshot_lock: Mutex::new(()),
            }),
        };
        registry.publish_gauge();
        registry
    }

    /// Reloads the snapshot named in `config`. A missing or unreadable
    /// snapshot yields an empty registry.
    pub fn restore(config: RegistryConfig, clock: Clock) -> Self {
        let sessions = match &config.snapshot_path {
            Some(path) => match load_snapshot(path) {
                Ok(records) => {
                    info!(
                        path = %path.display(),
                        sessions = records.len(),
                        "restored session snapshot"
                    );
                    records.into_iter().map(Session::from_record).collect()
                }
                Err(SnapshotError::Io(err)) if err.kind() == ErrorKind::NotFound => {
                    info!(path = %path.display(), "no session snapshot, starting empty");
                    Vec::new()
                }
                Err(err) => {
                    error!(
                        path = %path.display(),
                        error = %err,
                        "unable to load session snapshot, starting empty"
                    );
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        Self::with_sessions(config, clock, sessions)
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub fn clock(&self) -> Clock {
        self.inner.clock
    }

    /// Registers a session for a freshly built board.
    pub fn create(
        &self,
        board: Board,
        fingerprint: Fingerprint,
        group: ChatRef,
        creator: UserRef,
    ) -> Result<Arc<Session>, RegistryError> {
        let session = match self.inner.sessions.entry(fingerprint) {
            Entry::Occupied(_) => return Err(RegistryError::DuplicateSession(fingerprint)),
            Entry::Vacant(entry) => {
                let clock = self.inner.clock;
                let session = Arc::new(Session::new(
                    fingerprint,
                    board,
                    group,
                    creator,
                    clock.now(),
                    clock.now_micros(),
                ));
                entry.insert(Arc::clone(&session));
                session
            }
        };
        counter!("minefield_sessions_created_total", 1);
        self.publish_gauge();
        self.schedule_snapshot();
        Ok(session)
    }

    /// Drops a session. Only an actual removal schedules a snapshot.
    pub fn remove(&self, fingerprint: Fingerprint) -> bool {
        let removed = self.inner.sessions.remove(&fingerprint).is_some();
        if removed {
            self.publish_gauge();
            self.schedule_snapshot();
        }
        removed
    }

    pub fn get(&self, fingerprint: Fingerprint) -> Option<Arc<Session>> {
        self.inner
            .sessions
            .get(&fingerprint)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn count(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn iter_by_creator(&self, user: UserId) -> impl Iterator<Item = Arc<Session>> + '_ {
        self.iter_where(move |session| session.creator().id == user)
    }

    pub fn iter_by_chat(&self, chat: ChatId) -> impl Iterator<Item = Arc<Session>> + '_ {
        self.iter_where(move |session| session.group().id == chat)
    }

    /// Sessions running in supergroups, the only chats that can be linked to.
    pub fn iter_open(&self) -> impl Iterator<Item = Arc<Session>> + '_ {
        self.iter_where(|session| session.group().is_supergroup())
    }

    /// Walks a copy of the key set taken now. Keys removed in the meantime
    /// are skipped, keys added in the meantime are not visited.
    fn iter_where<F>(&self, keep: F) -> impl Iterator<Item = Arc<Session>> + '_
    where
        F: Fn(&Session) -> bool + 'static,
    {
        let keys: Vec<Fingerprint> = self.inner.sessions.iter().map(|e| *e.key()).collect();
        keys.into_iter()
            .filter_map(move |key| self.get(key))
            .filter(move |session| keep(session))
    }

    /// Evicts sessions older than `retention` at `now`, then snapshots once.
    pub fn garbage_collect(&self, retention: Duration, now: DateTime<Utc>) -> GcReport {
        let keys: Vec<Fingerprint> = self.inner.sessions.iter().map(|e| *e.key()).collect();
        let mut report = GcReport::default();
        for key in keys {
            report.checked += 1;
            let expired = self
                .inner
                .sessions
                .remove_if(&key, |_, session| {
                    let age = (now - session.created_at()).to_std().unwrap_or_default();
                    age > retention
                })
                .is_some();
            if expired {
                report.freed += 1;
            }
        }
        counter!("minefield_sessions_collected_total", report.freed as u64);
        self.publish_gauge();
        self.schedule_snapshot();
        info!(
            checked = report.checked,
            freed = report.freed,
            "session garbage collection finished"
        );
        report
    }

    /// Runs garbage collection on the configured schedule until aborted.
    pub fn spawn_collector(&self) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let config = registry.config().clone();
            let mut ticker = interval_at(Instant::now() + config.gc_first_delay, config.gc_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.garbage_collect(config.retention, registry.clock().now());
            }
        })
    }

    fn schedule_snapshot(&self) {
        if self.inner.config.snapshot_path.is_none() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime available, snapshot skipped");
            return;
        };
        let registry = self.clone();
        handle.spawn(async move {
            registry.snapshot().await;
        });
    }

    /// Best-effort snapshot. Gives up silently when another write holds the
    /// lock past the configured timeout. Returns whether a snapshot was written.
    pub async fn snapshot(&self) -> bool {
        let Some(path) = self.inner.config.snapshot_path.as_deref() else {
            return false;
        };
        let wait = self.inner.config.snapshot_lock_timeout;
        let Ok(_guard) = timeout(wait, self.inner.snapshot_lock.lock()).await else {
            debug!("snapshot writer busy, skipping");
            counter!("minefield_snapshots_total", 1, "result" => "skipped");
            return false;
        };
        match self.write_snapshot(path).await {
            Ok(count) => {
                debug!(sessions = count, "session snapshot written");
                counter!("minefield_snapshots_total", 1, "result" => "written");
                true
            }
            Err(err) => {
                error!(path = %path.display(), error = %err, "unable to write session snapshot");
                counter!("minefield_snapshots_total", 1, "result" => "failed");
                false
            }
        }
    }

    /// Unconditional snapshot used at shutdown: waits for the writer lock
    /// however long it takes.
    pub async fn flush(&self) -> Result<usize, SnapshotError> {
        let Some(path) = self.inner.config.snapshot_path.as_deref() else {
            return Ok(0);
        };
        let _guard = self.inner.snapshot_lock.lock().await;
        self.write_snapshot(path).await
    }

    async fn write_snapshot(&self, path: &Path) -> Result<usize, SnapshotError> {
        let sessions: Vec<Arc<Session>> = self
            .inner
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut records: Vec<SessionRecord> = sessions.iter().map(|s| s.to_record()).collect();
        records.sort_by_key(|r| r.id);
        let count = records.len();
        let bytes = serde_json::to_vec(&SnapshotFile {
            version: SNAPSHOT_VERSION,
            sessions: records,
        })?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(count)
    }

    fn publish_gauge(&self) {
        gauge!("minefield_sessions_active", self.count() as f64);
    }
}

fn load_snapshot(path: &Path) -> Result<Vec<SessionRecord>, SnapshotError> {
    let bytes = std::fs::read(path)?;
    let file: SnapshotFile = serde_json::from_slice(&bytes)?;
    if file.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::Version(file.version));
    }
    let mut sessions = file.sessions;
    let before = sessions.len();
    sessions.sort_by_key(|r| r.id);
    sessions.dedup_by_key(|r| r.id);
    if sessions.len() != before {
        warn!(dropped = before - sessions.len(), "duplicate sessions in snapshot");
    }
    let written = sessions.len();
    let sessions: Vec<SessionRecord> = sessions
        .into_iter()
        .filter_map(SessionRecord::into_playable)
        .collect();
    if sessions.len() != written {
        info!(
            dropped = written - sessions.len(),
            "finished sessions in snapshot, not restored"
        );
    }
    Ok(sessions)
}
