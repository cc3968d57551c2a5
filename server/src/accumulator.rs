//! Session accumulator: converts connect/disconnect events into persisted
//! duration deltas.
//!
//! Each connected player has at most one open session, recorded as its
//! start timestamp in epoch seconds. The session map lock is held across
//! the storage call in stop and flush so a flush can never reset a start
//! timestamp that a concurrent stop is still measuring against.

use crate::provider::StorageError;
use crate::store::TimeStore;
use log::{debug, info, warn};
use shared::{AfkActions, PlayerId};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Per-node open-session state machine over the persistent time store.
pub struct SessionAccumulator {
    store: Arc<TimeStore>,
    sessions: Mutex<HashMap<PlayerId, u64>>,
}

impl SessionAccumulator {
    pub fn new(store: Arc<TimeStore>) -> Self {
        SessionAccumulator {
            store,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<TimeStore> {
        &self.store
    }

    /// Opens a session for `player` starting at `now`.
    ///
    /// A duplicate start (reconnect race) keeps the original timestamp;
    /// resetting it would undercount the first interval.
    pub async fn start_accumulating(&self, player: PlayerId, now: u64) {
        let mut sessions = self.sessions.lock().await;
        match sessions.entry(player) {
            Entry::Occupied(entry) => {
                warn!(
                    "Duplicate session start for {}; keeping original start {}",
                    player,
                    entry.get()
                );
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                info!("Session opened for {} at {}", player, now);
            }
        }
    }

    /// Closes the session for `player`, persisting the elapsed interval.
    ///
    /// Clock skew clamps to zero, never a negative delta. On a storage
    /// failure the session is kept so a retry or the next flush can recover
    /// the interval; only a successful merge removes it. A stop without an
    /// open session is a logged no-op.
    pub async fn stop_accumulating_and_save(
        &self,
        player: PlayerId,
        now: u64,
    ) -> Result<(), StorageError> {
        let mut sessions = self.sessions.lock().await;
        let Some(start) = sessions.get(&player).copied() else {
            info!("Stop for {} with no open session, ignoring", player);
            return Ok(());
        };

        let elapsed = now.saturating_sub(start);
        self.store.add_time(player, elapsed).await?;
        sessions.remove(&player);
        info!("Session closed for {}: +{}s", player, elapsed);
        Ok(())
    }

    /// Persists elapsed-so-far for every open session, then restarts the
    /// flushed sessions at `now` so the eventual stop does not double-count.
    ///
    /// Keys that fail to merge keep their old start timestamp; their
    /// interval is retried on the next flush or stop.
    pub async fn flush_online_time_cache(&self, now: u64) -> Result<(), StorageError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.is_empty() {
            return Ok(());
        }

        let deltas: HashMap<PlayerId, u64> = sessions
            .iter()
            .map(|(player, start)| (*player, now.saturating_sub(*start)))
            .collect();

        match self.store.add_times(&deltas).await {
            Ok(()) => {
                for start in sessions.values_mut() {
                    *start = now;
                }
                debug!("Flushed {} open session(s)", deltas.len());
                Ok(())
            }
            Err(StorageError::Batch { failed }) => {
                for (player, start) in sessions.iter_mut() {
                    if !failed.contains(player) {
                        *start = now;
                    }
                }
                warn!(
                    "Flush left {} session(s) unpersisted, will retry",
                    failed.len()
                );
                Err(StorageError::Batch { failed })
            }
            Err(error) => Err(error),
        }
    }

    /// AFK compensation: removes an already-credited idle window from the
    /// open session by moving its start forward. The exclusion is bounded
    /// by the elapsed time, so a session can never go negative.
    pub async fn exclude_idle(&self, player: PlayerId, idle_seconds: u64, now: u64) {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(&player) {
            Some(start) => {
                let credited = now.saturating_sub(*start);
                let excluded = idle_seconds.min(credited);
                *start += excluded;
                info!("Excluded {}s of idle time for {}", excluded, player);
            }
            None => {
                debug!("Idle exclusion for {} with no open session, ignoring", player);
            }
        }
    }

    pub async fn is_accumulating(&self, player: PlayerId) -> bool {
        self.sessions.lock().await.contains_key(&player)
    }

    /// Identities with an open session.
    pub async fn tracked(&self) -> Vec<PlayerId> {
        self.sessions.lock().await.keys().copied().collect()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Stored total plus elapsed-so-far of an open session, so queries see
    /// live values between flushes. `None` when the player has neither a
    /// record nor an open session.
    pub async fn live_total(&self, player: PlayerId, now: u64) -> Result<Option<u64>, StorageError> {
        let open = {
            let sessions = self.sessions.lock().await;
            sessions.get(&player).map(|start| now.saturating_sub(*start))
        };
        let stored = self.store.get(player)?;

        match (stored, open) {
            (None, None) => Ok(None),
            (stored, open) => Ok(Some(
                stored.unwrap_or(0).saturating_add(open.unwrap_or(0)),
            )),
        }
    }

    /// Flushes every open session, then closes the store. Flush failure
    /// aborts the close so no open interval is lost; the caller may retry.
    pub async fn close(&self, now: u64) -> Result<(), StorageError> {
        self.flush_online_time_cache(now).await?;
        self.store.close()
    }
}

/// Authoritative-node AFK adapter: excludes idle time from the player's
/// open session. Resume needs no bookkeeping under the exclude-once policy.
pub struct AccumulatorAfkActions {
    accumulator: Arc<SessionAccumulator>,
}

impl AccumulatorAfkActions {
    pub fn new(accumulator: Arc<SessionAccumulator>) -> Self {
        AccumulatorAfkActions { accumulator }
    }
}

impl AfkActions for AccumulatorAfkActions {
    fn execute_player_afk(&self, player: PlayerId, idle_seconds: u64) {
        let accumulator = Arc::clone(&self.accumulator);
        tokio::spawn(async move {
            accumulator
                .exclude_idle(player, idle_seconds, shared::epoch_seconds())
                .await;
        });
    }

    fn execute_player_resume(&self, player: PlayerId) {
        info!("Player {} is no longer AFK", player);
    }
}
