//! Read-through cache of authoritative time for players on this node.
//!
//! The dependent node never touches storage. Each locally connected player
//! has a cache entry, seeded to zero on join, refreshed by poll responses,
//! and removed the moment the player leaves. Writes originating here are
//! forwarded to the authoritative node fire-and-forget, so the cache is
//! eventually consistent with staleness bounded by one poll interval.

use log::{debug, error, info};
use shared::{Envelope, PlayerId, Scheduler, TaskHandle, TimeMessage, CHANNEL_TIME};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Delay between a player joining and the first `get` request, giving the
/// authoritative side time to settle the join.
const JOIN_QUERY_DELAY: Duration = Duration::from_secs(2);

/// Local mirror of authoritative playtime for currently connected players.
pub struct TimeCache {
    entries: Arc<Mutex<HashMap<PlayerId, u64>>>,
    outbound: mpsc::UnboundedSender<Envelope>,
    scheduler: Scheduler,
    poll_task: StdMutex<Option<TaskHandle>>,
}

impl TimeCache {
    /// `outbound` carries envelopes toward the authoritative node.
    pub fn new(outbound: mpsc::UnboundedSender<Envelope>, scheduler: Scheduler) -> Self {
        TimeCache {
            entries: Arc::new(Mutex::new(HashMap::new())),
            outbound,
            scheduler,
            poll_task: StdMutex::new(None),
        }
    }

    /// Starts the periodic poll: one `get` per tracked player per interval.
    /// Replaces (and cancels) any previous poll task.
    pub fn start_polling(&self, interval: Duration) {
        let entries = Arc::clone(&self.entries);
        let outbound = self.outbound.clone();

        let handle = self.scheduler.run_repeating(interval, interval, move || {
            let entries = Arc::clone(&entries);
            let outbound = outbound.clone();
            async move {
                let tracked: Vec<PlayerId> = entries.lock().await.keys().copied().collect();
                for player in tracked {
                    send_get(&outbound, player);
                }
            }
        });

        let mut slot = self.poll_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.cancel();
        }
    }

    /// Host hook: a player joined this node. Seeds the entry to 0 and asks
    /// the authoritative node for the real total shortly after.
    pub async fn handle_join(&self, player: PlayerId) {
        self.entries.lock().await.insert(player, 0);
        info!("Tracking time for {}", player);

        let outbound = self.outbound.clone();
        self.scheduler.run_once_later(JOIN_QUERY_DELAY, async move {
            send_get(&outbound, player);
        });
    }

    /// Host hook: a player left this node. The entry goes away immediately;
    /// any in-flight response for them will be discarded on arrival.
    pub async fn handle_leave(&self, player: PlayerId) {
        if self.entries.lock().await.remove(&player).is_some() {
            info!("Stopped tracking time for {}", player);
        }
    }

    /// Applies a `send` response from the authoritative node. Leave wins:
    /// an untracked player's response is dropped, never re-inserted.
    pub async fn handle_send(&self, player: PlayerId, seconds: u64) {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(&player) {
            Some(value) => {
                *value = seconds;
                debug!("Cached time for {} is now {}s", player, seconds);
            }
            None => {
                debug!("Dropping time update for {}: no longer tracked", player);
            }
        }
    }

    /// Cached total for a tracked player. Never blocks on the network;
    /// `None` means the player is not on this node.
    pub async fn get_time(&self, player: PlayerId) -> Option<u64> {
        self.entries.lock().await.get(&player).copied()
    }

    pub async fn contains(&self, player: PlayerId) -> bool {
        self.entries.lock().await.contains_key(&player)
    }

    /// Forwards an addition to the authoritative node. Fire-and-forget:
    /// no acknowledgment, no optimistic local update; the next poll
    /// response reflects the merged value.
    pub fn add_time(&self, player: PlayerId, seconds: u64) {
        let message = TimeMessage::Add { player, seconds };
        match message.encode() {
            Ok(payload) => {
                if self
                    .outbound
                    .send(Envelope::new(CHANNEL_TIME, payload))
                    .is_err()
                {
                    error!("Outbound channel closed, dropping addition for {}", player);
                }
            }
            Err(e) => error!("Failed to encode addition for {}: {}", player, e),
        }
    }

    /// Batch form of [`TimeCache::add_time`]; each entry is forwarded as
    /// its own message.
    pub fn add_times(&self, deltas: &HashMap<PlayerId, u64>) {
        for (player, seconds) in deltas {
            self.add_time(*player, *seconds);
        }
    }

    /// Cancels the poll task. The cache holds no authoritative data, so
    /// there is nothing to flush.
    pub fn close(&self) {
        let mut slot = self.poll_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = slot.take() {
            task.cancel();
            info!("Time cache poll task cancelled");
        }
    }
}

fn send_get(outbound: &mpsc::UnboundedSender<Envelope>, player: PlayerId) {
    let message = TimeMessage::Get { player };
    match message.encode() {
        Ok(payload) => {
            let _ = outbound.send(Envelope::new(CHANNEL_TIME, payload));
        }
        Err(e) => error!("Failed to encode time query for {}: {}", player, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> PlayerId {
        PlayerId::new(1)
    }

    fn cache() -> (TimeCache, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TimeCache::new(tx, Scheduler::new()), rx)
    }

    #[tokio::test]
    async fn test_join_seeds_zero() {
        let (cache, _rx) = cache();
        cache.handle_join(player()).await;
        assert_eq!(cache.get_time(player()).await, Some(0));
    }

    #[tokio::test]
    async fn test_untracked_player_is_absent_not_zero() {
        let (cache, _rx) = cache();
        assert_eq!(cache.get_time(player()).await, None);
    }

    #[tokio::test]
    async fn test_send_response_updates_tracked_entry() {
        let (cache, _rx) = cache();
        cache.handle_join(player()).await;
        cache.handle_send(player(), 42).await;
        assert_eq!(cache.get_time(player()).await, Some(42));
    }

    #[tokio::test]
    async fn test_leave_wins_over_late_response() {
        let (cache, _rx) = cache();
        cache.handle_join(player()).await;
        cache.handle_leave(player()).await;

        // A stale response arriving after the leave must not resurrect it
        cache.handle_send(player(), 42).await;
        assert_eq!(cache.get_time(player()).await, None);
    }

    #[tokio::test]
    async fn test_add_time_forwards_add_message() {
        let (cache, mut rx) = cache();
        cache.add_time(player(), 30);

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.channel, CHANNEL_TIME);
        assert_eq!(
            TimeMessage::decode(&envelope.payload).unwrap(),
            TimeMessage::Add {
                player: player(),
                seconds: 30
            }
        );
    }

    #[tokio::test]
    async fn test_add_times_forwards_each_entry() {
        let (cache, mut rx) = cache();
        let deltas: HashMap<PlayerId, u64> =
            [(PlayerId::new(1), 10), (PlayerId::new(2), 20)].into_iter().collect();
        cache.add_times(&deltas);

        let mut seen = Vec::new();
        for _ in 0..2 {
            let envelope = rx.recv().await.unwrap();
            match TimeMessage::decode(&envelope.payload).unwrap() {
                TimeMessage::Add { player, seconds } => seen.push((player, seconds)),
                other => panic!("unexpected message {:?}", other),
            }
        }
        seen.sort();
        assert_eq!(seen, vec![(PlayerId::new(1), 10), (PlayerId::new(2), 20)]);
    }

    #[tokio::test]
    async fn test_join_schedules_initial_get() {
        let (cache, mut rx) = cache();
        cache.handle_join(player()).await;

        // The initial query is delayed; advance past it with a paused clock
        tokio::time::pause();
        tokio::time::advance(JOIN_QUERY_DELAY + Duration::from_millis(100)).await;
        tokio::time::resume();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(
            TimeMessage::decode(&envelope.payload).unwrap(),
            TimeMessage::Get { player: player() }
        );
    }

    #[tokio::test]
    async fn test_polling_queries_every_tracked_player() {
        let (cache, mut rx) = cache();
        cache.handle_join(PlayerId::new(1)).await;
        cache.handle_join(PlayerId::new(2)).await;

        cache.start_polling(Duration::from_millis(20));

        let mut gets = 0;
        while gets < 2 {
            let envelope =
                tokio::time::timeout(Duration::from_millis(500), rx.recv())
                    .await
                    .expect("poll did not fire")
                    .unwrap();
            if let TimeMessage::Get { .. } = TimeMessage::decode(&envelope.payload).unwrap() {
                gets += 1;
            }
        }
        cache.close();
    }

    #[tokio::test]
    async fn test_close_cancels_polling() {
        let (cache, mut rx) = cache();
        cache.handle_join(player()).await;
        cache.start_polling(Duration::from_millis(10));
        cache.close();

        // Drain whatever was queued before the cancel took effect
        tokio::time::sleep(Duration::from_millis(50)).await;
        while rx.try_recv().is_ok() {}

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
