//! AFK detection and cross-node AFK dispatch.
//!
//! Each node runs an [`AfkMonitor`] over its locally connected players and
//! broadcasts the transitions it detects. Received transitions are applied
//! through the [`AfkActions`] capability interface, implemented once per
//! host platform; the core never touches a concrete platform type.
//!
//! Policy: the idle duration carried by an AFK transition is the window
//! that already elapsed before detection. It is excluded exactly once;
//! accumulation continues while the player stays AFK.

use crate::id::PlayerId;
use crate::messages::AfkMessage;
use log::{debug, warn};
use std::collections::HashMap;

/// Platform capability invoked when an AFK transition reaches a node that
/// has the player online.
pub trait AfkActions: Send + Sync {
    /// Exclude `idle_seconds` of already-credited time for `player`.
    fn execute_player_afk(&self, player: PlayerId, idle_seconds: u64);

    /// The player is active again.
    fn execute_player_resume(&self, player: PlayerId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfkState {
    Active { last_activity: u64 },
    Afk,
}

/// A transition detected locally, ready to be encoded and broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AfkTransition {
    Afk { player: PlayerId, idle_seconds: u64 },
    Resume { player: PlayerId },
}

impl AfkTransition {
    /// The wire form of this transition.
    pub fn to_message(&self) -> AfkMessage {
        match self {
            AfkTransition::Afk {
                player,
                idle_seconds,
            } => AfkMessage::Afk {
                player: *player,
                idle_seconds: *idle_seconds,
            },
            AfkTransition::Resume { player } => AfkMessage::Resume { player: *player },
        }
    }
}

/// Per-identity Active/Afk state machine driven by activity timestamps.
///
/// Players start Active when tracked, go Afk once their idle time reaches
/// the threshold, and return Active on the next recorded activity. There is
/// no terminal state; entries live until [`AfkMonitor::remove`].
pub struct AfkMonitor {
    idle_threshold: u64,
    states: HashMap<PlayerId, AfkState>,
}

impl AfkMonitor {
    /// `idle_threshold` is in seconds; a zero threshold marks every
    /// tracked player AFK on the next sweep.
    pub fn new(idle_threshold: u64) -> Self {
        AfkMonitor {
            idle_threshold,
            states: HashMap::new(),
        }
    }

    /// Starts watching a player, initially Active as of `now`.
    pub fn track(&mut self, player: PlayerId, now: u64) {
        self.states
            .insert(player, AfkState::Active { last_activity: now });
    }

    /// Stops watching a player (disconnect).
    pub fn remove(&mut self, player: PlayerId) {
        self.states.remove(&player);
    }

    pub fn is_afk(&self, player: PlayerId) -> bool {
        matches!(self.states.get(&player), Some(AfkState::Afk))
    }

    /// Records activity for a player. Returns the resume transition when the
    /// player was AFK. Untracked players become tracked on first activity.
    pub fn record_activity(&mut self, player: PlayerId, now: u64) -> Option<AfkTransition> {
        match self.states.get_mut(&player) {
            Some(state @ AfkState::Afk) => {
                *state = AfkState::Active { last_activity: now };
                Some(AfkTransition::Resume { player })
            }
            Some(AfkState::Active { last_activity }) => {
                *last_activity = now;
                None
            }
            None => {
                self.track(player, now);
                None
            }
        }
    }

    /// Sweeps all Active players and flips those idle past the threshold.
    /// Returns the AFK transitions to broadcast, each carrying the idle
    /// window that has already elapsed.
    pub fn check(&mut self, now: u64) -> Vec<AfkTransition> {
        let mut transitions = Vec::new();
        for (player, state) in self.states.iter_mut() {
            if let AfkState::Active { last_activity } = state {
                let idle = now.saturating_sub(*last_activity);
                if idle >= self.idle_threshold {
                    *state = AfkState::Afk;
                    transitions.push(AfkTransition::Afk {
                        player: *player,
                        idle_seconds: idle,
                    });
                }
            }
        }
        transitions
    }
}

/// Applies a received AFK message to the local platform adapter.
///
/// `locally_present` is whether the player is online on this node; messages
/// for players elsewhere are expected churn and dropped quietly. Returns
/// whether the message was dispatched.
pub fn dispatch(message: &AfkMessage, locally_present: bool, actions: &dyn AfkActions) -> bool {
    let player = match message {
        AfkMessage::Afk { player, .. } | AfkMessage::Resume { player } => *player,
    };

    if !locally_present {
        debug!("Dropping AFK message for {}: not present on this node", player);
        return false;
    }

    match message {
        AfkMessage::Afk {
            player,
            idle_seconds,
        } => {
            actions.execute_player_afk(*player, *idle_seconds);
        }
        AfkMessage::Resume { player } => {
            actions.execute_player_resume(*player);
        }
    }
    true
}

/// Logs and drops an undecodable AFK payload. Kept next to `dispatch` so
/// both halves of the receive path live together.
pub fn log_malformed(error: &crate::codec::CodecError) {
    warn!("Discarding malformed AFK message: {}", error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingActions {
        afk_calls: Mutex<Vec<(PlayerId, u64)>>,
        resume_calls: Mutex<Vec<PlayerId>>,
    }

    impl AfkActions for RecordingActions {
        fn execute_player_afk(&self, player: PlayerId, idle_seconds: u64) {
            self.afk_calls.lock().unwrap().push((player, idle_seconds));
        }

        fn execute_player_resume(&self, player: PlayerId) {
            self.resume_calls.lock().unwrap().push(player);
        }
    }

    fn player() -> PlayerId {
        PlayerId::new(77)
    }

    #[test]
    fn test_idle_threshold_triggers_afk() {
        let mut monitor = AfkMonitor::new(300);
        monitor.track(player(), 1000);

        assert!(monitor.check(1299).is_empty());

        let transitions = monitor.check(1300);
        assert_eq!(
            transitions,
            vec![AfkTransition::Afk {
                player: player(),
                idle_seconds: 300
            }]
        );
        assert!(monitor.is_afk(player()));

        // Already AFK, no second transition
        assert!(monitor.check(2000).is_empty());
    }

    #[test]
    fn test_activity_resumes_afk_player() {
        let mut monitor = AfkMonitor::new(60);
        monitor.track(player(), 0);
        monitor.check(60);
        assert!(monitor.is_afk(player()));

        let transition = monitor.record_activity(player(), 100);
        assert_eq!(transition, Some(AfkTransition::Resume { player: player() }));
        assert!(!monitor.is_afk(player()));
    }

    #[test]
    fn test_activity_while_active_just_refreshes() {
        let mut monitor = AfkMonitor::new(60);
        monitor.track(player(), 0);
        assert_eq!(monitor.record_activity(player(), 50), None);
        // Idle clock restarted at 50
        assert!(monitor.check(100).is_empty());
        assert_eq!(monitor.check(110).len(), 1);
    }

    #[test]
    fn test_zero_threshold_fires_on_next_sweep() {
        let mut monitor = AfkMonitor::new(0);
        monitor.track(player(), 500);

        let transitions = monitor.check(500);
        assert_eq!(
            transitions,
            vec![AfkTransition::Afk {
                player: player(),
                idle_seconds: 0
            }]
        );
    }

    #[test]
    fn test_removed_player_never_transitions() {
        let mut monitor = AfkMonitor::new(10);
        monitor.track(player(), 0);
        monitor.remove(player());
        assert!(monitor.check(1000).is_empty());
    }

    #[test]
    fn test_dispatch_invokes_afk_action() {
        let actions = RecordingActions::default();
        let message = AfkMessage::Afk {
            player: player(),
            idle_seconds: 7,
        };

        assert!(dispatch(&message, true, &actions));
        assert_eq!(*actions.afk_calls.lock().unwrap(), vec![(player(), 7)]);
    }

    #[test]
    fn test_dispatch_invokes_resume_action() {
        let actions = RecordingActions::default();
        let message = AfkMessage::Resume { player: player() };

        assert!(dispatch(&message, true, &actions));
        assert_eq!(*actions.resume_calls.lock().unwrap(), vec![player()]);
    }

    #[test]
    fn test_dispatch_drops_absent_player() {
        let actions = RecordingActions::default();
        let message = AfkMessage::Afk {
            player: player(),
            idle_seconds: 7,
        };

        assert!(!dispatch(&message, false, &actions));
        assert!(actions.afk_calls.lock().unwrap().is_empty());
    }
}
