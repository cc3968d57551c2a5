//! Shared protocol and support types for the playtime synchronization nodes.
//!
//! This crate holds everything both node kinds agree on: the 128-bit player
//! identity, the tag-less binary wire codec, the per-channel message schemas,
//! the task scheduler abstraction, and the AFK monitor with its per-platform
//! capability interface. It performs no I/O of its own; the `server` and
//! `client` crates wire these pieces to real sockets and storage.

pub mod afk;
pub mod codec;
pub mod id;
pub mod messages;
pub mod scheduler;

pub use afk::{AfkActions, AfkMonitor, AfkTransition};
pub use codec::{CodecError, WireReader, WireValue};
pub use id::PlayerId;
pub use messages::{AfkMessage, Envelope, TimeMessage, CHANNEL_AFK, CHANNEL_TIME};
pub use scheduler::{Scheduler, TaskHandle};

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in whole seconds since the Unix epoch.
///
/// All session timestamps and durations in this system are second-granular;
/// a clock before the epoch degrades to 0 rather than panicking.
pub fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}
