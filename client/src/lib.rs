//! # Dependent Node Library
//!
//! The dependent node has no storage access of its own. It keeps a local,
//! eventually consistent mirror of each connected player's accumulated time
//! by polling the authoritative node over the wire protocol, forwards any
//! locally originated additions fire-and-forget, and relays AFK transitions
//! both ways.
//!
//! ## Consistency Model
//!
//! Cached values lag the authoritative store by at most one poll interval
//! plus network latency. There are no request timeouts or retries; a lost
//! response is simply corrected by the next poll. Forwarded additions apply
//! no optimistic local update, so the staleness window is visible but
//! bounded.
//!
//! ## Module Organization
//!
//! ### Cache Module (`cache`)
//! The read-through time cache: join/leave lifecycle, poll scheduling,
//! leave-wins response handling, and fire-and-forget forwarding.
//!
//! ### Network Module (`network`)
//! The UDP receive loop, the outbound sender task, and AFK dispatch to the
//! platform adapter.

pub mod cache;
pub mod network;
