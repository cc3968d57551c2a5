//! # Authoritative Node Library
//!
//! This crate implements the authoritative node of the playtime
//! synchronization network. It holds the only durable copy of accumulated
//! time, runs the session accumulator for locally connected players, and
//! answers dependent nodes' time queries and forwarded additions over the
//! wire protocol.
//!
//! ## Core Responsibilities
//!
//! ### Durable Time Accounting
//! Connect and disconnect events open and close sessions; closed and
//! periodically flushed intervals are merged into the persistent time
//! store. Merges are additive and commutative, so replays and reordering
//! cannot corrupt totals.
//!
//! ### Serving Dependent Nodes
//! Dependent nodes have no storage access. Their `get` queries are answered
//! with live totals (stored time plus the open session's elapsed time), and
//! their forwarded `add` messages are merged directly into the store.
//!
//! ### Failure Containment
//! No storage or network failure terminates the node. Failed merges keep
//! their session state in memory for retry; malformed messages are logged
//! and discarded one at a time.
//!
//! ## Module Organization
//!
//! ### Provider Module (`provider`)
//! The pluggable key/value persistence seam: a durable file-backed
//! implementation and an in-memory one for tests.
//!
//! ### Store Module (`store`)
//! The merge-add time store with per-identity write serialization.
//!
//! ### Accumulator Module (`accumulator`)
//! The per-player session state machine, periodic safety flush, AFK idle
//! exclusion, and the flush-then-close shutdown sequence.
//!
//! ### Network Module (`network`)
//! UDP receiver/sender tasks and the main select loop tying message
//! handling, flush ticks, and graceful shutdown together.

pub mod accumulator;
pub mod network;
pub mod provider;
pub mod store;
