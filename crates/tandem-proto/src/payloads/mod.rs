//! Message payload types.
//!
//! Grouped by the subsystem that produces them:
//!
//! - [`session`]: roster entries, profiles, session phase
//! - [`replication`]: persistent per-object fields and snapshots
//! - [`relay`]: one-shot trigger events

pub mod relay;
pub mod replication;
pub mod session;
