//! Tandem core.
//!
//! Pure building blocks shared by the session coordinator and participants.
//! Nothing in this crate performs I/O; time and randomness come from the
//! [`env::Environment`] trait and network sends go through the
//! [`transport::Transport`] seam.
//!
//! # Components
//!
//! ```text
//! Roster ──▶ AuthorityLedger ◀── OwnershipTracker (per participant)
//!                 │
//!                 ▼
//!        ReplicaStore / PendingWrites     TriggerQueue
//!        (persistent, last-write-wins)    (transient, ordered, complete)
//! ```
//!
//! - [`roster::Roster`]: connected participants in join order
//! - [`ledger::AuthorityLedger`]: who may write which object
//! - [`ownership::OwnershipTracker`]: a participant's view of the
//!   acquire/release exchange
//! - [`replication`]: coalescing outbound writes and equality-gated inbound
//!   application
//! - [`relay::TriggerQueue`]: ordered one-shot events
//! - [`capability`]: VR and desktop behaviour strategies

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod capability;
pub mod env;
pub mod error;
pub mod ledger;
pub mod ownership;
pub mod relay;
pub mod replication;
pub mod roster;
pub mod transport;

pub use error::AuthorityError;
