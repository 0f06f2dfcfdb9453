//! Tandem participant.
//!
//! Action-based state machine run by every participant of a shared session.
//! Tracks the roster, the ownership state of every shared object, the local
//! replica of their persistent fields, and the outbound write and trigger
//! queues.
//!
//! # Architecture
//!
//! The client is a pure state machine that:
//! - Receives events from the caller (coordinator messages, ticks,
//!   application intents)
//! - Produces actions for the caller to execute (send messages, run hooks)
//! - Uses the `Environment` trait for time (deterministic testing)
//!
//! # Components
//!
//! - [`Client`]: the participant state machine
//! - [`ClientEvent`]: events fed into the client
//! - [`ClientAction`]: actions produced by the client
//! - [`Hooks`]: explicit callback registration for hook actions

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod config;
mod error;
mod event;
mod hooks;

pub use client::{Client, ConnectionState};
pub use config::ClientConfig;
pub use error::ClientError;
pub use event::{ClientAction, ClientEvent};
pub use hooks::Hooks;
pub use tandem_core::{
    AuthorityError,
    env::Environment,
    ownership::OwnershipState,
    transport::Reliability,
};
