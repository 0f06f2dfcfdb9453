//! Reference model for model-based testing.
//!
//! The model captures the ownership and replication rules of a session with
//! instant delivery and no wire format. It is the oracle the simulated
//! system is checked against.
//!
//! # Design Principles
//!
//! - Simplicity: The model should be obviously correct
//! - Rules, not mechanics: one holder map and one field map per object
//! - Deterministic: Same inputs produce same outputs

pub mod operation;
mod world;

pub use operation::{
    ClientId, ModelObjectId, Operation, OperationError, OperationResult, SmallValue,
};
pub use world::{ModelWorld, ObservableState};
