//! Simulation harness for tandem sessions.
//!
//! Two levels of simulation:
//!
//! - [`SimNetwork`] runs the real server driver and real clients over
//!   in-memory queues on a stepped clock ([`StepEnv`]). No async runtime is
//!   involved and delivery order is exactly what the test asks for.
//! - Turmoil hosts: [`SimServer`] runs the production server runtime and
//!   [`SimClient`] a framed participant over turmoil's simulated TCP, so
//!   latency, loss and partitions hit the real codec and writer tasks. Time
//!   is turmoil's ([`SimEnv`]), so idle timeouts cost nothing.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference implementation for model-based
//! testing. Operations are applied to both the model and the simulated
//! system ([`SimWorld`]), and their observable states are compared.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod model;
pub mod network;
pub mod sim_client;
pub mod sim_env;
pub mod sim_server;
pub mod sim_transport;
pub mod sim_world;
pub mod step_env;

pub use model::{
    ClientId, ModelObjectId, ModelWorld, ObservableState, Operation, OperationError,
    OperationResult, SmallValue,
};
pub use network::{Peer, QueueTransport, SimNetwork};
pub use sim_client::SimClient;
pub use sim_env::SimEnv;
pub use sim_server::{SERVER_ADDR, SimServer};
pub use sim_transport::SimTransport;
pub use sim_world::SimWorld;
pub use step_env::StepEnv;
