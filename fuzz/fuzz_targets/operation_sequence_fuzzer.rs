//! Fuzz target comparing the simulated session against the reference model.
//!
//! # Strategy
//!
//! - Operation sequences: arbitrary acquires, writes, releases, triggers,
//!   disconnects and time steps from up to four participants
//! - Unknown objects: object indices range past the spawned props
//!
//! # Invariants
//!
//! - Every operation returns the same result in model and simulation
//! - Holders, authoritative fields and delivered triggers match after every
//!   step
//! - Every connected participant agrees with the coordinator
//! - NEVER panic inside the driver or the clients

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tandem_harness::{ModelWorld, Operation, SimWorld};

const MAX_OPERATIONS: usize = 200;

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    seed: u64,
    num_clients: u8,
    num_objects: u8,
    operations: Vec<Operation>,
}

fuzz_target!(|input: FuzzInput| {
    let num_clients = usize::from(input.num_clients % 4) + 1;
    let num_objects = usize::from(input.num_objects % 4) + 1;

    let mut model = ModelWorld::new(num_clients, num_objects);
    let mut sim = SimWorld::new(num_clients, num_objects, input.seed);

    for (i, op) in input.operations.iter().take(MAX_OPERATIONS).enumerate() {
        let model_result = model.apply(op);
        let sim_result = sim.apply(op);

        assert_eq!(model_result, sim_result, "result divergence at operation {i}: {op:?}");
        assert_eq!(
            model.observable_state(),
            sim.observable_state(),
            "state divergence at operation {i}: {op:?}"
        );
        if let Err(divergence) = sim.check_convergence() {
            panic!("replicas diverged after operation {i} ({op:?}): {divergence}");
        }
    }
});
