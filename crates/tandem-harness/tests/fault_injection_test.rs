//! Fault injection tests over turmoil.
//!
//! The production server runtime runs as the `"server"` host and every
//! participant is a framed [`SimClient`] on its own host, so these tests
//! cover the codec, the per-connection writer tasks and the idle timer
//! under realistic network conditions:
//! - Packet loss (2%, degraded but usable)
//! - Latency (100ms each way)
//! - A partition long enough for the server to give up on a holder

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    time::Duration,
};

use tandem_client::{ClientAction, ClientEvent, Environment, OwnershipState};
use tandem_harness::{SERVER_ADDR, SimClient, SimEnv, sim_server};
use tandem_proto::{Capability, Field, FieldValue, ObjectId, Profile, Transform};
use tandem_server::{DriverConfig, ServerRuntimeConfig};

const BALL: ObjectId = ObjectId(1);
const ROUNDS: u8 = 3;
const ANSWER: Duration = Duration::from_secs(5);

fn config(idle_timeout: Duration) -> ServerRuntimeConfig {
    ServerRuntimeConfig {
        props: 1,
        driver: DriverConfig { idle_timeout, ..DriverConfig::default() },
        ..ServerRuntimeConfig::default()
    }
}

fn profile(name: &str) -> Profile {
    Profile::new(name, Capability::Vr)
}

fn at(x: f32, y: f32) -> FieldValue {
    FieldValue::Transform(Transform::at([x, y, 0.0]))
}

type Seen = Arc<Mutex<Vec<(String, Option<FieldValue>)>>>;

/// Grab the ball `ROUNDS` times, moving it each time, then wait for the
/// other player and report the final transform.
async fn take_turns(
    name: &'static str,
    seed: u64,
    x: f32,
    finished: Arc<AtomicU8>,
    seen: Seen,
) -> turmoil::Result {
    let mut player = SimClient::connect(SERVER_ADDR, SimEnv::with_seed(seed), profile(name)).await?;

    for round in 0..ROUNDS {
        while !player.acquire(BALL, ANSWER).await? {
            player.wait(Duration::from_millis(200)).await?;
        }
        player
            .apply(ClientEvent::PublishThenRelease { object: BALL, values: vec![at(x, f32::from(round))] })
            .await?;
        let released = player
            .run_until(ANSWER, |p| p.client().ownership(BALL) == OwnershipState::Unowned)
            .await?;
        assert!(released, "{name} never got a release confirmation in round {round}");
        player.wait(Duration::from_millis(100)).await?;
    }

    finished.fetch_add(1, Ordering::SeqCst);
    let settled = player
        .run_until(Duration::from_secs(30), |p| {
            finished.load(Ordering::SeqCst) == 2 && p.client().holder(BALL).is_none()
        })
        .await?;
    assert!(settled, "{name} never saw the ball settle");

    // Let the other player's last replicate land
    player.wait(Duration::from_secs(1)).await?;
    seen.lock().map_err(|_| "poisoned")?.push((name.to_string(), player.client().field(BALL, Field::Transform)));
    Ok(())
}

#[test]
fn handoff_survives_packet_loss() {
    let mut sim = turmoil::Builder::new()
        .simulation_duration(Duration::from_secs(120))
        .fail_rate(0.02)
        .rng_seed(12345)
        .build();
    sim_server::host(&mut sim, 1, config(Duration::from_secs(30)));

    let finished = Arc::new(AtomicU8::new(0));
    let seen: Seen = Arc::default();

    sim.client("alice", take_turns("alice", 2, 1.0, Arc::clone(&finished), Arc::clone(&seen)));
    sim.client("bob", take_turns("bob", 3, 2.0, Arc::clone(&finished), Arc::clone(&seen)));

    // Joins after the game and must be handed the final state in its welcome
    let late_finished = Arc::clone(&finished);
    let late_seen = Arc::clone(&seen);
    sim.client("carol", async move {
        while late_finished.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        let carol = SimClient::connect(SERVER_ADDR, SimEnv::with_seed(4), profile("carol")).await?;
        assert_eq!(carol.client().holder(BALL), None);
        late_seen
            .lock()
            .map_err(|_| "poisoned")?
            .push(("carol".to_string(), carol.client().field(BALL, Field::Transform)));
        Ok(())
    });

    sim.run().expect("simulation should complete despite packet loss");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3, "every participant reports: {seen:?}");
    let last_round = f32::from(ROUNDS - 1);
    let settled = seen[0].1;
    assert!(
        settled == Some(at(1.0, last_round)) || settled == Some(at(2.0, last_round)),
        "final transform is someone's last move: {seen:?}"
    );
    assert!(seen.iter().all(|(_, value)| *value == settled), "replicas diverged: {seen:?}");
}

#[test]
fn acquire_pays_the_round_trip() {
    let mut sim = turmoil::Builder::new()
        .simulation_duration(Duration::from_secs(60))
        .min_message_latency(Duration::from_millis(100))
        .max_message_latency(Duration::from_millis(100))
        .build();
    sim_server::host(&mut sim, 1, config(Duration::from_secs(30)));

    sim.client("alice", async {
        let env = SimEnv::with_seed(2);
        let mut alice = SimClient::connect(SERVER_ADDR, env.clone(), profile("alice")).await?;

        let start = env.now();
        assert!(alice.acquire(BALL, ANSWER).await?);
        let elapsed = env.now() - start;

        // ~200ms: 100ms each way
        assert!(elapsed >= Duration::from_millis(200), "round trip too fast: {elapsed:?}");
        Ok(())
    });

    sim.run().expect("simulation should complete with latency");
}

#[test]
fn partitioned_holder_loses_the_ball_and_catches_up() {
    let mut sim =
        turmoil::Builder::new().simulation_duration(Duration::from_secs(180)).rng_seed(42).build();
    sim_server::host(&mut sim, 1, config(Duration::from_secs(10)));

    let held = Arc::new(AtomicBool::new(false));
    let moved = Arc::new(AtomicBool::new(false));

    let alice_held = Arc::clone(&held);
    let alice_moved = Arc::clone(&moved);
    sim.client("alice", async move {
        let mut alice = SimClient::connect(SERVER_ADDR, SimEnv::with_seed(2), profile("alice")).await?;
        assert!(alice.acquire(BALL, ANSWER).await?);
        alice.apply(ClientEvent::Publish { object: BALL, value: at(1.0, 0.0) }).await?;
        alice.wait(Duration::from_millis(500)).await?;
        alice_held.store(true, Ordering::SeqCst);

        // Silent well past the idle timeout
        turmoil::partition("alice", "server");
        tokio::time::sleep(Duration::from_secs(30)).await;
        turmoil::repair("alice", "server");
        assert!(alice_moved.load(Ordering::SeqCst), "bob never got the ball");

        alice.clear_observed();
        alice.reconnect(SERVER_ADDR, profile("alice")).await?;
        let caught_up = alice
            .run_until(ANSWER, |a| {
                a.client().holder(BALL).is_none()
                    && a.client().field(BALL, Field::Transform) == Some(at(5.0, 0.0))
            })
            .await?;
        assert!(caught_up, "alice still sees a stale ball");
        assert_eq!(alice.client().ownership(BALL), OwnershipState::Unowned);
        assert!(alice.observed().iter().any(|action| matches!(
            action,
            ClientAction::FieldChanged { object: BALL, value, .. } if *value == at(5.0, 0.0)
        )));
        Ok(())
    });

    sim.client("bob", async move {
        let mut bob = SimClient::connect(SERVER_ADDR, SimEnv::with_seed(3), profile("bob")).await?;
        assert!(bob.run_until(Duration::from_secs(10), |_| held.load(Ordering::SeqCst)).await?);
        assert!(!bob.acquire(BALL, ANSWER).await?, "alice still holds the ball");

        while !bob.acquire(BALL, ANSWER).await? {
            bob.wait(Duration::from_secs(1)).await?;
        }
        bob.apply(ClientEvent::PublishThenRelease { object: BALL, values: vec![at(5.0, 0.0)] }).await?;
        let released = bob
            .run_until(ANSWER, |b| b.client().ownership(BALL) == OwnershipState::Unowned)
            .await?;
        assert!(released);
        moved.store(true, Ordering::SeqCst);
        Ok(())
    });

    sim.run().expect("simulation should handle partition and heal");
}
