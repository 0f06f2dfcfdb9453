//! Fuzz target for the server driver fed with raw wire bytes.
//!
//! # Strategy
//!
//! - Byte streams: arbitrary chunks pushed through the frame decoder, as a
//!   hostile participant would send them over TCP
//! - Well-formed messages: arbitrary protocol messages encoded properly, so
//!   the decoder does not reject everything before the driver sees it
//! - Lifecycle noise: connects, disconnects and ticks between messages
//!
//! # Invariants
//!
//! - NEVER panic on malformed frames or out-of-order messages
//! - Every object holder is a current session member
//! - A participant holds authority only while its connection is open

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tandem_harness::StepEnv;
use tandem_proto::{
    Capability, FieldValue, Message, ObjectId, PROTOCOL_VERSION, Profile, RequestId, Transform,
    decode_frame, encode_frame,
};
use tandem_server::{DriverConfig, ServerDriver, ServerEvent};

#[derive(Debug, Arbitrary)]
enum FuzzEvent {
    Connect,
    Disconnect { peer: u8 },
    Tick { advance_millis: u16 },
    RawBytes { peer: u8, bytes: Vec<u8> },
    Send { peer: u8, message: FuzzMessage },
}

#[derive(Debug, Arbitrary)]
enum FuzzMessage {
    Hello { version: u8 },
    Profile { vr: bool },
    Ready { ready: bool },
    Start,
    Acquire { object: u8, request: u8 },
    Release { object: u8, request: u8, grabbed: Option<bool> },
    Update { object: u8, x: u8 },
    Heartbeat,
    Goodbye,
}

impl FuzzMessage {
    fn into_message(self) -> Message {
        match self {
            Self::Hello { version } => Message::Hello { version },
            Self::Profile { vr } => {
                let capability = if vr { Capability::Vr } else { Capability::Desktop };
                Message::SetProfile(Profile::new("fuzz", capability))
            },
            Self::Ready { ready } => Message::SetReady { ready },
            Self::Start => Message::StartSession,
            Self::Acquire { object, request } => Message::AcquireRequest {
                object: ObjectId(u64::from(object % 6)),
                request_id: RequestId(u64::from(request)),
            },
            Self::Release { object, request, grabbed } => Message::ReleaseRequest {
                object: ObjectId(u64::from(object % 6)),
                request_id: RequestId(u64::from(request)),
                final_state: grabbed.map(FieldValue::Grabbed).into_iter().collect(),
            },
            Self::Update { object, x } => Message::StateUpdate {
                object: ObjectId(u64::from(object % 6)),
                fields: vec![FieldValue::Transform(Transform::at([f32::from(x), 0.0, 0.0]))],
            },
            Self::Heartbeat => Message::Heartbeat,
            Self::Goodbye => Message::Goodbye { reason: "fuzz".to_string() },
        }
    }
}

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    seed: u64,
    events: Vec<FuzzEvent>,
}

fuzz_target!(|input: FuzzInput| {
    let env = StepEnv::with_seed(input.seed);
    let mut driver = ServerDriver::new(env.clone(), DriverConfig::default());
    for object in 1..=3 {
        let _ = driver.spawn_prop(ObjectId(object));
    }

    let mut peers = Vec::new();
    let mut buffers: Vec<BytesMut> = Vec::new();

    for event in input.events.into_iter().take(256) {
        match event {
            FuzzEvent::Connect => {
                let participant = driver.allocate_participant();
                let _ = driver.process_event(ServerEvent::ConnectionAccepted { participant });
                peers.push(participant);
                buffers.push(BytesMut::new());
            },
            FuzzEvent::Disconnect { peer } if !peers.is_empty() => {
                let participant = peers[usize::from(peer) % peers.len()];
                let _ = driver.process_event(ServerEvent::ConnectionClosed {
                    participant,
                    reason: "fuzz".to_string(),
                });
            },
            FuzzEvent::Tick { advance_millis } => {
                env.advance(Duration::from_millis(u64::from(advance_millis)));
                let _ = driver.process_event(ServerEvent::Tick);
            },
            FuzzEvent::RawBytes { peer, bytes } if !peers.is_empty() => {
                let index = usize::from(peer) % peers.len();
                buffers[index].extend_from_slice(&bytes);
                drain(&mut driver, peers[index], &mut buffers[index]);
            },
            FuzzEvent::Send { peer, message } if !peers.is_empty() => {
                let index = usize::from(peer) % peers.len();
                let mut message = message.into_message();
                if let Message::Hello { version } = &mut message {
                    if *version % 2 == 0 {
                        *version = PROTOCOL_VERSION;
                    }
                }
                if let Ok(frame) = encode_frame(&message) {
                    buffers[index].extend_from_slice(&frame);
                }
                drain(&mut driver, peers[index], &mut buffers[index]);
            },
            FuzzEvent::Disconnect { .. } | FuzzEvent::RawBytes { .. } | FuzzEvent::Send { .. } => {},
        }

        let coordinator = driver.coordinator();
        for snapshot in coordinator.snapshots() {
            if let Some(holder) = snapshot.holder {
                assert!(
                    coordinator.is_member(holder),
                    "{} held by non-member {holder}",
                    snapshot.object
                );
                assert!(
                    driver.registry().contains(holder),
                    "{} held by closed connection {holder}",
                    snapshot.object
                );
            }
        }
    }
});

fn drain(driver: &mut ServerDriver<StepEnv>, participant: tandem_proto::ParticipantId, buffer: &mut BytesMut) {
    loop {
        match decode_frame(buffer) {
            Ok(Some(message)) => {
                let _ = driver.process_event(ServerEvent::MessageReceived { participant, message });
            },
            Ok(None) => break,
            Err(_) => {
                // A corrupt stream is fatal for the connection
                buffer.clear();
                let _ = driver.process_event(ServerEvent::ConnectionClosed {
                    participant,
                    reason: "protocol error".to_string(),
                });
                break;
            },
        }
    }
}
