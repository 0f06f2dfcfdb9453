//! Action execution.
//!
//! Encodes driver actions into frames and hands them to a [`Transport`].
//! Failed sends to one recipient never stop delivery to the others, and a
//! message that cannot be framed never stops the rest of its batch.

use std::time::Duration;

use bytes::Bytes;
use tandem_core::{
    env::Environment,
    transport::{Reliability, Transport, TransportError},
};
use tandem_proto::{Message, ParticipantId, ProtocolError, encode_frame};
use thiserror::Error;

use crate::driver::ServerAction;

/// Policy for handling send failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BroadcastPolicy {
    /// Log the failure and move on to the next recipient.
    #[default]
    BestEffort,

    /// Retry I/O failures on reliable sends with exponential backoff.
    Retry {
        /// Maximum number of retry attempts
        max_attempts: u32,
        /// Initial backoff duration in milliseconds
        initial_backoff_ms: u64,
    },
}

/// Errors from executing actions.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// A message could not be framed.
    #[error("failed to encode {kind}: {source}")]
    Encode {
        /// Message name.
        kind: &'static str,
        /// Underlying error.
        source: ProtocolError,
    },
}

/// Runs [`ServerAction`]s against a transport.
#[derive(Debug, Clone)]
pub struct ActionExecutor<T, E> {
    transport: T,
    env: E,
    policy: BroadcastPolicy,
}

impl<T: Transport, E: Environment> ActionExecutor<T, E> {
    /// Create an executor.
    pub fn new(transport: T, env: E, policy: BroadcastPolicy) -> Self {
        Self { transport, env, policy }
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Execute actions in order.
    ///
    /// Every action is attempted. The first encode failure, if any, is
    /// returned once the batch is done.
    pub async fn execute(&self, actions: Vec<ServerAction>) -> Result<(), ExecutorError> {
        let mut first_error = None;
        for action in actions {
            match action {
                ServerAction::SendToParticipant { participant, message, reliability } => {
                    match frame(&message) {
                        Ok(frame) => self.send(participant, reliability, frame).await,
                        Err(err) => {
                            tracing::error!(%participant, %err, "dropping unencodable message");
                            first_error.get_or_insert(err);
                        },
                    }
                },
                ServerAction::Broadcast { recipients, message, reliability } => {
                    let frame = match frame(&message) {
                        Ok(frame) => frame,
                        Err(err) => {
                            tracing::error!(recipients = recipients.len(), %err, "dropping unencodable broadcast");
                            first_error.get_or_insert(err);
                            continue;
                        },
                    };
                    for participant in recipients {
                        self.send(participant, reliability, frame.clone()).await;
                    }
                },
                ServerAction::CloseConnection { participant, reason } => {
                    tracing::info!(%participant, %reason, "closing connection");
                    self.transport.disconnect(participant);
                },
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn send(&self, participant: ParticipantId, reliability: Reliability, frame: Bytes) {
        let mut attempt = 0;
        loop {
            let err = match self.transport.send(participant, reliability, frame.clone()) {
                Ok(()) => return,
                Err(err) => err,
            };

            match (&err, self.policy, reliability) {
                (
                    TransportError::Io(_),
                    BroadcastPolicy::Retry { max_attempts, initial_backoff_ms },
                    Reliability::Reliable,
                ) if attempt < max_attempts => {
                    let backoff = Duration::from_millis(initial_backoff_ms << attempt.min(16));
                    tracing::debug!(%participant, %err, attempt, ?backoff, "retrying send");
                    self.env.sleep(backoff).await;
                    attempt += 1;
                },
                (TransportError::Backpressure(_), ..) => {
                    tracing::debug!(%participant, "best-effort frame dropped");
                    return;
                },
                (TransportError::Disconnected(_), ..) => {
                    tracing::debug!(%participant, "send to closed connection");
                    return;
                },
                _ => {
                    tracing::warn!(%participant, %err, attempts = attempt + 1, "send failed");
                    return;
                },
            }
        }
    }
}

fn frame(message: &Message) -> Result<Bytes, ExecutorError> {
    encode_frame(message).map_err(|source| ExecutorError::Encode { kind: message.kind(), source })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{sync::Mutex, time::Instant};

    use bytes::BytesMut;
    use tandem_proto::decode_frame;

    use super::*;

    #[derive(Clone)]
    struct InstantEnv;

    impl Environment for InstantEnv {
        fn now(&self) -> Instant {
            Instant::now()
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            std::future::ready(())
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(7);
        }
    }

    /// Records frames and fails the first `failures` sends with an I/O
    /// error.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(ParticipantId, Message)>>,
        closed: Mutex<Vec<ParticipantId>>,
        failures: Mutex<u32>,
        offline: Option<ParticipantId>,
    }

    impl Transport for RecordingTransport {
        fn send(
            &self,
            participant: ParticipantId,
            _reliability: Reliability,
            frame: Bytes,
        ) -> Result<(), TransportError> {
            if self.offline == Some(participant) {
                return Err(TransportError::Disconnected(participant));
            }
            {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(TransportError::Io("broken pipe".into()));
                }
            }
            let mut buf = BytesMut::from(&frame[..]);
            let message = decode_frame(&mut buf).unwrap().unwrap();
            self.sent.lock().unwrap().push((participant, message));
            Ok(())
        }

        fn disconnect(&self, participant: ParticipantId) {
            self.closed.lock().unwrap().push(participant);
        }
    }

    const A: ParticipantId = ParticipantId(1);
    const B: ParticipantId = ParticipantId(2);

    #[test]
    fn broadcast_policy_default() {
        assert_eq!(BroadcastPolicy::default(), BroadcastPolicy::BestEffort);
    }

    #[tokio::test]
    async fn broadcast_skips_offline_recipient() {
        let transport = RecordingTransport { offline: Some(A), ..Default::default() };
        let executor = ActionExecutor::new(transport, InstantEnv, BroadcastPolicy::BestEffort);

        executor
            .execute(vec![
                ServerAction::Broadcast {
                    recipients: vec![A, B],
                    message: Message::SessionStarted,
                    reliability: Reliability::Reliable,
                },
                ServerAction::CloseConnection { participant: B, reason: "done".into() },
            ])
            .await
            .unwrap();

        assert_eq!(*executor.transport().sent.lock().unwrap(), vec![(B, Message::SessionStarted)]);
        assert_eq!(*executor.transport().closed.lock().unwrap(), vec![B]);
    }

    #[tokio::test]
    async fn oversized_message_does_not_stop_the_batch() {
        let executor =
            ActionExecutor::new(RecordingTransport::default(), InstantEnv, BroadcastPolicy::BestEffort);
        let huge = Message::Rejected { reason: "x".repeat(tandem_proto::MAX_FRAME_SIZE + 1) };

        let result = executor
            .execute(vec![
                ServerAction::Broadcast {
                    recipients: vec![A, B],
                    message: huge.clone(),
                    reliability: Reliability::Reliable,
                },
                ServerAction::SendToParticipant {
                    participant: A,
                    message: huge,
                    reliability: Reliability::Reliable,
                },
                ServerAction::SendToParticipant {
                    participant: B,
                    message: Message::Heartbeat,
                    reliability: Reliability::Reliable,
                },
            ])
            .await;

        assert!(matches!(result, Err(ExecutorError::Encode { kind: "Rejected", .. })));
        assert_eq!(*executor.transport().sent.lock().unwrap(), vec![(B, Message::Heartbeat)]);
    }

    #[tokio::test]
    async fn retry_policy_retries_io_errors() {
        let transport = RecordingTransport { failures: Mutex::new(2), ..Default::default() };
        let policy = BroadcastPolicy::Retry { max_attempts: 3, initial_backoff_ms: 10 };
        let executor = ActionExecutor::new(transport, InstantEnv, policy);

        executor
            .execute(vec![ServerAction::SendToParticipant {
                participant: A,
                message: Message::Heartbeat,
                reliability: Reliability::Reliable,
            }])
            .await
            .unwrap();

        assert_eq!(*executor.transport().sent.lock().unwrap(), vec![(A, Message::Heartbeat)]);
    }

    #[tokio::test]
    async fn best_effort_policy_gives_up() {
        let transport = RecordingTransport { failures: Mutex::new(1), ..Default::default() };
        let executor = ActionExecutor::new(transport, InstantEnv, BroadcastPolicy::BestEffort);

        executor
            .execute(vec![ServerAction::SendToParticipant {
                participant: A,
                message: Message::Heartbeat,
                reliability: Reliability::Reliable,
            }])
            .await
            .unwrap();

        assert!(executor.transport().sent.lock().unwrap().is_empty());
    }
}
