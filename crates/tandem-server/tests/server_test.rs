//! End-to-end tests over a real TCP socket

use std::time::Duration;

use bytes::BytesMut;
use tandem_proto::{Capability, Message, PROTOCOL_VERSION, Profile, decode_frame, encode_frame};
use tandem_server::{MAX_PROPS, Server, ServerError, ServerRuntimeConfig, coordinator::WELCOME_OBJECTS};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

async fn read_message(stream: &mut TcpStream, buf: &mut BytesMut) -> Message {
    loop {
        if let Some(message) = decode_frame(buf).unwrap() {
            return message;
        }
        let read = stream.read_buf(buf).await.unwrap();
        assert!(read > 0, "connection closed");
    }
}

/// Next message that is not a leader readiness update.
async fn read_skipping_ready(stream: &mut TcpStream, buf: &mut BytesMut) -> Message {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), read_message(stream, buf)).await.unwrap();
        if !matches!(message, Message::ReadyState { .. }) {
            return message;
        }
    }
}

async fn start(props: u64) -> std::net::SocketAddr {
    let config = ServerRuntimeConfig {
        bind_address: "127.0.0.1:0".to_string(),
        props,
        ..ServerRuntimeConfig::default()
    };
    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

#[tokio::test]
async fn handshake_over_tcp() {
    let addr = start(2).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut buf = BytesMut::new();

    let hello = encode_frame(&Message::Hello { version: PROTOCOL_VERSION }).unwrap();
    stream.write_all(&hello).await.unwrap();

    let welcome = tokio::time::timeout(Duration::from_secs(5), read_message(&mut stream, &mut buf))
        .await
        .unwrap();
    match welcome {
        Message::Welcome { objects, .. } => assert_eq!(objects.len(), 2),
        other => panic!("expected Welcome, got: {other:?}"),
    }

    let roster = read_message(&mut stream, &mut buf).await;
    assert!(matches!(roster, Message::Roster { participants } if participants.len() == 1));
}

#[tokio::test]
async fn bad_version_is_rejected_and_closed() {
    let addr = start(0).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut buf = BytesMut::new();

    let hello = encode_frame(&Message::Hello { version: PROTOCOL_VERSION + 1 }).unwrap();
    stream.write_all(&hello).await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), read_message(&mut stream, &mut buf))
        .await
        .unwrap();
    assert!(matches!(reply, Message::Rejected { .. }));

    let mut rest = Vec::new();
    let eof = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest)).await;
    assert!(eof.is_ok(), "server should close the connection");
}

#[tokio::test]
async fn full_scene_streams_to_a_late_joiner() {
    let addr = start(MAX_PROPS).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut buf = BytesMut::new();

    let hello = encode_frame(&Message::Hello { version: PROTOCOL_VERSION }).unwrap();
    stream.write_all(&hello).await.unwrap();

    let mut known = 0;
    let timeout = Duration::from_secs(10);
    match tokio::time::timeout(timeout, read_message(&mut stream, &mut buf)).await.unwrap() {
        Message::Welcome { objects, .. } => {
            assert_eq!(objects.len(), WELCOME_OBJECTS);
            known += objects.len();
        },
        other => panic!("expected Welcome, got: {other:?}"),
    }
    loop {
        match tokio::time::timeout(timeout, read_message(&mut stream, &mut buf)).await.unwrap() {
            Message::ObjectSpawned(_) => known += 1,
            Message::Roster { .. } => break,
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(known, usize::try_from(MAX_PROPS).unwrap());
}

#[tokio::test]
async fn too_many_props_is_a_config_error() {
    let config = ServerRuntimeConfig {
        bind_address: "127.0.0.1:0".to_string(),
        props: 1500,
        ..ServerRuntimeConfig::default()
    };
    assert!(matches!(Server::bind(config).await, Err(ServerError::Config(_))));
}

#[tokio::test]
async fn oversized_display_name_is_rejected_without_dropping_the_session() {
    let addr = start(1).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut buf = BytesMut::new();

    stream.write_all(&encode_frame(&Message::Hello { version: PROTOCOL_VERSION }).unwrap()).await.unwrap();
    let welcome = read_skipping_ready(&mut stream, &mut buf).await;
    assert!(matches!(welcome, Message::Welcome { .. }));
    let roster = read_skipping_ready(&mut stream, &mut buf).await;
    assert!(matches!(roster, Message::Roster { .. }));

    let profile = Profile::new("n".repeat(60_000), Capability::Vr);
    stream.write_all(&encode_frame(&Message::SetProfile(profile)).unwrap()).await.unwrap();
    let reply = read_skipping_ready(&mut stream, &mut buf).await;
    assert!(matches!(reply, Message::Rejected { .. }), "got {reply:?}");

    // Still joined: a sane profile goes through and is broadcast
    let profile = Profile::new("ada", Capability::Vr);
    stream.write_all(&encode_frame(&Message::SetProfile(profile)).unwrap()).await.unwrap();
    let roster = read_skipping_ready(&mut stream, &mut buf).await;
    match roster {
        Message::Roster { participants } => assert_eq!(participants[0].display_name, "ada"),
        other => panic!("expected Roster, got: {other:?}"),
    }
}
