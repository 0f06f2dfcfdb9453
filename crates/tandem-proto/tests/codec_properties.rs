//! Property tests for stream framing.

use bytes::{BufMut, BytesMut};
use proptest::prelude::*;
use tandem_proto::{
    FieldValue, Message, ObjectId, decode_frame, encode_frame, payloads::replication::Transform,
};

fn field_value_strategy() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        any::<bool>().prop_map(FieldValue::Grabbed),
        any::<bool>().prop_map(FieldValue::Active),
        (-1000.0f32..1000.0, -1000.0f32..1000.0, -1000.0f32..1000.0)
            .prop_map(|(x, y, z)| FieldValue::Transform(Transform::at([x, y, z]))),
    ]
}

proptest! {
    /// Frames survive arbitrary chunking of the byte stream.
    #[test]
    fn prop_frames_survive_chunking(
        updates in prop::collection::vec(
            (any::<u64>(), prop::collection::vec(field_value_strategy(), 0..4)),
            1..8,
        ),
        chunk in 1usize..32,
    ) {
        let messages: Vec<Message> = updates
            .into_iter()
            .map(|(object, fields)| Message::StateUpdate { object: ObjectId(object), fields })
            .collect();

        let mut stream = Vec::new();
        for message in &messages {
            stream.extend_from_slice(&encode_frame(message).expect("encode"));
        }

        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for piece in stream.chunks(chunk) {
            buf.put_slice(piece);
            while let Some(message) = decode_frame(&mut buf).expect("decode") {
                decoded.push(message);
            }
        }

        prop_assert!(buf.is_empty());
        prop_assert_eq!(decoded, messages);
    }
}
