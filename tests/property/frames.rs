//! Property-based tests for the socket frame codec.
//!
//! Uses proptest to verify:
//! 1. Arbitrary text never panics in `decode` (returns `Err` gracefully).
//! 2. Any JSON object with an unrecognised `type` decodes to `Unknown`.
//! 3. A random-chat line the client sends decodes as the same line when
//!    the server relays it back.
//! 4. Close classification only treats 1000/1001 as normal and 1008 as
//!    unauthorized.

use proptest::prelude::*;
use whirl_proto::close::{CloseKind, classify_close};
use whirl_proto::codec::{self, FrameError, MAX_FRAME_SIZE};
use whirl_proto::message::{InboundFrame, OutboundFrame, UserId};

const KNOWN_TYPES: &[&str] = &[
    "random_joined",
    "message_random",
    "friend_request",
    "friend_request_success",
    "friend_request_failed",
    "notification",
    "error",
    "direct_message",
];

proptest! {
    #[test]
    fn decode_never_panics(text in ".{0,512}") {
        let _ = codec::decode(&text);
    }

    #[test]
    fn decode_never_panics_on_json_shaped_noise(
        kind in "[a-z_]{0,24}",
        content in any::<String>(),
        from in any::<i64>(),
    ) {
        let text = serde_json::json!({
            "type": kind,
            "content": content,
            "from": from,
        })
        .to_string();
        let _ = codec::decode(&text);
    }

    #[test]
    fn unknown_types_decode_to_unknown(kind in "[a-z]{1,16}_x") {
        prop_assume!(!KNOWN_TYPES.contains(&kind.as_str()));
        let text = format!(r#"{{"type":"{kind}","payload":[1,2,3]}}"#);
        prop_assert_eq!(codec::decode(&text).unwrap(), InboundFrame::Unknown);
    }

    #[test]
    fn relayed_random_message_keeps_content(content in any::<String>()) {
        let text = codec::encode(&OutboundFrame::RandomMessage { content: content.clone() }).unwrap();
        prop_assume!(text.len() <= MAX_FRAME_SIZE);
        prop_assert_eq!(
            codec::decode(&text).unwrap(),
            InboundFrame::RandomMessage { content }
        );
    }

    #[test]
    fn direct_message_recipient_is_preserved(to in any::<u64>(), content in ".{0,64}") {
        let frame = OutboundFrame::DirectMessage { to: UserId::new(to), content };
        let value: serde_json::Value = serde_json::from_str(&codec::encode(&frame).unwrap()).unwrap();
        prop_assert_eq!(value["type"].as_str(), Some("direct_message"));
        prop_assert_eq!(value["to"].as_u64(), Some(to));
    }

    #[test]
    fn close_classification(code in any::<u16>(), clean in any::<bool>()) {
        let kind = classify_close(Some(code), clean);
        match code {
            1000 | 1001 => prop_assert_eq!(kind, CloseKind::Normal),
            1008 => prop_assert_eq!(kind, CloseKind::Unauthorized),
            1002 | 1006 => prop_assert_eq!(kind, CloseKind::Abnormal),
            _ if clean => prop_assert_eq!(kind, CloseKind::Retryable),
            _ => prop_assert_eq!(kind, CloseKind::Abnormal),
        }
    }
}

#[test]
fn oversized_frames_are_rejected() {
    let text = format!(
        r#"{{"type":"message_random","content":"{}"}}"#,
        "a".repeat(MAX_FRAME_SIZE)
    );
    assert!(matches!(
        codec::decode(&text),
        Err(FrameError::TooLarge { .. })
    ));
}
