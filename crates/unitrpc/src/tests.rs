use serde_json::json;

use crate::*;

#[test]
fn test_call_frame_wire_shape() {
    let bytes = Frame::call(7, method::PING, json!(null)).encode().unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(value["kind"], "call");
    assert_eq!(value["seq"], 7);
    assert_eq!(value["method"], "ping");
}

#[test]
fn test_reply_keeps_sequence() {
    let bytes = Frame::reply_ok(42, json!(PONG)).encode().unwrap();
    let frame = Frame::decode(&bytes).unwrap();

    assert_eq!(frame.seq(), 42);
    match frame {
        Frame::Reply(ReplyFrame { status: Status::Ok(v), .. }) => assert_eq!(v, json!("pong")),
        other => panic!("Expected ok reply, got {:?}", other),
    }
}

#[test]
fn test_failure_reason_survives_the_wire() {
    let reason = FailureReason::Trapped("index out of bounds".into());
    let bytes = Frame::reply_err(3, reason.clone()).encode().unwrap();

    match Frame::decode(&bytes).unwrap() {
        Frame::Reply(ReplyFrame { status: Status::Err(r), .. }) => assert_eq!(r, reason),
        other => panic!("Expected err reply, got {:?}", other),
    }
}

#[test]
fn test_missing_args_default_to_null() {
    let frame = Frame::decode(br#"{"kind":"call","seq":1,"method":"init"}"#).unwrap();
    match frame {
        Frame::Call(call) => assert!(call.args.is_null()),
        other => panic!("Expected call, got {:?}", other),
    }
}

#[test]
fn test_garbage_is_a_serialization_error() {
    let err = Frame::decode(&[0xFF, 0xFF, 0xFF]).unwrap_err();
    assert!(matches!(err, RpcError::Serialization(_)));
}

#[test]
fn test_empty_method_is_a_protocol_violation() {
    let err = Frame::decode(br#"{"kind":"call","seq":1,"method":""}"#).unwrap_err();
    match err {
        RpcError::ProtocolViolation(msg) => assert!(msg.contains("empty method")),
        other => panic!("Expected ProtocolViolation, got {:?}", other),
    }
}
