use std::sync::Arc;
use std::time::Duration;

use crate::message::{Message, MessageStatus, NotifyFn, Payload};

#[test]
fn obtain_starts_new_without_timeout() {
    let msg = Message::obtain(7, 1, 2, Payload::owned(String::from("hello")));
    assert_eq!(msg.what, 7);
    assert_eq!((msg.arg1, msg.arg2), (1, 2));
    assert_eq!(msg.status(), MessageStatus::New);
    assert_eq!(msg.timeout(), None);
    assert_eq!(msg.data_ref::<String>().map(String::as_str), Some("hello"));
}

#[test]
fn obtain_full_zero_timeout_never_expires() {
    let msg = Message::obtain_full(1, 0, 0, Payload::Empty, Duration::ZERO, None, None, None);
    assert_eq!(msg.timeout(), None);

    let notify: NotifyFn = Arc::new(|_: &Message, _: MessageStatus| {});
    let msg = Message::obtain_full(
        1,
        0,
        0,
        Payload::Empty,
        Duration::from_millis(250),
        None,
        None,
        Some(notify),
    );
    assert_eq!(msg.timeout(), Some(Duration::from_millis(250)));
    assert!(format!("{msg:?}").contains("notify: true"));
}

#[test]
fn take_owned_only_moves_matching_type() {
    let mut payload = Payload::owned(42u32);
    assert_eq!(payload.take_owned::<String>(), None);
    assert_eq!(payload.downcast_ref::<u32>(), Some(&42));
    assert_eq!(payload.take_owned::<u32>(), Some(42));
    assert!(payload.is_empty());
}

#[test]
fn shared_payload_is_not_taken() {
    let value = Arc::new(5i64);
    let mut msg = Message::obtain(1, 0, 0, Payload::shared(Arc::clone(&value)));
    assert_eq!(msg.data_mut().take_owned::<i64>(), None);
    assert_eq!(msg.data_ref::<i64>(), Some(&5));
    drop(msg);
    assert_eq!(Arc::strong_count(&value), 1);
}

#[test]
fn status_discriminants_are_stable() {
    assert_eq!(MessageStatus::New as u8, 0);
    assert_eq!(MessageStatus::Pending as u8, 1);
    assert_eq!(MessageStatus::Running as u8, 2);
    assert_eq!(MessageStatus::Completed as u8, 3);
    assert_eq!(MessageStatus::Timeout as u8, 4);
    assert_eq!(MessageStatus::Destroy as u8, 5);
    assert!(MessageStatus::Destroy.is_terminal());
    assert!(!MessageStatus::Running.is_terminal());
    assert_eq!(MessageStatus::Timeout.to_string(), "TIMEOUT");
}
