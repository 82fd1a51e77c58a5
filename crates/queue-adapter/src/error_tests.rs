//! Tests for error types.

use super::*;

#[test]
fn test_wait_timeout_is_distinguishable() {
    let timeout = BrokerError::WaitTimeout {
        duration: Duration::from_secs(2),
    };
    assert!(timeout.is_timeout());

    assert!(!BrokerError::ChannelClosed.is_timeout());
    assert!(!BrokerError::ConnectionFailed {
        message: "refused".to_string(),
    }
    .is_timeout());
}

#[test]
fn test_broker_error_transience() {
    assert!(BrokerError::ConnectionFailed {
        message: "network error".to_string(),
    }
    .is_transient());

    assert!(!BrokerError::DeclareFailed {
        queue: "jobs".to_string(),
        message: "durable flag mismatch".to_string(),
    }
    .is_transient());

    assert!(!BrokerError::UnknownDeliveryTag { delivery_tag: 7 }.is_transient());
}

#[test]
fn test_queue_error_transience_follows_source() {
    let transient: QueueError = BrokerError::ConnectionFailed {
        message: "reset".to_string(),
    }
    .into();
    assert!(transient.is_transient());

    let permanent: QueueError = EnvelopeError::InvalidUtf8.into();
    assert!(!permanent.is_transient());

    let invalid: QueueError = ValidationError::Required {
        field: "channel_name".to_string(),
    }
    .into();
    assert!(!invalid.is_transient());
}

#[test]
fn test_error_messages_carry_context() {
    let error = BrokerError::DeclareFailed {
        queue: "jobs".to_string(),
        message: "durable flag mismatch".to_string(),
    };
    assert_eq!(
        error.to_string(),
        "Queue 'jobs' could not be declared: durable flag mismatch"
    );

    let error = EnvelopeError::InvalidUtf8;
    assert_eq!(error.to_string(), "Text body is not valid UTF-8");
}
