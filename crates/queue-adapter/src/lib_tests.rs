//! Tests for the queue-adapter library module.

use super::*;

#[test]
fn test_channel_name_validation() {
    // Valid names
    assert!(ChannelName::new("jobs".to_string()).is_ok());
    assert!(ChannelName::new("orders.created".to_string()).is_ok());
    assert!(ChannelName::new("a".repeat(255)).is_ok());

    // Invalid names
    assert!(ChannelName::new("".to_string()).is_err());
    assert!(ChannelName::new("a".repeat(256)).is_err());
    assert!(ChannelName::new("line\nbreak".to_string()).is_err());
}

#[test]
fn test_default_config_is_valid() {
    let config = QueueAdapterConfig::default();

    assert!(config.validate().is_ok());
    assert_eq!(config.broker.provider_type(), ProviderType::Amqp);
}

#[tokio::test(start_paused = true)]
async fn test_reexported_surface_round_trip() {
    let (_broker, adapter) = QueueAdapterFactory::create_test_adapter().await.unwrap();
    let channel: ChannelName = "greetings".parse().unwrap();

    adapter.put(&channel, QueueValue::from("hi")).await.unwrap();
    let value = adapter.pull_one(&channel).await.unwrap();

    assert_eq!(value.tag(), Some(EnvelopeTag::Text));
    assert_eq!(value.as_text(), Some("hi"));
}
