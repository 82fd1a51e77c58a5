//! Tests for broker and adapter configuration.

use super::*;

#[test]
fn test_adapter_defaults() {
    let config = AdapterConfig::default();
    assert_eq!(config.pull_one_timeout(), Duration::from_secs(10));
    assert_eq!(config.pull_one_wait_slice(), Duration::from_secs(2));
    assert_eq!(config.pull_wait_slice(), Duration::from_secs(1));
    assert!(config.validate().is_ok());
}

#[test]
fn test_default_broker_is_local_amqp() {
    let config = QueueAdapterConfig::default();
    assert_eq!(config.broker.provider_type(), ProviderType::Amqp);
    assert!(config.broker.provider_type().is_external());
    assert!(config.validate().is_ok());
}

#[test]
fn test_zero_values_rejected() {
    let config = AdapterConfig {
        pull_wait_slice_ms: 0,
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigurationError::Invalid { .. })
    ));

    let config = AdapterConfig {
        pull_one_timeout_ms: 0,
        pull_one_wait_slice_ms: 0,
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_slice_longer_than_budget_rejected() {
    let config = AdapterConfig {
        pull_one_timeout_ms: 1_000,
        pull_one_wait_slice_ms: 2_000,
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_amqp_uri_validation() {
    let missing = BrokerConfig::Amqp(AmqpConfig {
        uri: "  ".to_string(),
        connection_name: None,
    });
    assert!(matches!(
        missing.validate(),
        Err(ConfigurationError::Missing { .. })
    ));

    let wrong_scheme = BrokerConfig::Amqp(AmqpConfig {
        uri: "http://localhost:15672".to_string(),
        connection_name: None,
    });
    assert!(matches!(
        wrong_scheme.validate(),
        Err(ConfigurationError::Invalid { .. })
    ));

    let tls = BrokerConfig::Amqp(AmqpConfig {
        uri: "amqps://broker.internal:5671/jobs".to_string(),
        connection_name: Some("worker-1".to_string()),
    });
    assert!(tls.validate().is_ok());
}

#[test]
fn test_in_memory_queue_size_validation() {
    let config = BrokerConfig::InMemory(InMemoryConfig { max_queue_size: 0 });
    assert!(config.validate().is_err());
    assert!(!config.provider_type().is_external());
}

#[test]
fn test_deserialize_tagged_broker_section() {
    let config: QueueAdapterConfig = serde_json::from_value(serde_json::json!({
        "broker": { "provider": "in_memory", "max_queue_size": 5 },
        "adapter": { "pull_one_timeout_ms": 3000 }
    }))
    .unwrap();

    assert_eq!(
        config.broker,
        BrokerConfig::InMemory(InMemoryConfig { max_queue_size: 5 })
    );
    assert_eq!(config.adapter.pull_one_timeout_ms, 3000);
    assert_eq!(config.adapter.pull_one_wait_slice_ms, 2000);
}

#[test]
fn test_deserialize_empty_document_uses_defaults() {
    let config: QueueAdapterConfig = serde_json::from_value(serde_json::json!({})).unwrap();
    assert_eq!(config, QueueAdapterConfig::default());
}
