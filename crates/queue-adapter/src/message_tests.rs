//! Tests for message types and domain identifiers.

use super::*;

mod channel_name {
    use super::*;

    #[test]
    fn test_valid_channel_names() {
        assert!(ChannelName::new("jobs".to_string()).is_ok());
        assert!(ChannelName::new("mail.outgoing".to_string()).is_ok());
        assert!(ChannelName::new("очередь".to_string()).is_ok());
        assert!(ChannelName::new("a".repeat(255)).is_ok());
    }

    #[test]
    fn test_empty_channel_name_rejected() {
        let result = ChannelName::new(String::new());
        assert!(matches!(result, Err(ValidationError::Required { .. })));
    }

    /// The limit is counted in bytes: 128 two-byte characters exceed it.
    #[test]
    fn test_length_limit_counts_utf8_bytes() {
        assert!(matches!(
            ChannelName::new("a".repeat(256)),
            Err(ValidationError::OutOfRange { .. })
        ));

        let wide = "я".repeat(128);
        assert_eq!(wide.chars().count(), 128);
        assert!(ChannelName::new(wide).is_err());
    }

    #[test]
    fn test_control_characters_rejected() {
        assert!(matches!(
            ChannelName::new("jobs\n".to_string()),
            Err(ValidationError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_from_str_and_display() {
        let name: ChannelName = "reports".parse().unwrap();
        assert_eq!(name.as_str(), "reports");
        assert_eq!(name.to_string(), "reports");

        let name = ChannelName::try_from("reports").unwrap();
        assert_eq!(name.as_str(), "reports");
    }
}

mod broker_options {
    use super::*;

    #[test]
    fn test_adapter_queue_flags() {
        let options = QueueDeclareOptions::durable();
        assert!(!options.passive);
        assert!(options.durable);
        assert!(!options.exclusive);
        assert!(!options.auto_delete);
    }

    #[test]
    fn test_persistent_publish_uses_delivery_mode_two() {
        let properties = PublishProperties::persistent();
        assert_eq!(properties.delivery_mode, DeliveryMode::Persistent);
        assert_eq!(properties.delivery_mode.as_u8(), 2);
        assert_eq!(PublishProperties::default().delivery_mode.as_u8(), 1);
    }

    #[test]
    fn test_default_consume_options_require_acks() {
        let options = ConsumeOptions::default();
        assert!(!options.no_ack);
        assert!(!options.no_local);
        assert!(!options.exclusive);
        assert!(!options.no_wait);
    }
}

mod tags {
    use super::*;

    #[test]
    fn test_generated_consumer_tags_are_unique() {
        let first = ConsumerTag::generate();
        let second = ConsumerTag::generate();
        assert_ne!(first, second);
        assert!(first.as_str().starts_with("ctag-"));
    }

    #[test]
    fn test_delivery_tag_ordering() {
        assert!(DeliveryTag::new(1) < DeliveryTag::new(2));
        assert_eq!(DeliveryTag::new(9).value(), 9);
        assert_eq!(DeliveryTag::new(9).to_string(), "9");
    }
}
