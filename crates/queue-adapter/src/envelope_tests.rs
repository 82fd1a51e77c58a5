//! Tests for the tagged message envelope.

use super::*;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Invoice {
    number: u32,
    customer: String,
    lines: Vec<(String, f64)>,
}

fn sample_invoice() -> Invoice {
    Invoice {
        number: 1042,
        customer: "ACME".to_string(),
        lines: vec![("bolts".to_string(), 12.5), ("nuts".to_string(), 3.0)],
    }
}

// ============================================================================
// Wire Format
// ============================================================================

mod wire_format {
    use super::*;

    #[test]
    fn test_text_is_tagged_and_verbatim() {
        let payload = encode(&QueueValue::from("hello")).unwrap();
        assert_eq!(&payload[..], b"shello");
    }

    #[test]
    fn test_number_is_decimal_text() {
        assert_eq!(&encode(&QueueValue::from(42)).unwrap()[..], b"n42");
        assert_eq!(&encode(&QueueValue::Number(1.5)).unwrap()[..], b"n1.5");
        assert_eq!(&encode(&QueueValue::Number(-0.25)).unwrap()[..], b"n-0.25");
    }

    #[test]
    fn test_structured_is_json_with_key_order_kept() {
        let value = QueueValue::from(json!({"x": 1, "y": [2, 3]}));
        let payload = encode(&value).unwrap();
        assert_eq!(&payload[..], br#"a{"x":1,"y":[2,3]}"#);
    }

    #[test]
    fn test_object_is_tagged_messagepack() {
        let value = QueueValue::object(&sample_invoice()).unwrap();
        let payload = encode(&value).unwrap();

        assert_eq!(payload[0], EnvelopeTag::OBJECT_BYTE);
        let decoded: Invoice = rmp_serde::from_slice(&payload[1..]).unwrap();
        assert_eq!(decoded, sample_invoice());
    }

    #[test]
    fn test_null_encodes_to_empty_payload() {
        let payload = encode(&QueueValue::Null).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn test_tag_bytes() {
        for tag in [
            EnvelopeTag::Structured,
            EnvelopeTag::Object,
            EnvelopeTag::Text,
            EnvelopeTag::Number,
        ] {
            assert_eq!(EnvelopeTag::from_byte(tag.to_byte()), Some(tag));
        }
        assert_eq!(EnvelopeTag::from_byte(b'x'), None);
    }
}

// ============================================================================
// Round Trips
// ============================================================================

mod round_trip {
    use super::*;

    fn round_trip(value: QueueValue) -> QueueValue {
        let payload = encode(&value).unwrap();
        decode(&payload).unwrap()
    }

    #[test]
    fn test_keyed_container_round_trips() {
        let value = QueueValue::from(json!({"x": 1, "y": [2, 3]}));
        assert_eq!(round_trip(value.clone()), value);
    }

    #[test]
    fn test_array_round_trips() {
        let value = QueueValue::from(json!([1, "two", {"three": 3.0}, null]));
        assert_eq!(round_trip(value.clone()), value);
    }

    #[test]
    fn test_text_round_trips_including_tag_like_content() {
        for text in ["hello", "", "a{\"not\":\"json\"}", "n42", "ünïcødé ✓"] {
            let value = QueueValue::from(text);
            assert_eq!(round_trip(value.clone()), value);
        }
    }

    /// Integers come back as floats with the same numeric value.
    #[test]
    fn test_numbers_round_trip_as_floats() {
        assert_eq!(round_trip(QueueValue::from(42)), QueueValue::Number(42.0));
        assert_eq!(round_trip(QueueValue::from(-7_i64)), QueueValue::Number(-7.0));
        assert_eq!(round_trip(QueueValue::Number(0.1)), QueueValue::Number(0.1));
        assert_eq!(
            round_trip(QueueValue::Number(f64::MAX)),
            QueueValue::Number(f64::MAX)
        );
        assert_eq!(
            round_trip(QueueValue::Number(f64::INFINITY)),
            QueueValue::Number(f64::INFINITY)
        );
    }

    #[test]
    fn test_object_round_trips() {
        let value = QueueValue::object(&sample_invoice()).unwrap();
        let decoded = round_trip(value.clone());
        assert_eq!(decoded, value);

        let invoice: Invoice = decoded.as_object().unwrap().deserialize().unwrap();
        assert_eq!(invoice, sample_invoice());
    }

    #[test]
    fn test_null_round_trips() {
        assert_eq!(round_trip(QueueValue::Null), QueueValue::Null);
    }
}

// ============================================================================
// Decoding Foreign and Malformed Payloads
// ============================================================================

mod decoding {
    use super::*;

    #[test]
    fn test_unknown_tag_decodes_to_null() {
        for payload in [&b"x{}"[..], b"A[1]", b"\x00\x01", b" 42", b"{\"x\":1}"] {
            assert_eq!(decode(payload).unwrap(), QueueValue::Null);
        }
    }

    #[test]
    fn test_empty_payload_decodes_to_null() {
        assert_eq!(decode(b"").unwrap(), QueueValue::Null);
    }

    #[test]
    fn test_numbers_from_other_producers() {
        assert_eq!(decode(b"n2.75").unwrap(), QueueValue::Number(2.75));
        assert_eq!(decode(b"n1").unwrap(), QueueValue::Number(1.0));
        assert_eq!(decode(b"n1e3").unwrap(), QueueValue::Number(1000.0));
    }

    /// Producers that stringify null or false send a bare numeric tag.
    #[test]
    fn test_empty_numeric_body_is_zero() {
        assert_eq!(decode(b"n").unwrap(), QueueValue::Number(0.0));
    }

    #[test]
    fn test_malformed_json_propagates() {
        let result = decode(b"a{\"x\":");
        assert!(matches!(result, Err(EnvelopeError::StructuredText(_))));
    }

    #[test]
    fn test_malformed_object_propagates() {
        assert!(matches!(decode(b"o"), Err(EnvelopeError::ObjectDecode(_))));
        // 0xc1 is never used by MessagePack
        assert!(matches!(decode(b"o\xc1"), Err(EnvelopeError::ObjectDecode(_))));
        // two-element array holding one element
        assert!(matches!(
            decode(b"o\x92\x01"),
            Err(EnvelopeError::ObjectDecode(_))
        ));
    }

    #[test]
    fn test_invalid_utf8_text_propagates() {
        let result = decode(b"s\xff\xfe");
        assert!(matches!(result, Err(EnvelopeError::InvalidUtf8)));
    }

    #[test]
    fn test_number_reads_leading_numeric_prefix() {
        assert_eq!(decode(b"n12abc").unwrap(), QueueValue::Number(12.0));
        assert_eq!(decode(b"n \t3.5e2x").unwrap(), QueueValue::Number(350.0));
        assert_eq!(decode(b"n-0.25.5").unwrap(), QueueValue::Number(-0.25));
        assert_eq!(decode(b"n.5").unwrap(), QueueValue::Number(0.5));
        // An exponent marker without digits is not part of the number
        assert_eq!(decode(b"n7e").unwrap(), QueueValue::Number(7.0));
        assert_eq!(decode(b"n7e+").unwrap(), QueueValue::Number(7.0));
    }

    #[test]
    fn test_number_without_numeric_prefix_is_zero() {
        assert_eq!(decode(b"nforty-two").unwrap(), QueueValue::Number(0.0));
        assert_eq!(decode(b"n   ").unwrap(), QueueValue::Number(0.0));
        assert_eq!(decode(b"n-").unwrap(), QueueValue::Number(0.0));
        assert_eq!(decode(b"n\xff\xfe").unwrap(), QueueValue::Number(0.0));
        assert_eq!(decode(b"ninf").unwrap(), QueueValue::Number(0.0));
    }

    #[test]
    fn test_object_with_wrong_target_type_fails_on_extraction() {
        let value = QueueValue::object(&sample_invoice()).unwrap();
        let object = value.as_object().unwrap();
        assert!(object.deserialize::<Vec<String>>().is_err());
    }
}

// ============================================================================
// Value Helpers
// ============================================================================

mod value_helpers {
    use super::*;

    #[test]
    fn test_accessors_match_variant() {
        assert_eq!(QueueValue::from("hi").as_text(), Some("hi"));
        assert_eq!(QueueValue::from(2.5).as_number(), Some(2.5));
        assert!(QueueValue::from(json!({})).as_structured().is_some());
        assert!(QueueValue::from("hi").as_number().is_none());
        assert!(QueueValue::Null.is_null());
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(QueueValue::from(None::<String>), QueueValue::Null);
        assert_eq!(QueueValue::from(Some("x")), QueueValue::Text("x".to_string()));
    }

    #[test]
    fn test_to_json_rendering() {
        assert_eq!(QueueValue::from("hi").to_json(), json!("hi"));
        assert_eq!(QueueValue::from(42).to_json(), json!(42.0));
        assert_eq!(QueueValue::Number(f64::NAN).to_json(), json!(null));
        assert_eq!(QueueValue::Null.to_json(), json!(null));

        let object = QueueValue::object(&sample_invoice()).unwrap();
        assert_eq!(object.to_json()["customer"], json!("ACME"));
        assert_eq!(object.to_json()["number"], json!(1042));
    }
}
