use push_delivery::models::{
    message::PushMessage,
    validation::{validate_device_token, validate_message},
};

fn valid_message_json() -> serde_json::Value {
    serde_json::json!({
        "request_id": "req-1",
        "recipient_id": "user-1",
        "device_token": "fcm_token_0123456789abcdef",
        "payload": {
            "title": "Order shipped",
            "body": "Your order is on the way",
            "data": { "order_id": "42" }
        }
    })
}

/// Test: A complete message parses and validates
#[test]
fn test_complete_message_is_valid() {
    let message: PushMessage = serde_json::from_value(valid_message_json()).unwrap();

    assert!(validate_message(&message).is_ok());
    assert_eq!(message.request_id, "req-1");
    assert_eq!(
        message.payload.data.as_ref().and_then(|d| d.get("order_id")),
        Some(&"42".to_string())
    );
}

/// Test: The data map is optional
#[test]
fn test_data_map_is_optional() {
    let mut raw = valid_message_json();
    raw["payload"].as_object_mut().unwrap().remove("data");

    let message: PushMessage = serde_json::from_value(raw).unwrap();

    assert!(validate_message(&message).is_ok());
    assert!(message.payload.data.is_none());
}

/// Test: Structurally missing required fields fail to parse
#[test]
fn test_missing_required_fields_fail_to_parse() {
    for field in ["request_id", "recipient_id", "device_token", "payload"] {
        let mut raw = valid_message_json();
        raw.as_object_mut().unwrap().remove(field);

        assert!(
            serde_json::from_value::<PushMessage>(raw).is_err(),
            "message without {} should not parse",
            field
        );
    }

    for field in ["title", "body"] {
        let mut raw = valid_message_json();
        raw["payload"].as_object_mut().unwrap().remove(field);

        assert!(
            serde_json::from_value::<PushMessage>(raw).is_err(),
            "message without payload.{} should not parse",
            field
        );
    }
}

/// Test: Fields present but empty are rejected by validation
#[test]
fn test_empty_required_fields_are_rejected() {
    for field in ["request_id", "recipient_id"] {
        let mut raw = valid_message_json();
        raw[field] = serde_json::json!("");

        let message: PushMessage = serde_json::from_value(raw).unwrap();
        assert!(
            validate_message(&message).is_err(),
            "empty {} should be rejected",
            field
        );
    }

    for field in ["title", "body"] {
        let mut raw = valid_message_json();
        raw["payload"][field] = serde_json::json!("");

        let message: PushMessage = serde_json::from_value(raw).unwrap();
        assert!(
            validate_message(&message).is_err(),
            "empty payload.{} should be rejected",
            field
        );
    }
}

/// Test: Device token format rules
#[test]
fn test_device_token_format_rules() {
    assert!(validate_device_token("fcm_token_0123456789abcdef").is_ok());
    assert!(validate_device_token("token:with.allowed-chars_0123456789").is_ok());

    assert!(validate_device_token("").is_err());
    assert!(validate_device_token("too_short").is_err());
    assert!(validate_device_token(&"x".repeat(201)).is_err());
    assert!(validate_device_token("invalid token with spaces!!").is_err());
}
