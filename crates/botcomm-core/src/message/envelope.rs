//! Envelope construction and validation.
//!
//! `build` is the single place where caller input becomes an `Envelope`:
//! it validates the required fields and fills in the bus-owned ones.
//! The remaining helpers build well-formed inputs for common patterns.

use botcomm_types::error::ValidationError;
use botcomm_types::message::{
    BROADCAST_TARGET, Envelope, EnvelopeInput, MessageType, PROTOCOL_ID,
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

/// Validate `input` and stamp it with a fresh id, timestamp and the given
/// protocol version. Priority defaults to `MEDIUM`.
pub fn build(input: EnvelopeInput, protocol_version: &str) -> Result<Envelope, ValidationError> {
    let message_type = input
        .message_type
        .ok_or(ValidationError::MissingField("type"))?;
    let from = required(input.from, "from")?;
    let to = required(input.to, "to")?;

    Ok(Envelope {
        id: Uuid::now_v7().to_string(),
        timestamp: Utc::now(),
        protocol_version: protocol_version.to_string(),
        message_type,
        priority: input.priority.unwrap_or_default(),
        from,
        to,
        data: input.data,
    })
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    match value {
        None => Err(ValidationError::MissingField(field)),
        Some(v) if v.trim().is_empty() => Err(ValidationError::EmptyField(field)),
        Some(v) => Ok(v),
    }
}

/// Build a `REQUEST` carrying a correlation id and the requested data type.
///
/// Extra `params` (if an object) are merged into the payload alongside the
/// correlation fields.
pub fn request(
    from: impl Into<String>,
    to: impl Into<String>,
    correlation_id: &str,
    data_type: &str,
    params: serde_json::Value,
) -> EnvelopeInput {
    let mut data = json!({
        "correlationId": correlation_id,
        "dataType": data_type,
    });
    if let (Some(target), serde_json::Value::Object(extra)) = (data.as_object_mut(), params) {
        for (key, value) in extra {
            target.entry(key).or_insert(value);
        }
    }
    EnvelopeInput::new(MessageType::Request, from, to).with_data(data)
}

/// Build the `RESPONSE` to `original`, sent by its recipient back to its
/// sender. The correlation id and data type are echoed; `payload` is carried
/// under `data.payload`.
pub fn response(original: &Envelope, payload: serde_json::Value) -> EnvelopeInput {
    let mut data = json!({ "payload": payload });
    if let Some(target) = data.as_object_mut() {
        if let Some(correlation_id) = original.correlation_id() {
            target.insert("correlationId".to_string(), json!(correlation_id));
        }
        if let Some(data_type) = original.data_type().or(original.command()) {
            target.insert("dataType".to_string(), json!(data_type));
        }
    }
    EnvelopeInput::new(MessageType::Response, original.to.clone(), original.from.clone())
        .with_priority(original.priority)
        .with_data(data)
}

/// Build the `ERROR` reported to the sender of `original` when delivery to
/// `recipient` failed.
pub fn delivery_error(original: &Envelope, recipient: &str, error: &str) -> EnvelopeInput {
    EnvelopeInput::new(MessageType::Error, PROTOCOL_ID, original.from.clone())
        .with_priority(original.priority)
        .with_data(json!({
            "error": error,
            "originalMessageId": original.id,
            "originalType": original.message_type,
            "recipient": recipient,
        }))
}

/// Build a bus-originated `NOTIFICATION` broadcast.
pub fn protocol_notification(data: serde_json::Value) -> EnvelopeInput {
    EnvelopeInput::new(MessageType::Notification, PROTOCOL_ID, BROADCAST_TARGET).with_data(data)
}
