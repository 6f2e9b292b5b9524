//! RDM JSON Codec
//!
//! Decodes `tr_json2` text frames into [`InboundMessage`] values and encodes
//! [`OutboundMessage`] values into frames.
//!
//! A frame is normally a JSON array of message objects; a bare object is
//! accepted as a one-element batch. Each element is decoded on its own so one
//! bad element does not poison the rest of the delivery.

use serde_json::Value;

use crate::domain::protocol::{InboundMessage, MessageKind, OutboundMessage};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Element carries a `Type` this client does not handle.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// Frame or element has the wrong shape.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// One decoded frame: per-element results in delivery order.
pub type DecodedBatch = Vec<Result<InboundMessage, CodecError>>;

/// JSON codec for the RDM websocket protocol.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid JSON or is neither an
    /// array nor an object. Element-level failures are returned inside the
    /// batch instead.
    pub fn decode(&self, text: &str) -> Result<DecodedBatch, CodecError> {
        let trimmed = text.trim();
        if !(trimmed.starts_with('[') || trimmed.starts_with('{')) {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON array or object, got: {}...",
                trimmed.chars().take(50).collect::<String>()
            )));
        }

        let value: Value = serde_json::from_str(trimmed)?;
        let elements = match value {
            Value::Array(elements) => elements,
            object @ Value::Object(_) => vec![object],
            other => {
                return Err(CodecError::InvalidFormat(format!(
                    "expected JSON array or object, got: {other}"
                )));
            }
        };

        Ok(elements.into_iter().map(|v| self.decode_element(v)).collect())
    }

    /// Decode one message object.
    ///
    /// # Errors
    ///
    /// - [`CodecError::InvalidFormat`] if the element is not an object or has
    ///   no string `Type`.
    /// - [`CodecError::UnknownMessageType`] for an unhandled `Type`.
    /// - [`CodecError::Json`] if the fields do not match the message type.
    pub fn decode_element(&self, value: Value) -> Result<InboundMessage, CodecError> {
        let type_name = match value.get("Type") {
            Some(Value::String(t)) => t.clone(),
            Some(_) => return Err(CodecError::InvalidFormat("non-string Type".to_string())),
            None if value.is_object() => {
                return Err(CodecError::InvalidFormat("missing Type".to_string()));
            }
            None => return Err(CodecError::InvalidFormat("element is not an object".to_string())),
        };

        let kind = MessageKind::from_wire(&type_name)
            .ok_or(CodecError::UnknownMessageType(type_name))?;

        let message = match kind {
            MessageKind::Refresh => InboundMessage::Refresh(serde_json::from_value(value)?),
            MessageKind::Update => InboundMessage::Update(serde_json::from_value(value)?),
            MessageKind::Status => InboundMessage::Status(serde_json::from_value(value)?),
            MessageKind::Ping => InboundMessage::Ping,
            MessageKind::Error => InboundMessage::Error(serde_json::from_value(value)?),
        };
        Ok(message)
    }

    /// Encode an outbound message.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, message: &OutboundMessage) -> Result<String, CodecError> {
        Ok(message.to_json()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::protocol::ItemRequest;
    use crate::domain::subscription::{SubscriptionRequest, ViewFields};

    #[test]
    fn decode_batch_in_order() {
        let codec = JsonCodec::new();
        let batch = codec
            .decode(
                r#"[
                    {"ID":1,"Type":"Refresh","Domain":"Login","Elements":{"PingTimeout":30}},
                    {"ID":2,"Type":"Update","Fields":{"BID":1.5}},
                    {"Type":"Ping"},
                    {"ID":3,"Type":"Status","State":{"Stream":"Closed","Data":"Suspect"}}
                ]"#,
            )
            .unwrap();

        let kinds: Vec<_> = batch.iter().map(|m| m.as_ref().unwrap().kind()).collect();
        assert_eq!(
            kinds,
            vec![
                MessageKind::Refresh,
                MessageKind::Update,
                MessageKind::Ping,
                MessageKind::Status
            ]
        );
        assert_eq!(batch[1].as_ref().unwrap().domain(), Some("MarketPrice"));
    }

    #[test]
    fn decode_single_object() {
        let batch = JsonCodec::new().decode(r#"{"Type":"Ping"}"#).unwrap();
        assert_eq!(batch.len(), 1);
        assert!(matches!(batch[0], Ok(InboundMessage::Ping)));
    }

    #[test]
    fn decode_empty_array() {
        assert!(JsonCodec::new().decode("[]").unwrap().is_empty());
    }

    #[test]
    fn unknown_type_does_not_poison_batch() {
        let batch = JsonCodec::new()
            .decode(r#"[{"Type":"Bogus"},{"Type":"Ping"},{"ID":4}]"#)
            .unwrap();

        assert!(matches!(
            &batch[0],
            Err(CodecError::UnknownMessageType(t)) if t == "Bogus"
        ));
        assert!(matches!(batch[1], Ok(InboundMessage::Ping)));
        assert!(matches!(batch[2], Err(CodecError::InvalidFormat(_))));
    }

    #[test]
    fn malformed_frames_rejected() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode("hello"),
            Err(CodecError::InvalidFormat(_))
        ));
        assert!(matches!(codec.decode("[{"), Err(CodecError::Json(_))));
    }

    #[test]
    fn mistyped_fields_reported_per_element() {
        let batch = JsonCodec::new()
            .decode(r#"[{"Type":"Refresh","ID":"two"},{"Type":"Ping"}]"#)
            .unwrap();
        assert!(matches!(batch[0], Err(CodecError::Json(_))));
        assert!(batch[1].is_ok());
    }

    #[test]
    fn subscription_request_round_trip() {
        let request = SubscriptionRequest {
            stream_id: 5,
            domain: Some("MarketByPrice".to_string()),
            items: vec!["VOD.L".to_string(), "BT.L".to_string()],
            view: Some(ViewFields::Names(vec!["BID".to_string(), "ASK".to_string()])),
            streaming: false,
        };

        let json = JsonCodec::new()
            .encode(&OutboundMessage::Subscribe(request.clone()))
            .unwrap();
        assert!(json.contains(r#""Streaming":false"#));

        let wire: ItemRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(SubscriptionRequest::from(wire), request);
    }

    #[test]
    fn fid_view_round_trip() {
        let request = SubscriptionRequest {
            stream_id: 2,
            domain: None,
            items: vec!["VOD.L".to_string()],
            view: Some(ViewFields::Ids(vec![22, 25])),
            streaming: true,
        };
        let json = JsonCodec::new()
            .encode(&OutboundMessage::Subscribe(request.clone()))
            .unwrap();
        assert_eq!(json, r#"{"ID":2,"Key":{"Name":["VOD.L"]},"View":[22,25]}"#);

        let wire: ItemRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(SubscriptionRequest::from(wire), request);
    }
}
