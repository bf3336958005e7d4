//! Stream Codec
//!
//! JSON encoding of outbound request frames and decoding of inbound frames
//! into classified [`StreamEvent`]s.

use crate::infrastructure::schwab::messages::{RawFrame, RequestFrame, StreamEvent};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the streamer socket.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode a request frame as a text message.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, frame: &RequestFrame) -> Result<String, CodecError> {
        Ok(serde_json::to_string(frame)?)
    }

    /// Decode a text message into events, in frame order: `response`
    /// acknowledgements, then `notify` heartbeats, then `data` blocks.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object.
    pub fn decode(&self, text: &str) -> Result<Vec<StreamEvent>, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            let preview: String = trimmed.chars().take(50).collect();
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {preview}..."
            )));
        }

        let frame: RawFrame = serde_json::from_str(trimmed)?;
        let mut events =
            Vec::with_capacity(frame.response.len() + frame.notify.len() + frame.data.len());

        events.extend(
            frame
                .response
                .into_iter()
                .map(|block| StreamEvent::Admin(block.content)),
        );
        events.extend(frame.notify.iter().map(|_| StreamEvent::Heartbeat));
        events.extend(frame.data.into_iter().map(StreamEvent::from_data_block));

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::StreamerInfo;
    use crate::infrastructure::schwab::messages::StreamRequest;

    #[test]
    fn decode_option_data() {
        let codec = JsonCodec::new();
        let text = r#"{"data":[{"service":"LEVELONE_OPTIONS","timestamp":1,"command":"SUBS",
            "content":[{"key":"SPXW  241218C05000000","37":12.5,"38":11.0}]}]}"#;

        let events = codec.decode(text).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::OptionQuotes(items) => {
                assert_eq!(items[0]["key"], "SPXW  241218C05000000");
                assert_eq!(items[0]["37"], 12.5);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn decode_response_and_notify() {
        let codec = JsonCodec::new();
        let text = r#"{"response":[{"service":"ADMIN","command":"LOGIN","requestid":"0",
            "content":{"code":0,"msg":"server=s1;status=PN"}}],
            "notify":[{"heartbeat":"1718000000000"}]}"#;

        let events = codec.decode(text).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StreamEvent::Admin(_)));
        assert_eq!(events[1], StreamEvent::Heartbeat);
    }

    #[test]
    fn decode_empty_object() {
        let codec = JsonCodec::new();
        assert!(codec.decode("{}").unwrap().is_empty());
    }

    #[test]
    fn decode_rejects_non_object() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode("[1,2,3]"),
            Err(CodecError::InvalidFormat(_))
        ));
        assert!(matches!(codec.decode("{not json"), Err(CodecError::Json(_))));
    }

    #[test]
    fn encode_wraps_requests() {
        let info = StreamerInfo {
            socket_url: "wss://s".to_string(),
            customer_id: "c".to_string(),
            correl_id: "r".to_string(),
            channel: "N9".to_string(),
            function_id: "F".to_string(),
        };
        let text = JsonCodec::new()
            .encode(&StreamRequest::underlying_subscription(&info, "$SPX").into())
            .unwrap();
        assert!(text.starts_with(r#"{"requests":[{"#));
        assert!(text.contains(r#""keys":"$SPX""#));
    }
}
