use serde::Deserialize;
use thiserror::Error;

use crate::schemas::Message;

/// Literal the server may send after the last event; carries nothing.
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Clone, Debug, PartialEq)]
pub enum StreamChunk {
    /// Incremental assistant text.
    TextDelta(String),
    /// No more deltas will follow. May carry the consolidated reply.
    Complete(Option<Message>),
}

/// Result of decoding one line of the response body.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Skip,
    Chunks(Vec<StreamChunk>),
    ServerError(String),
}

#[derive(Debug, Error)]
#[error("malformed event payload: {source}")]
pub struct DecodeError {
    #[from]
    source: serde_json::Error,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireEvent {
    Tagged(TaggedEvent),
    Plain(PlainChunk),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum TaggedEvent {
    TextDelta {
        delta: String,
    },
    Finish {
        #[serde(default)]
        message: Option<Message>,
    },
    Error {
        #[serde(rename = "errorText")]
        error_text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlainChunk {
    #[serde(default)]
    delta: String,
    #[serde(default)]
    is_complete: bool,
}

/// Decode one `data: <json>` line.
///
/// Lines without the `data:` prefix, blank payloads and the `[DONE]` marker
/// decode to [`Decoded::Skip`]. Both the tagged event shape
/// (`{"type":"text-delta","delta":".."}`) and the plain chunk shape
/// (`{"delta":"..","isComplete":false}`) are understood.
pub fn decode_line(line: &str) -> Result<Decoded, DecodeError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(Decoded::Skip);
    };
    let data = data.trim();
    if data.is_empty() || data == DONE_MARKER {
        return Ok(Decoded::Skip);
    }

    let decoded = match serde_json::from_str::<WireEvent>(data)? {
        WireEvent::Tagged(TaggedEvent::TextDelta { delta }) => {
            Decoded::Chunks(vec![StreamChunk::TextDelta(delta)])
        }
        WireEvent::Tagged(TaggedEvent::Finish { message }) => {
            Decoded::Chunks(vec![StreamChunk::Complete(message)])
        }
        WireEvent::Tagged(TaggedEvent::Error { error_text }) => Decoded::ServerError(error_text),
        WireEvent::Tagged(TaggedEvent::Other) => Decoded::Skip,
        WireEvent::Plain(chunk) => {
            let mut chunks = Vec::new();
            if !chunk.delta.is_empty() {
                chunks.push(StreamChunk::TextDelta(chunk.delta));
            }
            if chunk.is_complete {
                chunks.push(StreamChunk::Complete(None));
            }
            if chunks.is_empty() {
                Decoded::Skip
            } else {
                Decoded::Chunks(chunks)
            }
        }
    };

    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(line: &str) -> Vec<StreamChunk> {
        match decode_line(line).unwrap() {
            Decoded::Chunks(chunks) => chunks,
            other => panic!("expected chunks, got {other:?}"),
        }
    }

    #[test]
    fn tagged_text_delta() {
        assert_eq!(
            chunks(r#"data: {"type":"text-delta","id":"t1","delta":"hel"}"#),
            vec![StreamChunk::TextDelta("hel".into())]
        );
    }

    #[test]
    fn finish_may_carry_the_final_message() {
        let decoded = chunks(
            r#"data: {"type":"finish","message":{"id":"m9","role":"assistant","content":"hello"}}"#,
        );
        match &decoded[..] {
            [StreamChunk::Complete(Some(message))] => assert_eq!(message.text(), "hello"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(chunks(r#"data: {"type":"finish"}"#), vec![StreamChunk::Complete(None)]);
    }

    #[test]
    fn plain_chunk_shape() {
        assert_eq!(
            chunks(r#"data: {"delta":"lo","isComplete":true}"#),
            vec![
                StreamChunk::TextDelta("lo".into()),
                StreamChunk::Complete(None)
            ]
        );
        assert_eq!(
            decode_line(r#"data: {"delta":"","isComplete":false}"#).unwrap(),
            Decoded::Skip
        );
    }

    #[test]
    fn lifecycle_events_and_markers_are_skipped() {
        for line in [
            r#"data: {"type":"start","messageId":"m1"}"#,
            r#"data: {"type":"text-start","id":"t1"}"#,
            "data: [DONE]",
            "data:    ",
            ": keep-alive",
            "event: message",
            "",
        ] {
            assert_eq!(decode_line(line).unwrap(), Decoded::Skip, "line {line:?}");
        }
    }

    #[test]
    fn server_error_event() {
        assert_eq!(
            decode_line(r#"data: {"type":"error","errorText":"quota exceeded"}"#).unwrap(),
            Decoded::ServerError("quota exceeded".into())
        );
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(decode_line("data: {not json").is_err());
        assert!(decode_line("data: 42").is_err());
    }

    #[test]
    fn carriage_return_and_missing_space_are_tolerated() {
        assert_eq!(
            chunks("data:{\"type\":\"text-delta\",\"delta\":\"x\"}\r"),
            vec![StreamChunk::TextDelta("x".into())]
        );
    }
}
