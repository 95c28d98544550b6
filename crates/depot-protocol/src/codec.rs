use std::io::{BufRead, Read, Write};

use serde::Serialize;
use serde_json::Value;

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{Inbound, Outbound, MAX_MESSAGE_SIZE};

/// JSON-lines codec: one message per line, `\n` terminated.
pub struct LineCodec;

impl LineCodec {
    /// Encode a message as one line, newline included.
    pub fn encode<T: Serialize>(msg: &T) -> ProtocolResult<Vec<u8>> {
        let mut buf =
            serde_json::to_vec(msg).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        if buf.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: buf.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        buf.push(b'\n');
        Ok(buf)
    }

    /// Decode one inbound line (without its newline).
    ///
    /// A `type` tag outside [`Inbound::TYPE_NAMES`] is reported as
    /// [`ProtocolError::UnknownMessageType`] rather than a generic decode error.
    pub fn decode_inbound(line: &[u8]) -> ProtocolResult<Inbound> {
        let value = Self::parse_tagged(line, Inbound::TYPE_NAMES)?;
        serde_json::from_value(value).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    /// Decode one outbound line (without its newline).
    pub fn decode_outbound(line: &[u8]) -> ProtocolResult<Outbound> {
        let value = Self::parse_tagged(line, &["Upload", "AfterDbCleanup"])?;
        serde_json::from_value(value).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    fn parse_tagged(line: &[u8], known: &[&str]) -> ProtocolResult<Value> {
        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let value: Value = serde_json::from_slice(line)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingTypeTag)?;
        if !known.contains(&tag) {
            return Err(ProtocolError::UnknownMessageType(tag.to_string()));
        }
        Ok(value)
    }

    /// Read the next non-empty line, without its line ending. Returns `None`
    /// at end of input.
    pub fn read_frame<R: BufRead>(reader: &mut R) -> ProtocolResult<Option<Vec<u8>>> {
        loop {
            let mut buf = Vec::new();
            let read = reader
                .by_ref()
                .take(MAX_MESSAGE_SIZE as u64 + 1)
                .read_until(b'\n', &mut buf)?;
            if read == 0 {
                return Ok(None);
            }

            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            } else if buf.len() > MAX_MESSAGE_SIZE {
                return Err(ProtocolError::MessageTooLarge {
                    size: buf.len(),
                    max: MAX_MESSAGE_SIZE,
                });
            }

            if !buf.iter().all(u8::is_ascii_whitespace) {
                return Ok(Some(buf));
            }
        }
    }

    /// Encode and write one message, flushing the writer.
    pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> ProtocolResult<()> {
        writer.write_all(&Self::encode(msg)?)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use depot_types::{Metadata, StatusUpdate, SubmissionId, Timestamp, Username};

    use super::*;

    #[test]
    fn inbound_roundtrip() {
        let msgs = vec![
            Inbound::SaveLogin {
                username: Username::from("alice"),
                password_hash: "$2b$12$abc".into(),
            },
            Inbound::RemoveLogin {
                username: Username::from("alice"),
            },
            Inbound::QueueTick,
            Inbound::StatusUpdate(
                StatusUpdate::new("r1", "Accepted", Timestamp::from_secs(100.0))
                    .with_display_name("Atlas"),
            ),
        ];
        for msg in msgs {
            let encoded = LineCodec::encode(&msg).unwrap();
            assert_eq!(encoded.last(), Some(&b'\n'));
            let decoded = LineCodec::decode_inbound(&encoded[..encoded.len() - 1]).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn wire_shape_is_tagged() {
        let encoded = LineCodec::encode(&Inbound::QueueTick).unwrap();
        assert_eq!(encoded, b"{\"type\":\"QueueTick\"}\n");
    }

    #[test]
    fn status_update_fields_are_flattened() {
        let line = br#"{"type":"StatusUpdate","submission_id":"r1","message":"Sent","timestamp":5.0}"#;
        let msg = LineCodec::decode_inbound(line).unwrap();
        assert_eq!(
            msg,
            Inbound::StatusUpdate(StatusUpdate::new("r1", "Sent", Timestamp::from_secs(5.0)))
        );
        assert_eq!(msg.type_name(), "StatusUpdate");
    }

    #[test]
    fn cache_tick_alias_is_accepted() {
        let msg = LineCodec::decode_inbound(br#"{"type":"CacheTick"}"#).unwrap();
        assert_eq!(msg, Inbound::QueueTick);
    }

    #[test]
    fn unknown_type_is_reported() {
        let err = LineCodec::decode_inbound(br#"{"type":"Shutdown"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMessageType(ref t) if t == "Shutdown"));
    }

    #[test]
    fn missing_tag_is_reported() {
        let err = LineCodec::decode_inbound(br#"{"username":"alice"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingTypeTag));
    }

    #[test]
    fn malformed_fields_are_deserialization_errors() {
        let err = LineCodec::decode_inbound(br#"{"type":"SaveLogin","username":"alice"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Deserialization(_)));
    }

    #[test]
    fn outbound_roundtrip() {
        let mut metadata = Metadata::new();
        metadata.insert("isbn".into(), "80-86056-31-7".into());
        let msg = Outbound::Upload {
            username: Username::from("alice"),
            submission_id: SubmissionId::from("r1"),
            b64_data: "aGVsbG8=".into(),
            metadata,
        };
        let encoded = LineCodec::encode(&msg).unwrap();
        let decoded = LineCodec::decode_outbound(&encoded[..encoded.len() - 1]).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.type_name(), "Upload");
    }

    #[test]
    fn read_frames_skips_blank_lines() {
        let mut input = Cursor::new(b"{\"type\":\"QueueTick\"}\r\n\n  \n{\"type\":\"CacheTick\"}".to_vec());
        let first = LineCodec::read_frame(&mut input).unwrap().unwrap();
        assert_eq!(first, br#"{"type":"QueueTick"}"#);
        let second = LineCodec::read_frame(&mut input).unwrap().unwrap();
        assert_eq!(second, br#"{"type":"CacheTick"}"#);
        assert!(LineCodec::read_frame(&mut input).unwrap().is_none());
    }

    #[test]
    fn write_frame_appends_newline() {
        let mut out = Vec::new();
        LineCodec::write_frame(&mut out, &Outbound::AfterDbCleanup).unwrap();
        assert_eq!(out, b"{\"type\":\"AfterDbCleanup\"}\n");
    }
}
