//! Wire protocol messages for the sync connection.
//!
//! Every message is framed as `<kind>:<file_name>,<payload>` followed by a
//! single NUL (0x00) terminator byte, e.g. `C:notes.md,abc123\x00`. The
//! framing is sentinel-terminated rather than length-prefixed, so payloads
//! (file contents, credentials) must not contain a NUL byte; `encode`
//! rejects them instead of corrupting the stream.

const KIND_CHECK: u8 = b'C';
const KIND_MATCH: u8 = b'M';
const KIND_DATA: u8 = b'D';
const KIND_FINISH: u8 = b'F';
const KIND_AUTH: u8 = b'A';
const KIND_AUTH_OK: u8 = b'K';
const KIND_AUTH_FAIL: u8 = b'X';

/// The NUL terminator closing every frame.
pub const FRAME_TERMINATOR: u8 = 0x00;

/// A single protocol message. Constructed per protocol step and discarded
/// after it is sent or consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Main asks whether the replica's copy of a file has this hash.
    Check { file_name: String, hash: String },
    /// Replica's answer to a `Check`.
    MatchResult { file_name: String, matched: bool },
    /// Full file contents, sent when a check did not match.
    Data { file_name: String, bytes: Vec<u8> },
    /// Main is done checking; the replica may prune and exit.
    Finish,
    /// Credential presented by the dialing side.
    Auth { key: Vec<u8> },
    /// Credential accepted.
    AuthOk,
    /// Credential rejected.
    AuthFail,
}

impl Message {
    /// Encodes the message as one framed byte sequence.
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        let (kind, file_name, payload): (u8, &str, &[u8]) = match self {
            Message::Check { file_name, hash } => (KIND_CHECK, file_name, hash.as_bytes()),
            Message::MatchResult { file_name, matched } => {
                let flag: &[u8] = if *matched { b"1" } else { b"0" };
                (KIND_MATCH, file_name, flag)
            }
            Message::Data { file_name, bytes } => (KIND_DATA, file_name, bytes),
            Message::Finish => (KIND_FINISH, "", &[]),
            Message::Auth { key } => (KIND_AUTH, "", key),
            Message::AuthOk => (KIND_AUTH_OK, "", &[]),
            Message::AuthFail => (KIND_AUTH_FAIL, "", &[]),
        };

        if payload.contains(&FRAME_TERMINATOR) {
            return Err(MessageError::EmbeddedNul);
        }
        if file_name.bytes().any(|b| b == b',' || b == FRAME_TERMINATOR) {
            return Err(MessageError::InvalidFileName(file_name.to_string()));
        }

        let mut buf = Vec::with_capacity(file_name.len() + payload.len() + 4);
        buf.push(kind);
        buf.push(b':');
        buf.extend_from_slice(file_name.as_bytes());
        buf.push(b',');
        buf.extend_from_slice(payload);
        buf.push(FRAME_TERMINATOR);
        Ok(buf)
    }

    /// Decodes one complete frame, terminator included.
    pub fn decode(frame: &[u8]) -> Result<Message, MessageError> {
        if frame.len() < 4 {
            return Err(MessageError::TooShort(frame.len()));
        }
        if frame[frame.len() - 1] != FRAME_TERMINATOR {
            return Err(MessageError::MissingTerminator);
        }
        if frame[1] != b':' {
            return Err(MessageError::MissingSeparator);
        }

        let kind = frame[0];
        let body = &frame[2..frame.len() - 1];
        let comma = body
            .iter()
            .position(|&b| b == b',')
            .ok_or(MessageError::MissingSeparator)?;
        let file_name = String::from_utf8(body[..comma].to_vec())
            .map_err(|_| MessageError::InvalidText)?;
        let payload = &body[comma + 1..];

        match kind {
            KIND_CHECK => {
                let hash = String::from_utf8(payload.to_vec())
                    .map_err(|_| MessageError::InvalidText)?;
                Ok(Message::Check { file_name, hash })
            }
            KIND_MATCH => {
                let matched = match payload {
                    b"1" => true,
                    b"0" => false,
                    _ => return Err(MessageError::InvalidMatchPayload),
                };
                Ok(Message::MatchResult { file_name, matched })
            }
            KIND_DATA => Ok(Message::Data {
                file_name,
                bytes: payload.to_vec(),
            }),
            KIND_FINISH => Ok(Message::Finish),
            KIND_AUTH => Ok(Message::Auth {
                key: payload.to_vec(),
            }),
            KIND_AUTH_OK => Ok(Message::AuthOk),
            KIND_AUTH_FAIL => Ok(Message::AuthFail),
            other => Err(MessageError::UnknownKind(other)),
        }
    }

    /// Human-readable kind name, used in protocol error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Message::Check { .. } => "check",
            Message::MatchResult { .. } => "match",
            Message::Data { .. } => "data",
            Message::Finish => "finish",
            Message::Auth { .. } => "auth",
            Message::AuthOk => "auth-ok",
            Message::AuthFail => "auth-fail",
        }
    }
}

/// Errors from encoding or decoding a frame.
#[derive(Debug, PartialEq, Eq)]
pub enum MessageError {
    /// Frame is shorter than the 4-byte minimum
    TooShort(usize),
    /// Frame does not end with the NUL terminator
    MissingTerminator,
    /// Missing the `:` after the kind byte or the `,` after the file name
    MissingSeparator,
    /// Kind byte is not one of the recognized kinds
    UnknownKind(u8),
    /// Match payload was not `0` or `1`
    InvalidMatchPayload,
    /// File name or hash is not valid UTF-8
    InvalidText,
    /// Payload contains a NUL byte and cannot be framed
    EmbeddedNul,
    /// File name contains a reserved byte (`,` or NUL)
    InvalidFileName(String),
}

impl std::fmt::Display for MessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageError::TooShort(len) => {
                write!(f, "Frame too short: {} bytes, minimum is 4", len)
            }
            MessageError::MissingTerminator => write!(f, "Frame is missing the NUL terminator"),
            MessageError::MissingSeparator => write!(f, "Frame is missing a separator"),
            MessageError::UnknownKind(b) => write!(f, "Unknown message kind byte: 0x{:02x}", b),
            MessageError::InvalidMatchPayload => {
                write!(f, "Match payload must be '0' or '1'")
            }
            MessageError::InvalidText => write!(f, "File name or hash is not valid UTF-8"),
            MessageError::EmbeddedNul => {
                write!(f, "Payload contains a NUL byte and cannot be framed")
            }
            MessageError::InvalidFileName(name) => {
                write!(f, "File name contains a reserved byte: {:?}", name)
            }
        }
    }
}

impl std::error::Error for MessageError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_round_trip() {
        let msg = Message::MatchResult {
            file_name: "bob.md".to_string(),
            matched: true,
        };
        let frame = msg.encode().unwrap();
        assert_eq!(frame, b"M:bob.md,1\x00");
        assert_eq!(Message::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn test_check_round_trip() {
        let msg = Message::Check {
            file_name: "notes.md".to_string(),
            hash: "abc123".to_string(),
        };
        let frame = msg.encode().unwrap();
        assert_eq!(frame, b"C:notes.md,abc123\x00");
        assert_eq!(Message::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn test_data_round_trip_multiline() {
        let msg = Message::Data {
            file_name: "bob.md".to_string(),
            bytes: b"# Title\n\n## Description\n\nSome text.\n".to_vec(),
        };
        let frame = msg.encode().unwrap();
        assert_eq!(frame, b"D:bob.md,# Title\n\n## Description\n\nSome text.\n\x00");
        assert_eq!(Message::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn test_empty_payload_kinds_round_trip() {
        for msg in [Message::Finish, Message::AuthOk, Message::AuthFail] {
            let frame = msg.encode().unwrap();
            assert_eq!(frame.len(), 4);
            assert_eq!(Message::decode(&frame).unwrap(), msg);
        }
    }

    #[test]
    fn test_auth_round_trip() {
        let msg = Message::Auth {
            key: b"super-secret".to_vec(),
        };
        let frame = msg.encode().unwrap();
        assert_eq!(frame, b"A:,super-secret\x00");
        assert_eq!(Message::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn test_unmatched_flag_round_trip() {
        let msg = Message::MatchResult {
            file_name: "bob.md".to_string(),
            matched: false,
        };
        let frame = msg.encode().unwrap();
        assert_eq!(frame, b"M:bob.md,0\x00");
        assert_eq!(Message::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn test_decode_rejects_short_frame() {
        assert_eq!(Message::decode(b"C:\x00"), Err(MessageError::TooShort(3)));
        assert_eq!(Message::decode(b""), Err(MessageError::TooShort(0)));
    }

    #[test]
    fn test_decode_rejects_missing_terminator() {
        assert_eq!(
            Message::decode(b"C:bob.md,abc"),
            Err(MessageError::MissingTerminator)
        );
    }

    #[test]
    fn test_decode_rejects_missing_comma() {
        assert_eq!(
            Message::decode(b"C:bob.md\x00"),
            Err(MessageError::MissingSeparator)
        );
    }

    #[test]
    fn test_decode_rejects_missing_colon() {
        assert_eq!(
            Message::decode(b"CX bob.md,abc\x00"),
            Err(MessageError::MissingSeparator)
        );
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        assert_eq!(
            Message::decode(b"Q:bob.md,abc\x00"),
            Err(MessageError::UnknownKind(b'Q'))
        );
    }

    #[test]
    fn test_decode_rejects_bad_match_payload() {
        assert_eq!(
            Message::decode(b"M:bob.md,2\x00"),
            Err(MessageError::InvalidMatchPayload)
        );
        assert_eq!(
            Message::decode(b"M:bob.md,yes\x00"),
            Err(MessageError::InvalidMatchPayload)
        );
    }

    #[test]
    fn test_encode_rejects_nul_in_payload() {
        let msg = Message::Data {
            file_name: "bin.md".to_string(),
            bytes: vec![1, 2, 0, 3],
        };
        assert_eq!(msg.encode(), Err(MessageError::EmbeddedNul));
    }

    #[test]
    fn test_encode_rejects_comma_in_file_name() {
        let msg = Message::Check {
            file_name: "a,b.md".to_string(),
            hash: "abc".to_string(),
        };
        assert!(matches!(
            msg.encode(),
            Err(MessageError::InvalidFileName(_))
        ));
    }
}
