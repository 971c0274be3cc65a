// Copyright 2024 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Line protocol spoken between clients and lock servers.
//!
//! Every message is one `\n` terminated line whose fields are separated by
//! [`FIELD_DELIMITER`]:
//!
//! ```text
//! acquire_lock||orders||worker-1||
//! lock_acquired||orders||worker-1||lock_acquired||
//! try_acquire_lock||orders||worker-2||
//! lock_try_acquire_failed||orders||worker-2||owner=worker-1||
//! release_lock||orders||worker-1||
//! lock_released||orders||worker-1||lock_released||
//! ```

use crate::{LockKey, error::LockError};
use bytes::BytesMut;
use std::{io, marker::PhantomData};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

pub const FIELD_DELIMITER: &str = "||";

const ACQUIRE_LOCK: &str = "acquire_lock";
const TRY_ACQUIRE_LOCK: &str = "try_acquire_lock";
const RELEASE_LOCK: &str = "release_lock";
const CLOSE: &str = "close";

const LOCK_ACQUIRED: &str = "lock_acquired";
const LOCK_TRY_ACQUIRE_FAILED: &str = "lock_try_acquire_failed";
const LOCK_RELEASED: &str = "lock_released";
const RELEASE_ERROR: &str = "release_error";
const TOO_FEW_ARGUMENTS: &str = "too_few_arguments";
const UNKNOWN_COMMAND: &str = "unknown_command";

/// Prefix of the try-acquire failure reason naming the current holder
pub const OWNER_PREFIX: &str = "owner=";

/// Wire parse and encode failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,

    #[error("too few arguments for '{command}'")]
    TooFewArguments { command: String },

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("unknown response '{0}'")]
    UnknownResponse(String),

    #[error("unexpected status '{status}' in '{response}' response")]
    UnexpectedStatus { response: String, status: String },

    #[error("field '{0}' cannot be sent on the wire")]
    InvalidField(String),

    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("line exceeds the maximum length")]
    LineTooLong,
}

impl ProtocolError {
    /// Inline reply a server sends for a request that failed to parse
    pub fn reply(&self) -> Response {
        match self {
            Self::UnknownCommand(command) => Response::UnknownCommand {
                command: command.clone(),
            },
            _ => Response::TooFewArguments,
        }
    }
}

/// A field may not contain the delimiter or a line break, and may not end with
/// `|` since the following delimiter would then split in the wrong place.
pub fn validate_field(field: &str) -> Result<(), ProtocolError> {
    if field.is_empty() || field.contains(FIELD_DELIMITER) || field.ends_with('|') || field.contains(['\n', '\r']) {
        return Err(ProtocolError::InvalidField(field.to_string()));
    }
    Ok(())
}

/// A message that maps to exactly one protocol line
pub trait WireMessage: Sized {
    fn parse(line: &str) -> Result<Self, ProtocolError>;

    fn encode(&self) -> Result<String, ProtocolError>;
}

/// Client to server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AcquireLock(LockKey),
    TryAcquireLock(LockKey),
    ReleaseLock(LockKey),
    Close,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AcquireLock(_) => ACQUIRE_LOCK,
            Self::TryAcquireLock(_) => TRY_ACQUIRE_LOCK,
            Self::ReleaseLock(_) => RELEASE_LOCK,
            Self::Close => CLOSE,
        }
    }

    pub fn key(&self) -> Option<&LockKey> {
        match self {
            Self::AcquireLock(key) | Self::TryAcquireLock(key) | Self::ReleaseLock(key) => Some(key),
            Self::Close => None,
        }
    }
}

/// Server to client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Answer to both `acquire_lock` and a successful `try_acquire_lock`
    LockAcquired(LockKey),
    TryAcquireFailed { key: LockKey, reason: String },
    LockReleased { key: LockKey, released: bool },
    TooFewArguments,
    UnknownCommand { command: String },
}

impl Response {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LockAcquired(_) => LOCK_ACQUIRED,
            Self::TryAcquireFailed { .. } => LOCK_TRY_ACQUIRE_FAILED,
            Self::LockReleased { .. } => LOCK_RELEASED,
            Self::TooFewArguments => TOO_FEW_ARGUMENTS,
            Self::UnknownCommand { .. } => UNKNOWN_COMMAND,
        }
    }

    pub fn key(&self) -> Option<&LockKey> {
        match self {
            Self::LockAcquired(key) | Self::TryAcquireFailed { key, .. } | Self::LockReleased { key, .. } => Some(key),
            Self::TooFewArguments | Self::UnknownCommand { .. } => None,
        }
    }

    /// Holder named by a try-acquire failure
    pub fn owner(&self) -> Option<&str> {
        match self {
            Self::TryAcquireFailed { reason, .. } => Some(reason.strip_prefix(OWNER_PREFIX).unwrap_or(reason)),
            _ => None,
        }
    }
}

fn split_fields(line: &str) -> Result<Vec<&str>, ProtocolError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(ProtocolError::Empty);
    }
    Ok(line.split(FIELD_DELIMITER).collect())
}

fn parse_key(command: &str, fields: &[&str]) -> Result<LockKey, ProtocolError> {
    match fields {
        [_, lock_name, entity, ..] if !lock_name.is_empty() && !entity.is_empty() => {
            let key = LockKey::new(*lock_name, *entity);
            key.validate()?;
            Ok(key)
        }
        _ => Err(ProtocolError::TooFewArguments {
            command: command.to_string(),
        }),
    }
}

fn parse_status<'a>(response: &str, fields: &[&'a str]) -> Result<&'a str, ProtocolError> {
    fields.get(3).copied().ok_or_else(|| ProtocolError::UnexpectedStatus {
        response: response.to_string(),
        status: String::new(),
    })
}

fn encode_key(name: &str, key: &LockKey) -> Result<String, ProtocolError> {
    key.validate()?;
    Ok(format!("{name}{FIELD_DELIMITER}{}{FIELD_DELIMITER}{}{FIELD_DELIMITER}", key.lock_name, key.entity))
}

impl WireMessage for Command {
    fn parse(line: &str) -> Result<Self, ProtocolError> {
        let fields = split_fields(line)?;
        let name = fields[0].trim();
        match name {
            ACQUIRE_LOCK => Ok(Self::AcquireLock(parse_key(name, &fields)?)),
            TRY_ACQUIRE_LOCK => Ok(Self::TryAcquireLock(parse_key(name, &fields)?)),
            RELEASE_LOCK => Ok(Self::ReleaseLock(parse_key(name, &fields)?)),
            CLOSE => Ok(Self::Close),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }

    fn encode(&self) -> Result<String, ProtocolError> {
        match self {
            Self::AcquireLock(key) | Self::TryAcquireLock(key) | Self::ReleaseLock(key) => encode_key(self.name(), key),
            Self::Close => Ok(CLOSE.to_string()),
        }
    }
}

impl WireMessage for Response {
    fn parse(line: &str) -> Result<Self, ProtocolError> {
        let fields = split_fields(line)?;
        let name = fields[0].trim();
        match name {
            LOCK_ACQUIRED => {
                let key = parse_key(name, &fields)?;
                match parse_status(name, &fields)? {
                    LOCK_ACQUIRED => Ok(Self::LockAcquired(key)),
                    status => Err(ProtocolError::UnexpectedStatus {
                        response: name.to_string(),
                        status: status.to_string(),
                    }),
                }
            }
            LOCK_TRY_ACQUIRE_FAILED => {
                let key = parse_key(name, &fields)?;
                let reason = parse_status(name, &fields)?.to_string();
                Ok(Self::TryAcquireFailed { key, reason })
            }
            LOCK_RELEASED => {
                let key = parse_key(name, &fields)?;
                let released = match parse_status(name, &fields)? {
                    LOCK_RELEASED => true,
                    RELEASE_ERROR => false,
                    status => {
                        return Err(ProtocolError::UnexpectedStatus {
                            response: name.to_string(),
                            status: status.to_string(),
                        });
                    }
                };
                Ok(Self::LockReleased { key, released })
            }
            TOO_FEW_ARGUMENTS => Ok(Self::TooFewArguments),
            UNKNOWN_COMMAND => Ok(Self::UnknownCommand {
                command: fields.get(1).map(|s| s.to_string()).unwrap_or_default(),
            }),
            other => Err(ProtocolError::UnknownResponse(other.to_string())),
        }
    }

    fn encode(&self) -> Result<String, ProtocolError> {
        let status = match self {
            Self::LockAcquired(_) => LOCK_ACQUIRED,
            Self::TryAcquireFailed { reason, .. } => {
                validate_field(reason)?;
                reason.as_str()
            }
            Self::LockReleased { released: true, .. } => LOCK_RELEASED,
            Self::LockReleased { released: false, .. } => RELEASE_ERROR,
            Self::TooFewArguments => return Ok(TOO_FEW_ARGUMENTS.to_string()),
            Self::UnknownCommand { command } => {
                // Echoed as received, minus anything that would break the framing
                let command = command.replace(['\n', '\r'], "").replace(FIELD_DELIMITER, "");
                return Ok(format!("{UNKNOWN_COMMAND}{FIELD_DELIMITER}{command}{FIELD_DELIMITER}"));
            }
        };
        let mut line = match self.key() {
            Some(key) => encode_key(self.name(), key)?,
            None => return Err(ProtocolError::Empty),
        };
        line.push_str(status);
        line.push_str(FIELD_DELIMITER);
        Ok(line)
    }
}

/// Typed framing over [`LinesCodec`].
///
/// Decoding yields `Result<In, ProtocolError>` so a malformed line is reported
/// to the caller without tearing down the stream. A line that is not UTF-8 is
/// malformed too. I/O failures and over-long lines surface as the stream error.
#[derive(Debug)]
pub struct LockCodec<In, Out> {
    lines: LinesCodec,
    _marker: PhantomData<fn(Out) -> In>,
}

/// Codec used by servers: reads commands, writes responses
pub type ServerCodec = LockCodec<Command, Response>;

/// Codec used by clients: reads responses, writes commands
pub type ClientCodec = LockCodec<Response, Command>;

impl<In, Out> LockCodec<In, Out> {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_line_length),
            _marker: PhantomData,
        }
    }
}

impl<In, Out> Default for LockCodec<In, Out> {
    fn default() -> Self {
        Self::new(dlock_config::DEFAULT_MAX_LINE_LENGTH)
    }
}

impl<In: WireMessage, Out> Decoder for LockCodec<In, Out> {
    type Item = Result<In, ProtocolError>;
    type Error = LockError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        parse_line(self.lines.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        parse_line(self.lines.decode_eof(src))
    }
}

// LinesCodec has already consumed a line that failed UTF-8 validation.
fn parse_line<In: WireMessage>(
    line: Result<Option<String>, LinesCodecError>,
) -> Result<Option<Result<In, ProtocolError>>, LockError> {
    match line {
        Ok(line) => Ok(line.map(|line| In::parse(&line))),
        Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => Ok(Some(Err(ProtocolError::InvalidUtf8))),
        Err(e) => Err(e.into()),
    }
}

impl<In, Out: WireMessage> Encoder<Out> for LockCodec<In, Out> {
    type Error = LockError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.encode()?;
        self.lines.encode(line, dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(lock: &str, entity: &str) -> LockKey {
        LockKey::new(lock, entity)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse("acquire_lock||orders||w1||").unwrap(),
            Command::AcquireLock(key("orders", "w1"))
        );
        assert_eq!(
            Command::parse("try_acquire_lock||orders||w1").unwrap(),
            Command::TryAcquireLock(key("orders", "w1"))
        );
        assert_eq!(
            Command::parse("release_lock||orders||w1||\r").unwrap(),
            Command::ReleaseLock(key("orders", "w1"))
        );
        assert_eq!(Command::parse("close").unwrap(), Command::Close);
        assert_eq!(Command::parse(" close ").unwrap(), Command::Close);
    }

    #[test]
    fn test_parse_malformed_commands() {
        assert_eq!(Command::parse(""), Err(ProtocolError::Empty));
        assert!(matches!(
            Command::parse("acquire_lock||orders"),
            Err(ProtocolError::TooFewArguments { .. })
        ));
        assert!(matches!(
            Command::parse("release_lock||||||"),
            Err(ProtocolError::TooFewArguments { .. })
        ));
        assert!(matches!(
            Command::parse("acquire_lock||orders||w1|"),
            Err(ProtocolError::InvalidField(_))
        ));
        assert_eq!(
            Command::parse("steal_lock||orders||w1||"),
            Err(ProtocolError::UnknownCommand("steal_lock".to_string()))
        );
    }

    #[test]
    fn test_error_replies() {
        assert_eq!(
            ProtocolError::UnknownCommand("nope".into()).reply().encode().unwrap(),
            "unknown_command||nope||"
        );
        assert_eq!(
            ProtocolError::TooFewArguments { command: "acquire_lock".into() }
                .reply()
                .encode()
                .unwrap(),
            "too_few_arguments"
        );
        assert_eq!(ProtocolError::Empty.reply(), Response::TooFewArguments);
    }

    #[test]
    fn test_encode_responses() {
        assert_eq!(
            Response::LockAcquired(key("l", "e")).encode().unwrap(),
            "lock_acquired||l||e||lock_acquired||"
        );
        assert_eq!(
            Response::TryAcquireFailed {
                key: key("l", "e"),
                reason: "owner=other".into()
            }
            .encode()
            .unwrap(),
            "lock_try_acquire_failed||l||e||owner=other||"
        );
        assert_eq!(
            Response::LockReleased {
                key: key("l", "e"),
                released: false
            }
            .encode()
            .unwrap(),
            "lock_released||l||e||release_error||"
        );
    }

    #[test]
    fn test_parse_responses() {
        let failed = Response::parse("lock_try_acquire_failed||l||e||owner=w9||").unwrap();
        assert_eq!(failed.owner(), Some("w9"));
        assert_eq!(failed.key(), Some(&key("l", "e")));

        assert_eq!(
            Response::parse("lock_released||l||e||lock_released||").unwrap(),
            Response::LockReleased {
                key: key("l", "e"),
                released: true
            }
        );
        assert_eq!(Response::parse("too_few_arguments").unwrap(), Response::TooFewArguments);
        assert!(matches!(
            Response::parse("lock_acquired||l||e||maybe||"),
            Err(ProtocolError::UnexpectedStatus { .. })
        ));
        assert!(matches!(
            Response::parse("lock_released||l||e"),
            Err(ProtocolError::UnexpectedStatus { .. })
        ));
        assert!(matches!(Response::parse("hello||l||e||"), Err(ProtocolError::UnknownResponse(_))));
    }

    #[test]
    fn test_encode_rejects_invalid_fields() {
        for bad in ["a||b", "line\nbreak", "cr\r", "pipe|", ""] {
            let err = Command::AcquireLock(key("orders", bad)).encode().unwrap_err();
            assert!(matches!(err, ProtocolError::InvalidField(_)), "{bad:?} should be rejected");
        }
        assert!(Command::ReleaseLock(key("or|ders", "a|b")).encode().is_ok());
    }

    #[test]
    fn test_codec_decodes_partial_and_malformed_lines() {
        let mut codec = ServerCodec::default();
        let mut buf = BytesMut::from("acquire_lock||l||e||\nbogus\ntry_acq");

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Ok(Command::AcquireLock(key("l", "e"))))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Err(ProtocolError::UnknownCommand("bogus".into())))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"uire_lock||l||e2||\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Ok(Command::TryAcquireLock(key("l", "e2"))))
        );
    }

    #[test]
    fn test_codec_skips_invalid_utf8_line() {
        let mut codec = ServerCodec::default();
        let mut buf = BytesMut::from(&b"acquire_lock||\xff\xfe||e||\ntry_acquire_lock||ok||e||\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Err(ProtocolError::InvalidUtf8)));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Ok(Command::TryAcquireLock(key("ok", "e"))))
        );
        assert_eq!(ProtocolError::InvalidUtf8.reply(), Response::TooFewArguments);

        let mut buf = BytesMut::from(&b"release_lock||\xff||e||"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(Err(ProtocolError::InvalidUtf8)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_line_limit_is_fatal() {
        let mut codec = ServerCodec::new(16);
        let mut buf = BytesMut::from("acquire_lock||a_very_long_lock_name||e||\n");
        assert!(matches!(
            codec.decode(&mut buf),
            Err(LockError::Protocol(ProtocolError::LineTooLong))
        ));
    }

    #[test]
    fn test_codec_encode() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(Command::AcquireLock(key("l", "e")), &mut buf).unwrap();
        codec.encode(Command::Close, &mut buf).unwrap();
        assert_eq!(&buf[..], b"acquire_lock||l||e||\nclose\n");

        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.encode(Command::TryAcquireLock(key("l", "a||b")), &mut buf),
            Err(LockError::Protocol(ProtocolError::InvalidField(_)))
        ));
        assert!(buf.is_empty());
    }
}
