//! # Shared Relay Protocol Library
//!
//! This module contains the wire protocol shared by the relay server and its
//! clients. It is the single source of truth for datagram classification,
//! command parsing, reply formatting, and the protocol constants both sides
//! must agree on.
//!
//! ## Protocol Summary
//!
//! Every logical message is one UDP datagram, capped at [`MAX_DATAGRAM`]
//! bytes. A datagram whose first byte is `!` (0x21) is a **command**; any
//! other datagram is a **payload** that the relay forwards verbatim to the
//! sender's group co-members.
//!
//! ### Commands
//! Commands are UTF-8 text. The verb is the first space-delimited token
//! including the leading `!`, matched byte-for-byte (uppercase only):
//! - `!CREATE` — create a new group, returns `OK CREATED <id>`
//! - `!JOIN <id>` — join an existing group, returns `OK JOINED <id>`
//! - `!LEAVE <id>` — leave a specific group, returns `OK LEFT <id>`
//! - `!PING` — heartbeat, returns `PONG <seconds>`
//! - `!WHO` — returns `OK WHO <id> <count>` for the current group
//!
//! ### Errors
//! Error replies have the shape `ERR <CODE> <Message>` where the code is
//! drawn from the closed set in [`ErrorCode`] and the message is a single
//! token so client-side parsers stay trivial.
//!
//! ### Group IDs
//! Eight characters from the 34-symbol alphabet `A–Z, 1–9` with `O` and `0`
//! excluded to prevent human transcription errors. IDs are validated on the
//! client side and again on `!JOIN`/`!LEAVE`.

use std::fmt;

/// Hard cap on a single datagram, commands and payloads alike.
///
/// The relay receives into a buffer one byte larger so that a datagram
/// filling past this cap is detectable and rejected rather than silently
/// truncated.
pub const MAX_DATAGRAM: usize = 4096;

/// Length of a group identifier in characters.
pub const GROUP_ID_LEN: usize = 8;

/// Alphabet group IDs are drawn from: uppercase letters and digits with
/// `O` and `0` excluded. 34 symbols. Do not extend without a protocol
/// version bump — clients validate IDs against this set.
pub const GROUP_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNPQRSTUVWXYZ123456789";

/// Returns true when the datagram is a command (first byte is `!`).
pub fn is_command(data: &[u8]) -> bool {
    data.first() == Some(&b'!')
}

/// Returns true when `id` has the exact shape of a group identifier:
/// eight characters, all from [`GROUP_ID_ALPHABET`] (`^[A-NP-Z1-9]{8}$`).
pub fn is_valid_group_id(id: &str) -> bool {
    id.len() == GROUP_ID_LEN && id.bytes().all(|b| GROUP_ID_ALPHABET.contains(&b))
}

/// A parsed relay command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create,
    Join { id: String },
    Leave { id: String },
    Ping,
    Who,
}

impl Command {
    /// Parses a command datagram into a [`Command`].
    ///
    /// The caller has already classified the datagram via [`is_command`].
    /// Verbs are case-sensitive; arguments are separated by single spaces.
    /// Any parse failure yields the exact wire error the relay must send:
    /// `BAD_CMD UnknownCommand` for an unrecognized or malformed verb,
    /// `BAD_ARG Usage:...` when the verb is recognized but the argument
    /// count or shape is wrong.
    pub fn parse(data: &[u8]) -> Result<Command, ErrorReply> {
        let text = std::str::from_utf8(data).map_err(|_| ErrorReply::unknown_command())?;
        let mut tokens = text.split(' ');
        let verb = tokens.next().unwrap_or("");
        let args: Vec<&str> = tokens.collect();

        match verb {
            "!CREATE" => {
                if !args.is_empty() {
                    return Err(ErrorReply::usage("Usage:!CREATE"));
                }
                Ok(Command::Create)
            }
            "!JOIN" => match args.as_slice() {
                [id] if is_valid_group_id(id) => Ok(Command::Join { id: (*id).to_string() }),
                _ => Err(ErrorReply::usage("Usage:!JOIN <GROUPID>")),
            },
            "!LEAVE" => match args.as_slice() {
                [id] if is_valid_group_id(id) => Ok(Command::Leave { id: (*id).to_string() }),
                _ => Err(ErrorReply::usage("Usage:!LEAVE <GROUPID>")),
            },
            "!PING" => {
                if !args.is_empty() {
                    return Err(ErrorReply::usage("Usage:!PING"));
                }
                Ok(Command::Ping)
            }
            "!WHO" => {
                if !args.is_empty() {
                    return Err(ErrorReply::usage("Usage:!WHO"));
                }
                Ok(Command::Who)
            }
            _ => Err(ErrorReply::unknown_command()),
        }
    }
}

/// Closed set of wire error codes. Stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Unknown verb or malformed leading bytes.
    BadCmd,
    /// Verb recognized; arguments wrong shape or count.
    BadArg,
    /// Referenced group ID is not live.
    NoSuchGroup,
    /// Operation requires membership; sender has none.
    NotInGroup,
    /// The group cap would be exceeded.
    GroupFull,
    /// Creator is at the ownership limit.
    OwnerLimit,
    /// Datagram exceeds [`MAX_DATAGRAM`] bytes.
    TooLarge,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadCmd => "BAD_CMD",
            ErrorCode::BadArg => "BAD_ARG",
            ErrorCode::NoSuchGroup => "NO_SUCH_GROUP",
            ErrorCode::NotInGroup => "NOT_IN_GROUP",
            ErrorCode::GroupFull => "GROUP_FULL",
            ErrorCode::OwnerLimit => "OWNER_LIMIT",
            ErrorCode::TooLarge => "TOO_LARGE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error reply as it goes on the wire: a code plus a single-token
/// (or usage-string) message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReply {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorReply {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn unknown_command() -> Self {
        Self::new(ErrorCode::BadCmd, "UnknownCommand")
    }

    fn usage(usage: &str) -> Self {
        Self::new(ErrorCode::BadArg, usage)
    }
}

impl fmt::Display for ErrorReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ERR {} {}", self.code, self.message)
    }
}

/// A reply envelope the relay sends back for a command datagram.
///
/// One reply per datagram, UTF-8, no terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Created { id: String },
    Joined { id: String },
    Left { id: String },
    Who { id: String, count: usize },
    /// Heartbeat reply carrying the server's advertised interval in whole
    /// seconds.
    Pong { seconds: u64 },
    Error(ErrorReply),
}

impl Reply {
    pub fn into_bytes(self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl From<ErrorReply> for Reply {
    fn from(err: ErrorReply) -> Self {
        Reply::Error(err)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Created { id } => write!(f, "OK CREATED {}", id),
            Reply::Joined { id } => write!(f, "OK JOINED {}", id),
            Reply::Left { id } => write!(f, "OK LEFT {}", id),
            Reply::Who { id, count } => write!(f, "OK WHO {} {}", id, count),
            Reply::Pong { seconds } => write!(f, "PONG {}", seconds),
            Reply::Error(err) => err.fmt(f),
        }
    }
}
