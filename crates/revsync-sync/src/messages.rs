//! Sync message types.
//!
//! [`WireMessage`] is the flat key/value record exchanged over pub/sub.
//! [`SyncMessage`] is its validated, typed form; see the
//! [`protocol`](crate::protocol) module for the conversion rules.

use serde::{Deserialize, Serialize};

use revsync_core::{AddressRange, CanonicalAddress, ContentHash};

/// Message size limits.
pub mod limits {
    /// Max bytes of `text`.
    pub const MAX_TEXT_LEN: usize = 64 * 1024;
    /// Max bytes of `user`.
    pub const MAX_USER_LEN: usize = 256;
    /// Max extra comment line index.
    ///
    /// Hosts number extra lines absolutely: anterior lines are `1000 + n`,
    /// posterior lines `2000 + n`.
    pub const MAX_EXTRA_LINE: u32 = 2999;
}

/// Command names as they appear in the `cmd` field.
pub mod cmd {
    pub const COMMENT: &str = "comment";
    pub const EXTRA_COMMENT: &str = "extra_comment";
    pub const AREA_COMMENT: &str = "area_comment";
    pub const RENAME: &str = "rename";
    pub const JOIN: &str = "join";
}

/// The record as carried by the transport.
///
/// Every field but `cmd` is optional on the wire; which ones are required
/// depends on `cmd`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Vec<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub repeatable: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub replay: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A typed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Regular or repeatable comment contribution.
    Comment {
        addr: CanonicalAddress,
        text: String,
        repeatable: bool,
    },
    /// One line of an extra comment block.
    ExtraComment {
        addr: CanonicalAddress,
        line: u32,
        text: String,
    },
    /// Comment on an address range. Display only.
    AreaComment { range: AddressRange, text: String },
    /// Symbol rename.
    Rename { addr: CanonicalAddress, text: String },
    /// A peer joined the channel.
    Join,
    /// Accepted by the protocol, rejected at dispatch.
    Unknown { cmd: String },
}

impl Command {
    /// The `cmd` field value.
    pub fn name(&self) -> &str {
        match self {
            Command::Comment { .. } => cmd::COMMENT,
            Command::ExtraComment { .. } => cmd::EXTRA_COMMENT,
            Command::AreaComment { .. } => cmd::AREA_COMMENT,
            Command::Rename { .. } => cmd::RENAME,
            Command::Join => cmd::JOIN,
            Command::Unknown { cmd } => cmd,
        }
    }
}

/// A validated message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMessage {
    /// Channel the message belongs to.
    pub key: ContentHash,
    /// Author.
    pub user: String,
    /// Unix seconds; 0 means unknown/oldest.
    pub ts: u64,
    /// Delivered as backlog on join.
    pub replay: bool,
    pub command: Command,
}

impl SyncMessage {
    pub fn new(key: ContentHash, user: impl Into<String>, ts: u64, command: Command) -> Self {
        Self {
            key,
            user: user.into(),
            ts,
            replay: false,
            command,
        }
    }

    /// Mark as historical backlog.
    pub fn replayed(mut self) -> Self {
        self.replay = true;
        self
    }

    /// Convert to the wire record. `key` travels as the topic, not a field.
    pub fn to_wire(&self) -> WireMessage {
        let mut wire = WireMessage {
            cmd: self.command.name().to_string(),
            user: Some(self.user.clone()),
            ts: Some(i64::try_from(self.ts).unwrap_or(i64::MAX)),
            replay: self.replay,
            ..WireMessage::default()
        };
        match &self.command {
            Command::Comment {
                addr,
                text,
                repeatable,
            } => {
                wire.addr = Some(addr.0);
                wire.text = Some(text.clone());
                wire.repeatable = *repeatable;
            }
            Command::ExtraComment { addr, line, text } => {
                wire.addr = Some(addr.0);
                wire.line = Some(*line);
                wire.text = Some(text.clone());
            }
            Command::AreaComment { range, text } => {
                wire.range = Some(vec![range.start.0, range.end.0]);
                wire.text = Some(text.clone());
            }
            Command::Rename { addr, text } => {
                wire.addr = Some(addr.0);
                wire.text = Some(text.clone());
            }
            Command::Join | Command::Unknown { .. } => {}
        }
        wire
    }
}
