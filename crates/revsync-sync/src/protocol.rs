//! Message encoding and validation.
//!
//! Payloads are JSON objects. Validation happens before dispatch:
//!
//! 1. `user` present and within limits
//! 2. `ts` is a non-negative integer (absent means 0, the oldest)
//! 3. required fields present for the `cmd`
//! 4. `range` is exactly `[start, end]` with `start <= end`
//!
//! Unknown `cmd` values pass validation as [`Command::Unknown`]; the router
//! rejects them.

use serde::{Deserialize, Serialize};

use revsync_core::{AddressRange, CanonicalAddress, ContentHash, ReservedNames, RESERVED_PREFIXES};

use crate::error::{Result, SyncError};
use crate::messages::{cmd, limits, Command, SyncMessage, WireMessage};

/// Configuration for routing behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Renames to names with these prefixes are never published.
    pub reserved_prefixes: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reserved_prefixes: RESERVED_PREFIXES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl SyncConfig {
    pub fn reserved_names(&self) -> ReservedNames {
        ReservedNames::new(self.reserved_prefixes.iter().cloned())
    }
}

/// Encode a message payload for publishing.
pub fn encode(message: &SyncMessage) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&message.to_wire())?)
}

/// Decode and validate a payload received on channel `key`.
///
/// `replay` is the transport's backlog flag; it is OR-ed with the payload's
/// own `replay` field.
pub fn decode(key: ContentHash, payload: &[u8], replay: bool) -> Result<SyncMessage> {
    let wire: WireMessage = serde_json::from_slice(payload)?;
    let mut message = validate(key, wire)?;
    message.replay |= replay;
    Ok(message)
}

/// Validate a wire record into a typed message.
pub fn validate(key: ContentHash, wire: WireMessage) -> Result<SyncMessage> {
    let user = wire
        .user
        .ok_or_else(|| SyncError::InvalidMessage("missing user".into()))?;
    if user.len() > limits::MAX_USER_LEN {
        return Err(SyncError::InvalidMessage("user too long".into()));
    }

    let ts = match wire.ts {
        None => 0,
        Some(ts) => u64::try_from(ts)
            .map_err(|_| SyncError::InvalidMessage(format!("negative ts: {ts}")))?,
    };

    if let Some(text) = &wire.text {
        check_text(text)?;
    }

    let command = match wire.cmd.as_str() {
        cmd::COMMENT => Command::Comment {
            addr: require_addr(wire.addr, &wire.cmd)?,
            text: require_text(wire.text, &wire.cmd)?,
            repeatable: wire.repeatable,
        },
        cmd::EXTRA_COMMENT => {
            let line = wire
                .line
                .ok_or_else(|| SyncError::InvalidMessage("extra_comment missing line".into()))?;
            check_line(line)?;
            Command::ExtraComment {
                addr: require_addr(wire.addr, &wire.cmd)?,
                line,
                text: require_text(wire.text, &wire.cmd)?,
            }
        }
        cmd::AREA_COMMENT => Command::AreaComment {
            range: require_range(wire.range.as_deref())?,
            text: require_text(wire.text, &wire.cmd)?,
        },
        cmd::RENAME => Command::Rename {
            addr: require_addr(wire.addr, &wire.cmd)?,
            text: require_text(wire.text, &wire.cmd)?,
        },
        cmd::JOIN => Command::Join,
        other => Command::Unknown {
            cmd: other.to_string(),
        },
    };

    Ok(SyncMessage {
        key,
        user,
        ts,
        replay: wire.replay,
        command,
    })
}

/// Reject text over [`limits::MAX_TEXT_LEN`].
pub fn check_text(text: &str) -> Result<()> {
    if text.len() > limits::MAX_TEXT_LEN {
        return Err(SyncError::InvalidMessage("text too long".into()));
    }
    Ok(())
}

/// Reject extra comment lines past [`limits::MAX_EXTRA_LINE`].
pub fn check_line(line: u32) -> Result<()> {
    if line > limits::MAX_EXTRA_LINE {
        return Err(SyncError::InvalidMessage(format!("line out of range: {line}")));
    }
    Ok(())
}

fn require_addr(addr: Option<u64>, cmd: &str) -> Result<CanonicalAddress> {
    addr.map(CanonicalAddress)
        .ok_or_else(|| SyncError::InvalidMessage(format!("{cmd} missing addr")))
}

fn require_text(text: Option<String>, cmd: &str) -> Result<String> {
    text.ok_or_else(|| SyncError::InvalidMessage(format!("{cmd} missing text")))
}

fn require_range(range: Option<&[u64]>) -> Result<AddressRange> {
    match range {
        Some([start, end]) => AddressRange::new(CanonicalAddress(*start), CanonicalAddress(*end))
            .ok_or_else(|| SyncError::InvalidMessage("inverted range".into())),
        Some(_) => Err(SyncError::InvalidMessage("range must have two bounds".into())),
        None => Err(SyncError::InvalidMessage("area_comment missing range".into())),
    }
}
