//! Proptest generators for property-based testing.

use proptest::prelude::*;

use revsync_core::{AddressRange, CanonicalAddress, CommentKey, CommentKind, CommentStore, ContentHash};
use revsync_sync::{Command, SyncMessage};

/// One author's contribution to a comment slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentUpdate {
    pub author: String,
    pub text: String,
    pub ts: u64,
}

/// Authors drawn from a small pool so updates collide.
pub fn author() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["alice", "bob", "carol"]).prop_map(String::from)
}

/// Comment text; empty means a retraction.
pub fn comment_text() -> impl Strategy<Value = String> {
    prop_oneof![
        1 => Just(String::new()),
        4 => "[a-zA-Z0-9 _.]{1,24}".prop_map(String::from),
    ]
}

/// A timestamp from a narrow range, so equal timestamps happen.
pub fn timestamp() -> impl Strategy<Value = u64> {
    0u64..16
}

pub fn comment_update() -> impl Strategy<Value = CommentUpdate> {
    (author(), comment_text(), timestamp()).prop_map(|(author, text, ts)| CommentUpdate { author, text, ts })
}

/// Up to `max` updates.
pub fn comment_updates(max: usize) -> impl Strategy<Value = Vec<CommentUpdate>> {
    prop::collection::vec(comment_update(), 0..=max)
}

/// Apply `updates` to `key` in order.
pub fn apply_all(store: &mut CommentStore, key: CommentKey, updates: &[CommentUpdate]) {
    for u in updates {
        store.apply(key, &u.author, &u.text, u.ts);
    }
}

pub fn canonical_address() -> impl Strategy<Value = CanonicalAddress> {
    any::<u64>().prop_map(CanonicalAddress)
}

pub fn comment_kind() -> impl Strategy<Value = CommentKind> {
    prop_oneof![
        Just(CommentKind::Primary),
        Just(CommentKind::Repeatable),
        (0u32..20).prop_map(CommentKind::Extra),
    ]
}

pub fn address_range() -> impl Strategy<Value = AddressRange> {
    (any::<u64>(), any::<u64>()).prop_filter_map("empty range", |(a, b)| {
        AddressRange::new(CanonicalAddress(a.min(b)), CanonicalAddress(a.max(b)))
    })
}

/// A valid command of any known kind.
pub fn command() -> impl Strategy<Value = Command> {
    prop_oneof![
        (canonical_address(), comment_text(), any::<bool>()).prop_map(|(addr, text, repeatable)| {
            Command::Comment {
                addr,
                text,
                repeatable,
            }
        }),
        (canonical_address(), 0u32..20, comment_text())
            .prop_map(|(addr, line, text)| Command::ExtraComment { addr, line, text }),
        (address_range(), comment_text()).prop_map(|(range, text)| Command::AreaComment { range, text }),
        (canonical_address(), "[a-z_][a-z0-9_]{0,15}")
            .prop_map(|(addr, text)| Command::Rename { addr, text }),
        Just(Command::Join),
    ]
}

/// A message on channel `key`.
pub fn sync_message(key: ContentHash) -> impl Strategy<Value = SyncMessage> {
    (author(), any::<u32>(), command())
        .prop_map(move |(user, ts, command)| SyncMessage::new(key, user, u64::from(ts), command))
}
