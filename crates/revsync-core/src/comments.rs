//! Comment state merging.
//!
//! Every commented location is a [`CommentRecord`] keyed by
//! `(CanonicalAddress, CommentKind)`. A record keeps one contribution per
//! author (last-writer-wins per author, by timestamp) and a cached merged
//! display string.
//!
//! ## Merged display
//!
//! Contributions are ordered by ascending timestamp, ties broken by author
//! name, and each non-empty one renders as `[author] text`. Rendered
//! contributions are joined with [`COMMENT_DELIMITER`]. The display is a
//! pure function of the contribution set, so peers that hold the same
//! contributions show the same text no matter what order updates arrived in.
//!
//! ## Echo detection
//!
//! Writing a merged display into the host fires the host's "comment changed"
//! hook. [`CommentStore::parse_local_update`] compares the observed text with
//! the cached display and reports [`LocalUpdate::Unchanged`] for such echoes,
//! which is what keeps peers from republishing each other's updates forever.

use std::collections::BTreeMap;

use crate::canonical::CanonicalAddress;

/// Separator between rendered contributions.
pub const COMMENT_DELIMITER: &str = "\x1f\n";

/// Which comment slot at an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommentKind {
    /// Regular comment.
    Primary,
    /// Repeatable comment (shown at every reference).
    Repeatable,
    /// One line of the extra (anterior/posterior) comment block.
    Extra(u32),
}

/// Key of a comment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommentKey {
    pub addr: CanonicalAddress,
    pub kind: CommentKind,
}

impl CommentKey {
    pub const fn new(addr: CanonicalAddress, kind: CommentKind) -> Self {
        Self { addr, kind }
    }
}

/// One author's latest text for a record.
///
/// An empty `text` is a retraction. It is kept with its timestamp so that a
/// stale re-delivery of the old text cannot bring it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contribution {
    pub text: String,
    pub ts: u64,
}

/// Merged state for one `(address, kind)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentRecord {
    contributions: BTreeMap<String, Contribution>,
    display: String,
}

impl CommentRecord {
    /// The last-applied display value.
    pub fn display(&self) -> &str {
        &self.display
    }

    /// The contribution held for `author`, if any.
    pub fn contribution(&self, author: &str) -> Option<&Contribution> {
        self.contributions.get(author)
    }

    /// Iterate contributions in author order.
    pub fn contributions(&self) -> impl Iterator<Item = (&str, &Contribution)> {
        self.contributions.iter().map(|(a, c)| (a.as_str(), c))
    }

    fn upsert(&mut self, author: &str, text: String, ts: u64) {
        self.contributions
            .insert(author.to_string(), Contribution { text, ts });
        self.display = render(&self.contributions);
    }
}

/// Result of applying a remote update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The record changed; write this merged text into the host.
    Updated(String),
    /// Stale or duplicate; nothing to write.
    Ignored,
}

/// Result of observing a local comment change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalUpdate {
    /// A genuine edit. Broadcast this text as the local user's slot.
    Changed(String),
    /// An echo of applied state, or nothing new for this author.
    Unchanged,
}

impl LocalUpdate {
    pub fn is_changed(&self) -> bool {
        matches!(self, LocalUpdate::Changed(_))
    }
}

/// The comment table. Owned by the mutation context; the only writer.
#[derive(Debug, Clone, Default)]
pub struct CommentStore {
    records: BTreeMap<CommentKey, CommentRecord>,
}

impl CommentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a remote contribution.
    ///
    /// A timestamp older than what `author` already has is ignored. An equal
    /// timestamp keeps the lexicographically greater text, so duplicates and
    /// reordered deliveries settle on the same contribution everywhere.
    pub fn apply(
        &mut self,
        key: CommentKey,
        author: &str,
        text: &str,
        ts: u64,
    ) -> MergeOutcome {
        let record = self.records.entry(key).or_default();

        if let Some(existing) = record.contributions.get(author) {
            if ts < existing.ts {
                tracing::trace!(?key, author, ts, held = existing.ts, "stale comment ignored");
                return MergeOutcome::Ignored;
            }
            if ts == existing.ts && text <= existing.text.as_str() {
                return MergeOutcome::Ignored;
            }
        }

        record.upsert(author, text.to_string(), ts);
        MergeOutcome::Updated(record.display.clone())
    }

    /// Observe the host's current text for `key` after a local change.
    ///
    /// Text equal to the last-applied display is an echo. Otherwise the
    /// local user's slot is extracted from the text (their own `[user] `
    /// fields are unwrapped, other known authors' fields are dropped,
    /// untagged text is kept) and upserted with a timestamp of at least
    /// `now`, strictly newer than the user's previous contribution.
    pub fn parse_local_update(
        &mut self,
        key: CommentKey,
        local_user: &str,
        current_text: &str,
        now: u64,
    ) -> LocalUpdate {
        let record = self.records.entry(key).or_default();

        if current_text == record.display {
            return LocalUpdate::Unchanged;
        }

        let slot = extract_slot(record, local_user, current_text);
        let previous = record.contributions.get(local_user);
        let held = previous.map(|c| c.text.as_str()).unwrap_or("");
        if slot == held {
            return LocalUpdate::Unchanged;
        }

        let ts = match previous {
            Some(c) => now.max(c.ts.saturating_add(1)),
            None => now,
        };
        record.upsert(local_user, slot.clone(), ts);
        LocalUpdate::Changed(slot)
    }

    /// The record for `key`.
    pub fn get(&self, key: &CommentKey) -> Option<&CommentRecord> {
        self.records.get(key)
    }

    /// Merged display for `key`, empty if none.
    pub fn display(&self, key: &CommentKey) -> &str {
        self.records.get(key).map(|r| r.display()).unwrap_or("")
    }

    /// Iterate records in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&CommentKey, &CommentRecord)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop all state (file closed).
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

fn author_tag(author: &str) -> String {
    format!("[{author}] ")
}

fn render(contributions: &BTreeMap<String, Contribution>) -> String {
    let mut ordered: Vec<(&String, &Contribution)> = contributions
        .iter()
        .filter(|(_, c)| !c.text.is_empty())
        .collect();
    ordered.sort_by(|(a1, c1), (a2, c2)| c1.ts.cmp(&c2.ts).then_with(|| a1.cmp(a2)));

    ordered
        .into_iter()
        .map(|(author, c)| format!("{}{}", author_tag(author), c.text))
        .collect::<Vec<_>>()
        .join(COMMENT_DELIMITER)
}

fn extract_slot(record: &CommentRecord, local_user: &str, current_text: &str) -> String {
    let own_tag = author_tag(local_user);
    let mut kept = Vec::new();

    'fields: for field in current_text.split(COMMENT_DELIMITER) {
        if let Some(own) = field.strip_prefix(own_tag.as_str()) {
            kept.push(own);
            continue;
        }
        for author in record.contributions.keys() {
            if author != local_user && field.starts_with(&author_tag(author)) {
                continue 'fields;
            }
        }
        kept.push(field);
    }

    kept.retain(|f| !f.is_empty());
    kept.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn primary(addr: u64) -> CommentKey {
        CommentKey::new(CanonicalAddress(addr), CommentKind::Primary)
    }

    #[test]
    fn test_apply_single_author() {
        let mut store = CommentStore::new();
        let out = store.apply(primary(0x10), "alice", "hello", 100);
        assert_eq!(out, MergeOutcome::Updated("[alice] hello".into()));
        assert_eq!(store.display(&primary(0x10)), "[alice] hello");
    }

    #[test]
    fn test_echo_suppressed() {
        let mut store = CommentStore::new();
        let MergeOutcome::Updated(text) = store.apply(primary(0x10), "alice", "hello", 100) else {
            panic!("expected update");
        };
        let observed = store.parse_local_update(primary(0x10), "bob", &text, 200);
        assert_eq!(observed, LocalUpdate::Unchanged);
    }

    #[test]
    fn test_older_update_does_not_regress() {
        let mut store = CommentStore::new();
        store.apply(primary(0x10), "alice", "v1", 100);
        let out = store.apply(primary(0x10), "alice", "v0", 50);
        assert_eq!(out, MergeOutcome::Ignored);
        assert_eq!(store.display(&primary(0x10)), "[alice] v1");
    }

    #[test]
    fn test_duplicate_is_ignored() {
        let mut store = CommentStore::new();
        store.apply(primary(0x10), "alice", "v1", 100);
        assert_eq!(store.apply(primary(0x10), "alice", "v1", 100), MergeOutcome::Ignored);
    }

    #[test]
    fn test_merge_orders_by_timestamp_then_author() {
        let mut store = CommentStore::new();
        store.apply(primary(0x10), "zed", "late", 3);
        store.apply(primary(0x10), "bob", "tie", 1);
        store.apply(primary(0x10), "alice", "tie", 1);
        assert_eq!(
            store.display(&primary(0x10)),
            format!("[alice] tie{d}[bob] tie{d}[zed] late", d = COMMENT_DELIMITER)
        );
    }

    #[test]
    fn test_retraction_hides_contribution_and_blocks_stale_resend() {
        let mut store = CommentStore::new();
        store.apply(primary(0x10), "alice", "note", 1);
        store.apply(primary(0x10), "bob", "other", 2);
        store.apply(primary(0x10), "alice", "", 3);
        assert_eq!(store.display(&primary(0x10)), "[bob] other");

        assert_eq!(store.apply(primary(0x10), "alice", "note", 1), MergeOutcome::Ignored);
        assert_eq!(store.display(&primary(0x10)), "[bob] other");
    }

    #[test]
    fn test_kinds_are_independent() {
        let mut store = CommentStore::new();
        let extra = CommentKey::new(CanonicalAddress(0x10), CommentKind::Extra(2));
        store.apply(primary(0x10), "alice", "a", 1);
        store.apply(extra, "alice", "b", 1);
        assert_eq!(store.display(&primary(0x10)), "[alice] a");
        assert_eq!(store.display(&extra), "[alice] b");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_local_edit_of_untagged_text() {
        let mut store = CommentStore::new();
        let out = store.parse_local_update(primary(0x20), "alice", "entry point", 10);
        assert_eq!(out, LocalUpdate::Changed("entry point".into()));
        assert_eq!(store.display(&primary(0x20)), "[alice] entry point");
    }

    #[test]
    fn test_local_edit_keeps_only_own_slot() {
        let mut store = CommentStore::new();
        store.apply(primary(0x20), "bob", "from bob", 1);
        store.parse_local_update(primary(0x20), "alice", "mine", 2);

        let current = store.display(&primary(0x20)).to_string();
        let edited = current.replace("[alice] mine", "[alice] mine, revised");
        let out = store.parse_local_update(primary(0x20), "alice", &edited, 3);
        assert_eq!(out, LocalUpdate::Changed("mine, revised".into()));
        assert_eq!(
            store.display(&primary(0x20)),
            format!("[bob] from bob{}[alice] mine, revised", COMMENT_DELIMITER)
        );
    }

    #[test]
    fn test_local_clear_publishes_empty_slot() {
        let mut store = CommentStore::new();
        store.parse_local_update(primary(0x20), "alice", "temp", 5);
        let out = store.parse_local_update(primary(0x20), "alice", "", 6);
        assert_eq!(out, LocalUpdate::Changed(String::new()));
        assert_eq!(store.display(&primary(0x20)), "");
    }

    #[test]
    fn test_empty_text_without_record_is_unchanged() {
        let mut store = CommentStore::new();
        assert_eq!(
            store.parse_local_update(primary(0x30), "alice", "", 1),
            LocalUpdate::Unchanged
        );
    }

    #[test]
    fn test_local_timestamp_is_strictly_increasing() {
        let mut store = CommentStore::new();
        store.parse_local_update(primary(0x40), "alice", "one", 100);
        store.parse_local_update(primary(0x40), "alice", "two", 100);
        let record = store.get(&primary(0x40)).unwrap();
        assert_eq!(record.contribution("alice").unwrap().ts, 101);
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut store = CommentStore::new();
        store.apply(primary(0x10), "alice", "x", 1);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.display(&primary(0x10)), "");
    }

    fn contribution() -> impl Strategy<Value = (String, String, u64)> {
        (
            prop_oneof![Just("alice"), Just("bob"), Just("carol")].prop_map(String::from),
            "[a-z ]{0,12}",
            0u64..8,
        )
    }

    proptest! {
        #[test]
        fn test_merge_is_order_independent(
            updates in prop::collection::vec(contribution(), 1..12),
        ) {
            let mut forward = CommentStore::new();
            for (author, text, ts) in &updates {
                forward.apply(primary(1), author, text, *ts);
            }

            let mut backward = CommentStore::new();
            for (author, text, ts) in updates.iter().rev() {
                backward.apply(primary(1), author, text, *ts);
            }

            prop_assert_eq!(forward.display(&primary(1)), backward.display(&primary(1)));
        }

        #[test]
        fn test_reapplying_is_idempotent(
            updates in prop::collection::vec(contribution(), 1..12),
        ) {
            let mut store = CommentStore::new();
            for (author, text, ts) in &updates {
                store.apply(primary(1), author, text, *ts);
            }
            let once = store.display(&primary(1)).to_string();
            for (author, text, ts) in &updates {
                store.apply(primary(1), author, text, *ts);
            }
            prop_assert_eq!(once, store.display(&primary(1)));
        }
    }
}
