//! Convergence verification.
//!
//! Peers that hold the same contributions show the same merged comments.
//! A state digest over the comment table lets two peers (or a test) check
//! that without exchanging the whole table.
//!
//! Algorithm:
//! 1. Walk records in key order
//! 2. Hash: H = Blake3("revsync-state-v0:" || for each non-empty record: key || display)
//! 3. Return final H

use revsync_core::{CommentKey, CommentKind, CommentStore};

/// Compute a deterministic digest of the merged comment state.
///
/// Records whose display is empty (all contributions retracted) are skipped,
/// so a peer that never saw the comment and one that saw it retracted agree.
pub fn comment_state_digest(store: &CommentStore) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"revsync-state-v0:");

    for (key, record) in store.iter() {
        if record.display().is_empty() {
            continue;
        }
        hash_key(&mut hasher, key);
        hasher.update(&(record.display().len() as u64).to_le_bytes());
        hasher.update(record.display().as_bytes());
    }

    *hasher.finalize().as_bytes()
}

fn hash_key(hasher: &mut blake3::Hasher, key: &CommentKey) {
    hasher.update(&key.addr.0.to_le_bytes());
    match key.kind {
        CommentKind::Primary => hasher.update(&[0]),
        CommentKind::Repeatable => hasher.update(&[1]),
        CommentKind::Extra(line) => hasher.update(&[2]).update(&line.to_le_bytes()),
    };
}

/// Result of comparing two comment tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both sides display the same text everywhere.
    Converged,
    /// These keys display differently.
    Diverged { keys: Vec<CommentKey> },
}

impl ConvergenceResult {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}

/// Compare a local table against a remote one key by key.
pub fn verify_convergence(local: &CommentStore, remote: &CommentStore) -> ConvergenceResult {
    if comment_state_digest(local) == comment_state_digest(remote) {
        return ConvergenceResult::Converged;
    }

    let mut keys: Vec<CommentKey> = local
        .iter()
        .map(|(k, _)| *k)
        .chain(remote.iter().map(|(k, _)| *k))
        .filter(|k| local.display(k) != remote.display(k))
        .collect();
    keys.sort();
    keys.dedup();

    ConvergenceResult::Diverged { keys }
}
