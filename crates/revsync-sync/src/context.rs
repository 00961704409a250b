//! Per-file sync state.
//!
//! Everything that lives as long as one opened binary: the channel session,
//! the comment table, the last synced name per address and the "waiting for
//! analysis" flag. There is exactly one context per engine, owned by the
//! mutation context.

use std::collections::BTreeMap;

use revsync_core::{CanonicalAddress, CommentStore, ContentHash};

use crate::error::Result;
use crate::session::{OpenOutcome, SessionManager};

/// Session plus merged comment state.
pub struct SyncContext {
    pub session: SessionManager,
    pub comments: CommentStore,
    /// Last name applied from or published to the channel, per address.
    /// A local rename equal to it is an echo.
    pub names: BTreeMap<CanonicalAddress, String>,
    awaiting_analysis: bool,
}

impl SyncContext {
    pub fn new(session: SessionManager) -> Self {
        Self {
            session,
            comments: CommentStore::new(),
            names: BTreeMap::new(),
            awaiting_analysis: false,
        }
    }

    /// Join the channel for `identity`.
    ///
    /// Joining a different channel starts from an empty comment table; the
    /// channel backlog repopulates it.
    pub async fn init(&mut self, identity: ContentHash) -> Result<OpenOutcome> {
        self.awaiting_analysis = false;
        let previous = self.session.identity();
        let outcome = self.session.open(identity).await?;
        if outcome == OpenOutcome::Joined && previous != Some(identity) {
            self.comments.clear();
            self.names.clear();
        }
        Ok(outcome)
    }

    /// Leave the channel and drop all per-file state.
    pub async fn reset(&mut self) -> Result<()> {
        self.awaiting_analysis = false;
        self.comments.clear();
        self.names.clear();
        self.session.close().await
    }

    /// Whether a file is open but auto-analysis has not finished yet.
    pub fn awaiting_analysis(&self) -> bool {
        self.awaiting_analysis
    }

    pub fn set_awaiting_analysis(&mut self, waiting: bool) {
        self.awaiting_analysis = waiting;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryBroker;
    use revsync_core::{CanonicalAddress, CommentKey, CommentKind};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn context() -> SyncContext {
        let broker = MemoryBroker::new();
        let (tx, _rx) = mpsc::channel(4);
        SyncContext::new(SessionManager::new(Arc::new(broker.connect("me")), tx))
    }

    fn key() -> CommentKey {
        CommentKey::new(CanonicalAddress(1), CommentKind::Primary)
    }

    #[tokio::test]
    async fn test_switching_channel_clears_comments() {
        let mut ctx = context();
        ctx.init(ContentHash::digest(b"a")).await.unwrap();
        ctx.comments.apply(key(), "alice", "x", 1);

        ctx.init(ContentHash::digest(b"a")).await.unwrap();
        assert_eq!(ctx.comments.len(), 1);

        ctx.init(ContentHash::digest(b"b")).await.unwrap();
        assert!(ctx.comments.is_empty());
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let mut ctx = context();
        ctx.set_awaiting_analysis(true);
        ctx.init(ContentHash::digest(b"a")).await.unwrap();
        ctx.comments.apply(key(), "alice", "x", 1);
        ctx.names.insert(CanonicalAddress(1), "main".into());

        ctx.reset().await.unwrap();
        assert!(ctx.comments.is_empty());
        assert!(ctx.names.is_empty());
        assert!(!ctx.awaiting_analysis());
        assert!(!ctx.session.is_joined());
    }
}
