//! Channel session lifecycle.
//!
//! ```text
//!            open(H)                 subscribed
//!  Closed ------------> Joining ------------------> Joined
//!    ^                     |  join failed              |
//!    +---------------------+                           |
//!    +------------------------ close() ----------------+
//! ```
//!
//! The session is the identity gate: inbound messages are accepted only if
//! their key matches the joined identity *and* the binary on disk still
//! hashes to that identity. A mismatch means the file changed under us, and
//! nothing on this channel can be trusted until a new session is opened.

use std::sync::Arc;

use revsync_core::{AnalysisBackend, ContentHash};

use crate::error::{Result, SyncError};
use crate::messages::SyncMessage;
use crate::transport::{Inbox, Transport};

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Joining,
    Joined,
}

/// Result of [`SessionManager::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Subscribed to a new channel.
    Joined,
    /// Already joined to this identity; nothing happened.
    AlreadyJoined,
}

/// Owns the current channel identity.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    inbox: Inbox,
    state: SessionState,
    identity: Option<ContentHash>,
}

impl SessionManager {
    /// Create a closed session. Joined channels deliver into `inbox`.
    pub fn new(transport: Arc<dyn Transport>, inbox: Inbox) -> Self {
        Self {
            transport,
            inbox,
            state: SessionState::Closed,
            identity: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> Option<ContentHash> {
        self.identity
    }

    pub fn is_joined(&self) -> bool {
        self.state == SessionState::Joined
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Join the channel for `identity`, leaving any other channel first.
    ///
    /// If the transport join fails the session ends up `Closed`; the next
    /// open attempt retries.
    pub async fn open(&mut self, identity: ContentHash) -> Result<OpenOutcome> {
        if self.is_joined() && self.identity == Some(identity) {
            return Ok(OpenOutcome::AlreadyJoined);
        }

        if self.is_joined() {
            self.close().await?;
        }

        self.identity = Some(identity);
        self.state = SessionState::Joining;
        tracing::info!(channel = %identity, "joining channel");

        let topic = identity.to_hex();
        match self.transport.join(&topic, self.inbox.clone()).await {
            Ok(()) => {
                self.state = SessionState::Joined;
                Ok(OpenOutcome::Joined)
            }
            Err(e) => {
                tracing::warn!(channel = %identity, error = %e, "join failed");
                self.identity = None;
                self.state = SessionState::Closed;
                Err(e)
            }
        }
    }

    /// Leave the current channel. A no-op when closed.
    ///
    /// Local state is cleared even if the transport fails to leave.
    pub async fn close(&mut self) -> Result<()> {
        let Some(identity) = self.identity.take() else {
            self.state = SessionState::Closed;
            return Ok(());
        };
        let was_joined = self.state == SessionState::Joined;
        self.state = SessionState::Closed;

        if was_joined {
            tracing::info!(channel = %identity, "leaving channel");
            if let Err(e) = self.transport.leave(&identity.to_hex()).await {
                tracing::warn!(channel = %identity, error = %e, "leave failed");
            }
        }
        Ok(())
    }

    /// Gate an inbound message.
    pub fn validate(&self, message: &SyncMessage, backend: &dyn AnalysisBackend) -> Result<()> {
        let mismatch = |reason: &str| SyncError::IdentityMismatch {
            session: self.identity,
            message: format!("{} ({reason})", message.key),
        };

        if !self.is_joined() {
            return Err(SyncError::NotJoined);
        }
        if self.identity != Some(message.key) {
            return Err(mismatch("key differs"));
        }
        if backend.content_hash()? != self.identity {
            return Err(mismatch("binary changed since join"));
        }
        Ok(())
    }

    /// Whether local events may be published right now.
    pub fn can_publish(&self, backend: &dyn AnalysisBackend) -> bool {
        if !self.is_joined() || !backend.is_analysis_complete() {
            return false;
        }
        match backend.content_hash() {
            Ok(current) => current.is_some() && current == self.identity,
            Err(e) => {
                tracing::warn!(error = %e, "cannot recompute binary hash");
                false
            }
        }
    }
}
