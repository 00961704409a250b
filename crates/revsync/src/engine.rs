//! The sync engine.
//!
//! One task owns all mutable sync state (the mutation context). Everything
//! that touches the comment table, the session or the backend is a message
//! to that task:
//!
//! ```text
//!  EngineHandle ──commands──┐
//!  Transport ────inbound────┼──> engine task ──publish queue──> publisher task ──> Transport
//!  EngineHandle ──queries───┘        │
//!  readiness poller ──commands───────┘ (polling hosts only)
//! ```
//!
//! Host events are served first, then inbound deliveries, then read-only
//! queries. Publishing happens on its own task so a slow transport never
//! stalls the mutation context.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use revsync_core::{AnalysisBackend, CanonicalAddress, CommentKey, CommentKind, ContentHash, EffectiveAddress};
use revsync_sync::{
    comment_state_digest, protocol, Command, Delivery, Dispatched, LocalEvent, OpenOutcome,
    Router, SessionManager, SessionState, SyncContext, SyncError, SyncMessage, Transport,
};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::host::{HostAdapter, HostEvent};

/// Seconds since the Unix epoch, the wire timestamp unit.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Counters kept by the engine task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Inbound messages that changed local state.
    pub applied: u64,
    /// Inbound messages that were stale or duplicate.
    pub ignored: u64,
    /// Inbound messages that were only logged.
    pub displayed: u64,
    /// Inbound deliveries dropped: undecodable, wrong channel or unknown.
    pub rejected: u64,
    /// Messages handed to the publisher.
    pub published: u64,
}

/// Snapshot of the session as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub identity: Option<ContentHash>,
    pub file_open: bool,
    pub awaiting_analysis: bool,
    pub adapter: HostAdapter,
}

enum EngineCommand {
    Host(HostEvent),
    Shutdown(oneshot::Sender<()>),
}

enum Query {
    Session(oneshot::Sender<SessionSnapshot>),
    Comment {
        key: CommentKey,
        reply: oneshot::Sender<String>,
    },
    Digest(oneshot::Sender<[u8; 32]>),
    Stats(oneshot::Sender<EngineStats>),
}

/// The engine task's state.
pub struct Engine {
    config: EngineConfig,
    router: Router,
    ctx: SyncContext,
    adapter: HostAdapter,
    file_open: bool,
    stats: EngineStats,

    commands: mpsc::Receiver<EngineCommand>,
    // Weak, so dropping every handle ends the loop.
    command_tx: mpsc::WeakSender<EngineCommand>,
    inbound: mpsc::Receiver<Delivery>,
    queries: mpsc::Receiver<Query>,
    publisher: mpsc::Sender<SyncMessage>,
    readiness: Option<JoinHandle<()>>,
}

impl Engine {
    /// Spawn the engine and its publisher on the current runtime.
    pub fn start(
        config: EngineConfig,
        backend: Arc<dyn AnalysisBackend>,
        transport: Arc<dyn Transport>,
    ) -> EngineHandle {
        let (command_tx, commands) = mpsc::channel(config.command_capacity.max(1));
        let (inbox, inbound) = mpsc::channel(config.inbound_capacity.max(1));
        let (query_tx, queries) = mpsc::channel(config.query_capacity.max(1));
        let (publish_tx, publish_rx) = mpsc::channel(config.publish_capacity.max(1));

        let adapter = HostAdapter::probe(backend.as_ref(), config.ready_poll_interval());
        info!(nick = %config.nick, adapter = adapter.name(), "starting sync engine");

        tokio::spawn(run_publisher(transport.clone(), publish_rx));

        let engine = Engine {
            router: Router::new(backend, config.sync.reserved_names(), config.nick.clone()),
            ctx: SyncContext::new(SessionManager::new(transport, inbox)),
            config,
            adapter,
            file_open: false,
            stats: EngineStats::default(),
            command_tx: command_tx.downgrade(),
            commands,
            inbound,
            queries,
            publisher: publish_tx,
            readiness: None,
        };
        tokio::spawn(engine.run());

        EngineHandle {
            commands: command_tx,
            queries: query_tx,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(EngineCommand::Host(event)) => self.handle_host(event).await,
                    Some(EngineCommand::Shutdown(done)) => {
                        self.stop().await;
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        self.stop().await;
                        return;
                    }
                },

                Some(delivery) = self.inbound.recv() => self.handle_delivery(delivery),

                Some(query) = self.queries.recv() => self.handle_query(query),
            }
        }
    }

    async fn stop(&mut self) {
        self.cancel_readiness();
        self.file_open = false;
        if let Err(e) = self.ctx.reset().await {
            warn!(error = %e, "error leaving channel on shutdown");
        }
        info!("sync engine stopped");
    }

    async fn handle_host(&mut self, event: HostEvent) {
        match event {
            HostEvent::FileOpened => self.on_file_opened().await,
            HostEvent::FileClosed => self.on_file_closed().await,
            HostEvent::AnalysisComplete => self.on_analysis_complete().await,
            edit => {
                if let Some(local) = edit.into_local() {
                    self.on_local_edit(local).await;
                }
            }
        }
    }

    async fn on_file_opened(&mut self) {
        self.file_open = true;
        if self.router.backend().is_analysis_complete() {
            self.open_session().await;
            return;
        }

        info!("waiting for auto-analysis before joining");
        self.ctx.set_awaiting_analysis(true);
        if let Some(interval) = self.adapter.readiness_poll() {
            self.spawn_readiness(interval);
        }
    }

    async fn on_file_closed(&mut self) {
        self.file_open = false;
        self.cancel_readiness();
        if let Err(e) = self.ctx.reset().await {
            warn!(error = %e, "error leaving channel");
        }
        info!("file closed");
    }

    async fn on_analysis_complete(&mut self) {
        self.cancel_readiness();
        if !self.ctx.awaiting_analysis() {
            debug!("analysis complete with no pending open");
            return;
        }
        info!("auto-analysis complete");
        self.open_session().await;
    }

    async fn open_session(&mut self) {
        let backend = self.router.backend().clone();
        let identity = match backend.content_hash() {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                warn!("no binary available to identify, not joining");
                self.ctx.set_awaiting_analysis(false);
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to hash binary, not joining");
                self.ctx.set_awaiting_analysis(false);
                return;
            }
        };

        match self.ctx.init(identity).await {
            Ok(OpenOutcome::Joined) => {
                info!(channel = %identity, "connected to channel");
                if self.config.announce_join {
                    self.announce(identity);
                }
            }
            Ok(OpenOutcome::AlreadyJoined) => debug!(channel = %identity, "already joined"),
            Err(e) => warn!(channel = %identity, error = %e, "could not join channel"),
        }
    }

    fn announce(&mut self, identity: ContentHash) {
        if !self.ctx.session.can_publish(self.router.backend().as_ref()) {
            return;
        }
        let message = SyncMessage::new(identity, self.config.nick.clone(), unix_now(), Command::Join);
        self.publish(message);
    }

    async fn on_local_edit(&mut self, event: LocalEvent) {
        // A failed join is retried on the next edit.
        if self.file_open && !self.ctx.awaiting_analysis() && !self.ctx.session.is_joined() {
            self.open_session().await;
        }

        match self.router.on_local(&mut self.ctx, event, unix_now()) {
            Ok(Some(message)) => self.publish(message),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to process local edit"),
        }
    }

    fn publish(&mut self, message: SyncMessage) {
        let cmd = message.command.name().to_owned();
        match self.publisher.try_send(message) {
            Ok(()) => self.stats.published += 1,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(cmd = %cmd, "publish queue full, dropping message")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(cmd = %cmd, "publisher stopped, dropping message")
            }
        }
    }

    fn handle_delivery(&mut self, delivery: Delivery) {
        let key = match ContentHash::from_hex(&delivery.topic) {
            Ok(key) => key,
            Err(e) => {
                warn!(topic = %delivery.topic, error = %e, "delivery on unrecognized topic");
                self.stats.rejected += 1;
                return;
            }
        };

        let message = match protocol::decode(key, &delivery.payload, delivery.replay) {
            Ok(message) => message,
            Err(e) => {
                warn!(channel = %key, error = %e, "dropping malformed message");
                self.stats.rejected += 1;
                return;
            }
        };

        match self.router.dispatch(&mut self.ctx, &message) {
            Ok(Dispatched::Applied) => self.stats.applied += 1,
            Ok(Dispatched::Ignored) => self.stats.ignored += 1,
            Ok(Dispatched::Displayed) => self.stats.displayed += 1,
            Err(e @ (SyncError::IdentityMismatch { .. } | SyncError::NotJoined)) => {
                warn!(user = %message.user, error = %e, "hash mismatch, dropping command");
                self.stats.rejected += 1;
            }
            Err(e) => {
                warn!(user = %message.user, cmd = message.command.name(), error = %e, "error applying message");
                self.stats.rejected += 1;
            }
        }
    }

    fn handle_query(&self, query: Query) {
        match query {
            Query::Session(reply) => {
                let _ = reply.send(SessionSnapshot {
                    state: self.ctx.session.state(),
                    identity: self.ctx.session.identity(),
                    file_open: self.file_open,
                    awaiting_analysis: self.ctx.awaiting_analysis(),
                    adapter: self.adapter,
                });
            }
            Query::Comment { key, reply } => {
                let _ = reply.send(self.ctx.comments.display(&key).to_string());
            }
            Query::Digest(reply) => {
                let _ = reply.send(comment_state_digest(&self.ctx.comments));
            }
            Query::Stats(reply) => {
                let _ = reply.send(self.stats);
            }
        }
    }

    fn spawn_readiness(&mut self, interval: Duration) {
        if self.readiness.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let Some(commands) = self.command_tx.upgrade() else {
            return;
        };
        let backend = self.router.backend().clone();
        debug!(?interval, "polling for auto-analysis");

        self.readiness = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if backend.is_analysis_complete() {
                    let _ = commands
                        .send(EngineCommand::Host(HostEvent::AnalysisComplete))
                        .await;
                    return;
                }
            }
        }));
    }

    fn cancel_readiness(&mut self) {
        if let Some(task) = self.readiness.take() {
            task.abort();
        }
    }
}

async fn run_publisher(transport: Arc<dyn Transport>, mut queue: mpsc::Receiver<SyncMessage>) {
    while let Some(message) = queue.recv().await {
        let payload = match protocol::encode(&message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to encode message");
                continue;
            }
        };
        let topic = message.key.to_hex();
        if let Err(e) = transport.publish(&topic, payload).await {
            warn!(channel = %message.key, cmd = message.command.name(), error = %e, "publish failed");
        }
    }
}

/// Cloneable handle to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    queries: mpsc::Sender<Query>,
}

impl EngineHandle {
    /// Report a host event.
    pub async fn notify(&self, event: HostEvent) -> Result<()> {
        self.commands
            .send(EngineCommand::Host(event))
            .await
            .map_err(|_| EngineError::Closed)
    }

    pub async fn on_rename(&self, ea: EffectiveAddress, new_name: impl Into<String>) -> Result<()> {
        self.notify(HostEvent::Renamed {
            ea,
            new_name: new_name.into(),
        })
        .await
    }

    pub async fn on_comment_changed(&self, ea: EffectiveAddress, repeatable: bool) -> Result<()> {
        self.notify(HostEvent::CommentChanged { ea, repeatable }).await
    }

    pub async fn on_extra_comment_changed(
        &self,
        ea: EffectiveAddress,
        line: u32,
        repeatable: bool,
    ) -> Result<()> {
        self.notify(HostEvent::ExtraCommentChanged {
            ea,
            line,
            repeatable,
        })
        .await
    }

    pub async fn on_area_comment_changed(
        &self,
        start: EffectiveAddress,
        end: EffectiveAddress,
        text: impl Into<String>,
    ) -> Result<()> {
        self.notify(HostEvent::AreaCommentChanged {
            start,
            end,
            text: text.into(),
        })
        .await
    }

    pub async fn on_file_opened(&self) -> Result<()> {
        self.notify(HostEvent::FileOpened).await
    }

    pub async fn on_file_closed(&self) -> Result<()> {
        self.notify(HostEvent::FileClosed).await
    }

    pub async fn on_analysis_complete(&self) -> Result<()> {
        self.notify(HostEvent::AnalysisComplete).await
    }

    pub async fn session(&self) -> Result<SessionSnapshot> {
        self.query(Query::Session).await
    }

    /// Merged display text held for a comment slot.
    pub async fn merged_comment(&self, addr: CanonicalAddress, kind: CommentKind) -> Result<String> {
        let key = CommentKey::new(addr, kind);
        self.query(|reply| Query::Comment { key, reply }).await
    }

    /// Digest of the merged comment table; equal on converged peers.
    pub async fn state_digest(&self) -> Result<[u8; 32]> {
        self.query(Query::Digest).await
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        self.query(Query::Stats).await
    }

    /// Leave the channel and stop the engine task.
    pub async fn shutdown(&self) -> Result<()> {
        let (done, wait) = oneshot::channel();
        self.commands
            .send(EngineCommand::Shutdown(done))
            .await
            .map_err(|_| EngineError::Closed)?;
        wait.await.map_err(|_| EngineError::Closed)
    }

    async fn query<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Query) -> Result<T> {
        let (reply, wait) = oneshot::channel();
        self.queries
            .send(make(reply))
            .await
            .map_err(|_| EngineError::Closed)?;
        wait.await.map_err(|_| EngineError::Closed)
    }
}
