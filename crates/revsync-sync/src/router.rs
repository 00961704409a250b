//! Message routing.
//!
//! Inbound: a validated [`SyncMessage`] goes through the session gate and is
//! dispatched by command to the comment merger or the backend.
//!
//! | cmd             | action                                      |
//! |-----------------|---------------------------------------------|
//! | `comment`       | merge (primary or repeatable), write result |
//! | `extra_comment` | merge (extra line), write result            |
//! | `area_comment`  | log only                                    |
//! | `rename`        | write name                                  |
//! | `join`          | log only                                    |
//! | anything else   | rejected                                    |
//!
//! Outbound: a [`LocalEvent`] is turned into the message to publish, if any.
//! Analyzer-generated names and comment echoes are filtered here.
//!
//! Both directions must run inside the single mutation context.

use std::sync::Arc;

use revsync_core::{
    AnalysisBackend, Canonicalizer, CommentKey, CommentKind, EffectiveAddress, LocalUpdate,
    MergeOutcome, ReservedNames,
};

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::messages::{Command, SyncMessage};
use crate::protocol::{check_line, check_text};

/// A change observed in the local host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEvent {
    Renamed {
        ea: EffectiveAddress,
        name: String,
    },
    CommentChanged {
        ea: EffectiveAddress,
        repeatable: bool,
    },
    ExtraCommentChanged {
        ea: EffectiveAddress,
        line: u32,
    },
    AreaCommentChanged {
        start: EffectiveAddress,
        end: EffectiveAddress,
        text: String,
    },
}

/// What happened to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// Local state was mutated.
    Applied,
    /// Stale or duplicate; nothing written.
    Ignored,
    /// Shown to the user only.
    Displayed,
}

/// Routes traffic between the channel and the analysis backend.
pub struct Router {
    backend: Arc<dyn AnalysisBackend>,
    reserved: ReservedNames,
    nick: String,
}

impl Router {
    pub fn new(backend: Arc<dyn AnalysisBackend>, reserved: ReservedNames, nick: impl Into<String>) -> Self {
        Self {
            backend,
            reserved,
            nick: nick.into(),
        }
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn backend(&self) -> &Arc<dyn AnalysisBackend> {
        &self.backend
    }

    fn canonicalizer(&self) -> Canonicalizer {
        Canonicalizer::new(self.backend.image_base())
    }

    /// Apply an inbound message.
    pub fn dispatch(&self, ctx: &mut SyncContext, message: &SyncMessage) -> Result<Dispatched> {
        ctx.session.validate(message, self.backend.as_ref())?;

        let canon = self.canonicalizer();
        let user = message.user.as_str();

        match &message.command {
            Command::Comment {
                addr,
                text,
                repeatable,
            } => {
                tracing::info!(user, cmd = "comment", addr = %addr, text = %text, replay = message.replay);
                let kind = if *repeatable {
                    CommentKind::Repeatable
                } else {
                    CommentKind::Primary
                };
                let ea = canon.to_effective(*addr);
                match ctx.comments.apply(CommentKey::new(*addr, kind), user, text, message.ts) {
                    MergeOutcome::Updated(merged) => {
                        if *repeatable {
                            self.backend.write_repeatable_comment(ea, &merged)?;
                        } else {
                            self.backend.write_comment(ea, &merged)?;
                        }
                        Ok(Dispatched::Applied)
                    }
                    MergeOutcome::Ignored => Ok(Dispatched::Ignored),
                }
            }
            Command::ExtraComment { addr, line, text } => {
                tracing::info!(user, cmd = "extra_comment", addr = %addr, line, text = %text);
                let key = CommentKey::new(*addr, CommentKind::Extra(*line));
                match ctx.comments.apply(key, user, text, message.ts) {
                    MergeOutcome::Updated(merged) => {
                        let ea = canon.to_effective(*addr);
                        self.backend.write_extra_comment(ea, *line, &merged)?;
                        Ok(Dispatched::Applied)
                    }
                    MergeOutcome::Ignored => Ok(Dispatched::Ignored),
                }
            }
            Command::AreaComment { range, text } => {
                tracing::info!(user, cmd = "area_comment", range = %range, text = %text);
                Ok(Dispatched::Displayed)
            }
            Command::Rename { addr, text } => {
                tracing::info!(user, cmd = "rename", addr = %addr, text = %text);
                self.backend.write_name(canon.to_effective(*addr), text)?;
                ctx.names.insert(*addr, text.clone());
                Ok(Dispatched::Applied)
            }
            Command::Join => {
                tracing::info!(user, "peer joined");
                Ok(Dispatched::Displayed)
            }
            Command::Unknown { cmd } => Err(SyncError::UnknownCommand(cmd.clone())),
        }
    }

    /// Turn a local event into the message to publish.
    ///
    /// Returns `Ok(None)` when there is nothing to publish: no channel,
    /// an echo, an analyzer-generated name, or publishing not allowed yet.
    pub fn on_local(
        &self,
        ctx: &mut SyncContext,
        event: LocalEvent,
        now: u64,
    ) -> Result<Option<SyncMessage>> {
        let Some(identity) = ctx.session.identity() else {
            return Ok(None);
        };
        // Checked before observing, so an edit made now is still seen as
        // new once publishing is allowed.
        if !ctx.session.can_publish(self.backend.as_ref()) {
            tracing::debug!(?event, "publishing not allowed yet");
            return Ok(None);
        }
        let canon = self.canonicalizer();

        let (command, ts) = match event {
            LocalEvent::Renamed { ea, name } => {
                if !self.backend.is_loaded(ea) {
                    return Ok(None);
                }
                if self.reserved.is_reserved(&name) {
                    tracing::trace!(ea = %ea, name, "analyzer-generated name not published");
                    return Ok(None);
                }
                check_text(&name)?;
                let addr = canon.to_canonical(ea);
                if ctx.names.get(&addr) == Some(&name) {
                    tracing::trace!(addr = %addr, name, "rename echo suppressed");
                    return Ok(None);
                }
                ctx.names.insert(addr, name.clone());
                (Command::Rename { addr, text: name }, now)
            }
            LocalEvent::CommentChanged { ea, repeatable } => {
                let current = self.backend.read_comment(ea, repeatable)?.unwrap_or_default();
                check_text(&current)?;
                let addr = canon.to_canonical(ea);
                let kind = if repeatable {
                    CommentKind::Repeatable
                } else {
                    CommentKind::Primary
                };
                let Some((text, ts)) = self.observe(ctx, CommentKey::new(addr, kind), &current, now)
                else {
                    return Ok(None);
                };
                (
                    Command::Comment {
                        addr,
                        text,
                        repeatable,
                    },
                    ts,
                )
            }
            LocalEvent::ExtraCommentChanged { ea, line } => {
                check_line(line)?;
                let current = self.backend.read_extra_comment(ea, line)?.unwrap_or_default();
                check_text(&current)?;
                let addr = canon.to_canonical(ea);
                let key = CommentKey::new(addr, CommentKind::Extra(line));
                let Some((text, ts)) = self.observe(ctx, key, &current, now) else {
                    return Ok(None);
                };
                (Command::ExtraComment { addr, line, text }, ts)
            }
            LocalEvent::AreaCommentChanged { start, end, text } => {
                check_text(&text)?;
                let range = canon.range_to_canonical(start, end);
                (Command::AreaComment { range, text }, now)
            }
        };

        Ok(Some(SyncMessage::new(identity, self.nick.clone(), ts, command)))
    }

    fn observe(
        &self,
        ctx: &mut SyncContext,
        key: CommentKey,
        current: &str,
        now: u64,
    ) -> Option<(String, u64)> {
        match ctx.comments.parse_local_update(key, &self.nick, current, now) {
            LocalUpdate::Changed(text) => {
                let ts = ctx
                    .comments
                    .get(&key)
                    .and_then(|r| r.contribution(&self.nick))
                    .map(|c| c.ts)
                    .unwrap_or(now);
                Some((text, ts))
            }
            LocalUpdate::Unchanged => {
                tracing::trace!(?key, "comment echo suppressed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionManager;
    use crate::transport::memory::MemoryBroker;
    use revsync_core::{
        BackendWrite, CanonicalAddress, ContentHash, ImageBase, MemoryBackend, COMMENT_DELIMITER,
    };
    use tokio::sync::mpsc;

    const BINARY: &[u8] = b"router test binary";
    const BASE: u64 = 0x400000;

    struct Harness {
        backend: Arc<MemoryBackend>,
        router: Router,
        ctx: SyncContext,
        key: ContentHash,
    }

    async fn harness() -> Harness {
        let backend = Arc::new(MemoryBackend::new(BINARY.to_vec(), ImageBase(BASE)));
        let broker = MemoryBroker::new();
        let (tx, _rx) = mpsc::channel(16);
        let mut ctx = SyncContext::new(SessionManager::new(Arc::new(broker.connect("me")), tx));
        let key = ContentHash::digest(BINARY);
        ctx.init(key).await.unwrap();
        let router = Router::new(backend.clone(), ReservedNames::default(), "me");
        Harness {
            backend,
            router,
            ctx,
            key,
        }
    }

    fn comment(key: ContentHash, user: &str, addr: u64, text: &str, ts: u64) -> SyncMessage {
        SyncMessage::new(
            key,
            user,
            ts,
            Command::Comment {
                addr: CanonicalAddress(addr),
                text: text.into(),
                repeatable: false,
            },
        )
    }

    #[tokio::test]
    async fn test_comment_written_at_effective_address() {
        let mut h = harness().await;
        let out = h
            .router
            .dispatch(&mut h.ctx, &comment(h.key, "alice", 0x10, "init", 1))
            .unwrap();
        assert_eq!(out, Dispatched::Applied);
        assert_eq!(
            h.backend.comment(EffectiveAddress(BASE + 0x10), false).as_deref(),
            Some("[alice] init")
        );
    }

    #[tokio::test]
    async fn test_foreign_key_produces_no_mutation() {
        let mut h = harness().await;
        let other = ContentHash::digest(b"some other binary");
        let err = h
            .router
            .dispatch(&mut h.ctx, &comment(other, "alice", 0x10, "x", 1))
            .unwrap_err();
        assert!(matches!(err, SyncError::IdentityMismatch { .. }));
        assert!(h.backend.writes().is_empty());
        assert!(h.ctx.comments.is_empty());
    }

    #[tokio::test]
    async fn test_stale_comment_not_written() {
        let mut h = harness().await;
        h.router
            .dispatch(&mut h.ctx, &comment(h.key, "alice", 0x10, "v1", 100))
            .unwrap();
        let out = h
            .router
            .dispatch(&mut h.ctx, &comment(h.key, "alice", 0x10, "v0", 50))
            .unwrap();
        assert_eq!(out, Dispatched::Ignored);
        assert_eq!(h.backend.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_rename_and_extra_comment() {
        let mut h = harness().await;
        let rename = SyncMessage::new(
            h.key,
            "bob",
            0,
            Command::Rename {
                addr: CanonicalAddress(0x1000),
                text: "parse_header".into(),
            },
        );
        h.router.dispatch(&mut h.ctx, &rename).unwrap();

        let extra = SyncMessage::new(
            h.key,
            "bob",
            3,
            Command::ExtraComment {
                addr: CanonicalAddress(0x1000),
                line: 1,
                text: "header".into(),
            },
        );
        h.router.dispatch(&mut h.ctx, &extra).unwrap();

        assert_eq!(
            h.backend.writes(),
            vec![
                BackendWrite::Name {
                    ea: EffectiveAddress(BASE + 0x1000),
                    name: "parse_header".into(),
                },
                BackendWrite::ExtraComment {
                    ea: EffectiveAddress(BASE + 0x1000),
                    line: 1,
                    text: "[bob] header".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_and_display_only_commands() {
        let mut h = harness().await;
        let unknown = SyncMessage::new(h.key, "bob", 0, Command::Unknown { cmd: "chat".into() });
        assert!(matches!(
            h.router.dispatch(&mut h.ctx, &unknown),
            Err(SyncError::UnknownCommand(_))
        ));

        let join = SyncMessage::new(h.key, "bob", 0, Command::Join);
        assert_eq!(h.router.dispatch(&mut h.ctx, &join).unwrap(), Dispatched::Displayed);
        assert!(h.backend.writes().is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_is_per_message() {
        let mut h = harness().await;
        h.backend.set_fail_writes(true);
        assert!(h
            .router
            .dispatch(&mut h.ctx, &comment(h.key, "alice", 0x10, "a", 1))
            .is_err());

        h.backend.set_fail_writes(false);
        h.router
            .dispatch(&mut h.ctx, &comment(h.key, "alice", 0x20, "b", 1))
            .unwrap();
        assert_eq!(h.backend.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_reserved_rename_not_published() {
        let mut h = harness().await;
        let ea = EffectiveAddress(BASE + 0x1000);
        let auto = LocalEvent::Renamed {
            ea,
            name: "sub_401000".into(),
        };
        assert!(h.router.on_local(&mut h.ctx, auto, 10).unwrap().is_none());

        let human = LocalEvent::Renamed {
            ea,
            name: "parse_header".into(),
        };
        let msg = h.router.on_local(&mut h.ctx, human, 10).unwrap().unwrap();
        assert_eq!(
            msg.command,
            Command::Rename {
                addr: CanonicalAddress(0x1000),
                text: "parse_header".into(),
            }
        );
        assert_eq!(msg.user, "me");
    }

    #[tokio::test]
    async fn test_rename_of_unloaded_address_not_published() {
        let mut h = harness().await;
        let ea = EffectiveAddress(BASE + 0x2000);
        h.backend.set_unloaded(ea);
        let event = LocalEvent::Renamed {
            ea,
            name: "handler".into(),
        };
        assert!(h.router.on_local(&mut h.ctx, event, 1).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_applied_comment_echo_is_not_published() {
        let mut h = harness().await;
        h.router
            .dispatch(&mut h.ctx, &comment(h.key, "alice", 0x10, "hello", 100))
            .unwrap();

        let event = LocalEvent::CommentChanged {
            ea: EffectiveAddress(BASE + 0x10),
            repeatable: false,
        };
        assert!(h.router.on_local(&mut h.ctx, event, 200).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_comment_published_with_slot_text() {
        let mut h = harness().await;
        h.router
            .dispatch(&mut h.ctx, &comment(h.key, "alice", 0x10, "hello", 100))
            .unwrap();

        let ea = EffectiveAddress(BASE + 0x10);
        let edited = format!("[alice] hello{}checked", COMMENT_DELIMITER);
        h.backend.set_comment(ea, false, &edited);

        let event = LocalEvent::CommentChanged {
            ea,
            repeatable: false,
        };
        let msg = h.router.on_local(&mut h.ctx, event, 200).unwrap().unwrap();
        assert_eq!(msg.ts, 200);
        assert_eq!(
            msg.command,
            Command::Comment {
                addr: CanonicalAddress(0x10),
                text: "checked".into(),
                repeatable: false,
            }
        );
    }

    #[tokio::test]
    async fn test_nothing_published_before_analysis_completes() {
        let mut h = harness().await;
        h.backend.set_analysis_complete(false);
        let ea = EffectiveAddress(BASE + 0x40);
        h.backend.set_comment(ea, true, "todo");

        let event = LocalEvent::CommentChanged {
            ea,
            repeatable: true,
        };
        assert!(h.router.on_local(&mut h.ctx, event, 5).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_area_comment_uses_canonical_range() {
        let mut h = harness().await;
        let event = LocalEvent::AreaCommentChanged {
            start: EffectiveAddress(BASE + 0x100),
            end: EffectiveAddress(BASE + 0x180),
            text: "crypto loop".into(),
        };
        let msg = h.router.on_local(&mut h.ctx, event, 9).unwrap().unwrap();
        let Command::AreaComment { range, text } = msg.command else {
            panic!("expected area comment");
        };
        assert_eq!(range.start, CanonicalAddress(0x100));
        assert_eq!(range.end, CanonicalAddress(0x180));
        assert_eq!(text, "crypto loop");
    }

    #[tokio::test]
    async fn test_applied_rename_echo_is_not_published() {
        let mut h = harness().await;
        let rename = SyncMessage::new(
            h.key,
            "alice",
            0,
            Command::Rename {
                addr: CanonicalAddress(0x1000),
                text: "parse_header".into(),
            },
        );
        h.router.dispatch(&mut h.ctx, &rename).unwrap();

        let ea = EffectiveAddress(BASE + 0x1000);
        let echo = LocalEvent::Renamed {
            ea,
            name: "parse_header".into(),
        };
        assert!(h.router.on_local(&mut h.ctx, echo, 10).unwrap().is_none());

        // A genuine rename afterwards, and back again, both go out.
        let human = LocalEvent::Renamed {
            ea,
            name: "parse_packet".into(),
        };
        assert!(h.router.on_local(&mut h.ctx, human, 11).unwrap().is_some());
        let back = LocalEvent::Renamed {
            ea,
            name: "parse_header".into(),
        };
        assert!(h.router.on_local(&mut h.ctx, back, 12).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_own_rename_reported_twice_publishes_once() {
        let mut h = harness().await;
        let event = LocalEvent::Renamed {
            ea: EffectiveAddress(BASE + 0x1000),
            name: "decode".into(),
        };
        assert!(h.router.on_local(&mut h.ctx, event.clone(), 1).unwrap().is_some());
        assert!(h.router.on_local(&mut h.ctx, event, 2).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_edit_before_analysis_is_published_later() {
        let mut h = harness().await;
        h.backend.set_analysis_complete(false);
        let ea = EffectiveAddress(BASE + 0x40);
        h.backend.set_comment(ea, false, "todo");
        let event = LocalEvent::CommentChanged {
            ea,
            repeatable: false,
        };
        assert!(h.router.on_local(&mut h.ctx, event.clone(), 5).unwrap().is_none());
        assert!(h.ctx.comments.is_empty());

        h.backend.set_analysis_complete(true);
        let msg = h.router.on_local(&mut h.ctx, event, 6).unwrap().unwrap();
        assert_eq!(
            msg.command,
            Command::Comment {
                addr: CanonicalAddress(0x40),
                text: "todo".into(),
                repeatable: false,
            }
        );
    }

    #[tokio::test]
    async fn test_outbound_limits_match_inbound_validation() {
        let mut h = harness().await;
        let ea = EffectiveAddress(BASE + 0x50);

        h.backend.set_extra_comment(ea, 2000, "after");
        let posterior = LocalEvent::ExtraCommentChanged { ea, line: 2000 };
        let msg = h.router.on_local(&mut h.ctx, posterior, 1).unwrap().unwrap();
        let bytes = crate::protocol::encode(&msg).unwrap();
        assert_eq!(crate::protocol::decode(h.key, &bytes, false).unwrap(), msg);

        let past = LocalEvent::ExtraCommentChanged { ea, line: 5000 };
        assert!(matches!(
            h.router.on_local(&mut h.ctx, past, 1),
            Err(SyncError::InvalidMessage(_))
        ));

        let long = "x".repeat(crate::messages::limits::MAX_TEXT_LEN + 1);
        h.backend.set_comment(ea, false, &long);
        let event = LocalEvent::CommentChanged {
            ea,
            repeatable: false,
        };
        assert!(h.router.on_local(&mut h.ctx, event, 1).is_err());
        assert!(h.ctx.comments.get(&CommentKey::new(CanonicalAddress(0x50), CommentKind::Primary)).is_none());
    }

    mod ordering {
        use super::*;
        use crate::convergence::comment_state_digest;
        use proptest::prelude::*;

        fn message() -> impl Strategy<Value = (String, u64, String, u64)> {
            (
                prop::sample::select(vec!["alice", "bob", "carol"]).prop_map(String::from),
                0u64..4,
                prop_oneof![Just(String::new()), "[a-z]{1,6}".prop_map(String::from)],
                0u64..8,
            )
        }

        fn settle(key: ContentHash, messages: &[(String, u64, String, u64)]) -> [u8; 32] {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let mut h = harness().await;
                for (user, addr, text, ts) in messages {
                    let _ = h.router.dispatch(&mut h.ctx, &comment(key, user, *addr, text, *ts));
                }
                comment_state_digest(&h.ctx.comments)
            })
        }

        proptest! {
            #[test]
            fn shuffled_inbound_settles_identically(
                (messages, shuffled) in prop::collection::vec(message(), 0..16)
                    .prop_flat_map(|m| (Just(m.clone()), Just(m).prop_shuffle()))
            ) {
                let key = ContentHash::digest(BINARY);
                prop_assert_eq!(settle(key, &messages), settle(key, &shuffled));
            }
        }
    }
}
