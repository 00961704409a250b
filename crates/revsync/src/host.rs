//! Host integration surface.
//!
//! A host (the disassembler plugin) reports what happens in the local
//! database as [`HostEvent`]s sent through the engine handle. How the engine
//! learns that auto-analysis has finished depends on the host: some raise a
//! notification, others have to be polled. That choice is made once, when
//! the engine starts, and recorded as a [`HostAdapter`].

use std::time::Duration;

use revsync_core::{AnalysisBackend, EffectiveAddress};
use revsync_sync::LocalEvent;

/// Something that happened in the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A name was set at `ea`.
    Renamed { ea: EffectiveAddress, new_name: String },
    /// The primary or repeatable comment at `ea` changed.
    CommentChanged { ea: EffectiveAddress, repeatable: bool },
    /// An anterior/posterior comment line changed.
    ExtraCommentChanged {
        ea: EffectiveAddress,
        line: u32,
        repeatable: bool,
    },
    /// A comment was attached to a range.
    AreaCommentChanged {
        start: EffectiveAddress,
        end: EffectiveAddress,
        text: String,
    },
    /// A database was opened.
    FileOpened,
    /// The database was closed.
    FileClosed,
    /// Auto-analysis finished.
    AnalysisComplete,
}

impl HostEvent {
    /// The edit this event describes, if it is one.
    pub fn into_local(self) -> Option<LocalEvent> {
        match self {
            HostEvent::Renamed { ea, new_name } => Some(LocalEvent::Renamed { ea, name: new_name }),
            HostEvent::CommentChanged { ea, repeatable } => {
                Some(LocalEvent::CommentChanged { ea, repeatable })
            }
            // Extra lines carry no repeatable variant of their own.
            HostEvent::ExtraCommentChanged { ea, line, .. } => {
                Some(LocalEvent::ExtraCommentChanged { ea, line })
            }
            HostEvent::AreaCommentChanged { start, end, text } => {
                Some(LocalEvent::AreaCommentChanged { start, end, text })
            }
            HostEvent::FileOpened | HostEvent::FileClosed | HostEvent::AnalysisComplete => None,
        }
    }
}

/// How analysis readiness is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostAdapter {
    /// The host sends [`HostEvent::AnalysisComplete`].
    Notifying,
    /// The engine polls the backend at `interval`.
    Polling { interval: Duration },
}

impl HostAdapter {
    /// Pick the adapter for `backend`.
    pub fn probe(backend: &dyn AnalysisBackend, poll_interval: Duration) -> Self {
        if backend.supports_analysis_notifications() {
            HostAdapter::Notifying
        } else {
            HostAdapter::Polling {
                interval: poll_interval,
            }
        }
    }

    /// Poll interval, for adapters that poll.
    pub fn readiness_poll(&self) -> Option<Duration> {
        match self {
            HostAdapter::Notifying => None,
            HostAdapter::Polling { interval } => Some(*interval),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HostAdapter::Notifying => "notifying",
            HostAdapter::Polling { .. } => "polling",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revsync_core::{ImageBase, MemoryBackend};

    #[test]
    fn test_probe() {
        let backend = MemoryBackend::new(b"bin".to_vec(), ImageBase(0));
        let interval = Duration::from_millis(10);
        assert_eq!(HostAdapter::probe(&backend, interval), HostAdapter::Notifying);

        backend.set_notifications(false);
        let adapter = HostAdapter::probe(&backend, interval);
        assert_eq!(adapter, HostAdapter::Polling { interval });
        assert_eq!(adapter.readiness_poll(), Some(interval));
        assert_eq!(adapter.name(), "polling");
    }

    #[test]
    fn test_lifecycle_events_are_not_edits() {
        assert!(HostEvent::FileOpened.into_local().is_none());
        assert!(HostEvent::AnalysisComplete.into_local().is_none());

        let event = HostEvent::ExtraCommentChanged {
            ea: EffectiveAddress(4),
            line: 1001,
            repeatable: true,
        };
        assert_eq!(
            event.into_local(),
            Some(LocalEvent::ExtraCommentChanged {
                ea: EffectiveAddress(4),
                line: 1001,
            })
        );
    }
}
