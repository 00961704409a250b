//! The analysis backend seam.
//!
//! The host tool owns the effective-address space, the comment and name
//! mutation primitives and the "analysis complete" status. The sync engine
//! only talks to it through [`AnalysisBackend`].
//!
//! Backend calls are synchronous: they run inside the engine's single
//! mutation context, never concurrently with each other.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::canonical::{EffectiveAddress, ImageBase};
use crate::error::{CoreError, Result};
use crate::types::ContentHash;

/// Operations the sync engine needs from the host analysis session.
pub trait AnalysisBackend: Send + Sync {
    /// Image base of the current load.
    fn image_base(&self) -> ImageBase;

    /// Whether auto-analysis has finished.
    fn is_analysis_complete(&self) -> bool;

    /// Whether `ea` belongs to a loaded segment.
    fn is_loaded(&self, ea: EffectiveAddress) -> bool {
        let _ = ea;
        true
    }

    /// Set the regular comment at `ea`.
    fn write_comment(&self, ea: EffectiveAddress, text: &str) -> Result<()>;

    /// Set the repeatable comment at `ea`.
    fn write_repeatable_comment(&self, ea: EffectiveAddress, text: &str) -> Result<()>;

    /// Set one line of the extra comment block at `ea`.
    fn write_extra_comment(&self, ea: EffectiveAddress, line: u32, text: &str) -> Result<()>;

    /// Rename the item at `ea`.
    fn write_name(&self, ea: EffectiveAddress, name: &str) -> Result<()>;

    /// Read the regular or repeatable comment at `ea`.
    fn read_comment(&self, ea: EffectiveAddress, repeatable: bool) -> Result<Option<String>>;

    /// Read one line of the extra comment block at `ea`.
    fn read_extra_comment(&self, ea: EffectiveAddress, line: u32) -> Result<Option<String>>;

    /// Raw bytes of the loaded binary, `None` if no file is open.
    fn root_file_identity(&self) -> Result<Option<Vec<u8>>>;

    /// Whether the host delivers "analysis complete" notifications.
    ///
    /// Older hosts cannot, and the engine falls back to polling.
    fn supports_analysis_notifications(&self) -> bool {
        true
    }

    /// Recompute the content hash of the loaded binary.
    fn content_hash(&self) -> Result<Option<ContentHash>> {
        Ok(self.root_file_identity()?.map(|bytes| ContentHash::digest(&bytes)))
    }
}

/// A mutation recorded by [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendWrite {
    Comment { ea: EffectiveAddress, text: String },
    RepeatableComment { ea: EffectiveAddress, text: String },
    ExtraComment { ea: EffectiveAddress, line: u32, text: String },
    Name { ea: EffectiveAddress, name: String },
}

/// In-memory backend.
///
/// Primarily for tests and headless use. Records every write and lets the
/// caller flip analysis status, swap the binary, or make writes fail.
pub struct MemoryBackend {
    inner: RwLock<MemoryBackendInner>,
}

struct MemoryBackendInner {
    image_base: ImageBase,
    analysis_complete: bool,
    notifications: bool,
    fail_writes: bool,
    binary: Option<Vec<u8>>,
    unloaded: HashSet<EffectiveAddress>,
    comments: HashMap<(EffectiveAddress, bool), String>,
    extra: HashMap<(EffectiveAddress, u32), String>,
    names: HashMap<EffectiveAddress, String>,
    writes: Vec<BackendWrite>,
}

impl MemoryBackend {
    /// Create a backend with `binary` loaded at `image_base`, analysis done.
    pub fn new(binary: impl Into<Vec<u8>>, image_base: ImageBase) -> Self {
        Self {
            inner: RwLock::new(MemoryBackendInner {
                image_base,
                analysis_complete: true,
                notifications: true,
                fail_writes: false,
                binary: Some(binary.into()),
                unloaded: HashSet::new(),
                comments: HashMap::new(),
                extra: HashMap::new(),
                names: HashMap::new(),
                writes: Vec::new(),
            }),
        }
    }

    pub fn set_analysis_complete(&self, complete: bool) {
        self.write_inner().analysis_complete = complete;
    }

    pub fn set_notifications(&self, supported: bool) {
        self.write_inner().notifications = supported;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.write_inner().fail_writes = fail;
    }

    /// Replace the loaded binary (`None` closes it).
    pub fn set_binary(&self, binary: Option<Vec<u8>>) {
        self.write_inner().binary = binary;
    }

    pub fn set_unloaded(&self, ea: EffectiveAddress) {
        self.write_inner().unloaded.insert(ea);
    }

    /// Simulate a user typing a comment, bypassing the write log.
    pub fn set_comment(&self, ea: EffectiveAddress, repeatable: bool, text: &str) {
        self.write_inner()
            .comments
            .insert((ea, repeatable), text.to_string());
    }

    /// Simulate a user editing an extra comment line.
    pub fn set_extra_comment(&self, ea: EffectiveAddress, line: u32, text: &str) {
        self.write_inner().extra.insert((ea, line), text.to_string());
    }

    pub fn comment(&self, ea: EffectiveAddress, repeatable: bool) -> Option<String> {
        self.read_inner().comments.get(&(ea, repeatable)).cloned()
    }

    pub fn extra_comment(&self, ea: EffectiveAddress, line: u32) -> Option<String> {
        self.read_inner().extra.get(&(ea, line)).cloned()
    }

    pub fn name(&self, ea: EffectiveAddress) -> Option<String> {
        self.read_inner().names.get(&ea).cloned()
    }

    /// All writes made through the [`AnalysisBackend`] interface.
    pub fn writes(&self) -> Vec<BackendWrite> {
        self.read_inner().writes.clone()
    }

    fn read_inner(&self) -> std::sync::RwLockReadGuard<'_, MemoryBackendInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_inner(&self) -> std::sync::RwLockWriteGuard<'_, MemoryBackendInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, write: BackendWrite) -> Result<()> {
        let mut inner = self.write_inner();
        if inner.fail_writes {
            return Err(CoreError::Backend("write rejected".into()));
        }
        match &write {
            BackendWrite::Comment { ea, text } => {
                inner.comments.insert((*ea, false), text.clone());
            }
            BackendWrite::RepeatableComment { ea, text } => {
                inner.comments.insert((*ea, true), text.clone());
            }
            BackendWrite::ExtraComment { ea, line, text } => {
                inner.extra.insert((*ea, *line), text.clone());
            }
            BackendWrite::Name { ea, name } => {
                inner.names.insert(*ea, name.clone());
            }
        }
        inner.writes.push(write);
        Ok(())
    }
}

impl AnalysisBackend for MemoryBackend {
    fn image_base(&self) -> ImageBase {
        self.read_inner().image_base
    }

    fn is_analysis_complete(&self) -> bool {
        self.read_inner().analysis_complete
    }

    fn is_loaded(&self, ea: EffectiveAddress) -> bool {
        !self.read_inner().unloaded.contains(&ea)
    }

    fn write_comment(&self, ea: EffectiveAddress, text: &str) -> Result<()> {
        self.record(BackendWrite::Comment {
            ea,
            text: text.to_string(),
        })
    }

    fn write_repeatable_comment(&self, ea: EffectiveAddress, text: &str) -> Result<()> {
        self.record(BackendWrite::RepeatableComment {
            ea,
            text: text.to_string(),
        })
    }

    fn write_extra_comment(&self, ea: EffectiveAddress, line: u32, text: &str) -> Result<()> {
        self.record(BackendWrite::ExtraComment {
            ea,
            line,
            text: text.to_string(),
        })
    }

    fn write_name(&self, ea: EffectiveAddress, name: &str) -> Result<()> {
        self.record(BackendWrite::Name {
            ea,
            name: name.to_string(),
        })
    }

    fn read_comment(&self, ea: EffectiveAddress, repeatable: bool) -> Result<Option<String>> {
        Ok(self.comment(ea, repeatable))
    }

    fn read_extra_comment(&self, ea: EffectiveAddress, line: u32) -> Result<Option<String>> {
        Ok(self.extra_comment(ea, line))
    }

    fn root_file_identity(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.read_inner().binary.clone())
    }

    fn supports_analysis_notifications(&self) -> bool {
        self.read_inner().notifications
    }
}
