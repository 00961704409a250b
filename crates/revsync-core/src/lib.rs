//! # revsync Core
//!
//! Pure primitives for synchronizing reverse-engineering annotations between
//! analysts working on the same binary.
//!
//! This crate contains no networking and no host integration. It is pure
//! computation over addresses, content hashes and comment state, plus the
//! [`AnalysisBackend`] seam the host tool implements.
//!
//! ## Key Types
//!
//! - [`ContentHash`] - Identity of a binary (SHA-256 of its raw bytes)
//! - [`Canonicalizer`] - Maps effective addresses to load-independent ones
//! - [`CommentStore`] - Per-address, per-kind merged comment state
//! - [`LocalUpdate`] - Whether a locally observed comment is a genuine edit
//! - [`ReservedNames`] - Analyzer-generated name prefixes
//!
//! ## Canonical Addresses
//!
//! Peers may load the same binary at different image bases. Only canonical
//! addresses (relative to the image base) are ever put on the wire. See the
//! [`canonical`] module.

pub mod backend;
pub mod canonical;
pub mod comments;
pub mod error;
pub mod names;
pub mod types;

pub use backend::{AnalysisBackend, BackendWrite, MemoryBackend};
pub use canonical::{AddressRange, CanonicalAddress, Canonicalizer, EffectiveAddress, ImageBase};
pub use comments::{
    CommentKey, CommentKind, CommentRecord, CommentStore, Contribution, LocalUpdate,
    MergeOutcome, COMMENT_DELIMITER,
};
pub use error::{CoreError, Result};
pub use names::{ReservedNames, RESERVED_PREFIXES};
pub use types::ContentHash;
