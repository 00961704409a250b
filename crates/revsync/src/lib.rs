//! # revsync
//!
//! Real-time annotation sync for analysts working on the same binary.
//!
//! This crate re-exports the core components and provides the [`Engine`],
//! the single task that owns all sync state for one analysis database.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use revsync::{Engine, EngineConfig};
//! use revsync::core::{ImageBase, MemoryBackend};
//! use revsync::sync::MemoryBroker;
//!
//! let broker = MemoryBroker::new();
//! let backend = Arc::new(MemoryBackend::new(binary, ImageBase(0x400000)));
//! let engine = Engine::start(
//!     EngineConfig::with_nick("alice"),
//!     backend,
//!     Arc::new(broker.connect("alice")),
//! );
//!
//! engine.on_file_opened().await?;
//! engine.on_rename(EffectiveAddress(0x401000), "parse_header").await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod host;

pub use revsync_core as core;
pub use revsync_sync as sync;

pub use config::EngineConfig;
pub use engine::{unix_now, Engine, EngineHandle, EngineStats, SessionSnapshot};
pub use error::{EngineError, Result};
pub use host::{HostAdapter, HostEvent};
