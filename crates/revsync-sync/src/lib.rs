//! # revsync Sync
//!
//! Channel protocol for keeping annotations in sync between analysts.
//!
//! ## Overview
//!
//! Every analyst working on the same binary joins a pub/sub channel named
//! after the binary's content hash. Local renames and comments are published
//! on that channel; everything received is merged into local state.
//!
//! ## Key Properties
//!
//! - **Gated**: Traffic is accepted only for the joined binary, and only while
//!   the file on disk still hashes to it
//! - **Commutative**: Comment merge order doesn't affect final state
//! - **Idempotent**: Duplicate deliveries change nothing
//! - **Echo-free**: Applying a remote update never republishes it
//!
//! ## Message Flow
//!
//! ```text
//! local edit ---> Router::on_local ---> CommentStore (change or echo?) ---> publish
//!
//! transport ---> protocol::decode ---> SessionManager::validate
//!            ---> Router::dispatch ---> CommentStore / backend write
//! ```

pub mod context;
pub mod convergence;
pub mod error;
pub mod messages;
pub mod protocol;
pub mod router;
pub mod session;
pub mod transport;

pub use context::SyncContext;
pub use convergence::{comment_state_digest, verify_convergence, ConvergenceResult};
pub use error::{Result, SyncError};
pub use messages::{limits, Command, SyncMessage, WireMessage};
pub use protocol::{decode, encode, SyncConfig};
pub use router::{Dispatched, LocalEvent, Router};
pub use session::{OpenOutcome, SessionManager, SessionState};
pub use transport::{
    memory::MemoryBroker, memory::MemoryTransport, Delivery, Inbox, Transport,
};
