//! # revsync Testkit
//!
//! Testing utilities for revsync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: Peers (backend + transport + engine) sharing one in-memory broker
//! - **Generators**: Proptest strategies for comment contributions and messages
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use revsync_testkit::fixtures::{peers, wait_converged};
//!
//! let broker = MemoryBroker::new();
//! let peers = peers(&broker, &["alice", "bob"]).await;
//! peers[0].set_comment(peers[0].ea(0x10), "entry point").await?;
//! assert!(wait_converged(&peers).await);
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use revsync_testkit::generators::{comment_updates, apply_all};
//!
//! proptest! {
//!     #[test]
//!     fn merge_is_order_independent(updates in comment_updates(8)) {
//!         // ...
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{eventually, peers, wait_converged, PeerFixture, TEST_BINARY};
pub use generators::{apply_all, comment_updates, CommentUpdate};
