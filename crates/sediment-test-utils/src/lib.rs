//! Shared test utilities for Sediment integration tests.
//!
//! This crate provides:
//! - [`TracingMemoryBackend`]: In-memory storage with operation recording and
//!   failure injection
//! - [`ConflictingLogStore`]: a log wrapper that simulates racing writers
//! - [`RacingLogStore`]: a log wrapper that commits another writer's
//!   transaction ahead of the first append
//! - [`TestContext`] and factory functions for test data
//!
//! # Example
//!
//! ```rust,ignore
//! use sediment_test_utils::{TestContext, FileFactory};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let ctx = TestContext::new();
//!     let store = ctx.state_store();
//!     store.initialise().await.unwrap();
//!     // ... run test ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod fixtures;
pub mod log;
pub mod storage;

pub use fixtures::*;
pub use log::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("sediment_statestore=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
