//! # envd-fetch
//!
//! Network and filesystem collaborators of the envd compiler.
//!
//! [`NetworkHost`] implements [`envd_ir::CompileHost`] on top of:
//! - **Registry**: image configuration lookup over the OCI distribution API.
//! - **Marketplace**: VSCode extension download and unpacking into the cache dir.
//! - **oh-my-zsh**: a shallow git clone kept in the cache dir.
//! - **Releases**: latest GitHub release lookup behind a TTL file cache.
//!
//! Every call blocks and performs at most one network round trip.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod host;
pub mod registry;
pub mod release;
pub mod vscode;
pub mod zsh;

pub use host::NetworkHost;
