//! # envd-llb
//!
//! Low-level build-state graph for envd.
//!
//! A [`State`] is an immutable handle to a filesystem snapshot together with
//! the environment, working directory and user that commands run with.
//! Deriving a state (running a command, writing files, diffing or merging)
//! never mutates the original, so one state can feed any number of branches.
//!
//! [`State::marshal`] walks the DAG reachable from a state and produces a
//! [`Definition`]: every operation keyed by the SHA-256 digest of its
//! canonical form, deduplicated, and listed in dependency order.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod definition;
pub mod exec;
pub mod file;
pub mod op;
pub mod source;
pub mod state;

pub use definition::{Definition, DefinitionOp};
pub use exec::{Run, RunMount};
pub use file::{CopyOptions, FileActions, MkdirOptions};
pub use op::{CacheSharing, Op};
pub use source::HttpOptions;
pub use state::State;
