//! # envd-ir
//!
//! The environment graph and its compiler.
//!
//! A frontend creates one [`Graph`] per build, fills it through the typed
//! setters, resolves the owning identity with [`resolve_identity`] and calls
//! [`Graph::compile`]. Compilation walks the graph once and produces an
//! [`envd_llb::Definition`] for the build engine:
//!
//! 1. Base image, with CUDA rewriting and metadata inheritance.
//! 2. Dev tooling and the `envd` account.
//! 3. System packages and language toolchains, merged as parallel branches
//!    unless [`envd_common::types::StageCompositionStrategy::Sequential`] is
//!    requested.
//! 4. Language packages, extra sources and copies.
//! 5. Ownership, SSH key, shell, prompt, agents, supervisor and editors.
//! 6. User commands and mount points.
//!
//! Network and filesystem lookups needed along the way go through the
//! [`CompileHost`] trait. After compiling, [`Graph::labels`],
//! [`Graph::entrypoint`], [`Graph::environ`] and [`Graph::exposed_ports`]
//! describe the image configuration.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod agent;
mod base;
mod cache;
mod compile;
mod compose;
mod editor;
mod git;
mod graph;
mod labels;
mod lang;
pub mod language;
pub mod owner;
pub mod runtime;
mod shell;
pub mod supervisor;
mod system;
pub mod types;
mod user;

pub use base::cuda_image;
pub use compile::{BUILD_CONTEXT_SOURCE, CACHE_DIR_SOURCE, CompileHost, CompileOptions};
pub use editor::{Plugin, jupyter_command, rstudio_command};
pub use graph::Graph;
pub use language::{Language, LanguageKind, parse_language};
pub use owner::{parse_owner, resolve_identity};
pub use runtime::{ExposeItem, RuntimeGraph};
pub use supervisor::{ServiceDescriptor, services};
