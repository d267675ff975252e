//! Offload Bundle Container Library
//!
//! Heterogeneous (host + accelerator) compilation produces one artifact
//! per target from the same source translation unit. This crate packages
//! those artifacts into a single container and extracts them again on
//! demand, as part of a compiler driver pipeline.
//!
//! Three container formats share one streaming handler contract:
//!
//! - a magic-tagged little-endian **binary** container for opaque
//!   payloads (bitcode, precompiled headers, AST dumps);
//! - an **object-file** container that stores each slice as a named
//!   section of the host object, built by delegating to an external
//!   object-copy tool;
//! - a comment-delimited **text** container for preprocessed sources,
//!   assembly and LLVM IR.
//!
//! [`OffloadBundler`] drives the four top-level operations (list, bundle,
//! unbundle, archive unbundle) from a [`BundlerConfig`]. Static-library
//! inputs are handled by walking the archive members and re-emitting one
//! per-target archive.

pub mod archive;
pub mod bundler;
pub mod config;
pub mod elf;
pub mod error;
pub mod handler;
pub mod target;
pub mod targetid;
pub mod tempfiles;

pub use bundler::OffloadBundler;
pub use config::{BundlerConfig, FilesType, HOST_INPUT_UNSET};
pub use error::{Error, Result};
pub use handler::{create_file_handler, FileHandler, OutputFile};
pub use target::{is_code_object_compatible, OffloadTargetInfo, Triple};
pub use tempfiles::TempScope;

/// Magic string that marks the presence of offloading data. The binary
/// container starts with it, object-file sections and text markers carry
/// it as a name prefix.
pub const OFFLOAD_BUNDLE_MAGIC: &str = "__CLANG_OFFLOAD_BUNDLE__";
