//! Common functionality for `crashlog`.
//!
//! This crate exposes a set of key types:
//!
//!  - [`ByteView`]: Gives access to binary data in-memory or on the file system.
//!  - [`Arch`] and [`CpuFamily`]: CPU architectures as named by crash reports and Mach headers.
//!  - [`Language`]: The source language declared by debug information.
//!  - Functions and utilities to deal with source paths and `dSYM` bundles.

#![warn(missing_docs)]

mod byteview;
mod path;
mod types;

pub use crate::byteview::*;
pub use crate::path::*;
pub use crate::types::*;

pub use uuid::Uuid;
