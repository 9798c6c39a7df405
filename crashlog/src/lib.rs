//! `crashlog` reads the crash reports that macOS and iOS write when a process terminates
//! abnormally, and symbolicates their stack traces. It consists of several largely independent
//! crates, which are bundled together here.
//!
//! # What's in the package
//!
//! - Parsing of crash reports
//!   - The legacy text format, report versions 6 through 104
//!   - The JSON based IPS format
//!   - Binary image registries that map addresses to loaded images
//! - Reading of object files
//!   - Mach-O objects, 32 and 64 bit, both byte orders, and fat archives
//!   - DWARF versions 2 to 5: units, line programs, address ranges
//! - Symbolication of crash report frames
//!   - Asynchronous lookups on tokio with per-image caching
//!   - Symbol table fallback for code without debug information
//!
//! # Usage
//!
//! Add `crashlog` as a dependency to your `Cargo.toml` and activate the features you need:
//!
//! - **`debuginfo`** (default): Mach-O and DWARF readers.
//! - **`report`** (default): The crash report parser.
//! - **`symbolicate`**: The symbolicator, which requires a tokio runtime.

#![warn(missing_docs)]

#[doc(inline)]
pub use crashlog_common as common;
#[doc(inline)]
#[cfg(feature = "debuginfo")]
pub use crashlog_debuginfo as debuginfo;
#[doc(inline)]
#[cfg(feature = "report")]
pub use crashlog_report as report;
#[doc(inline)]
#[cfg(feature = "symbolicate")]
pub use crashlog_symbolicate as symbolicate;
