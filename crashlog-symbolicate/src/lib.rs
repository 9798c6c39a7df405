//! Symbolication of Apple crash reports.
//!
//! A [`Symbolicator`] resolves the frames of a [`CrashReport`] to function names and source
//! locations. For every binary image, an [`ObjectLocator`] supplies the path of an object file or
//! `dSYM` companion. The object is loaded once, and addresses are translated from the image
//! relative offsets of the report into the address space of the object before they are looked up
//! in its DWARF debug information or, failing that, its symbol table.
//!
//! Lookups are asynchronous and run on the tokio runtime. Object files are decoded on the blocking
//! thread pool, and concurrent requests for the same image share a single load.
//!
//! ```no_run
//! use crashlog_report::CrashReport;
//! use crashlog_symbolicate::{DirectoryLocator, Symbolicator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let report = CrashReport::from_path("Example.crash")?;
//!     let symbolicator = Symbolicator::new(DirectoryLocator::new(["build/Release"]));
//!
//!     for thread in report.threads() {
//!         let results = symbolicator.symbolicate_thread(&report, thread).await;
//!         for (frame, data) in thread.frames.iter().zip(results) {
//!             println!("{:>3} {data}", frame.index);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! [`CrashReport`]: crashlog_report::CrashReport

#![warn(missing_docs)]

mod locator;
mod object;
mod symbolicator;

pub use crate::locator::*;
pub use crate::object::*;
pub use crate::symbolicator::*;

pub use crashlog_debuginfo::SymbolicationData;
