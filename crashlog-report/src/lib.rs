//! Parsing of Apple crash reports.
//!
//! Two formats are supported: the line-oriented text format that macOS and iOS have written for a
//! long time, and the JSON based IPS format of newer releases. [`CrashReport`] detects the format
//! and parses a report in two phases. Creating a report only extracts the [`ReportSummary`], which
//! is enough to list many reports quickly. Threads, binary images and all other sections are
//! parsed on first access.
//!
//! Every frame of a backtrace is matched against the [`BinaryImageRegistry`] of its report, which
//! yields the image identifier and the image relative offset needed for symbolication.
//!
//! # Example
//!
//! ```no_run
//! use crashlog_report::CrashReport;
//!
//! let report = CrashReport::from_path("Example-2023-05-04-133711.ips").unwrap();
//! println!("{} crashed: {}", report.process_name(), report.crash_signature());
//!
//! if let Some(thread) = report.crashed_thread() {
//!     for frame in &thread.frames {
//!         println!("{:>3} {:#018x} {:?}", frame.index, frame.address, frame.symbol);
//!     }
//! }
//! ```

#![warn(missing_docs)]

mod error;
mod image;
mod ips;
mod report;
mod text;
mod types;

pub use crate::error::*;
pub use crate::image::{AddressRange, BinaryImage, BinaryImageRegistry, OverlappingImageError};
pub use crate::report::*;
pub use crate::types::*;
