//! Test helpers for `crashlog`.
//!
//! Besides locating text fixtures, this crate builds small Mach-O files with hand-assembled DWARF
//! so that tests do not depend on a compiler toolchain or checked-in binaries.
#![warn(missing_docs)]

use std::path::{Path, PathBuf};

mod dwarf;
mod macho;
mod writer;

pub use crate::dwarf::*;
pub use crate::macho::*;
pub use crate::writer::*;

/// Returns the full path to the specified fixture.
///
/// Fixtures are stored in the `crashlog-testutils/fixtures` directory and paths should be given
/// relative to that location.
///
/// # Example
///
/// ```
/// use crashlog_testutils::fixture;
///
/// let path = fixture("legacy/two_threads.crash");
/// assert!(path.ends_with("legacy/two_threads.crash"));
/// ```
pub fn fixture<P: AsRef<Path>>(path: P) -> PathBuf {
    let mut full_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    full_path.push("fixtures");

    let path = path.as_ref();
    full_path.push(path);

    assert!(
        full_path.exists(),
        "Fixture does not exist: {}",
        full_path.display()
    );

    full_path
}

/// Reads the specified fixture into a string.
pub fn fixture_string<P: AsRef<Path>>(path: P) -> String {
    let path = fixture(path);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("cannot read fixture {}: {}", path.display(), e))
}
