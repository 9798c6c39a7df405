//! Readers for Mach-O object files and the DWARF debugging information they carry.
//!
//! The entry points are [`MachArchive`] and [`MachObject`], which expose load commands, segments,
//! sections and the symbol table of an object file, and [`DwarfFile`], which decodes the DWARF
//! sections of such an object on demand and answers address lookups with [`SymbolicationData`].
//!
//! All structures are views over a shared [`ByteView`]. Nothing is copied out of the underlying
//! buffer until it is requested, and every derived table is computed at most once.
//!
//! # Example
//!
//! ```no_run
//! use crashlog_common::ByteView;
//! use crashlog_debuginfo::{DwarfFile, MachArchive};
//!
//! let view = ByteView::open("Example.dSYM/Contents/Resources/DWARF/Example").unwrap();
//! let archive = MachArchive::parse(view).unwrap();
//! let object = archive.object_by_index(0).unwrap().unwrap();
//! let dwarf = DwarfFile::parse(&object).unwrap();
//!
//! let data = dwarf.lookup(object.load_address() + 0x1020).unwrap();
//! if data.found {
//!     println!("{:?} at {:?}:{:?}", data.symbol, data.file, data.line);
//! }
//! ```
//!
//! [`ByteView`]: crashlog_common::ByteView

#![warn(missing_docs)]

mod buffer;
mod symbolication;

pub mod dwarf;
pub mod leb128;
pub mod macho;

pub use crate::buffer::*;
pub use crate::dwarf::{DwarfError, DwarfFile};
pub use crate::macho::{MachArchive, MachError, MachErrorKind, MachObject};
pub use crate::symbolication::*;
