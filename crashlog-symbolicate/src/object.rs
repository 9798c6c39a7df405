//! Loaded object files with their debug information.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crashlog_common::{Arch, ByteView, Uuid};
use crashlog_debuginfo::{
    DwarfError, DwarfFile, MachArchive, MachError, MachObject, SymbolicationData,
};

/// An error returned when an object file cannot be loaded.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    /// The object file could not be read.
    #[error("failed to read object file")]
    Io(#[from] io::Error),

    /// The object file is not a valid Mach-O file or fat archive.
    #[error("invalid object file")]
    Mach(#[from] MachError),

    /// The archive holds no objects at all.
    #[error("object file contains no objects")]
    Empty,
}

/// An object file slice ready for address lookups.
///
/// The file is memory mapped. Its DWARF sections are decoded lazily during lookups, so loading an
/// image only parses the Mach header and its load commands.
pub struct DebugImage {
    path: PathBuf,
    object: MachObject<'static>,
    dwarf: Option<DwarfFile<'static>>,
}

impl DebugImage {
    /// Opens the object file at `path`.
    ///
    /// In fat archives the slice matching `uuid` is chosen, then the slice matching `arch`, and
    /// finally the first slice.
    #[tracing::instrument(level = "trace", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(
        path: P,
        uuid: Option<Uuid>,
        arch: Option<Arch>,
    ) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let view = ByteView::open(path)?;
        Self::parse(path, view, uuid, arch)
    }

    /// Loads an object from a buffer, choosing the slice like [`open`](Self::open).
    pub fn parse(
        path: impl Into<PathBuf>,
        view: ByteView<'static>,
        uuid: Option<Uuid>,
        arch: Option<Arch>,
    ) -> Result<Self, LoadError> {
        let archive = MachArchive::parse(view)?;
        let object = select_object(&archive, uuid, arch)?.ok_or(LoadError::Empty)?;

        let dwarf = match DwarfFile::parse(&object) {
            Ok(dwarf) => Some(dwarf),
            Err(DwarfError::MissingSection(_)) => {
                tracing::debug!("object has no debug information");
                None
            }
            Err(error) => {
                tracing::warn!(error = &error as &dyn std::error::Error, "invalid debug information");
                None
            }
        };

        Ok(DebugImage {
            path: path.into(),
            object,
            dwarf,
        })
    }

    /// The path the image was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The selected object.
    pub fn object(&self) -> &MachObject<'static> {
        &self.object
    }

    /// Whether the object carries DWARF debug information.
    pub fn has_debug_info(&self) -> bool {
        self.dwarf.is_some()
    }

    /// Resolves an offset relative to the image's load address.
    ///
    /// The offset is rebased onto the `__TEXT` segment of the object. When the DWARF data has no
    /// match and `symbol_fallback` is set, the symbol table is consulted. The returned address is
    /// always the given offset.
    pub fn lookup(&self, offset: u64, symbol_fallback: bool) -> SymbolicationData {
        let Some(address) = self.object.load_address().checked_add(offset) else {
            return SymbolicationData::not_found(offset);
        };

        let mut data = match self.dwarf {
            Some(ref dwarf) => dwarf.lookup(address).unwrap_or_else(|error| {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    address,
                    "failed to look up address"
                );
                SymbolicationData::not_found(address)
            }),
            None => SymbolicationData::not_found(address),
        };

        if !data.found && symbol_fallback {
            if let Some(symbol) = self.object.symbol_for_address(address) {
                data = SymbolicationData::from_symbol(address, symbol.name.as_str());
            }
        }

        data.address = offset;
        data
    }
}

impl fmt::Debug for DebugImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugImage")
            .field("path", &self.path)
            .field("object", &self.object)
            .field("has_debug_info", &self.has_debug_info())
            .finish()
    }
}

fn select_object(
    archive: &MachArchive<'static>,
    uuid: Option<Uuid>,
    arch: Option<Arch>,
) -> Result<Option<MachObject<'static>>, MachError> {
    if let Some(uuid) = uuid {
        if let Some(object) = archive.object_by_uuid(uuid)? {
            return Ok(Some(object));
        }
    }

    if let Some(arch) = arch {
        if let Some(object) = archive.object_by_arch(arch)? {
            return Ok(Some(object));
        }
    }

    archive.object_by_index(0)
}
