//! Locating object files for the binary images of a crash report.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crashlog_common::{DSymPathExt, Uuid};
use crashlog_report::BinaryImage;

/// Finds the object file holding debug information for a binary image.
///
/// The [`Symbolicator`](crate::Symbolicator) asks its locator at most once per image. A locator
/// that returns `None` makes every lookup in that image come back as not found.
pub trait ObjectLocator: Send + Sync + 'static {
    /// Returns the path of an object file for `image`, if one is available.
    fn locate(&self, image: &BinaryImage) -> Option<PathBuf>;
}

impl<F> ObjectLocator for F
where
    F: Fn(&BinaryImage) -> Option<PathBuf> + Send + Sync + 'static,
{
    fn locate(&self, image: &BinaryImage) -> Option<PathBuf> {
        self(image)
    }
}

/// A locator that never finds anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoLocator;

impl ObjectLocator for NoLocator {
    fn locate(&self, _image: &BinaryImage) -> Option<PathBuf> {
        None
    }
}

/// Maps image identifiers and UUIDs to object paths.
///
/// A UUID mapping takes precedence over an identifier mapping.
///
/// # Example
///
/// ```
/// use crashlog_symbolicate::PathMapLocator;
///
/// let locator = PathMapLocator::new()
///     .with_identifier("com.example.Example", "Example.dSYM/Contents/Resources/DWARF/Example");
/// assert_eq!(locator.len(), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct PathMapLocator {
    by_identifier: HashMap<String, PathBuf>,
    by_uuid: HashMap<Uuid, PathBuf>,
}

impl PathMapLocator {
    /// Creates an empty locator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a mapping from an image identifier to a path.
    pub fn with_identifier(mut self, identifier: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.insert_identifier(identifier, path);
        self
    }

    /// Adds a mapping from an image UUID to a path.
    pub fn with_uuid(mut self, uuid: Uuid, path: impl Into<PathBuf>) -> Self {
        self.insert_uuid(uuid, path);
        self
    }

    /// Maps an image identifier to a path, replacing a previous mapping.
    pub fn insert_identifier(&mut self, identifier: impl Into<String>, path: impl Into<PathBuf>) {
        self.by_identifier.insert(identifier.into(), path.into());
    }

    /// Maps an image UUID to a path, replacing a previous mapping.
    pub fn insert_uuid(&mut self, uuid: Uuid, path: impl Into<PathBuf>) {
        self.by_uuid.insert(uuid, path.into());
    }

    /// The number of mappings.
    pub fn len(&self) -> usize {
        self.by_identifier.len() + self.by_uuid.len()
    }

    /// Whether there are no mappings.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectLocator for PathMapLocator {
    fn locate(&self, image: &BinaryImage) -> Option<PathBuf> {
        image
            .uuid
            .and_then(|uuid| self.by_uuid.get(&uuid))
            .or_else(|| self.by_identifier.get(&image.identifier))
            .cloned()
    }
}

/// Searches directories for `dSYM` bundles and plain object files named like the image.
///
/// For an image named `Example`, every directory is checked for `Example.dSYM`,
/// `Example.app.dSYM` and a file called `Example`, in this order.
#[derive(Clone, Default)]
pub struct DirectoryLocator {
    directories: Vec<PathBuf>,
}

impl DirectoryLocator {
    /// Creates a locator searching the given directories in order.
    pub fn new<I, P>(directories: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        DirectoryLocator {
            directories: directories.into_iter().map(Into::into).collect(),
        }
    }

    fn search(directory: &Path, name: &str) -> Option<PathBuf> {
        let candidates = [format!("{name}.dSYM"), format!("{name}.app.dSYM")];
        for candidate in &candidates {
            if let Some(path) = directory.join(candidate).resolve_dsym() {
                return Some(path);
            }
        }

        let path = directory.join(name);
        path.is_file().then_some(path)
    }
}

impl ObjectLocator for DirectoryLocator {
    fn locate(&self, image: &BinaryImage) -> Option<PathBuf> {
        if image.name.is_empty() || image.name.contains('/') {
            return None;
        }

        self.directories
            .iter()
            .find_map(|directory| Self::search(directory, &image.name))
    }
}

impl fmt::Debug for DirectoryLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.directories).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use crashlog_report::AddressRange;
    use similar_asserts::assert_eq;

    fn image(name: &str, uuid: Option<Uuid>) -> BinaryImage {
        BinaryImage {
            identifier: format!("com.example.{name}"),
            name: name.to_owned(),
            uuid,
            range: AddressRange::new(0x1000, 0x1000).unwrap(),
            version: None,
            build: None,
            arch: None,
            path: format!("/Applications/{name}.app/Contents/MacOS/{name}"),
            is_main: false,
            is_user_code: true,
        }
    }

    #[test]
    fn test_path_map_prefers_uuid() {
        let uuid = Uuid::from_u128(0x6a12_8a5e_7b4c_3d2e_9f10_a1b2_c3d4_e5f6);
        let locator = PathMapLocator::new()
            .with_identifier("com.example.Example", "/by/identifier")
            .with_uuid(uuid, "/by/uuid");

        let located = locator.locate(&image("Example", Some(uuid)));
        assert_eq!(located, Some(PathBuf::from("/by/uuid")));

        let located = locator.locate(&image("Example", None));
        assert_eq!(located, Some(PathBuf::from("/by/identifier")));

        assert_eq!(locator.locate(&image("Other", None)), None);
    }

    #[test]
    fn test_closure_locator() {
        let locator = |image: &BinaryImage| Some(PathBuf::from(&image.path));
        let located = ObjectLocator::locate(&locator, &image("Example", None));
        assert_eq!(
            located,
            Some(PathBuf::from("/Applications/Example.app/Contents/MacOS/Example"))
        );
        assert_eq!(NoLocator.locate(&image("Example", None)), None);
    }

    #[test]
    fn test_directory_locator() -> Result<(), std::io::Error> {
        let tmp = tempfile::tempdir()?;
        let dwarf_dir = tmp.path().join("Example.app.dSYM/Contents/Resources/DWARF");
        fs::create_dir_all(&dwarf_dir)?;
        fs::write(dwarf_dir.join("Example"), b"\xcf\xfa\xed\xfe")?;
        fs::write(tmp.path().join("Helper"), b"\xcf\xfa\xed\xfe")?;

        let locator = DirectoryLocator::new([tmp.path()]);
        assert_eq!(
            locator.locate(&image("Example", None)),
            Some(dwarf_dir.join("Example"))
        );
        assert_eq!(
            locator.locate(&image("Helper", None)),
            Some(tmp.path().join("Helper"))
        );
        assert_eq!(locator.locate(&image("Missing", None)), None);

        Ok(())
    }
}
