//! Binary images referenced by a crash report.

use std::fmt;

use thiserror::Error;

use crashlog_common::{Arch, Uuid};

/// A half-open range of addresses occupied by a binary image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AddressRange {
    base: u64,
    length: u64,
}

impl AddressRange {
    /// Creates a range starting at `base` spanning `length` bytes.
    ///
    /// Returns `None` if the range is empty or exceeds the address space.
    pub fn new(base: u64, length: u64) -> Option<Self> {
        if length == 0 || base.checked_add(length).is_none() {
            return None;
        }

        Some(AddressRange { base, length })
    }

    /// Creates a range from inclusive bounds, as printed in text crash reports.
    pub fn from_inclusive(start: u64, end: u64) -> Option<Self> {
        if end < start {
            return None;
        }

        Self::new(start, (end - start).checked_add(1)?)
    }

    /// The first address in the range.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// The number of bytes in the range.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// The first address after the range.
    pub fn max(&self) -> u64 {
        self.base + self.length
    }

    /// Returns whether `address` falls into this range.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.max()
    }

    /// Returns whether the two ranges share at least one address.
    pub fn overlaps(&self, other: &AddressRange) -> bool {
        self.base < other.max() && other.base < self.max()
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}..{:#x}", self.base, self.max())
    }
}

/// A module that was loaded into the crashed process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinaryImage {
    /// The identifier of the image, usually its bundle identifier or its file name.
    pub identifier: String,
    /// The file name of the image.
    pub name: String,
    /// The UUID of the image, used to find matching debug information.
    pub uuid: Option<Uuid>,
    /// The addresses occupied by the image.
    pub range: AddressRange,
    /// The marketing version of the image.
    pub version: Option<String>,
    /// The build number of the image.
    pub build: Option<String>,
    /// The architecture of the image.
    pub arch: Option<Arch>,
    /// The full path of the image on the crashed system.
    pub path: String,
    /// Whether this is the main executable of the process.
    pub is_main: bool,
    /// Whether the image is application code rather than a system library.
    pub is_user_code: bool,
}

impl BinaryImage {
    /// The address the image was loaded at.
    pub fn load_address(&self) -> u64 {
        self.range.base()
    }

    /// Returns whether `address` falls into this image.
    pub fn contains(&self, address: u64) -> bool {
        self.range.contains(address)
    }

    /// Returns the offset of `address` relative to the load address of this image.
    pub fn offset_of(&self, address: u64) -> Option<u64> {
        self.contains(address).then(|| address - self.load_address())
    }
}

/// Returns whether `path` points into a system location.
pub(crate) fn is_system_path(path: &str) -> bool {
    path.starts_with("/System/") || path.starts_with("/usr/lib/")
}

/// Returns the last component of a path.
pub(crate) fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Error returned when inserting an image that overlaps an image already in the registry.
#[derive(Debug, Error)]
#[error("binary image {} at {} overlaps {existing}", .image.identifier, .image.range)]
pub struct OverlappingImageError {
    /// The rejected image.
    pub image: Box<BinaryImage>,
    /// The identifier of the image already occupying the range.
    pub existing: String,
}

/// The binary images of a crash report, sorted by load address.
///
/// The registry guarantees that no two images overlap, so every address maps to at most one image.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BinaryImageRegistry {
    images: Vec<BinaryImage>,
}

impl BinaryImageRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an image, keeping the registry sorted.
    ///
    /// Images overlapping an existing image are rejected.
    pub fn insert(&mut self, image: BinaryImage) -> Result<(), OverlappingImageError> {
        let index = self
            .images
            .partition_point(|existing| existing.load_address() < image.load_address());

        let neighbors = index.checked_sub(1).into_iter().chain(Some(index));
        for neighbor in neighbors {
            if let Some(existing) = self.images.get(neighbor) {
                if existing.range.overlaps(&image.range) {
                    return Err(OverlappingImageError {
                        existing: existing.identifier.clone(),
                        image: Box::new(image),
                    });
                }
            }
        }

        self.images.insert(index, image);
        Ok(())
    }

    /// Returns the image containing `address`.
    pub fn image_containing(&self, address: u64) -> Option<&BinaryImage> {
        let index = self
            .images
            .partition_point(|image| image.load_address() <= address);

        let image = self.images.get(index.checked_sub(1)?)?;
        image.contains(address).then_some(image)
    }

    /// Returns the image with the given identifier.
    pub fn image_by_identifier(&self, identifier: &str) -> Option<&BinaryImage> {
        self.images
            .iter()
            .find(|image| image.identifier == identifier)
    }

    /// Returns the image with the given UUID.
    pub fn image_by_uuid(&self, uuid: Uuid) -> Option<&BinaryImage> {
        self.images.iter().find(|image| image.uuid == Some(uuid))
    }

    /// Returns the main executable of the process.
    pub fn main_image(&self) -> Option<&BinaryImage> {
        self.images.iter().find(|image| image.is_main)
    }

    /// All images in ascending order of their load address.
    pub fn images(&self) -> &[BinaryImage] {
        &self.images
    }

    /// Iterates over all images in ascending order of their load address.
    pub fn iter(&self) -> std::slice::Iter<'_, BinaryImage> {
        self.images.iter()
    }

    /// The number of images.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Returns whether the registry holds no images.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl<'a> IntoIterator for &'a BinaryImageRegistry {
    type Item = &'a BinaryImage;
    type IntoIter = std::slice::Iter<'a, BinaryImage>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
