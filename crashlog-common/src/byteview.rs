//! A wrapper type providing direct memory access to binary data.
//!
//! Crash reports are usually small enough to be read into memory, but debug companions of large
//! applications easily reach hundreds of megabytes. [`ByteView`] maps such files instead of reading
//! them, and hands out cheap clones so that a Mach object and the DWARF reader built on top of it
//! can share the same backing memory.

use std::borrow::Cow;
use std::fs::File;
use std::io;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

/// The owner of data behind a ByteView.
#[derive(Debug)]
enum Backing<'a> {
    Buf(Cow<'a, [u8]>),
    Mmap(Mmap),
}

impl Deref for Backing<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match *self {
            Backing::Buf(ref buf) => buf,
            Backing::Mmap(ref mmap) => mmap,
        }
    }
}

/// A smart pointer for byte data.
///
/// A `ByteView` dereferences into `&[u8]` and can be constructed from borrowed slices, vectors or
/// memory mapped files. Cloning only bumps a reference count.
///
/// # Example
///
/// ```
/// use crashlog_common::ByteView;
///
/// let view = ByteView::from_slice(b"\xcf\xfa\xed\xfe");
/// assert_eq!(view.len(), 4);
/// ```
#[derive(Clone, Debug)]
pub struct ByteView<'a> {
    backing: Arc<Backing<'a>>,
}

impl<'a> ByteView<'a> {
    fn with_backing(backing: Backing<'a>) -> Self {
        ByteView {
            backing: Arc::new(backing),
        }
    }

    /// Constructs a `ByteView` from a `Cow`.
    pub fn from_cow(cow: Cow<'a, [u8]>) -> Self {
        ByteView::with_backing(Backing::Buf(cow))
    }

    /// Constructs a `ByteView` from a byte slice.
    pub fn from_slice(buffer: &'a [u8]) -> Self {
        ByteView::from_cow(Cow::Borrowed(buffer))
    }

    /// Constructs a `ByteView` from a vector of bytes.
    pub fn from_vec(buffer: Vec<u8>) -> Self {
        ByteView::from_cow(Cow::Owned(buffer))
    }

    /// Constructs a `ByteView` by memory mapping an open file.
    ///
    /// Empty files cannot be mapped on all platforms; they result in an empty view instead.
    pub fn map_file(file: &File) -> Result<Self, io::Error> {
        let backing = match unsafe { Mmap::map(file) } {
            Ok(mmap) => Backing::Mmap(mmap),
            Err(err) if err.kind() == io::ErrorKind::InvalidInput => {
                Backing::Buf(Cow::Borrowed(b""))
            }
            Err(err) => return Err(err),
        };

        Ok(ByteView::with_backing(backing))
    }

    /// Constructs a `ByteView` from any reader by consuming it into an owned buffer.
    pub fn read<R: io::Read>(mut reader: R) -> Result<Self, io::Error> {
        let mut buffer = vec![];
        reader.read_to_end(&mut buffer)?;
        Ok(ByteView::from_vec(buffer))
    }

    /// Constructs a `ByteView` from a file path by memory mapping the file.
    ///
    /// ```no_run
    /// use crashlog_common::ByteView;
    ///
    /// let view = ByteView::open("Finder_2021-03-09-101010_host.crash")?;
    /// # Ok::<(), std::io::Error>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, io::Error> {
        let file = File::open(path)?;
        Self::map_file(&file)
    }

    /// Returns a slice of the underlying data.
    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        self.backing.deref()
    }
}

impl AsRef<[u8]> for ByteView<'_> {
    #[inline(always)]
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Deref for ByteView<'_> {
    type Target = [u8];

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}
