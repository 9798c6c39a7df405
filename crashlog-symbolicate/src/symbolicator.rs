use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crashlog_common::Uuid;
use crashlog_debuginfo::SymbolicationData;
use crashlog_report::{BinaryImage, CrashReport, StackFrame, Thread};

use crate::locator::ObjectLocator;
use crate::object::DebugImage;

/// Options of a [`Symbolicator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SymbolicatorConfig {
    /// Resolve addresses without DWARF coverage through the Mach-O symbol table.
    pub symbol_fallback: bool,
    /// Remember the result of every lookup, keyed by image and offset.
    ///
    /// The result cache grows with every distinct address. Call
    /// [`Symbolicator::clear_results`] between reports to release it.
    pub cache_results: bool,
}

impl Default for SymbolicatorConfig {
    fn default() -> Self {
        SymbolicatorConfig {
            symbol_fallback: true,
            cache_results: true,
        }
    }
}

/// Identifies an image across lookups.
///
/// Reports may list several images under the same identifier, so images without a UUID are told
/// apart by their load address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ImageKey {
    Uuid(Uuid),
    Loaded { identifier: String, load_address: u64 },
}

impl ImageKey {
    fn new(image: &BinaryImage) -> Self {
        match image.uuid {
            Some(uuid) => ImageKey::Uuid(uuid),
            None => ImageKey::Loaded {
                identifier: image.identifier.clone(),
                load_address: image.load_address(),
            },
        }
    }
}

/// The registry of object files.
///
/// Every image owns one cell. The first request initializes it on a blocking thread, and all
/// concurrent requests for the same image block on that cell instead of loading the object again.
type ImageCell = Arc<OnceCell<Option<Arc<DebugImage>>>>;

struct Inner {
    locator: Box<dyn ObjectLocator>,
    config: SymbolicatorConfig,
    images: Mutex<HashMap<ImageKey, ImageCell>>,
    results: Mutex<HashMap<(ImageKey, u64), SymbolicationData>>,
}

/// Resolves frames of crash reports to functions and source locations.
///
/// The symbolicator is cheap to clone and all clones share their caches. Object files are located
/// through an [`ObjectLocator`] and loaded at most once per image, on tokio's blocking thread
/// pool. Images that cannot be located or loaded resolve every address as not found.
///
/// # Example
///
/// ```no_run
/// use crashlog_report::CrashReport;
/// use crashlog_symbolicate::{PathMapLocator, Symbolicator};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let report = CrashReport::from_path("Example.crash")?;
/// let locator = PathMapLocator::new().with_identifier("com.example.Example", "Example.dSYM");
/// let symbolicator = Symbolicator::new(locator);
///
/// if let Some(thread) = report.crashed_thread() {
///     for data in symbolicator.symbolicate_thread(&report, thread).await {
///         println!("{data}");
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Symbolicator {
    inner: Arc<Inner>,
}

impl Symbolicator {
    /// Creates a symbolicator with the default configuration.
    pub fn new<L: ObjectLocator>(locator: L) -> Self {
        Self::with_config(locator, SymbolicatorConfig::default())
    }

    /// Creates a symbolicator with a custom configuration.
    pub fn with_config<L: ObjectLocator>(locator: L, config: SymbolicatorConfig) -> Self {
        Symbolicator {
            inner: Arc::new(Inner {
                locator: Box::new(locator),
                config,
                images: Mutex::new(HashMap::new()),
                results: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The configuration of this symbolicator.
    pub fn config(&self) -> SymbolicatorConfig {
        self.inner.config
    }

    /// Resolves an address given as offset from the load address of `image`.
    ///
    /// Dropping the returned future is safe. Object files are loaded on a detached blocking task,
    /// so a load that already started runs to completion and populates the image cache for later
    /// lookups.
    pub async fn lookup(&self, image: &BinaryImage, offset: u64) -> SymbolicationData {
        if let Some(data) = self.cached_result(image, offset) {
            return data;
        }

        let data = match self.load_image(image).await {
            Some(debug_image) => {
                let symbol_fallback = self.inner.config.symbol_fallback;
                let task =
                    tokio::task::spawn_blocking(move || debug_image.lookup(offset, symbol_fallback));
                match task.await {
                    Ok(data) => data,
                    Err(error) => {
                        tracing::warn!(
                            error = &error as &dyn std::error::Error,
                            image = image.identifier.as_str(),
                            "address lookup failed"
                        );
                        return SymbolicationData::not_found(offset);
                    }
                }
            }
            None => SymbolicationData::not_found(offset),
        };

        self.cache_result(image, offset, &data);
        data
    }

    /// Spawns [`lookup`](Self::lookup) onto the current tokio runtime.
    ///
    /// Dropping the handle abandons the result, but not the work.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn spawn_lookup(&self, image: BinaryImage, offset: u64) -> JoinHandle<SymbolicationData> {
        let symbolicator = self.clone();
        tokio::spawn(async move { symbolicator.lookup(&image, offset).await })
    }

    /// Resolves an address on the current thread, without a tokio runtime.
    ///
    /// This shares all caches with the asynchronous lookups. Do not call it from within an
    /// asynchronous context, as it blocks while loading object files.
    pub fn lookup_blocking(&self, image: &BinaryImage, offset: u64) -> SymbolicationData {
        if let Some(data) = self.cached_result(image, offset) {
            return data;
        }

        let cell = self.image_cell(image);
        let data = match self.load_image_blocking(&cell, image) {
            Some(debug_image) => debug_image.lookup(offset, self.inner.config.symbol_fallback),
            None => SymbolicationData::not_found(offset),
        };

        self.cache_result(image, offset, &data);
        data
    }

    /// Resolves a frame of `report`.
    ///
    /// Frames outside of all binary images are not found, their address stays absolute.
    pub async fn symbolicate_frame(
        &self,
        report: &CrashReport,
        frame: &StackFrame,
    ) -> SymbolicationData {
        match Self::frame_target(report, frame) {
            Some((image, offset)) => self.lookup(image, offset).await,
            None => SymbolicationData::not_found(frame.address),
        }
    }

    /// Resolves all frames of a thread concurrently, returning results in frame order.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub async fn symbolicate_thread(
        &self,
        report: &CrashReport,
        thread: &Thread,
    ) -> Vec<SymbolicationData> {
        let pending: Vec<_> = thread
            .frames
            .iter()
            .map(|frame| match Self::frame_target(report, frame) {
                Some((image, offset)) => Ok(self.spawn_lookup(image.clone(), offset)),
                None => Err(SymbolicationData::not_found(frame.address)),
            })
            .collect();

        let mut results = Vec::with_capacity(pending.len());
        for (frame, pending) in thread.frames.iter().zip(pending) {
            let data = match pending {
                Ok(handle) => handle.await.unwrap_or_else(|error| {
                    tracing::warn!(
                        error = &error as &dyn std::error::Error,
                        frame = frame.index,
                        "frame lookup failed"
                    );
                    SymbolicationData::not_found(frame.image_offset.unwrap_or(frame.address))
                }),
                Err(data) => data,
            };
            results.push(data);
        }

        results
    }

    fn frame_target<'r>(
        report: &'r CrashReport,
        frame: &StackFrame,
    ) -> Option<(&'r BinaryImage, u64)> {
        let image = report.image_for_frame(frame)?;
        let offset = frame.image_offset.or_else(|| image.offset_of(frame.address))?;
        Some((image, offset))
    }

    fn cached_result(&self, image: &BinaryImage, offset: u64) -> Option<SymbolicationData> {
        if !self.inner.config.cache_results {
            return None;
        }

        let results = self.inner.results.lock();
        results.get(&(ImageKey::new(image), offset)).cloned()
    }

    fn cache_result(&self, image: &BinaryImage, offset: u64, data: &SymbolicationData) {
        if self.inner.config.cache_results {
            let mut results = self.inner.results.lock();
            results.insert((ImageKey::new(image), offset), data.clone());
        }
    }

    fn image_cell(&self, image: &BinaryImage) -> ImageCell {
        let mut images = self.inner.images.lock();
        images.entry(ImageKey::new(image)).or_default().clone()
    }

    async fn load_image(&self, image: &BinaryImage) -> Option<Arc<DebugImage>> {
        let cell = self.image_cell(image);
        if let Some(loaded) = cell.get() {
            return loaded.clone();
        }

        let symbolicator = self.clone();
        let owned = image.clone();
        let task =
            tokio::task::spawn_blocking(move || symbolicator.load_image_blocking(&cell, &owned));

        task.await.unwrap_or_else(|error| {
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                image = image.identifier.as_str(),
                "image load failed"
            );
            None
        })
    }

    /// Loads the image into `cell` unless another thread already did.
    ///
    /// Concurrent callers block until the first one finished, so each object is decoded once.
    fn load_image_blocking(
        &self,
        cell: &ImageCell,
        image: &BinaryImage,
    ) -> Option<Arc<DebugImage>> {
        cell.get_or_init(|| self.open_image(image)).clone()
    }

    #[tracing::instrument(level = "trace", skip_all, fields(image = image.identifier.as_str()))]
    fn open_image(&self, image: &BinaryImage) -> Option<Arc<DebugImage>> {
        let Some(path) = self.inner.locator.locate(image) else {
            tracing::debug!("no object file located");
            return None;
        };

        match DebugImage::open(&path, image.uuid, image.arch) {
            Ok(debug_image) => {
                tracing::debug!(path = %path.display(), "loaded object file");
                Some(Arc::new(debug_image))
            }
            Err(error) => {
                tracing::debug!(
                    error = &error as &dyn std::error::Error,
                    path = %path.display(),
                    "object file unavailable"
                );
                None
            }
        }
    }

    /// The number of images that have been loaded or found unavailable.
    pub fn loaded_images(&self) -> usize {
        let images = self.inner.images.lock();
        images.values().filter(|cell| cell.get().is_some()).count()
    }

    /// The number of cached lookup results.
    pub fn cached_results(&self) -> usize {
        self.inner.results.lock().len()
    }

    /// Drops all cached lookup results.
    ///
    /// Loaded images are kept, so later lookups resolve without locating objects again.
    pub fn clear_results(&self) {
        self.inner.results.lock().clear();
    }
}

impl fmt::Debug for Symbolicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Symbolicator")
            .field("config", &self.inner.config)
            .field("loaded_images", &self.loaded_images())
            .field("cached_results", &self.cached_results())
            .finish()
    }
}
