//! # Strata Loader
//!
//! A background image loader that keeps a fixed number of decoded,
//! resized images ready for a training loop, drawing them so that every
//! class shows up about equally often.
//!
//! ## Architecture Overview
//!
//! The crate is structured into independent modules:
//!
//! - `buffer`: Bounded slot ring shared by the worker and the consumer
//! - `sampler`: Class-balanced (stratified) batch sampling
//! - `dataset`: Named datasets, their classes and label tables
//! - `pipeline`: The background worker that fills the ring
//! - `decode`: Image decoding and resizing
//! - `storage`: Folder scanning
//! - `config`: Loader configuration
//! - `error`: Error types
//!
//! ## Example
//!
//! ```no_run
//! use strata_loader::{ImageLoader, LoaderConfig};
//!
//! # fn main() -> strata_loader::LoaderResult<()> {
//! let mut loader = ImageLoader::with_config(LoaderConfig::new(8, 64, 64))?;
//! loader.create_dataset("pets")?;
//! loader.select_dataset("pets")?;
//! loader.add_folder("data/cats")?;
//! loader.add_folder("data/dogs")?;
//!
//! loader.run()?;
//! while let Some(image) = loader.get()? {
//!     println!("{}: {} bytes", image.label(), image.pixels().len());
//! #   break;
//! }
//! loader.stop()?;
//! # Ok(())
//! # }
//! ```

// ============================================
// MODULE DECLARATIONS
// ============================================

pub mod buffer;
pub mod config;
pub mod dataset;
pub mod decode;
pub mod error;
pub mod pipeline;
pub mod sampler;
pub mod storage;

// ============================================
// RE-EXPORTS
// ============================================

pub use config::{ColorMode, LoaderConfig};
pub use dataset::{DatasetInfo, LabelTable, TableOptions};
pub use decode::{ImageDecoder, LabeledImage, ResizingDecoder};
pub use error::{LoaderError, LoaderResult};
pub use pipeline::WorkerStatus;
pub use sampler::{ClassLayout, StratifiedSampler};

// ============================================
// IMPORTS
// ============================================

use std::fmt;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::atomic::AtomicCell;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use buffer::{CloseReason, SlotCloser, SlotReceiver};
use dataset::DatasetRegistry;
use error::{DatasetErrorKind, SamplerError};
use pipeline::LoaderWorker;

// ============================================
// LIFECYCLE STATE
// ============================================

/// Where the loader is in its lifecycle.
///
/// ```text
///   Created ──add_folder──▶ Ready ──run──▶ Running ──stop──▶ Stopped
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoaderState {
    /// No class registered on the active dataset yet
    Created,
    /// The active dataset has at least one class
    Ready,
    /// The background worker is filling the ring
    Running,
    /// Terminal; the worker has been joined
    Stopped,
}

impl fmt::Display for LoaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Runtime statistics for monitoring
#[derive(Debug, Default, Clone)]
pub struct LoaderStats {
    /// Batches drawn from the sampler
    pub batches_sampled: u64,
    /// Images decoded into the ring
    pub images_loaded: u64,
    /// Sampled images that could not be decoded
    pub decode_failures: u64,
    /// Images handed to the consumer
    pub images_served: u64,
}

// ============================================
// LOADER
// ============================================

/// The main loader.
///
/// ## Plain English
///
/// This is the "control center" of the crate:
/// - Keeps the datasets and which one is active
/// - Starts the background worker on `run`
/// - Hands out images on `get`
/// - Shuts the worker down on `stop` (or when dropped)
pub struct ImageLoader<D: ImageDecoder = ResizingDecoder> {
    config: LoaderConfig,
    registry: DatasetRegistry,
    state: LoaderState,

    /// Handed to the worker on `run`
    decoder: Option<D>,

    receiver: Option<SlotReceiver>,
    closer: Option<SlotCloser>,
    worker: Option<JoinHandle<Result<(), SamplerError>>>,

    worker_status: Arc<AtomicCell<WorkerStatus>>,
    stats: Arc<Mutex<LoaderStats>>,
}

impl ImageLoader<ResizingDecoder> {
    /// Creates a loader with default configuration.
    pub fn new() -> LoaderResult<Self> {
        Self::with_config(LoaderConfig::default())
    }

    /// Creates a loader that decodes with the `image` crate.
    pub fn with_config(config: LoaderConfig) -> LoaderResult<Self> {
        let decoder = ResizingDecoder::new(config.resize_filter);
        Self::with_decoder(config, decoder)
    }
}

impl<D: ImageDecoder> ImageLoader<D> {
    /// Creates a loader with a custom decoder.
    ///
    /// ## Returns
    /// The loader, or the first configuration error found
    pub fn with_decoder(config: LoaderConfig, decoder: D) -> LoaderResult<Self> {
        let errors = config.validate();
        if let Some(first) = errors.into_iter().next() {
            return Err(LoaderError::Config(first));
        }

        info!(
            "Initializing loader: {} slots of {}x{} {:?} (~{:.1} MB per dataset)",
            config.capacity,
            config.width,
            config.height,
            config.color,
            config.estimated_memory_mb()
        );

        let registry = DatasetRegistry::new(
            config.capacity,
            config.slot_dims(),
            config.accepted_extensions.clone(),
        );

        Ok(Self {
            config,
            registry,
            state: LoaderState::Created,
            decoder: Some(decoder),
            receiver: None,
            closer: None,
            worker: None,
            worker_status: Arc::new(AtomicCell::new(WorkerStatus::Idle)),
            stats: Arc::new(Mutex::new(LoaderStats::default())),
        })
    }

    // ----------------------------------------
    // DATASET SETUP
    // ----------------------------------------

    /// Registers a new, empty dataset.
    pub fn create_dataset(&mut self, name: &str) -> LoaderResult<()> {
        self.ensure_editable("create a dataset")?;
        self.registry.create(name)?;
        Ok(())
    }

    /// Makes `name` the dataset that folders and tables are added to, and
    /// the one `run` will serve.
    pub fn select_dataset(&mut self, name: &str) -> LoaderResult<()> {
        self.ensure_editable("select a dataset")?;
        self.registry.select(name)?;
        self.refresh_state();
        Ok(())
    }

    /// Adds every image directly inside `path` as one new class of the
    /// active dataset. Returns how many images were found.
    pub fn add_folder(&mut self, path: impl AsRef<Path>) -> LoaderResult<usize> {
        self.ensure_editable("add a folder")?;
        let count = self.registry.add_folder(path.as_ref())?;
        self.refresh_state();
        Ok(count)
    }

    /// Attaches a headerless, comma-separated label table to the active
    /// dataset.
    pub fn load_label_table(&mut self, path: impl AsRef<Path>) -> LoaderResult<()> {
        self.load_label_table_with(path, &TableOptions::default())
    }

    /// Attaches a label table parsed with `options`.
    pub fn load_label_table_with(
        &mut self,
        path: impl AsRef<Path>,
        options: &TableOptions,
    ) -> LoaderResult<()> {
        self.ensure_editable("load a label table")?;
        self.registry.load_label_table(path.as_ref(), options)
    }

    // ----------------------------------------
    // LABEL ACCESS
    // ----------------------------------------

    /// The active dataset's label table.
    pub fn label_table(&self) -> LoaderResult<&LabelTable> {
        let dataset = self.registry.active()?;
        dataset
            .label_table()
            .ok_or_else(|| DatasetErrorKind::NoLabelTable(dataset.name().to_string()).into())
    }

    /// One cell of the active label table, converted to `T`.
    pub fn label_cell<T: FromStr>(&self, row: usize, col: usize) -> LoaderResult<T> {
        Ok(self.label_table()?.get(row, col)?)
    }

    /// One row of the active label table, converted to `T`.
    pub fn label_row<T: FromStr>(&self, row: usize) -> LoaderResult<Vec<T>> {
        Ok(self.label_table()?.row(row)?)
    }

    /// One column of the active label table, converted to `T`.
    pub fn label_column<T: FromStr>(&self, col: usize) -> LoaderResult<Vec<T>> {
        Ok(self.label_table()?.column(col)?)
    }

    /// Summary of the dataset called `name`.
    pub fn dataset_info(&self, name: &str) -> LoaderResult<DatasetInfo> {
        self.registry
            .by_name(name)
            .map(|dataset| dataset.info())
            .ok_or_else(|| DatasetErrorKind::NotFound(name.to_string()).into())
    }

    /// Summary of the active dataset.
    pub fn active_dataset(&self) -> LoaderResult<DatasetInfo> {
        Ok(self.registry.active()?.info())
    }

    // ----------------------------------------
    // RUNNING
    // ----------------------------------------

    /// Starts the background worker on the active dataset.
    ///
    /// The dataset's paths and classes are frozen here; later changes are
    /// rejected until the loader is dropped. If the worker thread cannot
    /// be started the loader is left `Stopped`.
    pub fn run(&mut self) -> LoaderResult<()> {
        self.run_with(pipeline::spawn)
    }

    fn run_with<F>(&mut self, spawn: F) -> LoaderResult<()>
    where
        F: FnOnce(LoaderWorker<D>) -> io::Result<JoinHandle<Result<(), SamplerError>>>,
    {
        if matches!(self.state, LoaderState::Running | LoaderState::Stopped) {
            return Err(LoaderError::InvalidState {
                operation: "run",
                state: self.state,
            });
        }
        if self.decoder.is_none() {
            return Err(LoaderError::Internal("decoder already handed out".to_string()));
        }

        let (snapshot, cache) = self.registry.freeze_active()?;
        let cache = cache
            .ok_or_else(|| LoaderError::Internal("slot cache already in use".to_string()))?;
        let decoder = self
            .decoder
            .take()
            .ok_or_else(|| LoaderError::Internal("decoder already handed out".to_string()))?;

        let layout = snapshot.layout.clone();
        let batch_size = self.config.capacity;
        let sampler = match self.config.seed {
            Some(seed) => StratifiedSampler::seeded(layout, batch_size, seed),
            None => StratifiedSampler::new(layout, batch_size),
        }
        .with_small_population_threshold(self.config.small_population_threshold);

        let (sender, receiver) = buffer::channel(cache);
        let closer = receiver.closer();
        let worker = LoaderWorker::new(
            snapshot,
            sampler,
            sender,
            decoder,
            Arc::clone(&self.stats),
            Arc::clone(&self.worker_status),
        );

        // The cache and decoder now belong to the worker, so a failed
        // spawn cannot be retried
        let handle = match spawn(worker) {
            Ok(handle) => handle,
            Err(err) => {
                error!("Failed to start loader worker: {}", err);
                self.state = LoaderState::Stopped;
                return Err(err.into());
            }
        };

        self.receiver = Some(receiver);
        self.closer = Some(closer);
        self.worker = Some(handle);
        self.state = LoaderState::Running;
        info!("Loader running");
        Ok(())
    }

    /// Takes the oldest prepared image, blocking until one is ready.
    ///
    /// ## Returns
    /// - `Ok(Some(image))` while images are available
    /// - `Ok(None)` once the loader is stopped and the ring is drained
    /// - `Err(..)` if the worker failed
    pub fn get(&self) -> LoaderResult<Option<LabeledImage>> {
        let Some(receiver) = self.receiver_for("get an image")? else {
            return Ok(None);
        };
        let image = receiver.recv()?;
        if image.is_some() {
            self.stats.lock().images_served += 1;
        }
        Ok(image)
    }

    /// Like [`get`](Self::get), but copies the pixels into `out` and
    /// returns only the label.
    ///
    /// `out` must be exactly one slot long.
    pub fn get_into(&self, out: &mut [u8]) -> LoaderResult<Option<String>> {
        let expected = self.config.slot_dims().slot_len();
        if out.len() != expected {
            return Err(LoaderError::BufferSize {
                expected,
                got: out.len(),
            });
        }

        let Some(receiver) = self.receiver_for("get an image")? else {
            return Ok(None);
        };
        let label = receiver.recv_with(|pixels, label| {
            out.copy_from_slice(pixels);
            label
        })?;
        if label.is_some() {
            self.stats.lock().images_served += 1;
        }
        Ok(label)
    }

    /// Stops the worker and waits for it to exit.
    ///
    /// Images already in the ring can still be drained with `get`. Calling
    /// `stop` again does nothing.
    ///
    /// ## Returns
    /// The worker's sampler error, if that is why it ended.
    pub fn stop(&mut self) -> LoaderResult<()> {
        if self.state == LoaderState::Stopped {
            debug!("Loader already stopped");
            return Ok(());
        }

        info!("Stopping loader...");
        if let Some(closer) = &self.closer {
            closer.close(CloseReason::Stopped);
        }
        self.state = LoaderState::Stopped;

        let result = match self.worker.take() {
            None => Ok(()),
            Some(handle) => match handle.join() {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(err.into()),
                Err(_) => Err(LoaderError::Internal("loader worker panicked".to_string())),
            },
        };

        info!("Loader stopped");
        result
    }

    // ----------------------------------------
    // INSPECTION
    // ----------------------------------------

    pub fn state(&self) -> LoaderState {
        self.state
    }

    /// What the background worker is doing right now.
    pub fn worker_status(&self) -> WorkerStatus {
        self.worker_status.load()
    }

    /// Number of prepared images waiting in the ring.
    pub fn buffered(&self) -> usize {
        self.receiver.as_ref().map_or(0, |r| r.len())
    }

    /// Returns a copy of the current statistics.
    pub fn stats(&self) -> LoaderStats {
        self.stats.lock().clone()
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    // ----------------------------------------
    // HELPERS
    // ----------------------------------------

    fn ensure_editable(&self, operation: &'static str) -> LoaderResult<()> {
        match self.state {
            LoaderState::Created | LoaderState::Ready => Ok(()),
            state => Err(LoaderError::InvalidState { operation, state }),
        }
    }

    /// `Ready` tracks whether the active dataset has any class.
    fn refresh_state(&mut self) {
        if !matches!(self.state, LoaderState::Created | LoaderState::Ready) {
            return;
        }
        let has_class = self
            .registry
            .active()
            .map(|dataset| dataset.layout().num_classes() > 0)
            .unwrap_or(false);
        self.state = if has_class {
            LoaderState::Ready
        } else {
            LoaderState::Created
        };
    }

    /// The receiver, `None` if stopped before ever running.
    fn receiver_for(&self, operation: &'static str) -> LoaderResult<Option<&SlotReceiver>> {
        match (&self.receiver, self.state) {
            (Some(receiver), _) => Ok(Some(receiver)),
            (None, LoaderState::Stopped) => Ok(None),
            (None, state) => Err(LoaderError::InvalidState { operation, state }),
        }
    }
}

impl<D: ImageDecoder> Drop for ImageLoader<D> {
    fn drop(&mut self) {
        if self.state == LoaderState::Running {
            if let Err(e) = self.stop() {
                warn!("Loader worker ended with an error: {}", e);
            }
        }
    }
}

// ============================================
// LOGGING
// ============================================

/// Initialize logging. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SlotDims;
    use crate::error::{DecodeError, TableError};
    use image::{Rgb, RgbImage};
    use std::fs;
    use std::path::PathBuf;
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::{tempdir, TempDir};

    const RED: [u8; 3] = [200, 10, 10];
    const BLUE: [u8; 3] = [10, 10, 200];

    /// Writes `count` solid-color 4x4 PNGs into `root/name`.
    fn color_folder(root: &Path, name: &str, count: usize, color: [u8; 3]) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        for i in 0..count {
            RgbImage::from_pixel(4, 4, Rgb(color))
                .save(dir.join(format!("{:03}.png", i)))
                .unwrap();
        }
        dir
    }

    /// Writes `count` files that are not really images.
    fn junk_folder(root: &Path, name: &str, count: usize) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        for i in 0..count {
            fs::write(dir.join(format!("{:03}.png", i)), b"not a png").unwrap();
        }
        dir
    }

    /// A loader over red/blue folders, ready to run.
    fn color_loader(config: LoaderConfig, per_class: usize) -> (ImageLoader, TempDir) {
        let root = tempdir().unwrap();
        let red = color_folder(root.path(), "red", per_class, RED);
        let blue = color_folder(root.path(), "blue", per_class, BLUE);

        let mut loader = ImageLoader::with_config(config).unwrap();
        loader.create_dataset("colors").unwrap();
        loader.select_dataset("colors").unwrap();
        loader.add_folder(&red).unwrap();
        loader.add_folder(&blue).unwrap();
        (loader, root)
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_loader_creation() {
        init_logging();
        let loader = ImageLoader::new().unwrap();
        assert_eq!(loader.state(), LoaderState::Created);
        assert_eq!(loader.worker_status(), WorkerStatus::Idle);
        assert_eq!(loader.buffered(), 0);
        assert_eq!(loader.stats().images_served, 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = ImageLoader::with_config(LoaderConfig::new(0, 8, 8));
        assert!(matches!(result, Err(LoaderError::Config(_))));
    }

    #[test]
    fn test_lifecycle_transitions() {
        let root = tempdir().unwrap();
        let red = color_folder(root.path(), "red", 2, RED);

        let mut loader = ImageLoader::with_config(LoaderConfig::new(2, 4, 4)).unwrap();
        loader.create_dataset("d").unwrap();
        assert_eq!(loader.state(), LoaderState::Created);
        loader.select_dataset("d").unwrap();
        assert_eq!(loader.state(), LoaderState::Created);

        loader.add_folder(&red).unwrap();
        assert_eq!(loader.state(), LoaderState::Ready);

        loader.run().unwrap();
        assert_eq!(loader.state(), LoaderState::Running);

        loader.stop().unwrap();
        assert_eq!(loader.state(), LoaderState::Stopped);
        assert_eq!(loader.worker_status(), WorkerStatus::Stopped);

        // Idempotent
        loader.stop().unwrap();
        assert!(matches!(
            loader.run(),
            Err(LoaderError::InvalidState {
                state: LoaderState::Stopped,
                ..
            })
        ));
    }

    #[test]
    fn test_selecting_empty_dataset_leaves_ready() {
        let root = tempdir().unwrap();
        let red = color_folder(root.path(), "red", 1, RED);

        let mut loader = ImageLoader::new().unwrap();
        loader.create_dataset("full").unwrap();
        loader.create_dataset("empty").unwrap();
        loader.select_dataset("full").unwrap();
        loader.add_folder(&red).unwrap();
        assert_eq!(loader.state(), LoaderState::Ready);

        loader.select_dataset("empty").unwrap();
        assert_eq!(loader.state(), LoaderState::Created);
    }

    #[test]
    fn test_get_before_run() {
        let loader = ImageLoader::new().unwrap();
        assert!(matches!(
            loader.get(),
            Err(LoaderError::InvalidState {
                state: LoaderState::Created,
                ..
            })
        ));
    }

    #[test]
    fn test_run_requires_images() {
        let root = tempdir().unwrap();
        let empty = junk_folder(root.path(), "empty", 0);

        let mut loader = ImageLoader::new().unwrap();
        assert!(matches!(
            loader.run(),
            Err(LoaderError::Dataset(DatasetErrorKind::NoActiveDataset))
        ));

        loader.create_dataset("d").unwrap();
        loader.select_dataset("d").unwrap();
        loader.add_folder(&empty).unwrap();
        assert!(matches!(
            loader.run(),
            Err(LoaderError::Dataset(DatasetErrorKind::EmptyDataset(_)))
        ));
        assert_eq!(loader.state(), LoaderState::Ready);
    }

    #[test]
    fn test_mutations_rejected_while_running() {
        let (mut loader, root) = color_loader(LoaderConfig::new(2, 4, 4), 2);
        loader.run().unwrap();

        let err = loader.add_folder(root.path().join("red")).unwrap_err();
        assert_eq!(err.to_string(), "Cannot add a folder while the loader is running");
        assert!(matches!(
            loader.create_dataset("other"),
            Err(LoaderError::InvalidState { .. })
        ));
        assert!(matches!(
            loader.select_dataset("colors"),
            Err(LoaderError::InvalidState { .. })
        ));
        assert!(matches!(
            loader.run(),
            Err(LoaderError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_images_match_their_labels() {
        let (mut loader, _root) = color_loader(LoaderConfig::new(4, 4, 4), 3);
        loader.run().unwrap();

        for _ in 0..20 {
            let image = loader.get().unwrap().unwrap();
            assert_eq!(image.pixels().len(), 4 * 4 * 3);
            let expected = match image.label() {
                "red" => RED,
                "blue" => BLUE,
                other => panic!("unexpected label {}", other),
            };
            assert!(image.pixels().chunks(3).all(|px| px == expected));
        }

        loader.stop().unwrap();
        assert_eq!(loader.stats().images_served, 20);
    }

    #[test]
    fn test_batches_alternate_classes() {
        let config = LoaderConfig::new(4, 2, 2).seed(11);
        let (mut loader, _root) = color_loader(config, 12);
        loader.run().unwrap();

        // No decode failures, so every four reads are one balanced batch
        for _ in 0..6 {
            let reds = (0..4)
                .filter(|_| loader.get().unwrap().unwrap().label() == "red")
                .count();
            assert_eq!(reds, 2);
        }
        loader.stop().unwrap();
        assert!(loader.stats().batches_sampled >= 6);
    }

    #[test]
    fn test_grayscale_slots() {
        let config = LoaderConfig::new(2, 3, 5).color(ColorMode::Grayscale);
        let (mut loader, _root) = color_loader(config, 1);
        loader.run().unwrap();

        let image = loader.get().unwrap().unwrap();
        assert_eq!(image.dims(), SlotDims::new(3, 5, 1));
        assert_eq!(image.pixels().len(), 15);
        loader.stop().unwrap();
    }

    #[test]
    fn test_decode_failures_skipped() {
        let root = tempdir().unwrap();
        let good = color_folder(root.path(), "good", 3, RED);
        let broken = junk_folder(root.path(), "broken", 3);

        let mut loader = ImageLoader::with_config(LoaderConfig::new(2, 4, 4)).unwrap();
        loader.create_dataset("d").unwrap();
        loader.select_dataset("d").unwrap();
        loader.add_folder(&good).unwrap();
        loader.add_folder(&broken).unwrap();
        loader.run().unwrap();

        for _ in 0..10 {
            assert_eq!(loader.get().unwrap().unwrap().label(), "good");
        }
        loader.stop().unwrap();
        assert!(loader.stats().decode_failures > 0);
    }

    #[test]
    fn test_exhausted_class_surfaces_through_get_and_stop() {
        let root = tempdir().unwrap();
        // Never decoded: the sampler fails before the first put
        let a = junk_folder(root.path(), "a", 4);
        let b = junk_folder(root.path(), "b", 2);

        let config = LoaderConfig::new(6, 4, 4).small_population_threshold(0);
        let mut loader = ImageLoader::with_config(config).unwrap();
        loader.create_dataset("d").unwrap();
        loader.select_dataset("d").unwrap();
        loader.add_folder(&a).unwrap();
        loader.add_folder(&b).unwrap();
        loader.run().unwrap();

        let expected = SamplerError::ExhaustedClassPopulation {
            class: Some(1),
            requested: 3,
            available: 2,
        };
        match loader.get() {
            Err(LoaderError::Sampler(err)) => assert_eq!(err, expected),
            other => panic!("expected sampler error, got {:?}", other),
        }
        assert_eq!(loader.worker_status(), WorkerStatus::Failed);
        match loader.stop() {
            Err(LoaderError::Sampler(err)) => assert_eq!(err, expected),
            other => panic!("expected sampler error, got {:?}", other),
        }
        assert!(loader.stop().is_ok());
    }

    #[test]
    fn test_stop_then_drain() {
        let (mut loader, _root) = color_loader(LoaderConfig::new(3, 4, 4), 2);
        loader.run().unwrap();

        wait_until(|| loader.buffered() == 3);
        loader.stop().unwrap();

        for _ in 0..3 {
            assert!(loader.get().unwrap().is_some());
        }
        assert!(loader.get().unwrap().is_none());
        assert!(loader.get().unwrap().is_none());
    }

    #[test]
    fn test_get_after_stop_without_run() {
        let mut loader = ImageLoader::new().unwrap();
        loader.stop().unwrap();
        assert!(loader.get().unwrap().is_none());
    }

    #[test]
    fn test_get_into() {
        let (mut loader, _root) = color_loader(LoaderConfig::new(2, 2, 2), 2);
        loader.run().unwrap();

        let mut wrong = vec![0u8; 5];
        assert!(matches!(
            loader.get_into(&mut wrong),
            Err(LoaderError::BufferSize {
                expected: 12,
                got: 5
            })
        ));

        let mut out = vec![0u8; 12];
        let label = loader.get_into(&mut out).unwrap().unwrap();
        let expected = if label == "red" { RED } else { BLUE };
        assert!(out.chunks(3).all(|px| px == expected));
        assert_eq!(loader.stats().images_served, 1);
    }

    #[test]
    fn test_custom_decoder() {
        let decoder = |path: &Path, _dims: SlotDims, out: &mut [u8]| -> Result<(), DecodeError> {
            out.fill(path.to_string_lossy().len() as u8);
            Ok(())
        };
        let root = tempdir().unwrap();
        let files = junk_folder(root.path(), "files", 2);

        let mut loader = ImageLoader::with_decoder(LoaderConfig::new(2, 1, 1), decoder).unwrap();
        loader.create_dataset("d").unwrap();
        loader.select_dataset("d").unwrap();
        loader.add_folder(&files).unwrap();
        loader.run().unwrap();

        let image = loader.get().unwrap().unwrap();
        assert_eq!(image.label(), "files");
        assert_eq!(image.pixels().len(), 3);
    }

    #[test]
    fn test_drop_stops_worker() {
        let (mut loader, _root) = color_loader(LoaderConfig::new(2, 4, 4), 2);
        loader.run().unwrap();
        let status = Arc::clone(&loader.worker_status);

        drop(loader);
        assert_eq!(status.load(), WorkerStatus::Stopped);
    }

    #[test]
    fn test_label_access() {
        let root = tempdir().unwrap();
        let csv = root.path().join("labels.csv");
        fs::write(&csv, "name,class\nred_000.png,0\nblue_000.png,1\n").unwrap();

        let mut loader = ImageLoader::new().unwrap();
        loader.create_dataset("d").unwrap();
        loader.select_dataset("d").unwrap();
        assert!(matches!(
            loader.label_column::<u8>(1),
            Err(LoaderError::Dataset(DatasetErrorKind::NoLabelTable(_)))
        ));

        loader
            .load_label_table_with(&csv, &TableOptions::default().has_header(true))
            .unwrap();
        assert_eq!(loader.label_column::<u8>(1).unwrap(), vec![0, 1]);
        assert_eq!(loader.label_cell::<String>(1, 0).unwrap(), "blue_000.png");
        assert_eq!(loader.label_row::<String>(0).unwrap().len(), 2);
        assert!(matches!(
            loader.label_row::<String>(2),
            Err(LoaderError::Table(TableError::RowOutOfBounds { .. }))
        ));
        assert!(loader.active_dataset().unwrap().has_label_table);
    }

    #[test]
    fn test_dataset_info() {
        let (loader, _root) = color_loader(LoaderConfig::new(2, 4, 4), 3);
        let info = loader.dataset_info("colors").unwrap();
        assert_eq!(info.image_count, 6);
        assert_eq!(info.class_sizes, vec![3, 3]);
        assert_eq!(info.class_names, vec!["red", "blue"]);
        assert!(loader.dataset_info("missing").is_err());
    }

    #[test]
    fn test_default_threshold_balances_ten_and_ten() {
        let config = LoaderConfig::new(4, 2, 2).seed(3);
        assert_eq!(
            config.small_population_threshold,
            LoaderConfig::default().small_population_threshold
        );
        let (mut loader, _root) = color_loader(config, 10);
        loader.run().unwrap();

        for _ in 0..10 {
            let reds = (0..4)
                .filter(|_| loader.get().unwrap().unwrap().label() == "red")
                .count();
            assert_eq!(reds, 2);
        }
        loader.stop().unwrap();
    }

    #[test]
    fn test_failed_spawn_leaves_loader_stopped() {
        let (mut loader, _root) = color_loader(LoaderConfig::new(2, 4, 4), 2);

        let result = loader.run_with(|_worker| {
            Err(io::Error::new(io::ErrorKind::Other, "thread limit reached"))
        });
        assert!(matches!(result, Err(LoaderError::Io(_))));
        assert_eq!(loader.state(), LoaderState::Stopped);
        assert_eq!(loader.worker_status(), WorkerStatus::Idle);

        assert!(matches!(
            loader.run(),
            Err(LoaderError::InvalidState {
                state: LoaderState::Stopped,
                ..
            })
        ));
        assert!(loader.stop().is_ok());
        assert!(loader.get().unwrap().is_none());
    }

    #[test]
    fn test_stop_waits_for_at_most_one_decode() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let slow = move |_: &Path, _: SlotDims, out: &mut [u8]| -> Result<(), DecodeError> {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(300));
            out.fill(1);
            Ok(())
        };

        let root = tempdir().unwrap();
        let files = junk_folder(root.path(), "slow", 4);
        let mut loader = ImageLoader::with_decoder(LoaderConfig::new(2, 1, 1), slow).unwrap();
        loader.create_dataset("d").unwrap();
        loader.select_dataset("d").unwrap();
        loader.add_folder(&files).unwrap();
        loader.run().unwrap();

        // First decode is in flight
        wait_until(|| calls.load(Ordering::SeqCst) == 1);
        let started = Instant::now();
        loader.stop().unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_millis(600), "stop took {:?}", elapsed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(loader.buffered(), 0);
        assert!(loader.get().unwrap().is_none());
        assert_eq!(loader.worker_status(), WorkerStatus::Stopped);
    }
}
