//! # Loader Pipeline
//!
//! The background worker that keeps the slot ring topped up.
//!
//! ## Plain English
//!
//! Once `run` is called, one thread loops forever:
//! 1. Ask the sampler for a class-balanced batch of image indices
//! 2. For each index, wait for a free slot, decode the image into it
//! 3. Go back to step 1
//!
//! It stops when the ring is closed (the loader was stopped) or when the
//! sampler can never produce a batch (a class is too small). A single image
//! that fails to decode is logged and skipped.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::atomic::AtomicCell;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::buffer::{CloseReason, SlotDims, SlotSender};
use crate::dataset::DatasetSnapshot;
use crate::decode::{parent_label, ImageDecoder};
use crate::error::SamplerError;
use crate::sampler::StratifiedSampler;
use crate::LoaderStats;

// ============================================
// WORKER STATUS
// ============================================

/// What the background worker is doing, readable without locking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WorkerStatus {
    /// Not started yet
    #[default]
    Idle,
    /// Sampling and decoding
    Running,
    /// Exited because the ring was closed
    Stopped,
    /// Exited because the sampler gave up
    Failed,
}

/// Result of trying to store one image.
#[derive(Debug, PartialEq, Eq)]
enum PutOutcome {
    Stored,
    Skipped,
    Closed,
}

// ============================================
// WORKER
// ============================================

/// Owns everything the background thread touches.
pub(crate) struct LoaderWorker<D: ImageDecoder> {
    snapshot: DatasetSnapshot,
    sampler: StratifiedSampler,
    sender: SlotSender,
    decoder: D,
    dims: SlotDims,
    /// Decode target, copied into the ring under the lock
    scratch: Vec<u8>,
    stats: Arc<Mutex<LoaderStats>>,
    status: Arc<AtomicCell<WorkerStatus>>,
}

impl<D: ImageDecoder> LoaderWorker<D> {
    pub(crate) fn new(
        snapshot: DatasetSnapshot,
        sampler: StratifiedSampler,
        sender: SlotSender,
        decoder: D,
        stats: Arc<Mutex<LoaderStats>>,
        status: Arc<AtomicCell<WorkerStatus>>,
    ) -> Self {
        let dims = sender.dims();
        Self {
            snapshot,
            sampler,
            sender,
            decoder,
            dims,
            scratch: vec![0; dims.slot_len()],
            stats,
            status,
        }
    }

    /// Runs until the ring is closed or the sampler fails.
    pub(crate) fn run(mut self) -> Result<(), SamplerError> {
        info!(
            "Loader worker started on \"{}\" ({} images, {} classes, {})",
            self.snapshot.name,
            self.snapshot.layout.total(),
            self.snapshot.layout.num_classes(),
            if self.sampler.is_stratified() {
                "stratified"
            } else {
                "shuffled"
            }
        );
        self.status.store(WorkerStatus::Running);

        let paths = Arc::clone(&self.snapshot.paths);
        let mut batch = Vec::with_capacity(self.sampler.batch_size());

        loop {
            if let Err(err) = self.sampler.fill_batch(&mut batch) {
                error!("Sampler failed, stopping loader worker: {}", err);
                self.status.store(WorkerStatus::Failed);
                self.sender.close(CloseReason::Failed(err.clone()));
                return Err(err);
            }
            self.stats.lock().batches_sampled += 1;
            debug!("Sampled batch of {} indices", batch.len());

            for &index in &batch {
                // Checked per item so stop waits for at most one decode
                if self.sender.is_closed() || self.put(&paths[index]) == PutOutcome::Closed {
                    info!("Loader worker stopped");
                    self.status.store(WorkerStatus::Stopped);
                    return Ok(());
                }
            }
        }
    }

    /// Decodes `path` into the next free slot.
    fn put(&mut self, path: &Path) -> PutOutcome {
        if !self.sender.wait_for_space() {
            return PutOutcome::Closed;
        }

        if let Err(err) = self.decoder.decode_into(path, self.dims, &mut self.scratch) {
            warn!("Skipping image: {}", err);
            self.stats.lock().decode_failures += 1;
            return PutOutcome::Skipped;
        }

        if !self.sender.send(&self.scratch, parent_label(path)) {
            return PutOutcome::Closed;
        }
        self.stats.lock().images_loaded += 1;
        PutOutcome::Stored
    }
}

/// Starts `worker` on its own named thread.
pub(crate) fn spawn<D: ImageDecoder>(
    worker: LoaderWorker<D>,
) -> io::Result<JoinHandle<Result<(), SamplerError>>> {
    thread::Builder::new()
        .name("strata-loader".to_string())
        .spawn(move || worker.run())
}

// ============================================
// TESTS
// ============================================
