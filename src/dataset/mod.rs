//! # Dataset Registry Module
//!
//! Keeps every named dataset and remembers which one is being edited.
//!
//! ## Plain English
//!
//! A dataset is a list of image paths split into classes. Each call to
//! `add_folder` adds one class: all images in that folder, appended to the
//! end of the list. So with `cats/` (4 images) then `dogs/` (2 images):
//!
//! ```text
//!   index:  0    1    2    3    4    5
//!          cat  cat  cat  cat  dog  dog
//!          └──── class 0 ───┘  └ class 1┘
//! ```
//!
//! Datasets live in an arena and are looked up by name through a separate
//! map, so each dataset has exactly one owner.

mod table;

pub use table::{LabelTable, TableOptions};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::buffer::{SlotCache, SlotDims};
use crate::error::{DatasetErrorKind, LoaderResult};
use crate::sampler::ClassLayout;
use crate::storage;

// ============================================
// DATASET
// ============================================

/// Position of a dataset in the registry arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DatasetId(usize);

/// One named dataset.
#[derive(Debug)]
pub struct Dataset {
    name: String,
    paths: Vec<PathBuf>,
    layout: ClassLayout,
    class_names: Vec<String>,
    /// Taken (moved into the ring) when the loader starts
    cache: Option<SlotCache>,
    labels: Option<LabelTable>,
}

impl Dataset {
    fn new(name: String, cache: SlotCache) -> Self {
        Self {
            name,
            paths: Vec::new(),
            layout: ClassLayout::default(),
            class_names: Vec::new(),
            cache: Some(cache),
            labels: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every image path, class by class.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn layout(&self) -> &ClassLayout {
        &self.layout
    }

    /// Name of each class (the folder it was scanned from).
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn image_count(&self) -> usize {
        self.paths.len()
    }

    pub fn label_table(&self) -> Option<&LabelTable> {
        self.labels.as_ref()
    }

    /// Whether the slot cache is still here (not yet handed to a ring).
    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    /// Appends one class made of `paths`.
    fn push_class(&mut self, class_name: String, paths: Vec<PathBuf>) {
        self.layout.push_class(paths.len());
        self.class_names.push(class_name);
        self.paths.extend(paths);
    }

    /// Summary for display and logging.
    pub fn info(&self) -> DatasetInfo {
        DatasetInfo {
            name: self.name.clone(),
            image_count: self.image_count(),
            class_sizes: self.layout.sizes().to_vec(),
            class_names: self.class_names.clone(),
            has_label_table: self.labels.is_some(),
        }
    }
}

/// A read-only summary of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetInfo {
    pub name: String,
    pub image_count: usize,
    pub class_sizes: Vec<usize>,
    pub class_names: Vec<String>,
    pub has_label_table: bool,
}

/// What the background worker needs from a dataset, frozen at start.
#[derive(Debug, Clone)]
pub struct DatasetSnapshot {
    pub name: String,
    pub paths: Arc<[PathBuf]>,
    pub layout: ClassLayout,
}

// ============================================
// REGISTRY
// ============================================

/// All datasets plus the active-dataset selector.
#[derive(Debug)]
pub struct DatasetRegistry {
    datasets: Vec<Dataset>,
    ids: HashMap<String, DatasetId>,
    active: Option<DatasetId>,
    capacity: usize,
    dims: SlotDims,
    extensions: Vec<String>,
}

impl DatasetRegistry {
    /// Creates an empty registry whose datasets get `capacity` slots of
    /// shape `dims`, and whose folders accept `extensions`.
    pub fn new(capacity: usize, dims: SlotDims, extensions: Vec<String>) -> Self {
        Self {
            datasets: Vec::new(),
            ids: HashMap::new(),
            active: None,
            capacity,
            dims,
            extensions,
        }
    }

    /// Registers a new dataset and allocates its slot cache.
    pub fn create(&mut self, name: &str) -> LoaderResult<DatasetId> {
        if self.ids.contains_key(name) {
            return Err(DatasetErrorKind::AlreadyExists(name.to_string()).into());
        }

        let id = DatasetId(self.datasets.len());
        let cache = SlotCache::new(self.capacity, self.dims);
        log::info!(
            "Created dataset \"{}\" with a {} byte slot cache",
            name,
            cache.byte_len()
        );

        self.datasets.push(Dataset::new(name.to_string(), cache));
        self.ids.insert(name.to_string(), id);
        Ok(id)
    }

    /// Makes `name` the target of later folder and label-table calls.
    pub fn select(&mut self, name: &str) -> LoaderResult<DatasetId> {
        let id = self
            .id_of(name)
            .ok_or_else(|| DatasetErrorKind::NotFound(name.to_string()))?;
        self.active = Some(id);
        log::debug!("Selected dataset \"{}\"", name);
        Ok(id)
    }

    /// Scans `dir` and appends its images to the active dataset as one
    /// new class. Returns the number of images found.
    pub fn add_folder(&mut self, dir: &Path) -> LoaderResult<usize> {
        let id = self.active_id()?;
        let paths = storage::scan_image_folder(dir, &self.extensions)?;
        let class_name = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let count = paths.len();
        let dataset = &mut self.datasets[id.0];
        dataset.push_class(class_name, paths);

        log::info!(
            "Dataset \"{}\": class {} from {:?} has {} images",
            dataset.name,
            dataset.layout.num_classes() - 1,
            dir,
            count
        );
        Ok(count)
    }

    /// Reads a CSV label table and attaches it to the active dataset,
    /// replacing any earlier one.
    pub fn load_label_table(&mut self, path: &Path, options: &TableOptions) -> LoaderResult<()> {
        let id = self.active_id()?;
        let table = LabelTable::read(path, options)?;
        self.datasets[id.0].labels = Some(table);
        Ok(())
    }

    pub fn id_of(&self, name: &str) -> Option<DatasetId> {
        self.ids.get(name).copied()
    }

    pub fn get(&self, id: DatasetId) -> Option<&Dataset> {
        self.datasets.get(id.0)
    }

    pub fn by_name(&self, name: &str) -> Option<&Dataset> {
        self.id_of(name).and_then(|id| self.get(id))
    }

    pub fn active_id(&self) -> LoaderResult<DatasetId> {
        self.active
            .ok_or_else(|| DatasetErrorKind::NoActiveDataset.into())
    }

    pub fn active(&self) -> LoaderResult<&Dataset> {
        let id = self.active_id()?;
        Ok(&self.datasets[id.0])
    }

    /// Number of registered datasets.
    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Names of all datasets, in creation order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.datasets.iter().map(|d| d.name.as_str())
    }

    /// Freezes the active dataset for the worker and takes its slot cache.
    ///
    /// Fails with `EmptyDataset` if no class holds an image.
    pub fn freeze_active(&mut self) -> LoaderResult<(DatasetSnapshot, Option<SlotCache>)> {
        let id = self.active_id()?;
        let dataset = &mut self.datasets[id.0];

        if dataset.layout.total() == 0 {
            return Err(DatasetErrorKind::EmptyDataset(dataset.name.clone()).into());
        }

        let snapshot = DatasetSnapshot {
            name: dataset.name.clone(),
            paths: Arc::from(dataset.paths.clone()),
            layout: dataset.layout.clone(),
        };
        Ok((snapshot, dataset.cache.take()))
    }
}

// ============================================
// TESTS
// ============================================
