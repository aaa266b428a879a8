//! # Configuration Module
//!
//! This module handles all configurable settings for the loader.
//!
//! ## Plain English Explanation
//!
//! Before any image is read we need to know the shape of everything:
//! - How many images the ring holds (this is also the batch size)
//! - What size every image is resized to
//! - Whether images are kept in color or grayscale
//! - Which file extensions count as images
//!
//! The slot cache of every dataset is allocated from these numbers once,
//! so they cannot change after the loader is built.

use image::imageops::FilterType;

use crate::buffer::SlotDims;
use crate::sampler::DEFAULT_SMALL_POPULATION;

/// Extensions accepted by `add_folder` unless configured otherwise.
pub const DEFAULT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "webp"];

/// Largest slot cache a single dataset may allocate (4 GiB).
const MAX_CACHE_BYTES: u64 = 4 * 1024 * 1024 * 1024;

// ============================================
// COLOR MODE
// ============================================

/// How many channels each decoded pixel has.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ColorMode {
    /// Three interleaved channels (R, G, B)
    #[default]
    Rgb,

    /// A single luminance channel
    Grayscale,
}

impl ColorMode {
    /// Bytes per pixel for this mode.
    pub fn channels(self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Grayscale => 1,
        }
    }
}

// ============================================
// MAIN CONFIGURATION
// ============================================

/// All configuration options for the loader
#[derive(Clone, Debug)]
pub struct LoaderConfig {
    // ----------------------------------------
    // RING SETTINGS
    // "How much to prefetch"
    // ----------------------------------------
    /// Number of slots in the ring, and the size of every sampled batch
    ///
    /// ## Plain English
    /// The worker stays at most this many images ahead of the consumer.
    pub capacity: usize,

    // ----------------------------------------
    // IMAGE SETTINGS
    // "What every slot looks like"
    // ----------------------------------------
    /// Width every image is resized to, in pixels
    pub width: u32,

    /// Height every image is resized to, in pixels
    pub height: u32,

    /// Color or grayscale slots
    pub color: ColorMode,

    /// Filter used when an image has to be resized
    pub resize_filter: FilterType,

    /// Lowercase extensions (without the dot) that `add_folder` picks up
    pub accepted_extensions: Vec<String>,

    // ----------------------------------------
    // SAMPLING SETTINGS
    // "How batches are drawn"
    // ----------------------------------------
    /// Populations at or below this size skip stratification
    ///
    /// ## Plain English
    /// With only a handful of images per class the per-class quotas can't
    /// be met, so tiny datasets are simply shuffled instead.
    pub small_population_threshold: usize,

    /// Fixed RNG seed for reproducible batches (`None` = fresh entropy)
    pub seed: Option<u64>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            width: 200,
            height: 200,
            color: ColorMode::Rgb,
            resize_filter: FilterType::Triangle,
            accepted_extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            small_population_threshold: DEFAULT_SMALL_POPULATION,
            seed: None,
        }
    }
}

impl LoaderConfig {
    /// Creates a configuration with the given ring size and image size,
    /// leaving everything else at its default.
    pub fn new(capacity: usize, width: u32, height: u32) -> Self {
        Self {
            capacity,
            width,
            height,
            ..Self::default()
        }
    }

    /// Creates a configuration for small grayscale inputs (28×28, MNIST-like)
    pub fn grayscale_thumbnails(capacity: usize) -> Self {
        Self {
            color: ColorMode::Grayscale,
            ..Self::new(capacity, 28, 28)
        }
    }

    pub fn color(mut self, color: ColorMode) -> Self {
        self.color = color;
        self
    }

    pub fn resize_filter(mut self, filter: FilterType) -> Self {
        self.resize_filter = filter;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn small_population_threshold(mut self, threshold: usize) -> Self {
        self.small_population_threshold = threshold;
        self
    }

    /// Replaces the accepted extension set. Entries are lowercased and a
    /// leading dot is dropped, so `".JPG"` and `"jpg"` are the same.
    pub fn accepted_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.accepted_extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    /// Geometry of one ring slot.
    pub fn slot_dims(&self) -> SlotDims {
        SlotDims::new(self.width, self.height, self.color.channels())
    }

    /// Size in bytes of one dataset's pixel cache
    pub fn cache_bytes(&self) -> u64 {
        self.capacity as u64 * self.slot_dims().slot_len() as u64
    }

    /// Validates the configuration and returns errors if invalid
    ///
    /// ## Plain English
    /// Makes sure all settings are within reasonable bounds.
    /// Returns a list of problems, or empty if all is well.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.capacity == 0 {
            errors.push(ConfigError::ZeroCapacity);
        }

        if self.width == 0 || self.height == 0 {
            errors.push(ConfigError::ZeroDimension {
                width: self.width,
                height: self.height,
            });
        }

        if self.accepted_extensions.is_empty() {
            errors.push(ConfigError::NoAcceptedExtensions);
        }

        let bytes = self.cache_bytes();
        if bytes > MAX_CACHE_BYTES {
            errors.push(ConfigError::CacheTooLarge(bytes));
        }

        errors
    }

    /// Calculates the memory one dataset's slot cache will use
    ///
    /// ## Returns
    /// Estimated memory usage in megabytes
    pub fn estimated_memory_mb(&self) -> f32 {
        self.cache_bytes() as f32 / (1024.0 * 1024.0)
    }
}

// ============================================
// CONFIGURATION ERRORS
// ============================================

/// Errors that can occur with configuration values
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The ring must hold at least one slot
    ZeroCapacity,

    /// Images can't be resized to an empty area
    ZeroDimension { width: u32, height: u32 },

    /// `add_folder` would never find anything
    NoAcceptedExtensions,

    /// The per-dataset slot cache would be unreasonably large
    CacheTooLarge(u64),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroCapacity => write!(f, "Ring capacity must be at least 1"),
            Self::ZeroDimension { width, height } => {
                write!(f, "Image size {}x{} has a zero dimension", width, height)
            }
            Self::NoAcceptedExtensions => {
                write!(f, "At least one accepted image extension is required")
            }
            Self::CacheTooLarge(bytes) => {
                write!(f, "Slot cache of {} bytes exceeds the 4 GiB limit", bytes)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoaderConfig::default();

        assert_eq!(config.capacity, 10);
        assert_eq!(config.slot_dims().slot_len(), 200 * 200 * 3);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_memory_estimation() {
        let config = LoaderConfig::default();
        let memory = config.estimated_memory_mb();

        // 10 slots of 200x200x3 = 1.2 MB
        assert!(memory > 1.0 && memory < 1.5);
    }

    #[test]
    fn test_grayscale_preset() {
        let config = LoaderConfig::grayscale_thumbnails(64);
        assert_eq!(config.color.channels(), 1);
        assert_eq!(config.cache_bytes(), 64 * 28 * 28);
    }

    #[test]
    fn test_extensions_are_normalized() {
        let config = LoaderConfig::default().accepted_extensions([".PNG", "Jpg"]);
        assert_eq!(config.accepted_extensions, vec!["png", "jpg"]);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = LoaderConfig::default();

        config.capacity = 0;
        assert_eq!(config.validate(), vec![ConfigError::ZeroCapacity]);

        // Fix it
        config.capacity = 4;
        assert!(config.validate().is_empty());

        config.height = 0;
        assert!(!config.validate().is_empty());

        config.height = 200;
        config.accepted_extensions.clear();
        assert_eq!(config.validate(), vec![ConfigError::NoAcceptedExtensions]);

        let huge = LoaderConfig::new(100_000, 4096, 4096);
        assert!(matches!(huge.validate()[0], ConfigError::CacheTooLarge(_)));
    }
}
