//! # Stratified Sampler
//!
//! Builds batches of unique dataset indices with every class represented
//! about equally.
//!
//! ## Plain English
//!
//! Say the dataset has 900 cats and 100 dogs and each batch holds 10
//! images. Picking uniformly would give ~9 cats per batch; this sampler
//! gives 5 of each instead:
//!
//! 1. Split the batch evenly: every class gets `batch / classes` images
//! 2. Draw each class's share from that class's own images
//! 3. Draw the leftover `batch % classes` images from everything not
//!    picked yet
//!
//! Tiny datasets (at or below a threshold) are just shuffled, since their
//! classes usually can't fill an even share.

use std::ops::Range;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::SamplerError;

/// Populations at or below this size are shuffled instead of stratified.
pub const DEFAULT_SMALL_POPULATION: usize = 16;

// ============================================
// CLASS LAYOUT
// ============================================

/// Per-class sizes laid out as contiguous half-open index ranges.
///
/// Class `i` owns `[offset_i, offset_i + size_i)` where `offset_i` is the
/// sum of all earlier sizes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassLayout {
    sizes: Vec<usize>,
    offsets: Vec<usize>,
    total: usize,
}

impl ClassLayout {
    pub fn new(sizes: impl IntoIterator<Item = usize>) -> Self {
        let mut layout = Self::default();
        for size in sizes {
            layout.push_class(size);
        }
        layout
    }

    /// Appends a class after all existing ones.
    pub fn push_class(&mut self, size: usize) {
        self.offsets.push(self.total);
        self.sizes.push(size);
        self.total += size;
    }

    pub fn num_classes(&self) -> usize {
        self.sizes.len()
    }

    /// Sum of all class sizes.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Index range owned by `class`.
    pub fn range(&self, class: usize) -> Range<usize> {
        let start = self.offsets[class];
        start..start + self.sizes[class]
    }

    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.num_classes()).map(move |class| self.range(class))
    }

    /// Which class a global index belongs to.
    pub fn class_of(&self, index: usize) -> Option<usize> {
        if index >= self.total {
            return None;
        }
        // Last class whose offset is <= index and that is not empty
        let upper = self.offsets.partition_point(|&offset| offset <= index);
        (0..upper).rev().find(|&class| self.range(class).contains(&index))
    }
}

// ============================================
// STRATIFIED SAMPLER
// ============================================

/// Produces class-balanced batches of unique indices.
///
/// Drawing without replacement is a partial Fisher–Yates shuffle over a
/// persistent index pool, so each range knows how many indices are left
/// and an impossible quota fails immediately instead of retrying forever.
#[derive(Debug)]
pub struct StratifiedSampler {
    layout: ClassLayout,
    batch_size: usize,
    small_population_threshold: usize,
    /// A permutation of `0..total`; each class range only ever holds that
    /// class's own indices
    pool: Vec<usize>,
    rng: StdRng,
}

impl StratifiedSampler {
    /// Creates a sampler seeded from OS entropy.
    pub fn new(layout: ClassLayout, batch_size: usize) -> Self {
        Self::with_rng(layout, batch_size, StdRng::from_entropy())
    }

    /// Creates a sampler that produces the same batches for the same seed.
    pub fn seeded(layout: ClassLayout, batch_size: usize, seed: u64) -> Self {
        Self::with_rng(layout, batch_size, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(layout: ClassLayout, batch_size: usize, rng: StdRng) -> Self {
        let pool = (0..layout.total()).collect();
        Self {
            layout,
            batch_size,
            small_population_threshold: DEFAULT_SMALL_POPULATION,
            pool,
            rng,
        }
    }

    pub fn with_small_population_threshold(mut self, threshold: usize) -> Self {
        self.small_population_threshold = threshold;
        self
    }

    pub fn layout(&self) -> &ClassLayout {
        &self.layout
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// True when batches are class-balanced rather than plain shuffles.
    pub fn is_stratified(&self) -> bool {
        self.layout.total() > self.small_population_threshold
    }

    /// Draws one batch of `batch_size` indices.
    pub fn next_batch(&mut self) -> Result<Vec<usize>, SamplerError> {
        let mut batch = Vec::with_capacity(self.batch_size);
        self.fill_batch(&mut batch)?;
        Ok(batch)
    }

    /// Clears `batch` and fills it with the next batch of indices.
    pub fn fill_batch(&mut self, batch: &mut Vec<usize>) -> Result<(), SamplerError> {
        batch.clear();

        if self.layout.total() == 0 {
            return Err(SamplerError::EmptyPopulation);
        }
        if self.batch_size == 0 {
            return Ok(());
        }

        if self.is_stratified() {
            self.fill_stratified(batch)?;
        } else {
            self.fill_shuffled(batch);
        }
        Ok(())
    }

    fn fill_stratified(&mut self, batch: &mut Vec<usize>) -> Result<(), SamplerError> {
        let classes = self.layout.num_classes();
        let quota = self.batch_size / classes;
        let remainder = self.batch_size % classes;

        for class in 0..classes {
            let range = self.layout.range(class);
            if quota > range.len() {
                return Err(SamplerError::ExhaustedClassPopulation {
                    class: Some(class),
                    requested: quota,
                    available: range.len(),
                });
            }
            draw_without_replacement(&mut self.pool[range], quota, &mut self.rng, batch);
        }

        if remainder > 0 {
            // Everything past each class's quota is still undrawn
            let mut leftover: Vec<usize> = self
                .layout
                .ranges()
                .flat_map(|range| self.pool[range.start + quota..range.end].iter().copied())
                .collect();

            if remainder > leftover.len() {
                return Err(SamplerError::ExhaustedClassPopulation {
                    class: None,
                    requested: remainder,
                    available: leftover.len(),
                });
            }
            draw_without_replacement(&mut leftover, remainder, &mut self.rng, batch);
        }

        // Interleave classes so consumers don't see one class after another
        batch.shuffle(&mut self.rng);
        Ok(())
    }

    /// Successive shuffled permutations of the whole population, truncated
    /// to the batch size.
    fn fill_shuffled(&mut self, batch: &mut Vec<usize>) {
        let total = self.layout.total();
        let mut permutation: Vec<usize> = (0..total).collect();

        while batch.len() < self.batch_size {
            permutation.shuffle(&mut self.rng);
            let take = (self.batch_size - batch.len()).min(total);
            batch.extend_from_slice(&permutation[..take]);
        }
    }
}

/// Partial Fisher–Yates: moves `count` uniformly chosen entries to the
/// front of `pool` and appends them to `out`.
fn draw_without_replacement(
    pool: &mut [usize],
    count: usize,
    rng: &mut StdRng,
    out: &mut Vec<usize>,
) {
    debug_assert!(count <= pool.len());
    for i in 0..count {
        let pick = rng.gen_range(i..pool.len());
        pool.swap(i, pick);
        out.push(pool[i]);
    }
}

// ============================================
// TESTS
// ============================================
