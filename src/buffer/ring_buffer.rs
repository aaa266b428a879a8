//! # Slot Ring Implementation
//!
//! A fixed-size circular array of image slots with explicit head/tail/count
//! bookkeeping.
//!
//! ## Plain English
//!
//! Picture a circular track with numbered parking spots. New cars park at
//! `tail`, cars leave from `head`, and `count` says how many are parked.
//! When `head == tail` the track is either empty or full, and only `count`
//! can tell which. Unlike an overwriting buffer, a full ring refuses new
//! cars until one leaves.

use std::ops::Range;

// ============================================
// SLOT GEOMETRY
// ============================================

/// Shape of one slot: a packed, row-major, channel-interleaved image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotDims {
    pub width: u32,
    pub height: u32,
    pub channels: usize,
}

impl SlotDims {
    pub fn new(width: u32, height: u32, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// Bytes in one slot (`width × height × channels`).
    pub fn slot_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels
    }
}

// ============================================
// SLOT CACHE
// ============================================

/// Backing storage for a ring: one pixel arena plus a parallel label array.
///
/// Allocated once when a dataset is created and never resized.
#[derive(Debug)]
pub struct SlotCache {
    pixels: Vec<u8>,
    labels: Vec<String>,
    dims: SlotDims,
    capacity: usize,
}

impl SlotCache {
    /// Allocates `capacity` zeroed slots of the given shape.
    pub fn new(capacity: usize, dims: SlotDims) -> Self {
        Self {
            pixels: vec![0u8; capacity * dims.slot_len()],
            labels: vec![String::new(); capacity],
            dims,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dims(&self) -> SlotDims {
        self.dims
    }

    /// Total bytes held by the pixel arena.
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    fn slot_range(&self, slot: usize) -> Range<usize> {
        let len = self.dims.slot_len();
        slot * len..(slot + 1) * len
    }
}

// ============================================
// SLOT RING
// ============================================

/// A fixed-capacity FIFO of image slots.
///
/// ## Properties
/// - Fixed capacity (doesn't grow)
/// - O(1) push and pop
/// - Refuses pushes when full instead of discarding the oldest
/// - Each label stays attached to the pixels pushed with it
#[derive(Debug)]
pub struct SlotRing {
    cache: SlotCache,
    head: usize,
    tail: usize,
    count: usize,
}

impl SlotRing {
    /// Wraps a slot cache; the ring starts empty.
    ///
    /// ## Example
    /// ```
    /// # use strata_loader::buffer::{SlotCache, SlotDims, SlotRing};
    /// let ring = SlotRing::new(SlotCache::new(4, SlotDims::new(2, 2, 3)));
    /// assert_eq!(ring.capacity(), 4);
    /// assert!(ring.is_empty());
    /// ```
    pub fn new(cache: SlotCache) -> Self {
        Self {
            cache,
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    /// Copies `pixels` and `label` into the slot at `tail`.
    ///
    /// Returns `false` (and changes nothing) if the ring is full.
    ///
    /// # Panics
    /// If `pixels` is not exactly one slot long.
    pub fn push(&mut self, pixels: &[u8], label: String) -> bool {
        if self.is_full() {
            return false;
        }
        let range = self.cache.slot_range(self.tail);
        self.cache.pixels[range].copy_from_slice(pixels);
        self.cache.labels[self.tail] = label;
        self.tail = (self.tail + 1) % self.cache.capacity;
        self.count += 1;
        true
    }

    /// Releases the slot at `head` and returns a view of its pixels along
    /// with its label.
    ///
    /// The view stays valid until the next call that borrows the ring
    /// mutably, which is when the slot may be overwritten.
    pub fn pop(&mut self) -> Option<(&[u8], String)> {
        if self.is_empty() {
            return None;
        }
        let slot = self.head;
        self.head = (self.head + 1) % self.cache.capacity;
        self.count -= 1;

        let label = std::mem::take(&mut self.cache.labels[slot]);
        let range = self.cache.slot_range(slot);
        Some((&self.cache.pixels[range], label))
    }

    /// Returns the number of filled slots.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.cache.capacity
    }

    pub fn capacity(&self) -> usize {
        self.cache.capacity
    }

    pub fn dims(&self) -> SlotDims {
        self.cache.dims
    }

    /// Slot index the next `pop` reads.
    pub fn head(&self) -> usize {
        self.head
    }

    /// Slot index the next `push` writes.
    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Checks the head/tail/count relation.
    ///
    /// `count` equals `(tail - head) mod capacity` unless the ring is empty
    /// or full, in which case `head == tail`.
    pub fn invariant_holds(&self) -> bool {
        let capacity = self.cache.capacity;
        if self.head >= capacity || self.tail >= capacity || self.count > capacity {
            return false;
        }
        if self.count == 0 || self.count == capacity {
            self.head == self.tail
        } else {
            self.count == (self.tail + capacity - self.head) % capacity
        }
    }
}

// ============================================
// TESTS
// ============================================
