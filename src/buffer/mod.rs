//! # Slot Buffer Module
//!
//! This module provides the bounded ring that sits between the background
//! worker (which decodes images) and the consumer (which trains on them).
//!
//! ## Plain English Explanation
//!
//! Imagine a sushi conveyor belt with a fixed number of plates:
//! 1. The kitchen (worker) puts a dish on the next empty plate
//! 2. If every plate is taken, the kitchen waits
//! 3. The customer (consumer) always takes the oldest dish first
//! 4. If the belt is empty, the customer waits
//!
//! Closing the restaurant wakes everybody up: the kitchen stops cooking,
//! and the customer can still finish what is already on the belt.
//!
//! ```text
//!   worker ──put──▶ [ slot | slot | slot | slot ] ──get──▶ consumer
//!                    ▲ tail                ▲ head
//! ```

mod ring_buffer;

pub use ring_buffer::{SlotCache, SlotDims, SlotRing};

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::decode::LabeledImage;
use crate::error::SamplerError;

// ============================================
// CLOSE REASON
// ============================================

/// Why the ring stopped accepting new slots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// `stop` was requested, or the producer went away
    Stopped,

    /// The worker hit a fatal sampler error
    Failed(SamplerError),
}

// ============================================
// SHARED STATE
// One lock for head/tail/count, slot storage and the stop flag
// ============================================

#[derive(Debug)]
struct RingState {
    ring: SlotRing,
    closed: Option<CloseReason>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<RingState>,
    /// Signalled when a slot is released
    not_full: Condvar,
    /// Signalled when a slot is filled
    not_empty: Condvar,
}

impl Shared {
    fn close(&self, reason: CloseReason) -> bool {
        let mut state = self.state.lock();
        if state.closed.is_some() {
            return false;
        }
        log::debug!("Closing slot ring: {:?}", reason);
        state.closed = Some(reason);
        drop(state);

        self.not_full.notify_all();
        self.not_empty.notify_all();
        true
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed.is_some()
    }
}

/// Creates a bounded slot channel over `cache`.
///
/// ## Plain English
///
/// The cache decides the capacity: a full ring blocks the sender, an empty
/// ring blocks the receiver. Neither half can be cloned, so there is always
/// exactly one producer and one consumer.
pub fn channel(cache: SlotCache) -> (SlotSender, SlotReceiver) {
    log::info!(
        "Creating slot ring: {} slots of {}x{}x{} ({} bytes)",
        cache.capacity(),
        cache.dims().width,
        cache.dims().height,
        cache.dims().channels,
        cache.byte_len()
    );

    let shared = Arc::new(Shared {
        state: Mutex::new(RingState {
            ring: SlotRing::new(cache),
            closed: None,
        }),
        not_full: Condvar::new(),
        not_empty: Condvar::new(),
    });

    (
        SlotSender {
            shared: Arc::clone(&shared),
        },
        SlotReceiver { shared },
    )
}

// ============================================
// SENDER (producer side)
// ============================================

/// The producing half of the slot ring.
///
/// Dropping the sender closes the ring so a waiting receiver never hangs.
#[derive(Debug)]
pub struct SlotSender {
    shared: Arc<Shared>,
}

impl SlotSender {
    /// Blocks until a slot is free or the ring is closed.
    ///
    /// Returns `true` if a slot is free. With a single producer, a free
    /// slot seen here is still free when `send` is called.
    pub fn wait_for_space(&self) -> bool {
        let mut state = self.shared.state.lock();
        while state.ring.is_full() && state.closed.is_none() {
            self.shared.not_full.wait(&mut state);
        }
        state.closed.is_none()
    }

    /// Writes one slot, blocking while the ring is full.
    ///
    /// Returns `false` without writing if the ring was closed.
    pub fn send(&self, pixels: &[u8], label: String) -> bool {
        let mut state = self.shared.state.lock();
        while state.ring.is_full() && state.closed.is_none() {
            self.shared.not_full.wait(&mut state);
        }
        if state.closed.is_some() {
            return false;
        }

        state.ring.push(pixels, label);
        drop(state);

        self.shared.not_empty.notify_one();
        true
    }

    /// Closes the ring. Returns `false` if it was already closed.
    pub fn close(&self, reason: CloseReason) -> bool {
        self.shared.close(reason)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Shape of every slot this sender writes.
    pub fn dims(&self) -> SlotDims {
        self.shared.state.lock().ring.dims()
    }
}

impl Drop for SlotSender {
    fn drop(&mut self) {
        self.shared.close(CloseReason::Stopped);
    }
}

// ============================================
// RECEIVER (consumer side)
// ============================================

/// The consuming half of the slot ring.
#[derive(Debug)]
pub struct SlotReceiver {
    shared: Arc<Shared>,
}

impl SlotReceiver {
    /// Waits for the oldest filled slot and hands a view of it to `read`.
    ///
    /// The slot is released (and the producer woken) once `read` returns.
    /// Filled slots are still handed out after the ring is closed, so the
    /// ring drains; after that:
    /// - `Ok(None)` when the ring was stopped
    /// - `Err(..)` when the worker failed
    pub fn recv_with<R, F>(&self, read: F) -> Result<Option<R>, SamplerError>
    where
        F: FnOnce(&[u8], String) -> R,
    {
        let mut state = self.shared.state.lock();
        while state.ring.is_empty() && state.closed.is_none() {
            self.shared.not_empty.wait(&mut state);
        }

        let popped = state.ring.pop().map(|(pixels, label)| read(pixels, label));
        if let Some(result) = popped {
            drop(state);
            self.shared.not_full.notify_one();
            return Ok(Some(result));
        }

        match &state.closed {
            Some(CloseReason::Failed(err)) => Err(err.clone()),
            _ => Ok(None),
        }
    }

    /// Waits for the oldest filled slot and copies it out.
    pub fn recv(&self) -> Result<Option<LabeledImage>, SamplerError> {
        let dims = self.dims();
        self.recv_with(|pixels, label| LabeledImage::new(pixels.to_vec(), label, dims))
    }

    /// Number of filled slots right now.
    pub fn len(&self) -> usize {
        self.shared.state.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.state.lock().ring.capacity()
    }

    pub fn dims(&self) -> SlotDims {
        self.shared.state.lock().ring.dims()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Runs `check` against the ring under the lock.
    pub fn inspect<R>(&self, check: impl FnOnce(&SlotRing) -> R) -> R {
        check(&self.shared.state.lock().ring)
    }

    /// A handle that can close the ring from any thread.
    pub fn closer(&self) -> SlotCloser {
        SlotCloser {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for SlotReceiver {
    fn drop(&mut self) {
        self.shared.close(CloseReason::Stopped);
    }
}

// ============================================
// CLOSER
// ============================================

/// Closes the ring and wakes both sides. Cheap to clone.
#[derive(Clone, Debug)]
pub struct SlotCloser {
    shared: Arc<Shared>,
}

impl SlotCloser {
    /// Returns `false` if the ring was already closed.
    pub fn close(&self, reason: CloseReason) -> bool {
        self.shared.close(reason)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

// ============================================
// TESTS
// ============================================
