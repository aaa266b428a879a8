//! # Labeled Image Types
//!
//! What the consumer receives from `get`.

use crate::buffer::SlotDims;

// ============================================
// LABELED IMAGE
// ============================================

/// One resized image copied out of the ring, with its class label.
///
/// ## Plain English
///
/// This is one "photograph" from the dataset containing:
/// - The pixels, packed row by row with channels interleaved (`RGBRGB...`)
/// - The label (name of the folder the file came from)
/// - The image dimensions
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledImage {
    pixels: Vec<u8>,
    label: String,
    dims: SlotDims,
}

impl LabeledImage {
    /// Creates a labeled image. `pixels` must hold exactly one slot.
    pub fn new(pixels: Vec<u8>, label: String, dims: SlotDims) -> Self {
        debug_assert_eq!(pixels.len(), dims.slot_len());
        Self {
            pixels,
            label,
            dims,
        }
    }

    /// Packed row-major, channel-interleaved bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn dims(&self) -> SlotDims {
        self.dims
    }

    pub fn width(&self) -> u32 {
        self.dims.width
    }

    pub fn height(&self) -> u32 {
        self.dims.height
    }

    pub fn channels(&self) -> usize {
        self.dims.channels
    }

    /// The channel values of the pixel at column `x`, row `y`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.dims.width || y >= self.dims.height {
            return None;
        }
        let start = (y as usize * self.dims.width as usize + x as usize) * self.dims.channels;
        Some(&self.pixels[start..start + self.dims.channels])
    }

    /// Converts to planar `f32` in `[C, H, W]` order, scaled to `[0, 1]`.
    ///
    /// ## Plain English
    ///
    /// Training code usually wants all the reds, then all the greens, then
    /// all the blues, as floats. The packed buffer keeps them interleaved,
    /// so this splits the channels apart and divides by 255.
    pub fn to_planar_f32(&self) -> Vec<f32> {
        let channels = self.dims.channels;
        let plane = self.dims.width as usize * self.dims.height as usize;
        let mut out = vec![0.0f32; self.pixels.len()];

        for (i, chunk) in self.pixels.chunks_exact(channels).enumerate() {
            for (c, value) in chunk.iter().enumerate() {
                out[c * plane + i] = *value as f32 / 255.0;
            }
        }
        out
    }

    /// Splits into pixels and label.
    pub fn into_parts(self) -> (Vec<u8>, String) {
        (self.pixels, self.label)
    }
}

// ============================================
// TESTS
// ============================================
