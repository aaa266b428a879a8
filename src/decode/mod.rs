//! # Image Decode Module
//!
//! Turns one image file into the bytes of one ring slot.
//!
//! ## Plain English
//!
//! Every sampled file goes through the same steps: open it, decode it,
//! resize it to the configured size, convert it to RGB or grayscale, and
//! copy the result into a slot-sized buffer. The decoder is a trait so
//! tests (and callers with their own codecs) can swap it out.

mod sample;

pub use sample::LabeledImage;

use std::path::Path;

use image::imageops::FilterType;
use image::{GenericImageView, ImageError};

use crate::buffer::SlotDims;
use crate::error::DecodeError;

// ============================================
// DECODER TRAIT
// ============================================

/// Decodes and resizes an image file into a packed slot buffer.
///
/// `out` is exactly `dims.slot_len()` bytes. Implementations fill it
/// row-major with interleaved channels.
pub trait ImageDecoder: Send + 'static {
    fn decode_into(&self, path: &Path, dims: SlotDims, out: &mut [u8]) -> Result<(), DecodeError>;
}

impl<F> ImageDecoder for F
where
    F: Fn(&Path, SlotDims, &mut [u8]) -> Result<(), DecodeError> + Send + 'static,
{
    fn decode_into(&self, path: &Path, dims: SlotDims, out: &mut [u8]) -> Result<(), DecodeError> {
        self(path, dims, out)
    }
}

// ============================================
// DEFAULT DECODER
// ============================================

/// Decoder backed by the `image` crate.
#[derive(Clone, Copy, Debug)]
pub struct ResizingDecoder {
    filter: FilterType,
}

impl ResizingDecoder {
    pub fn new(filter: FilterType) -> Self {
        Self { filter }
    }
}

impl Default for ResizingDecoder {
    fn default() -> Self {
        Self::new(FilterType::Triangle)
    }
}

impl ImageDecoder for ResizingDecoder {
    fn decode_into(&self, path: &Path, dims: SlotDims, out: &mut [u8]) -> Result<(), DecodeError> {
        let mut img = image::open(path).map_err(|e| match e {
            ImageError::Decoding(_) => DecodeError::Decode {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
            other => DecodeError::Open {
                path: path.to_path_buf(),
                reason: other.to_string(),
            },
        })?;

        // Same-size images are copied as-is so their bytes survive untouched
        if img.dimensions() != (dims.width, dims.height) {
            img = img.resize_exact(dims.width, dims.height, self.filter);
        }

        let bytes = match dims.channels {
            1 => img.to_luma8().into_raw(),
            3 => img.to_rgb8().into_raw(),
            4 => img.to_rgba8().into_raw(),
            _ => {
                return Err(DecodeError::BufferSize {
                    expected: out.len(),
                    got: 0,
                })
            }
        };

        if bytes.len() != out.len() {
            return Err(DecodeError::BufferSize {
                expected: out.len(),
                got: bytes.len(),
            });
        }
        out.copy_from_slice(&bytes);
        Ok(())
    }
}

/// Label for an image: the name of the directory that contains it.
pub fn parent_label(path: &Path) -> String {
    path.parent()
        .and_then(|dir| dir.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn test_parent_label() {
        assert_eq!(parent_label(Path::new("/data/cats/001.png")), "cats");
        assert_eq!(parent_label(Path::new("001.png")), "");
    }

    #[test]
    fn test_same_size_is_exact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("red.png");
        RgbImage::from_pixel(4, 3, Rgb([200, 10, 30])).save(&path).unwrap();

        let dims = SlotDims::new(4, 3, 3);
        let mut out = vec![0u8; dims.slot_len()];
        ResizingDecoder::default()
            .decode_into(&path, dims, &mut out)
            .unwrap();

        assert!(out.chunks_exact(3).all(|px| px == [200, 10, 30]));
    }

    #[test]
    fn test_resize_and_grayscale() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.png");
        RgbImage::from_pixel(16, 8, Rgb([255, 255, 255])).save(&path).unwrap();

        let dims = SlotDims::new(4, 4, 1);
        let mut out = vec![0u8; dims.slot_len()];
        ResizingDecoder::default()
            .decode_into(&path, dims, &mut out)
            .unwrap();

        assert_eq!(out.len(), 16);
    }

    #[test]
    fn test_missing_file_fails() {
        let dims = SlotDims::new(2, 2, 3);
        let mut out = vec![0u8; dims.slot_len()];
        let result =
            ResizingDecoder::default().decode_into(&PathBuf::from("/nope/x.png"), dims, &mut out);
        assert!(matches!(result, Err(DecodeError::Open { .. })));
    }

    #[test]
    fn test_corrupt_file_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"\x89PNG\r\n\x1a\nnot really a png").unwrap();

        let dims = SlotDims::new(2, 2, 3);
        let mut out = vec![0u8; dims.slot_len()];
        assert!(ResizingDecoder::default()
            .decode_into(&path, dims, &mut out)
            .is_err());
    }

    #[test]
    fn test_closure_decoder() {
        let fill = |_: &Path, _: SlotDims, out: &mut [u8]| -> Result<(), DecodeError> {
            out.fill(9);
            Ok(())
        };
        let dims = SlotDims::new(1, 1, 3);
        let mut out = vec![0u8; 3];
        fill.decode_into(Path::new("any"), dims, &mut out).unwrap();
        assert_eq!(out, vec![9, 9, 9]);
    }
}
