//! Normalized still-image value handed to the engine.
//!
//! Built once at the ingestion boundary. Pixels are interleaved 8-bit
//! samples, row-major, `channels` samples per pixel.

use image::{DynamicImage, RgbImage};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("expected 3 channels, got {0}")]
    ChannelCount(u8),
    #[error("pixel buffer length mismatch: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image has zero area ({width}x{height})")]
    Empty { width: u32, height: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    width: u32,
    height: u32,
    channels: u8,
    pixels: Vec<u8>,
}

impl Snapshot {
    /// Wrap a raw pixel buffer without validating it.
    ///
    /// Malformed buffers are accepted here so that the attire scorer can
    /// report them as findings; use [`validate`](Self::validate) to check.
    pub fn from_raw(width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            channels,
            pixels,
        }
    }

    pub fn from_rgb(rgb: RgbImage) -> Self {
        let (width, height) = rgb.dimensions();
        Self::from_raw(width, height, 3, rgb.into_raw())
    }

    /// Convert any decoded image to RGB8.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self::from_rgb(image.into_rgb8())
    }

    /// Decode an encoded image (JPEG, PNG, ...) from memory.
    pub fn decode(bytes: &[u8]) -> Result<Self, SnapshotError> {
        Ok(Self::from_dynamic(image::load_from_memory(bytes)?))
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        Ok(Self::from_dynamic(image::open(path)?))
    }

    /// Solid-color RGB image. Handy for fixtures and calibration.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self::from_rgb(RgbImage::from_pixel(width, height, image::Rgb(rgb)))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Check the buffer is a non-empty, correctly sized RGB image.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.channels != 3 {
            return Err(SnapshotError::ChannelCount(self.channels));
        }
        if self.width == 0 || self.height == 0 {
            return Err(SnapshotError::Empty {
                width: self.width,
                height: self.height,
            });
        }
        let expected = self.width as usize * self.height as usize * 3;
        if self.pixels.len() != expected {
            return Err(SnapshotError::InvalidLength {
                expected,
                actual: self.pixels.len(),
            });
        }
        Ok(())
    }

    /// RGB sample at (x, y). Caller guarantees the snapshot is valid and in bounds.
    pub(crate) fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]
    }

    /// Copy into an `image` buffer for resampling. `None` when malformed.
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        self.validate().ok()?;
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
    }

    /// Paint a horizontal strip of rows with one color.
    #[cfg(test)]
    pub(crate) fn paint_rows(&mut self, rows: std::ops::Range<u32>, rgb: [u8; 3]) {
        if self.channels != 3 {
            return;
        }
        let w = self.width as usize;
        for y in rows.start..rows.end.min(self.height) {
            for x in 0..w {
                let i = (y as usize * w + x) * 3;
                if i + 2 < self.pixels.len() {
                    self.pixels[i..i + 3].copy_from_slice(&rgb);
                }
            }
        }
    }
}
