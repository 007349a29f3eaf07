//! Decoded image handle
//!
//! A decoded image is an immutable raster plus a scale factor relating
//! device pixels to logical pixels. Handles are cheap to clone: the pixel
//! data lives behind an `Arc` and is shared between the cache, filters,
//! and subscriber completions.

use image::DynamicImage;
use image::GenericImageView;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// An immutable decoded raster with a scale factor.
///
/// `width()`/`height()` report logical pixels; `pixel_width()`/
/// `pixel_height()` report device pixels. `total_bytes()` is the memory
/// cost the cache charges for the image:
/// `ceil(width * scale) * ceil(height * scale) * 4`.
#[derive(Clone)]
pub struct Image {
  inner: Arc<ImageInner>,
}

struct ImageInner {
  pixels: DynamicImage,
  scale: f32,
  inflated: AtomicBool,
}

impl Image {
  /// Wraps a decoded raster at scale 1.0.
  pub fn new(pixels: DynamicImage) -> Self {
    Self::with_scale(pixels, 1.0)
  }

  /// Wraps a decoded raster with an explicit scale (device pixels per
  /// logical pixel). Non-positive scales are clamped to 1.0.
  pub fn with_scale(pixels: DynamicImage, scale: f32) -> Self {
    let scale = if scale.is_finite() && scale > 0.0 {
      scale
    } else {
      1.0
    };
    Self {
      inner: Arc::new(ImageInner {
        pixels,
        scale,
        inflated: AtomicBool::new(false),
      }),
    }
  }

  /// The underlying raster.
  pub fn pixels(&self) -> &DynamicImage {
    &self.inner.pixels
  }

  /// Width in device pixels.
  pub fn pixel_width(&self) -> u32 {
    self.inner.pixels.width()
  }

  /// Height in device pixels.
  pub fn pixel_height(&self) -> u32 {
    self.inner.pixels.height()
  }

  /// Width in logical pixels.
  pub fn width(&self) -> f32 {
    self.pixel_width() as f32 / self.inner.scale
  }

  /// Height in logical pixels.
  pub fn height(&self) -> f32 {
    self.pixel_height() as f32 / self.inner.scale
  }

  /// Device pixels per logical pixel.
  pub fn scale(&self) -> f32 {
    self.inner.scale
  }

  /// Memory cost charged by the cache for this image.
  pub fn total_bytes(&self) -> u64 {
    let device_width = (self.width() * self.inner.scale).ceil() as u64;
    let device_height = (self.height() * self.inner.scale).ceil() as u64;
    device_width * device_height * 4
  }

  /// Forces pixel data into memory so the first draw does not stall.
  ///
  /// Idempotent; the handle records whether inflation already happened
  /// and later calls are no-ops.
  pub fn inflate(&self) {
    if self.inner.inflated.swap(true, Ordering::AcqRel) {
      return;
    }
    // Walk the backing buffer once to fault the pixel data in.
    let bytes = self.inner.pixels.as_bytes();
    std::hint::black_box(bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)));
  }

  /// Whether [`Image::inflate`] has run for this raster.
  pub fn is_inflated(&self) -> bool {
    self.inner.inflated.load(Ordering::Acquire)
  }

  /// True when both handles share one underlying raster.
  pub fn ptr_eq(&self, other: &Image) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }
}

impl std::fmt::Debug for Image {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Image")
      .field("pixel_width", &self.pixel_width())
      .field("pixel_height", &self.pixel_height())
      .field("scale", &self.inner.scale)
      .field("total_bytes", &self.total_bytes())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbaImage;

  fn raster(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::new(width, height))
  }

  #[test]
  fn total_bytes_is_four_per_device_pixel() {
    let image = Image::new(raster(10, 5));
    assert_eq!(image.total_bytes(), 10 * 5 * 4);
  }

  #[test]
  fn scale_divides_logical_dimensions() {
    let image = Image::with_scale(raster(100, 60), 2.0);
    assert_eq!(image.width(), 50.0);
    assert_eq!(image.height(), 30.0);
    // Device-pixel cost is unchanged by scale.
    assert_eq!(image.total_bytes(), 100 * 60 * 4);
  }

  #[test]
  fn non_positive_scale_falls_back_to_one() {
    let image = Image::with_scale(raster(4, 4), 0.0);
    assert_eq!(image.scale(), 1.0);
  }

  #[test]
  fn inflate_is_idempotent() {
    let image = Image::new(raster(2, 2));
    assert!(!image.is_inflated());
    image.inflate();
    assert!(image.is_inflated());
    image.inflate();
    assert!(image.is_inflated());
  }

  #[test]
  fn clones_share_the_raster() {
    let image = Image::new(raster(1, 1));
    let copy = image.clone();
    assert!(image.ptr_eq(&copy));
    // Inflation is visible through every handle.
    copy.inflate();
    assert!(image.is_inflated());
  }
}
