//! Image filters
//!
//! Filters are pure `Image -> Image` transforms paired with a stable
//! string identifier. The identifier participates in cache keys, so it
//! must be deterministic: size-parameterized filters embed the
//! integer-rounded size, and composites join their children's
//! identifiers with `_`. Two filters with the same identifier must
//! produce the same output for equal inputs; the cache relies on this.

use crate::image::Image;
use image::imageops::FilterType;
use std::sync::Arc;

/// A pure image transform with a stable identifier.
///
/// Identifiers are explicit rather than derived from type names;
/// implementors must return the same string for the lifetime of the
/// filter.
pub trait ImageFilter: Send + Sync {
  /// Stable identifier used in cache keys.
  fn identifier(&self) -> String;

  /// Applies the transform, returning a new image.
  fn apply(&self, image: &Image) -> Image;
}

impl<T: ImageFilter + ?Sized> ImageFilter for Arc<T> {
  fn identifier(&self) -> String {
    (**self).identifier()
  }

  fn apply(&self, image: &Image) -> Image {
    (**self).apply(image)
  }
}

fn size_identifier(name: &str, width: f32, height: f32) -> String {
  format!(
    "{}-size({}x{})",
    name,
    width.round() as i64,
    height.round() as i64
  )
}

/// Target size in device pixels for a logical size at the image's scale.
fn device_target(width: f32, height: f32, scale: f32) -> (u32, u32) {
  let w = (width * scale).round().max(1.0) as u32;
  let h = (height * scale).round().max(1.0) as u32;
  (w, h)
}

// ============================================================================
// Stock filters
// ============================================================================

/// Resizes to exactly the given logical size, ignoring aspect ratio.
#[derive(Debug, Clone, Copy)]
pub struct ScaledToSizeFilter {
  pub width: f32,
  pub height: f32,
}

impl ScaledToSizeFilter {
  pub fn new(width: f32, height: f32) -> Self {
    Self { width, height }
  }
}

impl ImageFilter for ScaledToSizeFilter {
  fn identifier(&self) -> String {
    size_identifier("ScaledToSizeFilter", self.width, self.height)
  }

  fn apply(&self, image: &Image) -> Image {
    let (w, h) = device_target(self.width, self.height, image.scale());
    let resized = image.pixels().resize_exact(w, h, FilterType::CatmullRom);
    Image::with_scale(resized, image.scale())
  }
}

/// Scales to fit within the given logical size, preserving aspect ratio.
///
/// The output is at most the target size in each dimension; no padding is
/// added.
#[derive(Debug, Clone, Copy)]
pub struct AspectScaledToFitSizeFilter {
  pub width: f32,
  pub height: f32,
}

impl AspectScaledToFitSizeFilter {
  pub fn new(width: f32, height: f32) -> Self {
    Self { width, height }
  }
}

impl ImageFilter for AspectScaledToFitSizeFilter {
  fn identifier(&self) -> String {
    size_identifier("AspectScaledToFitSizeFilter", self.width, self.height)
  }

  fn apply(&self, image: &Image) -> Image {
    let (w, h) = device_target(self.width, self.height, image.scale());
    // `resize` preserves aspect ratio within the bounding box.
    let resized = image.pixels().resize(w, h, FilterType::CatmullRom);
    Image::with_scale(resized, image.scale())
  }
}

/// Scales to fill the given logical size, preserving aspect ratio, then
/// center-crops the overflow.
#[derive(Debug, Clone, Copy)]
pub struct AspectScaledToFillSizeFilter {
  pub width: f32,
  pub height: f32,
}

impl AspectScaledToFillSizeFilter {
  pub fn new(width: f32, height: f32) -> Self {
    Self { width, height }
  }
}

impl ImageFilter for AspectScaledToFillSizeFilter {
  fn identifier(&self) -> String {
    size_identifier("AspectScaledToFillSizeFilter", self.width, self.height)
  }

  fn apply(&self, image: &Image) -> Image {
    let (w, h) = device_target(self.width, self.height, image.scale());
    let resized = image.pixels().resize_to_fill(w, h, FilterType::CatmullRom);
    Image::with_scale(resized, image.scale())
  }
}

/// A filter built from a closure and an explicit identifier.
///
/// Identifiers are required at construction; an empty identifier panics
/// because it would alias the unfiltered cache key.
pub struct CustomFilter {
  identifier: String,
  transform: Box<dyn Fn(&Image) -> Image + Send + Sync>,
}

impl CustomFilter {
  pub fn new(
    identifier: impl Into<String>,
    transform: impl Fn(&Image) -> Image + Send + Sync + 'static,
  ) -> Self {
    let identifier = identifier.into();
    assert!(
      !identifier.is_empty(),
      "custom image filters require a non-empty identifier"
    );
    Self {
      identifier,
      transform: Box::new(transform),
    }
  }
}

impl ImageFilter for CustomFilter {
  fn identifier(&self) -> String {
    self.identifier.clone()
  }

  fn apply(&self, image: &Image) -> Image {
    (self.transform)(image)
  }
}

// ============================================================================
// Composition
// ============================================================================

/// Applies child filters left to right.
///
/// The identifier is the children's identifiers joined by `_`, so two
/// composites with the same children in the same order share cache
/// entries.
pub struct CompositeFilter {
  filters: Vec<Arc<dyn ImageFilter>>,
}

impl CompositeFilter {
  pub fn new(filters: Vec<Arc<dyn ImageFilter>>) -> Self {
    Self { filters }
  }

  pub fn filters(&self) -> &[Arc<dyn ImageFilter>] {
    &self.filters
  }
}

impl ImageFilter for CompositeFilter {
  fn identifier(&self) -> String {
    self
      .filters
      .iter()
      .map(|f| f.identifier())
      .collect::<Vec<_>>()
      .join("_")
  }

  fn apply(&self, image: &Image) -> Image {
    self
      .filters
      .iter()
      .fold(image.clone(), |acc, filter| filter.apply(&acc))
  }
}
