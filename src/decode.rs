//! Response serialization: bytes to decoded images
//!
//! Turns validated response bytes into an [`Image`]. Decoding funnels
//! through a process-wide mutex because common image decoders are not
//! assumed thread-safe on every target; critical sections cover only the
//! decode itself, never I/O. Content-type validation is skipped for
//! `file://` requests, and an optional inflate pass materializes pixel
//! data right after decoding.

use crate::error::{Error, Result};
use crate::image::Image;
use crate::request::{ImageRequest, ResponseMeta};
use crate::validate;
use image::ImageFormat;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Serialization point for decoders that are not thread-safe.
static DECODE_LOCK: Mutex<()> = Mutex::new(());

/// Turns a byte buffer into a decoded image, or fails.
pub trait ImageDecoder: Send + Sync {
  /// Decodes `data`, optionally steered by a `type/subtype` mime hint.
  fn decode(&self, data: &[u8], mime_type: Option<&str>) -> Result<Image>;
}

impl<T: ImageDecoder + ?Sized> ImageDecoder for Arc<T> {
  fn decode(&self, data: &[u8], mime_type: Option<&str>) -> Result<Image> {
    (**self).decode(data, mime_type)
  }
}

/// Default decoder over the `image` crate.
///
/// Tries the format announced by the content type first, then the format
/// sniffed from the bytes, then a last-resort untyped decode.
#[derive(Debug, Clone)]
pub struct DefaultImageDecoder {
  scale: f32,
  inflate: bool,
}

impl DefaultImageDecoder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Scale recorded on decoded images (device pixels per logical pixel).
  pub fn with_scale(mut self, scale: f32) -> Self {
    self.scale = scale;
    self
  }

  /// Inflate decoded images eagerly so first use does not stall.
  pub fn with_inflate(mut self, inflate: bool) -> Self {
    self.inflate = inflate;
    self
  }
}

impl Default for DefaultImageDecoder {
  fn default() -> Self {
    Self {
      scale: 1.0,
      inflate: false,
    }
  }
}

impl ImageDecoder for DefaultImageDecoder {
  fn decode(&self, data: &[u8], mime_type: Option<&str>) -> Result<Image> {
    if data.is_empty() {
      return Err(Error::ImageSerializationFailed {
        reason: "empty image data".to_string(),
      });
    }

    let declared = mime_type.and_then(ImageFormat::from_mime_type);
    let sniffed = image::guess_format(data).ok();

    let _serialized = DECODE_LOCK.lock();

    let mut last_error: Option<image::ImageError> = None;
    if let Some(format) = declared {
      match image::load_from_memory_with_format(data, format) {
        Ok(pixels) => return Ok(self.finish(pixels)),
        Err(err) => last_error = Some(err),
      }
    }

    if let Some(format) = sniffed {
      if Some(format) != declared {
        match image::load_from_memory_with_format(data, format) {
          Ok(pixels) => return Ok(self.finish(pixels)),
          Err(err) => last_error = Some(err),
        }
      }
    }

    match image::load_from_memory(data) {
      Ok(pixels) => Ok(self.finish(pixels)),
      Err(err) => Err(Error::ImageSerializationFailed {
        reason: last_error.unwrap_or(err).to_string(),
      }),
    }
  }
}

impl DefaultImageDecoder {
  fn finish(&self, pixels: image::DynamicImage) -> Image {
    let decoded = Image::with_scale(pixels, self.scale);
    if self.inflate {
      decoded.inflate();
    }
    decoded
  }
}

/// Validates a response and decodes its bytes into an image.
///
/// Owns the runtime-extensible set of acceptable image content types.
pub struct ImageResponseSerializer {
  decoder: Arc<dyn ImageDecoder>,
  acceptable_content_types: RwLock<Vec<String>>,
}

impl ImageResponseSerializer {
  pub fn new(decoder: Arc<dyn ImageDecoder>) -> Self {
    Self {
      decoder,
      acceptable_content_types: RwLock::new(
        validate::DEFAULT_ACCEPTABLE_IMAGE_CONTENT_TYPES
          .iter()
          .map(|s| s.to_string())
          .collect(),
      ),
    }
  }

  /// Snapshot of the acceptable content types.
  pub fn acceptable_content_types(&self) -> Vec<String> {
    self.acceptable_content_types.read().clone()
  }

  /// Extends the acceptable content types at runtime.
  pub fn add_acceptable_content_types<I>(&self, content_types: I)
  where
    I: IntoIterator,
    I::Item: Into<String>,
  {
    let mut acceptable = self.acceptable_content_types.write();
    for content_type in content_types {
      let content_type = content_type.into();
      if !acceptable.contains(&content_type) {
        acceptable.push(content_type);
      }
    }
  }

  /// Validates status and content type, then decodes.
  ///
  /// `file://` requests skip the content-type gate; their bytes never
  /// carried a server-declared type.
  pub fn serialize(
    &self,
    request: &ImageRequest,
    meta: &ResponseMeta,
    data: &[u8],
  ) -> Result<Image> {
    validate::validate_status(meta)?;

    if !request.is_file_url() {
      let acceptable = self.acceptable_content_types.read();
      validate::validate_content_type(meta.mime_type.as_deref(), &acceptable, data.len())?;
    }

    self.decoder.decode(data, meta.mime_type.as_deref())
  }
}

impl Default for ImageResponseSerializer {
  fn default() -> Self {
    Self::new(Arc::new(DefaultImageDecoder::new()))
  }
}
