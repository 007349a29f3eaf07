//! Error types for the image loading engine
//!
//! This module provides error types for all subsystems:
//! - URL handling (requests that do not parse)
//! - Response validation (status codes, content types)
//! - Image serialization (decoding failures)
//! - Transport (opaque errors surfaced by a request runner)
//!
//! All errors use the `thiserror` crate for minimal boilerplate and
//! proper error trait implementations. Every error is `Clone` because a
//! single network failure fans out to every subscriber of a URL.

use thiserror::Error;

/// Result type alias for image loading operations
///
/// This is a convenience type that uses our Error type as the error variant.
///
/// # Examples
///
/// ```
/// use imageloader::Result;
///
/// fn fetch_icon() -> Result<()> {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the image loading engine
///
/// This enum covers all possible errors that can occur while downloading,
/// validating, and decoding a remote image.
#[derive(Error, Debug, Clone)]
pub enum Error {
  /// The supplied URL string could not be parsed
  #[error("Invalid URL: {url}")]
  InvalidUrl { url: String },

  /// The subscription this error is delivered to was cancelled
  #[error("Request cancelled")]
  RequestCancelled,

  /// The decoder could not produce an image from the response bytes
  #[error("Image serialization failed: {reason}")]
  ImageSerializationFailed { reason: String },

  /// Response validation error (status code or content type)
  #[error("Response validation failed: {0}")]
  ResponseValidation(#[from] ResponseValidationError),

  /// Transport error propagated opaquely from the request runner
  #[error("Transport error: {message}")]
  Transport { message: String },
}

impl Error {
  /// Wraps an arbitrary transport-level failure reported by a runner.
  pub fn transport(message: impl Into<String>) -> Self {
    Error::Transport {
      message: message.into(),
    }
  }

  /// True when this error marks a cancelled subscription.
  pub fn is_request_cancelled(&self) -> bool {
    matches!(self, Error::RequestCancelled)
  }
}

/// Errors produced while validating an HTTP response before decoding
///
/// These errors indicate that the server response cannot be an image the
/// engine is willing to decode.
#[derive(Error, Debug, Clone)]
pub enum ResponseValidationError {
  /// The response carried no Content-Type header
  #[error("response is missing a Content-Type header (acceptable: {acceptable})")]
  MissingContentType { acceptable: String },

  /// The response Content-Type is not in the acceptable set
  #[error("Content-Type '{content_type}' is not acceptable (acceptable: {acceptable})")]
  UnacceptableContentType {
    content_type: String,
    acceptable: String,
  },

  /// The response status code is outside the acceptable range
  #[error("status code {code} is not acceptable")]
  UnacceptableStatusCode { code: u16 },

  /// A download-to-file response did not name a file
  #[error("downloaded file URL is missing")]
  DataFileNil,

  /// A download-to-file response named a file that could not be read
  #[error("could not read data from file at {path}")]
  DataFileReadFailed { path: String },
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn transport_errors_carry_their_message() {
    let err = Error::transport("connection reset");
    assert_eq!(err.to_string(), "Transport error: connection reset");
  }

  #[test]
  fn cancelled_predicate_only_matches_cancellation() {
    assert!(Error::RequestCancelled.is_request_cancelled());
    assert!(!Error::transport("x").is_request_cancelled());
  }

  #[test]
  fn validation_errors_convert_into_the_top_level_error() {
    let err: Error = ResponseValidationError::UnacceptableStatusCode { code: 404 }.into();
    assert!(matches!(
      err,
      Error::ResponseValidation(ResponseValidationError::UnacceptableStatusCode { code: 404 })
    ));
  }

  #[test]
  fn errors_are_cloneable_for_fan_out() {
    let err = Error::ImageSerializationFailed {
      reason: "empty buffer".to_string(),
    };
    let copy = err.clone();
    assert_eq!(err.to_string(), copy.to_string());
  }
}
