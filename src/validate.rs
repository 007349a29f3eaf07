//! Response validation
//!
//! Status-code and content-type gates applied to a runner response before
//! any decoding happens. Status codes in `200..300` are acceptable.
//! Content types are matched against a runtime-extensible acceptable set
//! where each of type and subtype may be a literal or `*`; zero-length
//! response data passes the content-type gate regardless.

use crate::error::ResponseValidationError;
use crate::request::ResponseMeta;

/// MIME types accepted by default when validating image responses.
pub const DEFAULT_ACCEPTABLE_IMAGE_CONTENT_TYPES: &[&str] = &[
  "image/tiff",
  "image/jpeg",
  "image/gif",
  "image/png",
  "image/ico",
  "image/x-icon",
  "image/bmp",
  "image/x-bmp",
  "image/x-xbitmap",
  "image/x-ms-bmp",
  "image/x-win-bitmap",
];

/// Validates the response status code; acceptable is `200..300`.
pub fn validate_status(meta: &ResponseMeta) -> Result<(), ResponseValidationError> {
  if (200..300).contains(&meta.status) {
    Ok(())
  } else {
    Err(ResponseValidationError::UnacceptableStatusCode { code: meta.status })
  }
}

/// Validates the response content type against `acceptable`.
///
/// Zero-length data passes regardless of content type; a missing mime
/// type on non-empty data is an error.
pub fn validate_content_type(
  mime_type: Option<&str>,
  acceptable: &[String],
  data_len: usize,
) -> Result<(), ResponseValidationError> {
  if data_len == 0 {
    return Ok(());
  }

  let Some(mime_type) = mime_type else {
    return Err(ResponseValidationError::MissingContentType {
      acceptable: acceptable.join(", "),
    });
  };

  if acceptable
    .iter()
    .any(|pattern| mime_matches(mime_type, pattern))
  {
    Ok(())
  } else {
    Err(ResponseValidationError::UnacceptableContentType {
      content_type: mime_type.to_string(),
      acceptable: acceptable.join(", "),
    })
  }
}

/// Matches a `type/subtype` mime against an acceptable-list entry where
/// each side is either equal (case-insensitive) or `*`.
fn mime_matches(mime_type: &str, pattern: &str) -> bool {
  let Some((mime_main, mime_sub)) = mime_type.split_once('/') else {
    return false;
  };
  let Some((pat_main, pat_sub)) = pattern.split_once('/') else {
    return false;
  };
  component_matches(mime_main, pat_main) && component_matches(mime_sub, pat_sub)
}

fn component_matches(value: &str, pattern: &str) -> bool {
  pattern == "*" || value.eq_ignore_ascii_case(pattern)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn acceptable() -> Vec<String> {
    DEFAULT_ACCEPTABLE_IMAGE_CONTENT_TYPES
      .iter()
      .map(|s| s.to_string())
      .collect()
  }

  #[test]
  fn status_in_2xx_is_acceptable() {
    assert!(validate_status(&ResponseMeta::new(200)).is_ok());
    assert!(validate_status(&ResponseMeta::new(299)).is_ok());
  }

  #[test]
  fn status_outside_2xx_is_rejected() {
    for code in [199, 301, 404, 500] {
      let err = validate_status(&ResponseMeta::new(code)).unwrap_err();
      assert!(matches!(
        err,
        ResponseValidationError::UnacceptableStatusCode { code: c } if c == code
      ));
    }
  }

  #[test]
  fn default_set_accepts_png_and_rejects_html() {
    assert!(validate_content_type(Some("image/png"), &acceptable(), 10).is_ok());
    let err = validate_content_type(Some("text/html"), &acceptable(), 10).unwrap_err();
    assert!(matches!(
      err,
      ResponseValidationError::UnacceptableContentType { .. }
    ));
  }

  #[test]
  fn missing_content_type_is_rejected_for_nonempty_data() {
    let err = validate_content_type(None, &acceptable(), 10).unwrap_err();
    assert!(matches!(
      err,
      ResponseValidationError::MissingContentType { .. }
    ));
  }

  #[test]
  fn empty_data_passes_regardless_of_content_type() {
    assert!(validate_content_type(None, &acceptable(), 0).is_ok());
    assert!(validate_content_type(Some("text/html"), &acceptable(), 0).is_ok());
  }

  #[test]
  fn wildcard_entries_match_by_component() {
    let anything = vec!["*/*".to_string()];
    assert!(validate_content_type(Some("application/pdf"), &anything, 10).is_ok());

    let any_image = vec!["image/*".to_string()];
    assert!(validate_content_type(Some("image/webp"), &any_image, 10).is_ok());
    assert!(validate_content_type(Some("text/plain"), &any_image, 10).is_err());
  }

  #[test]
  fn matching_is_case_insensitive() {
    assert!(validate_content_type(Some("IMAGE/PNG"), &acceptable(), 10).is_ok());
  }

  #[test]
  fn malformed_mime_types_never_match() {
    assert!(validate_content_type(Some("imagepng"), &acceptable(), 10).is_err());
  }
}
