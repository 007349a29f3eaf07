//! Wire types: requests, response metadata, and completion payloads
//!
//! The engine treats HTTP details as opaque; these types carry only the
//! shape needed for fingerprinting, validation, and dispatch. The request
//! fingerprint is the absolute URL string: two requests with identical
//! URL strings are considered the same resource regardless of header or
//! method differences, and the download coordinator relies on this for
//! deduplication.

use crate::error::{Error, Result};
use crate::image::Image;
use std::sync::Arc;
use url::Url;

/// HTTP method of an image request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Head,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Head => "HEAD",
    }
  }
}

impl std::fmt::Display for Method {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Whether a request may be satisfied from the in-memory image cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
  /// Serve a cached image when one exists (default).
  UseCache,
  /// Always go to the network, ignoring cached images.
  ReloadIgnoringCache,
}

impl CachePolicy {
  /// True when the cache may satisfy the read.
  pub fn allows_cached_response(&self) -> bool {
    matches!(self, CachePolicy::UseCache)
  }
}

/// A description of an image to download.
///
/// Constructed from a URL string (which must parse as an absolute URL)
/// or an already-parsed [`Url`], optionally customized with a method,
/// headers, and a cache policy.
///
/// # Examples
///
/// ```rust,ignore
/// use imageloader::request::ImageRequest;
///
/// let request = ImageRequest::get("https://example.com/logo.png")?
///     .with_header("Accept", "image/png");
/// ```
#[derive(Debug, Clone)]
pub struct ImageRequest {
  method: Method,
  url: Url,
  headers: Vec<(String, String)>,
  cache_policy: CachePolicy,
}

impl ImageRequest {
  /// Builds a GET request from a URL string.
  ///
  /// Returns [`Error::InvalidUrl`] when the string does not parse as an
  /// absolute URL.
  pub fn get(url: &str) -> Result<Self> {
    let parsed = Url::parse(url).map_err(|_| Error::InvalidUrl {
      url: url.to_string(),
    })?;
    Ok(Self::from_url(parsed))
  }

  /// Builds a GET request from an already-parsed URL.
  pub fn from_url(url: Url) -> Self {
    Self {
      method: Method::Get,
      url,
      headers: Vec::new(),
      cache_policy: CachePolicy::UseCache,
    }
  }

  /// Replaces the HTTP method.
  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  /// Appends a header.
  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Replaces the cache policy.
  pub fn with_cache_policy(mut self, cache_policy: CachePolicy) -> Self {
    self.cache_policy = cache_policy;
    self
  }

  pub fn method(&self) -> Method {
    self.method
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  pub fn headers(&self) -> &[(String, String)] {
    &self.headers
  }

  pub fn cache_policy(&self) -> CachePolicy {
    self.cache_policy
  }

  /// The request fingerprint: the absolute URL string.
  ///
  /// Method and header differences are deliberately ignored; the
  /// coordinator coalesces on this value alone.
  pub fn url_id(&self) -> String {
    self.url.as_str().to_string()
  }

  /// True for `file://` URLs, which skip content-type validation.
  pub fn is_file_url(&self) -> bool {
    self.url.scheme() == "file"
  }
}

/// Metadata of an HTTP response, as reported by the request runner.
///
/// `mime_type` is the media type parsed from `Content-Type`, without
/// parameters such as `charset`.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
  pub status: u16,
  pub mime_type: Option<String>,
  pub headers: Vec<(String, String)>,
}

impl ResponseMeta {
  pub fn new(status: u16) -> Self {
    Self {
      status,
      mime_type: None,
      headers: Vec::new(),
    }
  }

  /// Sets the mime type from a raw `Content-Type` header value,
  /// discarding parameters.
  pub fn with_content_type(mut self, content_type: &str) -> Self {
    self.mime_type = parse_mime_type(content_type);
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Case-insensitive header lookup, first match wins.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// Extracts the `type/subtype` portion of a `Content-Type` header value.
pub fn parse_mime_type(content_type: &str) -> Option<String> {
  content_type
    .split(';')
    .next()
    .map(|s| s.trim().to_ascii_lowercase())
    .filter(|s| !s.is_empty())
}

/// The payload delivered to a subscriber's completion handler.
///
/// Mirrors the full shape of the network exchange: the original request,
/// the HTTP response metadata when one was received, the raw bytes, and
/// a `result` carrying either the (possibly filtered) decoded image or
/// the error that ended the attempt.
pub struct DataResponse {
  pub request: ImageRequest,
  pub response: Option<ResponseMeta>,
  pub data: Arc<Vec<u8>>,
  pub result: Result<Image>,
}

impl DataResponse {
  /// A response synthesized without any network exchange (cache hits,
  /// cancellations).
  pub fn synthesized(request: ImageRequest, result: Result<Image>) -> Self {
    Self {
      request,
      response: None,
      data: Arc::new(Vec::new()),
      result,
    }
  }
}

impl std::fmt::Debug for DataResponse {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DataResponse")
      .field("url", &self.request.url().as_str())
      .field("status", &self.response.as_ref().map(|r| r.status))
      .field("data_len", &self.data.len())
      .field("ok", &self.result.is_ok())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn get_rejects_unparseable_urls() {
    let err = ImageRequest::get("not a url").unwrap_err();
    assert!(matches!(err, Error::InvalidUrl { .. }));
  }

  #[test]
  fn url_id_ignores_method_and_headers() {
    let a = ImageRequest::get("https://example.com/a.png").unwrap();
    let b = ImageRequest::get("https://example.com/a.png")
      .unwrap()
      .with_method(Method::Head)
      .with_header("Accept", "image/webp");
    assert_eq!(a.url_id(), b.url_id());
  }

  #[test]
  fn file_urls_are_detected() {
    let request = ImageRequest::get("file:///tmp/icon.png").unwrap();
    assert!(request.is_file_url());
    let request = ImageRequest::get("https://example.com/icon.png").unwrap();
    assert!(!request.is_file_url());
  }

  #[test]
  fn mime_type_parsing_strips_parameters() {
    assert_eq!(
      parse_mime_type("image/PNG; charset=binary").as_deref(),
      Some("image/png")
    );
    assert_eq!(parse_mime_type("  "), None);
  }

  #[test]
  fn response_meta_header_lookup_is_case_insensitive() {
    let meta = ResponseMeta::new(200).with_header("Content-Length", "42");
    assert_eq!(meta.header("content-length"), Some("42"));
    assert_eq!(meta.header("etag"), None);
  }

  #[test]
  fn default_cache_policy_allows_cached_responses() {
    let request = ImageRequest::get("https://example.com/a.png").unwrap();
    assert!(request.cache_policy().allows_cached_response());
    let request = request.with_cache_policy(CachePolicy::ReloadIgnoringCache);
    assert!(!request.cache_policy().allows_cached_response());
  }
}
