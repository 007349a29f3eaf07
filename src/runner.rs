//! Request runner abstraction
//!
//! The engine never talks HTTP directly; it asks a [`RequestRunner`] for
//! a [`RequestHandle`] and drives it through a tiny lifecycle: a
//! submitted handle is suspended, `start` moves it to running and
//! performs the transfer on runner-owned threads, `cancel` prevents a
//! suspended handle from ever running. The runner reports either bytes
//! plus response metadata or an error, and forwards transfer progress
//! while reading the body.
//!
//! [`UreqRunner`] is the default implementation:
//! - `http://` / `https://` over a blocking `ureq` agent with redirect
//!   following, a global timeout, and a response size cap
//! - `file://` reads from the filesystem (content type guessed from the
//!   extension)
//! - `data:` URLs decoded inline (base64 or percent-encoded)

use crate::error::{Error, Result};
use crate::request::{ImageRequest, Method, ResponseMeta};
use parking_lot::Mutex;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

/// Default User-Agent header sent by [`UreqRunner`].
pub const DEFAULT_USER_AGENT: &str = "imageloader/0.1";

const REDIRECT_LIMIT: usize = 10;
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Basic-auth credentials attached to every request when configured.
#[derive(Debug, Clone)]
pub struct Credential {
  user: String,
  password: String,
}

impl Credential {
  pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
    Self {
      user: user.into(),
      password: password.into(),
    }
  }

  /// The `Authorization` header value for these credentials.
  pub fn authorization_header(&self) -> String {
    use base64::Engine;
    let raw = format!("{}:{}", self.user, self.password);
    format!(
      "Basic {}",
      base64::engine::general_purpose::STANDARD.encode(raw)
    )
  }
}

/// Lifecycle state of a request handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
  /// Submitted but not yet started; startable and cancellable.
  Suspended,
  /// Transfer in progress.
  Running,
  /// Transfer finished (successfully or not).
  Completed,
  /// Cancelled before it ever ran.
  Cancelled,
}

/// Transfer progress: bytes received so far and the expected total when
/// the server announced one.
#[derive(Debug, Clone, Copy)]
pub struct TransferProgress {
  pub received: u64,
  pub total: Option<u64>,
}

impl TransferProgress {
  /// Completed fraction in `0.0..=1.0` when the total is known.
  pub fn fraction(&self) -> Option<f64> {
    let total = self.total.filter(|t| *t > 0)?;
    Some((self.received as f64 / total as f64).min(1.0))
  }
}

/// Progress callback, invoked repeatedly while the body is read.
pub type ProgressHandler = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Completion callback, invoked exactly once per started transfer.
pub type RunnerCompletion = Box<dyn FnOnce(Result<(Vec<u8>, ResponseMeta)>) + Send>;

/// One submitted transfer.
///
/// Handles are shared between the coordinator and receipts; all methods
/// take `&self`.
pub trait RequestHandle: Send + Sync {
  /// The request this handle was submitted for.
  fn request(&self) -> &ImageRequest;

  /// Current lifecycle state.
  fn state(&self) -> RequestState;

  /// Starts a suspended transfer; no-op in any other state.
  fn start(&self);

  /// Cancels a suspended transfer; a running transfer is left to finish.
  fn cancel(&self);
}

/// Produces request handles. Implementations own their I/O threads.
pub trait RequestRunner: Send + Sync {
  fn submit(
    &self,
    request: ImageRequest,
    credential: Option<Credential>,
    progress: Option<ProgressHandler>,
    completion: RunnerCompletion,
  ) -> Arc<dyn RequestHandle>;
}

impl<T: RequestRunner + ?Sized> RequestRunner for Arc<T> {
  fn submit(
    &self,
    request: ImageRequest,
    credential: Option<Credential>,
    progress: Option<ProgressHandler>,
    completion: RunnerCompletion,
  ) -> Arc<dyn RequestHandle> {
    (**self).submit(request, credential, progress, completion)
  }
}

// ============================================================================
// UreqRunner
// ============================================================================

/// Default request runner over blocking `ureq` I/O.
///
/// # Example
///
/// ```rust,ignore
/// use imageloader::runner::UreqRunner;
/// use std::time::Duration;
///
/// let runner = UreqRunner::new()
///     .with_timeout(Duration::from_secs(30))
///     .with_user_agent("MyApp/1.0");
/// ```
#[derive(Debug, Clone)]
pub struct UreqRunner {
  timeout: Duration,
  user_agent: String,
  max_size: usize,
}

impl UreqRunner {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the per-request timeout.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Sets the User-Agent header.
  pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
    self.user_agent = user_agent.into();
    self
  }

  /// Sets the maximum response size in bytes.
  pub fn with_max_size(mut self, max_size: usize) -> Self {
    self.max_size = max_size;
    self
  }
}

impl Default for UreqRunner {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(60),
      user_agent: DEFAULT_USER_AGENT.to_string(),
      max_size: 50 * 1024 * 1024,
    }
  }
}

impl RequestRunner for UreqRunner {
  fn submit(
    &self,
    request: ImageRequest,
    credential: Option<Credential>,
    progress: Option<ProgressHandler>,
    completion: RunnerCompletion,
  ) -> Arc<dyn RequestHandle> {
    Arc::new(UreqHandle {
      config: self.clone(),
      request,
      credential,
      progress: Mutex::new(progress),
      completion: Mutex::new(Some(completion)),
      state: Arc::new(Mutex::new(RequestState::Suspended)),
    })
  }
}

struct UreqHandle {
  config: UreqRunner,
  request: ImageRequest,
  credential: Option<Credential>,
  progress: Mutex<Option<ProgressHandler>>,
  completion: Mutex<Option<RunnerCompletion>>,
  state: Arc<Mutex<RequestState>>,
}

impl RequestHandle for UreqHandle {
  fn request(&self) -> &ImageRequest {
    &self.request
  }

  fn state(&self) -> RequestState {
    *self.state.lock()
  }

  fn start(&self) {
    {
      let mut state = self.state.lock();
      if *state != RequestState::Suspended {
        return;
      }
      *state = RequestState::Running;
    }

    let Some(completion) = self.completion.lock().take() else {
      return;
    };
    let progress = self.progress.lock().take();
    let config = self.config.clone();
    let request = self.request.clone();
    let credential = self.credential.clone();
    let state = Arc::clone(&self.state);

    let spawned = thread::Builder::new()
      .name("imageloader-transfer".to_string())
      .spawn(move || {
        trace!(url = request.url().as_str(), "transfer starting");
        let outcome = perform(&config, &request, credential.as_ref(), progress.as_ref());
        *state.lock() = RequestState::Completed;
        completion(outcome);
      });
    if let Err(e) = spawned {
      debug!(error = %e, "failed to spawn transfer thread");
    }
  }

  fn cancel(&self) {
    let mut state = self.state.lock();
    if *state != RequestState::Suspended {
      return;
    }
    *state = RequestState::Cancelled;
    // The transfer never runs, so its completion must never fire.
    drop(self.completion.lock().take());
    drop(self.progress.lock().take());
  }
}

fn perform(
  config: &UreqRunner,
  request: &ImageRequest,
  credential: Option<&Credential>,
  progress: Option<&ProgressHandler>,
) -> Result<(Vec<u8>, ResponseMeta)> {
  let url = request.url();
  match url.scheme() {
    "data" => perform_data(url, progress),
    "file" => perform_file(url, progress),
    _ => perform_http(config, request, credential, progress),
  }
}

fn perform_http(
  config: &UreqRunner,
  request: &ImageRequest,
  credential: Option<&Credential>,
  progress: Option<&ProgressHandler>,
) -> Result<(Vec<u8>, ResponseMeta)> {
  let agent_config = ureq::Agent::config_builder()
    .timeout_global(Some(config.timeout))
    .http_status_as_error(false)
    .max_redirects(0)
    .build();
  let agent: ureq::Agent = agent_config.into();

  let mut current = request.url().as_str().to_string();
  for _ in 0..REDIRECT_LIMIT {
    let mut response = send_once(&agent, config, request, credential, &current)?;

    let status = response.status().as_u16();
    if (300..400).contains(&status) {
      if let Some(location) = response
        .headers()
        .get("location")
        .and_then(|h| h.to_str().ok())
      {
        current = Url::parse(&current)
          .ok()
          .and_then(|base| base.join(location).ok())
          .map(|u| u.to_string())
          .unwrap_or_else(|| location.to_string());
        continue;
      }
    }

    let mut meta = ResponseMeta::new(status);
    let mut total = None;
    for (name, value) in response.headers() {
      if let Ok(value) = value.to_str() {
        if name.as_str().eq_ignore_ascii_case("content-type") {
          meta = meta.with_content_type(value);
        }
        if name.as_str().eq_ignore_ascii_case("content-length") {
          total = value.trim().parse::<u64>().ok();
        }
        meta = meta.with_header(name.as_str(), value);
      }
    }

    let mut reader = response
      .body_mut()
      .with_config()
      .limit(config.max_size as u64)
      .reader();
    let bytes = read_with_progress(&mut reader, total, progress)
      .map_err(|e| Error::transport(e.to_string()))?;

    return Ok((bytes, meta));
  }

  Err(Error::transport("too many redirects"))
}

fn send_once(
  agent: &ureq::Agent,
  config: &UreqRunner,
  request: &ImageRequest,
  credential: Option<&Credential>,
  url: &str,
) -> Result<ureq::http::Response<ureq::Body>> {
  let result = if request.method() == Method::Post {
    let mut builder = agent.post(url).header("User-Agent", &config.user_agent);
    if let Some(credential) = credential {
      builder = builder.header("Authorization", &credential.authorization_header());
    }
    for (name, value) in request.headers() {
      builder = builder.header(name, value);
    }
    builder.send_empty()
  } else {
    let mut builder = match request.method() {
      Method::Head => agent.head(url),
      _ => agent.get(url),
    };
    builder = builder.header("User-Agent", &config.user_agent);
    if let Some(credential) = credential {
      builder = builder.header("Authorization", &credential.authorization_header());
    }
    for (name, value) in request.headers() {
      builder = builder.header(name, value);
    }
    builder.call()
  };

  result.map_err(|e| Error::transport(e.to_string()))
}

fn read_with_progress(
  reader: &mut impl Read,
  total: Option<u64>,
  progress: Option<&ProgressHandler>,
) -> std::io::Result<Vec<u8>> {
  let mut bytes = Vec::new();
  let mut chunk = [0u8; READ_CHUNK_SIZE];
  loop {
    let n = reader.read(&mut chunk)?;
    if n == 0 {
      break;
    }
    bytes.extend_from_slice(&chunk[..n]);
    if let Some(progress) = progress {
      progress(TransferProgress {
        received: bytes.len() as u64,
        total,
      });
    }
  }
  Ok(bytes)
}

fn perform_file(
  url: &Url,
  progress: Option<&ProgressHandler>,
) -> Result<(Vec<u8>, ResponseMeta)> {
  let path = url.path().to_string();
  let bytes = std::fs::read(&path).map_err(|_| {
    Error::ResponseValidation(crate::error::ResponseValidationError::DataFileReadFailed {
      path: path.clone(),
    })
  })?;

  report_single_progress(progress, bytes.len());
  let mut meta = ResponseMeta::new(200);
  if let Some(mime) = guess_content_type_from_path(&path) {
    meta = meta.with_content_type(&mime);
  }
  Ok((bytes, meta))
}

fn perform_data(
  url: &Url,
  progress: Option<&ProgressHandler>,
) -> Result<(Vec<u8>, ResponseMeta)> {
  let (bytes, media_type) = decode_data_url(url.as_str())?;
  report_single_progress(progress, bytes.len());
  let mut meta = ResponseMeta::new(200);
  if let Some(mime) = media_type {
    meta = meta.with_content_type(&mime);
  }
  Ok((bytes, meta))
}

fn report_single_progress(progress: Option<&ProgressHandler>, len: usize) {
  if let Some(progress) = progress {
    progress(TransferProgress {
      received: len as u64,
      total: Some(len as u64),
    });
  }
}

/// Guess content-type from a file path extension.
fn guess_content_type_from_path(path: &str) -> Option<String> {
  let ext = Path::new(path)
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| e.to_lowercase())?;

  let mime = match ext.as_str() {
    "png" => "image/png",
    "jpg" | "jpeg" => "image/jpeg",
    "gif" => "image/gif",
    "tif" | "tiff" => "image/tiff",
    "ico" => "image/x-icon",
    "bmp" => "image/bmp",
    _ => return None,
  };

  Some(mime.to_string())
}

/// Decode a data: URL into bytes and an optional media type.
fn decode_data_url(url: &str) -> Result<(Vec<u8>, Option<String>)> {
  let invalid = || Error::InvalidUrl {
    url: url.to_string(),
  };

  let rest = url.strip_prefix("data:").ok_or_else(invalid)?;
  let comma = rest.find(',').ok_or_else(invalid)?;
  let header = &rest[..comma];
  let payload = &rest[comma + 1..];

  let is_base64 = header.ends_with(";base64") || header.contains(";base64;");
  let media_type = header
    .split(';')
    .next()
    .filter(|s| !s.is_empty() && s.contains('/'))
    .map(|s| s.to_string());

  let bytes = if is_base64 {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
      .decode(payload)
      .map_err(|_| invalid())?
  } else {
    percent_decode(payload).ok_or_else(invalid)?
  };

  Ok((bytes, media_type))
}

fn percent_decode(input: &str) -> Option<Vec<u8>> {
  let bytes = input.as_bytes();
  let mut out = Vec::with_capacity(bytes.len());
  let mut i = 0;

  while i < bytes.len() {
    match bytes[i] {
      b'%' => {
        let hi = (*bytes.get(i + 1)? as char).to_digit(16)?;
        let lo = (*bytes.get(i + 2)? as char).to_digit(16)?;
        out.push(((hi << 4) | lo) as u8);
        i += 3;
      }
      b'+' => {
        out.push(b' ');
        i += 1;
      }
      b => {
        out.push(b);
        i += 1;
      }
    }
  }

  Some(out)
}
