//! Image download coordinator
//!
//! The downloader owns the whole journey of a remote image: it serves
//! cache hits synchronously, coalesces duplicate in-flight requests onto
//! one network operation, enforces a concurrency ceiling with FIFO or
//! LIFO admission, and fans completed responses out to every subscriber
//! on a callback executor.
//!
//! Every `download` call is one *subscription*, identified by a receipt.
//! Subscriptions to the same URL share a single network attempt; each can
//! be cancelled independently without disturbing the others. All mutation
//! of coordinator state (the handler table, the admission queue, the
//! active count) happens under one lock with short, I/O-free critical
//! sections; decoding and callback fan-out run outside it.

use crate::cache::{cache_key, AutoPurgingImageCache, ImageCacheConfig};
use crate::decode::{DefaultImageDecoder, ImageDecoder, ImageResponseSerializer};
use crate::error::Error;
use crate::events::{DownloadEvent, DownloadEventSink, NullEventSink};
use crate::executor::{CallbackExecutor, WorkerExecutor};
use crate::filter::ImageFilter;
use crate::image::Image;
use crate::request::{DataResponse, ImageRequest, ResponseMeta};
use crate::runner::{
  Credential, ProgressHandler, RequestHandle, RequestRunner, RequestState, TransferProgress,
  UreqRunner,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use uuid::Uuid;

/// Queue discipline for requests held back by the concurrency cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadPrioritization {
  /// First in, first out (default).
  #[default]
  Fifo,
  /// Last in, first out.
  Lifo,
}

/// Completion callback, invoked exactly once per subscription.
pub type CompletionHandler = Box<dyn FnOnce(DataResponse) + Send + 'static>;

/// Per-call options for [`ImageDownloader::download`].
#[derive(Default)]
pub struct DownloadOptions {
  receipt_id: Option<String>,
  filter: Option<Arc<dyn ImageFilter>>,
  progress: Option<ProgressHandler>,
  completion: Option<CompletionHandler>,
}

impl DownloadOptions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Supplies the subscription id instead of generating one.
  pub fn with_receipt_id(mut self, receipt_id: impl Into<String>) -> Self {
    self.receipt_id = Some(receipt_id.into());
    self
  }

  /// Applies a filter to the decoded image before delivery and caching.
  pub fn with_filter(mut self, filter: Arc<dyn ImageFilter>) -> Self {
    self.filter = Some(filter);
    self
  }

  /// Observes transfer progress. Only honored for the subscription that
  /// starts the network operation; later joiners' hooks are dropped.
  pub fn with_progress(mut self, progress: ProgressHandler) -> Self {
    self.progress = Some(progress);
    self
  }

  /// Receives the completion payload.
  pub fn on_completion(mut self, completion: impl FnOnce(DataResponse) + Send + 'static) -> Self {
    self.completion = Some(Box::new(completion));
    self
  }
}

/// Token for one subscription to a potential network result.
///
/// Holds the underlying request handle plus the subscription id; pass it
/// to [`ImageDownloader::cancel`] to withdraw the subscription.
pub struct Receipt {
  receipt_id: String,
  handle: Arc<dyn RequestHandle>,
}

impl Receipt {
  pub fn receipt_id(&self) -> &str {
    &self.receipt_id
  }

  pub fn request(&self) -> &ImageRequest {
    self.handle.request()
  }
}

impl std::fmt::Debug for Receipt {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Receipt")
      .field("receipt_id", &self.receipt_id)
      .field("url", &self.request().url().as_str())
      .finish()
  }
}

struct Subscriber {
  receipt_id: String,
  filter: Option<Arc<dyn ImageFilter>>,
  completion: Option<CompletionHandler>,
}

/// Per-URL coalescing record holding all pending subscribers.
struct ResponseHandler {
  /// Nonce of the network attempt; a late completion whose nonce no
  /// longer matches has been superseded and must not fan out.
  handler_id: u64,
  handle: Arc<dyn RequestHandle>,
  subscribers: Vec<Subscriber>,
}

struct CoordinatorState {
  response_handlers: HashMap<String, ResponseHandler>,
  queued: VecDeque<String>,
  active: usize,
}

/// Builder for [`ImageDownloader`].
pub struct ImageDownloaderBuilder {
  max_concurrent: usize,
  prioritization: DownloadPrioritization,
  credential: Option<Credential>,
  timeout: Duration,
  runner: Option<Arc<dyn RequestRunner>>,
  decoder: Option<Arc<dyn ImageDecoder>>,
  cache: Option<Arc<AutoPurgingImageCache>>,
  use_cache: bool,
  executor: Option<Arc<dyn CallbackExecutor>>,
  events: Option<Arc<dyn DownloadEventSink>>,
}

impl ImageDownloaderBuilder {
  fn new() -> Self {
    Self {
      max_concurrent: 4,
      prioritization: DownloadPrioritization::Fifo,
      credential: None,
      timeout: Duration::from_secs(60),
      runner: None,
      decoder: None,
      cache: None,
      use_cache: true,
      executor: None,
      events: None,
    }
  }

  /// Ceiling on simultaneous in-flight requests (default 4).
  ///
  /// # Panics
  ///
  /// Panics when `max_concurrent` is zero.
  pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
    assert!(max_concurrent >= 1, "max_concurrent must be at least 1");
    self.max_concurrent = max_concurrent;
    self
  }

  /// Queue discipline for requests over the ceiling (default FIFO).
  pub fn with_prioritization(mut self, prioritization: DownloadPrioritization) -> Self {
    self.prioritization = prioritization;
    self
  }

  /// Credential attached to every request.
  pub fn with_credential(mut self, credential: Credential) -> Self {
    self.credential = Some(credential);
    self
  }

  /// Per-request timeout for the default runner (default 60s). Ignored
  /// when a custom runner is supplied.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Replaces the request runner.
  pub fn with_runner(mut self, runner: Arc<dyn RequestRunner>) -> Self {
    self.runner = Some(runner);
    self
  }

  /// Replaces the image decoder.
  pub fn with_decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
    self.decoder = Some(decoder);
    self
  }

  /// Replaces the image cache.
  pub fn with_cache(mut self, cache: Arc<AutoPurgingImageCache>) -> Self {
    self.cache = Some(cache);
    self
  }

  /// Runs without any image cache.
  pub fn without_cache(mut self) -> Self {
    self.use_cache = false;
    self.cache = None;
    self
  }

  /// Replaces the callback executor.
  pub fn with_executor(mut self, executor: Arc<dyn CallbackExecutor>) -> Self {
    self.executor = Some(executor);
    self
  }

  /// Observes request lifecycle events.
  pub fn with_events(mut self, events: Arc<dyn DownloadEventSink>) -> Self {
    self.events = Some(events);
    self
  }

  pub fn build(self) -> ImageDownloader {
    let runner = self
      .runner
      .unwrap_or_else(|| Arc::new(UreqRunner::new().with_timeout(self.timeout)));
    let decoder = self
      .decoder
      .unwrap_or_else(|| Arc::new(DefaultImageDecoder::new()));
    let cache = if self.use_cache {
      Some(
        self
          .cache
          .unwrap_or_else(|| Arc::new(AutoPurgingImageCache::new(ImageCacheConfig::default()))),
      )
    } else {
      None
    };
    let executor = self
      .executor
      .unwrap_or_else(|| Arc::new(WorkerExecutor::new()));
    let events = self.events.unwrap_or_else(|| Arc::new(NullEventSink));

    ImageDownloader {
      inner: Arc::new(DownloaderInner {
        runner,
        serializer: ImageResponseSerializer::new(decoder),
        cache,
        executor,
        events,
        credential: self.credential,
        max_concurrent: self.max_concurrent,
        prioritization: self.prioritization,
        next_handler_id: AtomicU64::new(1),
        state: Mutex::new(CoordinatorState {
          response_handlers: HashMap::new(),
          queued: VecDeque::new(),
          active: 0,
        }),
      }),
    }
  }
}

/// Coordinates remote image downloads.
///
/// # Example
///
/// ```rust,ignore
/// use imageloader::downloader::{DownloadOptions, ImageDownloader};
/// use imageloader::request::ImageRequest;
///
/// let downloader = ImageDownloader::new();
/// let request = ImageRequest::get("https://example.com/logo.png")?;
/// let receipt = downloader.download(
///     request,
///     DownloadOptions::new().on_completion(|response| {
///         if let Ok(image) = response.result {
///             println!("{}x{}", image.width(), image.height());
///         }
///     }),
/// );
/// ```
pub struct ImageDownloader {
  inner: Arc<DownloaderInner>,
}

struct DownloaderInner {
  runner: Arc<dyn RequestRunner>,
  serializer: ImageResponseSerializer,
  cache: Option<Arc<AutoPurgingImageCache>>,
  executor: Arc<dyn CallbackExecutor>,
  events: Arc<dyn DownloadEventSink>,
  credential: Option<Credential>,
  max_concurrent: usize,
  prioritization: DownloadPrioritization,
  next_handler_id: AtomicU64,
  state: Mutex<CoordinatorState>,
}

impl ImageDownloader {
  /// A downloader with the default runner, decoder, cache, and executor.
  pub fn new() -> Self {
    Self::builder().build()
  }

  pub fn builder() -> ImageDownloaderBuilder {
    ImageDownloaderBuilder::new()
  }

  /// The image cache, when one is configured.
  pub fn cache(&self) -> Option<&Arc<AutoPurgingImageCache>> {
    self.inner.cache.as_ref()
  }

  /// The response serializer; extend its acceptable content types here.
  pub fn serializer(&self) -> &ImageResponseSerializer {
    &self.inner.serializer
  }

  /// Number of requests currently in flight.
  pub fn active_download_count(&self) -> usize {
    self.inner.state.lock().active
  }

  /// Number of requests held back by the concurrency cap.
  pub fn queued_download_count(&self) -> usize {
    self.inner.state.lock().queued.len()
  }

  /// Subscribes to the image named by `request`.
  ///
  /// Returns `None` when the image was served synchronously from the
  /// cache (there is no cancellable operation), otherwise a [`Receipt`]
  /// identifying this subscription. Duplicate in-flight requests for the
  /// same URL are coalesced onto one network operation; only the first
  /// subscriber's progress hook is attached to it.
  pub fn download(&self, request: ImageRequest, options: DownloadOptions) -> Option<Receipt> {
    let receipt_id = options
      .receipt_id
      .unwrap_or_else(|| Uuid::new_v4().to_string());
    let url_id = request.url_id();
    let filter_id = options.filter.as_ref().map(|f| f.identifier());

    let mut state = self.inner.state.lock();

    // Join an attempt that is already pending for this URL.
    if let Some(handler) = state.response_handlers.get_mut(&url_id) {
      trace!(url = %url_id, receipt_id = %receipt_id, "coalescing onto pending attempt");
      handler.subscribers.push(Subscriber {
        receipt_id: receipt_id.clone(),
        filter: options.filter,
        completion: options.completion,
      });
      return Some(Receipt {
        receipt_id,
        handle: Arc::clone(&handler.handle),
      });
    }

    // Serve from the cache when the request allows it.
    if request.cache_policy().allows_cached_response() {
      if let Some(cache) = &self.inner.cache {
        if let Some(image) = cache.get(&cache_key(&url_id, filter_id.as_deref())) {
          trace!(url = %url_id, "serving image from cache");
          if let Some(completion) = options.completion {
            let response = DataResponse::synthesized(request, Ok(image));
            self
              .inner
              .executor
              .execute(Box::new(move || completion(response)));
          }
          return None;
        }
      }
    }

    // Start a fresh attempt.
    let handler_id = self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed);
    let weak = Arc::downgrade(&self.inner);
    let dispatch_request = request.clone();
    let completion: crate::runner::RunnerCompletion = Box::new(move |outcome| {
      if let Some(inner) = weak.upgrade() {
        DownloaderInner::handle_completion(&inner, dispatch_request, handler_id, outcome);
      }
    });
    let progress = options.progress.map(|user| {
      let executor = Arc::clone(&self.inner.executor);
      let forwarded: ProgressHandler = Arc::new(move |update: TransferProgress| {
        let user = Arc::clone(&user);
        executor.execute(Box::new(move || user(update)));
      });
      forwarded
    });

    let handle = self.inner.runner.submit(
      request.clone(),
      self.inner.credential.clone(),
      progress,
      completion,
    );

    if state.active < self.inner.max_concurrent {
      state.active += 1;
      handle.start();
      self.inner.events.emit(DownloadEvent::Resumed {
        request: request.clone(),
      });
      trace!(url = %url_id, active = state.active, "download started");
    } else {
      match self.inner.prioritization {
        DownloadPrioritization::Fifo => state.queued.push_back(url_id.clone()),
        DownloadPrioritization::Lifo => state.queued.push_front(url_id.clone()),
      }
      self.inner.events.emit(DownloadEvent::Suspended {
        request: request.clone(),
      });
      trace!(url = %url_id, queued = state.queued.len(), "download queued");
    }

    state.response_handlers.insert(
      url_id,
      ResponseHandler {
        handler_id,
        handle: Arc::clone(&handle),
        subscribers: vec![Subscriber {
          receipt_id: receipt_id.clone(),
          filter: options.filter,
          completion: options.completion,
        }],
      },
    );

    Some(Receipt { receipt_id, handle })
  }

  /// Downloads a list of requests with a shared filter and completion.
  ///
  /// Returns the receipts of the requests that went to the network, in
  /// input order; requests served synchronously from the cache are
  /// omitted.
  pub fn download_batch(
    &self,
    requests: Vec<ImageRequest>,
    filter: Option<Arc<dyn ImageFilter>>,
    completion: Arc<dyn Fn(DataResponse) + Send + Sync>,
  ) -> Vec<Receipt> {
    requests
      .into_iter()
      .filter_map(|request| {
        let completion = Arc::clone(&completion);
        let mut options = DownloadOptions::new().on_completion(move |response| {
          completion(response);
        });
        if let Some(filter) = &filter {
          options = options.with_filter(Arc::clone(filter));
        }
        self.download(request, options)
      })
      .collect()
  }

  /// Withdraws one subscription.
  ///
  /// The subscription's completion is delivered with
  /// [`Error::RequestCancelled`]; other subscribers to the same URL are
  /// unaffected. When the last subscriber of a not-yet-started request
  /// cancels, the underlying operation is cancelled outright.
  pub fn cancel(&self, receipt: Receipt) {
    let url_id = receipt.request().url_id();
    let mut cancelled: Option<Subscriber> = None;

    {
      let mut state = self.inner.state.lock();
      let mut handler_empty = false;
      if let Some(handler) = state.response_handlers.get_mut(&url_id) {
        if let Some(index) = handler
          .subscribers
          .iter()
          .position(|s| s.receipt_id == receipt.receipt_id)
        {
          cancelled = Some(handler.subscribers.remove(index));
        }
        handler_empty = handler.subscribers.is_empty();
      }

      if handler_empty {
        if let Some(handler) = state.response_handlers.remove(&url_id) {
          if handler.handle.state() == RequestState::Suspended {
            handler.handle.cancel();
            self.inner.events.emit(DownloadEvent::Cancelled {
              request: handler.handle.request().clone(),
            });
            debug!(url = %url_id, "cancelled request before start");
          }
          // A running operation is left to finish; its completion finds
          // no handler entry and is dropped as stale.
        }
      }
    }

    if let Some(subscriber) = cancelled {
      if let Some(completion) = subscriber.completion {
        let response =
          DataResponse::synthesized(receipt.request().clone(), Err(Error::RequestCancelled));
        self
          .inner
          .executor
          .execute(Box::new(move || completion(response)));
      }
    }
  }
}

impl Default for ImageDownloader {
  fn default() -> Self {
    Self::new()
  }
}

impl DownloaderInner {
  /// Runner-thread entry point for a finished transfer.
  ///
  /// Bookkeeping (stale detection, active count, queue advance) happens
  /// under the coordinator lock; decoding and fan-out happen after it is
  /// released.
  fn handle_completion(
    inner: &Arc<DownloaderInner>,
    request: ImageRequest,
    handler_id: u64,
    outcome: crate::error::Result<(Vec<u8>, ResponseMeta)>,
  ) {
    let url_id = request.url_id();
    let handler = {
      let mut state = inner.state.lock();
      state.active = state.active.saturating_sub(1);
      let current = matches!(
        state.response_handlers.get(&url_id),
        Some(handler) if handler.handler_id == handler_id
      );
      let handler = if current {
        state.response_handlers.remove(&url_id)
      } else {
        None
      };
      inner.start_next_queued(&mut state);
      handler
    };

    let Some(handler) = handler else {
      trace!(url = %url_id, "dropping stale completion");
      return;
    };

    match outcome {
      Err(error) => {
        inner.events.emit(DownloadEvent::Completed {
          request: request.clone(),
          data: Arc::new(Vec::new()),
        });
        inner.deliver_failure(&request, None, Arc::new(Vec::new()), handler.subscribers, error);
      }
      Ok((bytes, meta)) => {
        let data = Arc::new(bytes);
        inner.events.emit(DownloadEvent::Completed {
          request: request.clone(),
          data: Arc::clone(&data),
        });
        match inner.serializer.serialize(&request, &meta, &data) {
          Err(error) => {
            inner.deliver_failure(&request, Some(meta), data, handler.subscribers, error)
          }
          Ok(image) => {
            inner.deliver_success(&request, &url_id, meta, data, handler.subscribers, image)
          }
        }
      }
    }
  }

  fn deliver_success(
    &self,
    request: &ImageRequest,
    url_id: &str,
    meta: ResponseMeta,
    data: Arc<Vec<u8>>,
    subscribers: Vec<Subscriber>,
    image: Image,
  ) {
    // One transform per distinct filter identifier, shared by every
    // subscriber that asked for it.
    let mut filtered: HashMap<String, Image> = HashMap::new();

    for subscriber in subscribers {
      let filter_id = subscriber.filter.as_ref().map(|f| f.identifier());
      let delivered = match (&subscriber.filter, &filter_id) {
        (Some(filter), Some(id)) => filtered
          .entry(id.clone())
          .or_insert_with(|| filter.apply(&image))
          .clone(),
        _ => image.clone(),
      };

      // The cache insert must be observable before the completion runs.
      if let Some(cache) = &self.cache {
        cache.add(delivered.clone(), &cache_key(url_id, filter_id.as_deref()));
      }

      if let Some(completion) = subscriber.completion {
        let response = DataResponse {
          request: request.clone(),
          response: Some(meta.clone()),
          data: Arc::clone(&data),
          result: Ok(delivered),
        };
        self.executor.execute(Box::new(move || completion(response)));
      }
    }
  }

  fn deliver_failure(
    &self,
    request: &ImageRequest,
    meta: Option<ResponseMeta>,
    data: Arc<Vec<u8>>,
    subscribers: Vec<Subscriber>,
    error: Error,
  ) {
    debug!(url = %request.url_id(), error = %error, "download failed");
    for subscriber in subscribers {
      if let Some(completion) = subscriber.completion {
        let response = DataResponse {
          request: request.clone(),
          response: meta.clone(),
          data: Arc::clone(&data),
          result: Err(error.clone()),
        };
        self.executor.execute(Box::new(move || completion(response)));
      }
    }
  }

  /// Starts queued requests while slots are free, skipping entries whose
  /// handler is gone (cancelled) or whose handle is no longer startable.
  fn start_next_queued(&self, state: &mut CoordinatorState) {
    while state.active < self.max_concurrent {
      let Some(url_id) = state.queued.pop_front() else {
        break;
      };
      let Some(handler) = state.response_handlers.get(&url_id) else {
        continue;
      };
      if handler.handle.state() != RequestState::Suspended {
        continue;
      }
      let handle = Arc::clone(&handler.handle);
      state.active += 1;
      handle.start();
      self.events.emit(DownloadEvent::Resumed {
        request: handle.request().clone(),
      });
      trace!(url = %url_id, active = state.active, "started queued download");
    }
  }
}
