//! Shared test support: a request runner whose transfers finish only
//! when the test fires them, plus small response helpers.

// Each integration test compiles its own copy; not every test uses
// every helper.
#![allow(dead_code)]

use image::{DynamicImage, RgbaImage};
use imageloader::executor::InlineExecutor;
use imageloader::request::{ImageRequest, ResponseMeta};
use imageloader::runner::{
  Credential, ProgressHandler, RequestHandle, RequestRunner, RequestState, RunnerCompletion,
};
use imageloader::ImageDownloader;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

pub struct ManualHandle {
  request: ImageRequest,
  state: Mutex<RequestState>,
  completion: Mutex<Option<RunnerCompletion>>,
}

impl ManualHandle {
  pub fn was_started(&self) -> bool {
    !matches!(
      *self.state.lock().unwrap(),
      RequestState::Suspended | RequestState::Cancelled
    )
  }
}

impl RequestHandle for ManualHandle {
  fn request(&self) -> &ImageRequest {
    &self.request
  }

  fn state(&self) -> RequestState {
    *self.state.lock().unwrap()
  }

  fn start(&self) {
    let mut state = self.state.lock().unwrap();
    if *state == RequestState::Suspended {
      *state = RequestState::Running;
    }
  }

  fn cancel(&self) {
    let mut state = self.state.lock().unwrap();
    if *state == RequestState::Suspended {
      *state = RequestState::Cancelled;
      drop(self.completion.lock().unwrap().take());
    }
  }
}

/// Records submissions and lets tests complete them one by one.
#[derive(Default)]
pub struct ManualRunner {
  handles: Mutex<Vec<Arc<ManualHandle>>>,
}

impl ManualRunner {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn submission_count(&self) -> usize {
    self.handles.lock().unwrap().len()
  }

  pub fn handle(&self, index: usize) -> Arc<ManualHandle> {
    Arc::clone(&self.handles.lock().unwrap()[index])
  }

  /// Index of the submission for `url`, in submission order.
  pub fn index_of(&self, url: &str) -> Option<usize> {
    self
      .handles
      .lock()
      .unwrap()
      .iter()
      .position(|h| h.request().url_id() == url)
  }

  pub fn complete(
    &self,
    index: usize,
    outcome: imageloader::Result<(Vec<u8>, ResponseMeta)>,
  ) {
    let handle = self.handle(index);
    assert_eq!(
      handle.state(),
      RequestState::Running,
      "completing a transfer that is not running"
    );
    *handle.state.lock().unwrap() = RequestState::Completed;
    let completion = handle
      .completion
      .lock()
      .unwrap()
      .take()
      .expect("completion already taken");
    completion(outcome);
  }
}

impl RequestRunner for ManualRunner {
  fn submit(
    &self,
    request: ImageRequest,
    _credential: Option<Credential>,
    _progress: Option<ProgressHandler>,
    completion: RunnerCompletion,
  ) -> Arc<dyn RequestHandle> {
    let handle = Arc::new(ManualHandle {
      request,
      state: Mutex::new(RequestState::Suspended),
      completion: Mutex::new(Some(completion)),
    });
    self.handles.lock().unwrap().push(Arc::clone(&handle));
    handle
  }
}

/// Encoded PNG plus matching response metadata; a 1x1 image costs
/// exactly 4 bytes in the cache.
pub fn png_response(width: u32, height: u32) -> (Vec<u8>, ResponseMeta) {
  let pixels = DynamicImage::ImageRgba8(RgbaImage::new(width, height));
  let mut bytes = Vec::new();
  pixels
    .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
    .expect("encode png");
  (bytes, ResponseMeta::new(200).with_content_type("image/png"))
}

pub fn request(url: &str) -> ImageRequest {
  ImageRequest::get(url).unwrap()
}

/// A downloader over the manual runner that delivers callbacks inline.
pub fn manual_downloader(runner: &Arc<ManualRunner>, max_concurrent: usize) -> ImageDownloader {
  ImageDownloader::builder()
    .with_runner(Arc::clone(runner) as Arc<dyn RequestRunner>)
    .with_executor(Arc::new(InlineExecutor))
    .with_max_concurrent(max_concurrent)
    .build()
}
