//! Observable download events
//!
//! The coordinator reports request lifecycle transitions through an
//! abstract sink so hosts can observe activity (spinners, logging,
//! metrics) without the engine knowing about them. The default sink
//! discards everything.

use crate::request::ImageRequest;
use std::sync::mpsc::Sender;
use std::sync::Arc;

/// A request lifecycle transition.
///
/// `Completed` carries the raw response bytes alongside the request.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
  /// The request started or resumed running.
  Resumed { request: ImageRequest },
  /// The request was held back by the concurrency cap.
  Suspended { request: ImageRequest },
  /// The request was cancelled before running.
  Cancelled { request: ImageRequest },
  /// The network attempt finished (successfully or not).
  Completed {
    request: ImageRequest,
    data: Arc<Vec<u8>>,
  },
}

impl DownloadEvent {
  pub fn request(&self) -> &ImageRequest {
    match self {
      DownloadEvent::Resumed { request }
      | DownloadEvent::Suspended { request }
      | DownloadEvent::Cancelled { request }
      | DownloadEvent::Completed { request, .. } => request,
    }
  }
}

/// Receives download events from the coordinator.
pub trait DownloadEventSink: Send + Sync {
  fn emit(&self, event: DownloadEvent);
}

impl<T: DownloadEventSink + ?Sized> DownloadEventSink for Arc<T> {
  fn emit(&self, event: DownloadEvent) {
    (**self).emit(event)
  }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl DownloadEventSink for NullEventSink {
  fn emit(&self, _event: DownloadEvent) {}
}

/// Forwards events into an mpsc channel; handy in tests.
pub struct ChannelEventSink {
  sender: Sender<DownloadEvent>,
}

impl ChannelEventSink {
  pub fn new(sender: Sender<DownloadEvent>) -> Self {
    Self { sender }
  }
}

impl DownloadEventSink for ChannelEventSink {
  fn emit(&self, event: DownloadEvent) {
    let _ = self.sender.send(event);
  }
}
