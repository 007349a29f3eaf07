//! Duplicate in-flight downloads collapse onto one network operation.

mod common;

use common::{manual_downloader, png_response, request, ManualRunner};
use imageloader::DownloadOptions;
use std::sync::mpsc;

#[test]
fn three_subscribers_one_network_operation() {
  let runner = ManualRunner::new();
  let downloader = manual_downloader(&runner, 1);
  let (tx, rx) = mpsc::channel();

  let mut receipt_ids = Vec::new();
  for _ in 0..3 {
    let tx = tx.clone();
    let receipt = downloader
      .download(
        request("https://h/x"),
        DownloadOptions::new().on_completion(move |response| {
          let _ = tx.send(response);
        }),
      )
      .expect("receipt for a pending attempt");
    receipt_ids.push(receipt.receipt_id().to_string());
  }

  // All three receipts are distinct subscriptions on one attempt.
  receipt_ids.sort();
  receipt_ids.dedup();
  assert_eq!(receipt_ids.len(), 3);
  assert_eq!(runner.submission_count(), 1);

  runner.complete(0, Ok(png_response(1, 1)));

  let responses: Vec<_> = rx.try_iter().collect();
  assert_eq!(responses.len(), 3, "each completion delivered exactly once");
  for response in &responses {
    let image = response.result.as_ref().expect("decoded image");
    assert_eq!(image.total_bytes(), 4);
  }

  // The cache holds one entry keyed by the bare URL.
  let cache = downloader.cache().expect("default cache");
  assert_eq!(cache.entry_count(), 1);
  assert!(cache.get("https://h/x").is_some());
}

#[test]
fn coalescing_still_caps_concurrency_at_one() {
  let runner = ManualRunner::new();
  let downloader = manual_downloader(&runner, 1);

  downloader.download(request("https://h/x"), DownloadOptions::new());
  downloader.download(request("https://h/x"), DownloadOptions::new());
  downloader.download(request("https://h/y"), DownloadOptions::new());

  // Two URLs, two submissions, but only one running.
  assert_eq!(runner.submission_count(), 2);
  assert_eq!(downloader.active_download_count(), 1);

  runner.complete(0, Ok(png_response(1, 1)));
  assert_eq!(downloader.active_download_count(), 1);
  runner.complete(1, Ok(png_response(1, 1)));
  assert_eq!(downloader.active_download_count(), 0);
}

#[test]
fn distinct_urls_do_not_coalesce() {
  let runner = ManualRunner::new();
  let downloader = manual_downloader(&runner, 4);

  downloader.download(request("https://h/a"), DownloadOptions::new());
  downloader.download(request("https://h/b"), DownloadOptions::new());
  assert_eq!(runner.submission_count(), 2);
}
