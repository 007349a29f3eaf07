//! Subscribers sharing a filter identifier share one transform.

mod common;

use common::{manual_downloader, png_response, request, ManualRunner};
use imageloader::filter::{CustomFilter, ScaledToSizeFilter};
use imageloader::{cache_key, DownloadOptions, ImageFilter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};

#[test]
fn one_transform_per_identifier_per_response() {
  let runner = ManualRunner::new();
  let downloader = manual_downloader(&runner, 4);
  let applications = Arc::new(AtomicUsize::new(0));

  let counter = Arc::clone(&applications);
  let filter: Arc<dyn ImageFilter> = Arc::new(CustomFilter::new("shrink", move |image| {
    counter.fetch_add(1, Ordering::SeqCst);
    ScaledToSizeFilter::new(2.0, 2.0).apply(image)
  }));

  let (tx, rx) = mpsc::channel();
  for _ in 0..2 {
    let tx = tx.clone();
    downloader.download(
      request("https://h/x"),
      DownloadOptions::new()
        .with_filter(Arc::clone(&filter))
        .on_completion(move |response| {
          let _ = tx.send(response.result);
        }),
    );
  }

  runner.complete(0, Ok(png_response(16, 16)));

  // Both subscribers got the filtered image, but the closure ran once.
  let results: Vec<_> = rx.try_iter().collect();
  assert_eq!(results.len(), 2);
  for result in &results {
    let image = result.as_ref().expect("filtered image");
    assert_eq!(image.pixel_width(), 2);
  }
  assert_eq!(applications.load(Ordering::SeqCst), 1);

  // One cache entry, keyed by url + filter identifier.
  let cache = downloader.cache().unwrap();
  assert_eq!(cache.entry_count(), 1);
  assert!(cache.get(&cache_key("https://h/x", Some("shrink"))).is_some());
  assert!(cache.get("https://h/x").is_none());
}

#[test]
fn distinct_filters_produce_distinct_cache_entries() {
  let runner = ManualRunner::new();
  let downloader = manual_downloader(&runner, 4);

  let small: Arc<dyn ImageFilter> = Arc::new(ScaledToSizeFilter::new(2.0, 2.0));
  let large: Arc<dyn ImageFilter> = Arc::new(ScaledToSizeFilter::new(4.0, 4.0));

  downloader.download(
    request("https://h/x"),
    DownloadOptions::new().with_filter(Arc::clone(&small)),
  );
  downloader.download(
    request("https://h/x"),
    DownloadOptions::new().with_filter(Arc::clone(&large)),
  );
  downloader.download(request("https://h/x"), DownloadOptions::new());

  runner.complete(0, Ok(png_response(16, 16)));

  let cache = downloader.cache().unwrap();
  assert_eq!(cache.entry_count(), 3);
  let unfiltered = cache.get("https://h/x").expect("plain entry");
  assert_eq!(unfiltered.pixel_width(), 16);
  let filtered = cache
    .get(&cache_key("https://h/x", Some(&small.identifier())))
    .expect("filtered entry");
  assert_eq!(filtered.pixel_width(), 2);
}

#[test]
fn filtered_cache_hits_are_served_without_refetching() {
  let runner = ManualRunner::new();
  let downloader = manual_downloader(&runner, 4);
  let filter: Arc<dyn ImageFilter> = Arc::new(ScaledToSizeFilter::new(3.0, 3.0));

  downloader.download(
    request("https://h/x"),
    DownloadOptions::new().with_filter(Arc::clone(&filter)),
  );
  runner.complete(0, Ok(png_response(16, 16)));

  let (tx, rx) = mpsc::channel();
  let receipt = downloader.download(
    request("https://h/x"),
    DownloadOptions::new()
      .with_filter(filter)
      .on_completion(move |response| {
        let _ = tx.send(response.result);
      }),
  );
  assert!(receipt.is_none());
  assert_eq!(runner.submission_count(), 1);
  let image = rx.try_recv().unwrap().expect("cached filtered image");
  assert_eq!(image.pixel_width(), 3);
}
