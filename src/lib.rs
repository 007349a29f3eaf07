pub mod cache;
pub mod decode;
pub mod downloader;
pub mod error;
pub mod events;
pub mod executor;
pub mod filter;
pub mod image;
pub mod request;
pub mod runner;
pub mod validate;

pub use cache::{cache_key, AutoPurgingImageCache, ImageCacheConfig};
pub use downloader::{
  DownloadOptions, DownloadPrioritization, ImageDownloader, ImageDownloaderBuilder, Receipt,
};
pub use error::{Error, Result};
pub use filter::{CompositeFilter, ImageFilter};
pub use image::Image;
pub use request::{DataResponse, ImageRequest};
pub use runner::{Credential, RequestRunner, TransferProgress, UreqRunner};
