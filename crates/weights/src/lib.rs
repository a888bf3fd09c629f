//! Model weight fetching ahead of first use.

pub mod downloader;

pub use downloader::{checkpoint_url, WeightsDownloader, WeightsError};
