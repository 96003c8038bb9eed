//! HTTP request handlers organized by functionality

pub mod catalog;
pub mod chunks;
pub mod download;
pub mod error;

pub use catalog::{PageQuery, list_videos, video_detail};
pub use chunks::{extract_range_header, video_chunks};
pub use download::{download_video, video_status};
pub use error::ApiError;
