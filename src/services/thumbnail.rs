//! Thumbnail service boundary
//!
//! The image pipeline is an external collaborator with one capability:
//! given an image URL and the owning article id, produce a stable public
//! URL or fail. Downloads must go through the shared throttled fetcher so
//! the source host sees the same pacing as the scraper.

use async_trait::async_trait;

#[async_trait]
pub trait ThumbnailService: Send + Sync {
    /// Returns the public URL for the processed image.
    async fn process_image(&self, image_url: &str, article_id: i64) -> anyhow::Result<String>;
}

/// Pass-through implementation for development: records the original URL
/// as the public one without fetching or re-encoding anything.
pub struct NoopThumbnailService;

#[async_trait]
impl ThumbnailService for NoopThumbnailService {
    async fn process_image(&self, image_url: &str, _article_id: i64) -> anyhow::Result<String> {
        Ok(image_url.to_string())
    }
}
