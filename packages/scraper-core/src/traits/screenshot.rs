//! Screenshot capture.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

/// Captures a page screenshot into `output_dir`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Screenshotter: Send + Sync {
    /// Path of the written image, or `None` if capture failed or is unsupported.
    async fn capture(&self, url: &str, output_dir: &Path) -> Option<PathBuf>;
}

/// Screenshotter that never captures anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopScreenshotter;

#[async_trait]
impl Screenshotter for NoopScreenshotter {
    async fn capture(&self, _url: &str, _output_dir: &Path) -> Option<PathBuf> {
        None
    }
}
