use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use super::{ImageId, ImageSource};
use crate::error::SourceError;

/// Image source backed by the local filesystem.
///
/// Accepts `file://` URIs and plain paths. Relative paths are resolved against
/// the optional root directory.
#[derive(Debug, Clone, Default)]
pub struct FsImageSource {
    root: Option<PathBuf>,
}

impl FsImageSource {
    /// Source resolving relative identifiers against the working directory.
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Source resolving relative identifiers against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// Map an identifier to a filesystem path.
    pub fn resolve(&self, id: &ImageId) -> PathBuf {
        if let Ok(url) = Url::parse(id.as_str()) {
            if url.scheme() == "file" {
                if let Ok(path) = url.to_file_path() {
                    return path;
                }
            }
        }

        let path = Path::new(id.as_str());
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[async_trait]
impl ImageSource for FsImageSource {
    async fn read(&self, id: &ImageId) -> Result<Bytes, SourceError> {
        let path = self.resolve(id);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(SourceError::NotFound(id.to_string())),
            Err(e) => Err(SourceError::Io {
                id: id.to_string(),
                message: e.to_string(),
            }),
        }
    }
}
