//! Artifact file storage.
//!
//! Every derived artifact lives under one storage root, partitioned into
//! fixed buckets by kind. The partition is organizational only; nothing
//! semantic hangs off it. Database rows store web-servable paths
//! (`/uploads/pages/{name}.jpg`) which this module maps back to filesystem
//! paths.

use crate::error::{AppError, Result};
use std::path::{Path, PathBuf};

/// URL prefix under which artifacts are served.
pub const WEB_PREFIX: &str = "/uploads";

/// Artifact kind, one directory per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    /// Uploaded source documents.
    Papers,
    /// Rasterized page images.
    Pages,
    /// Edition thumbnails.
    Thumbnails,
    /// Cropped share images.
    Crops,
}

impl Bucket {
    /// Directory name for this bucket.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Bucket::Papers => "papers",
            Bucket::Pages => "pages",
            Bucket::Thumbnails => "thumbnails",
            Bucket::Crops => "crops",
        }
    }

    /// Parse a directory name.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        match name {
            "papers" => Some(Bucket::Papers),
            "pages" => Some(Bucket::Pages),
            "thumbnails" => Some(Bucket::Thumbnails),
            "crops" => Some(Bucket::Crops),
            _ => None,
        }
    }
}

/// Filesystem layout for uploaded and derived artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create all bucket directories.
    pub fn ensure_dirs(&self) -> Result<()> {
        for bucket in [Bucket::Papers, Bucket::Pages, Bucket::Thumbnails, Bucket::Crops] {
            std::fs::create_dir_all(self.root.join(bucket.dir_name()))?;
        }
        Ok(())
    }

    /// Filesystem path for a named artifact.
    pub fn fs_path(&self, bucket: Bucket, name: &str) -> PathBuf {
        self.root.join(bucket.dir_name()).join(name)
    }

    /// Web-servable path stored in the database.
    pub fn web_path(&self, bucket: Bucket, name: &str) -> String {
        format!("{}/{}/{}", WEB_PREFIX, bucket.dir_name(), name)
    }

    /// Map a stored web path back to a filesystem path. Rejects anything
    /// outside the bucket layout, including traversal attempts.
    pub fn resolve_web_path(&self, web_path: &str) -> Result<PathBuf> {
        let rest = web_path
            .strip_prefix(WEB_PREFIX)
            .and_then(|p| p.strip_prefix('/'))
            .ok_or_else(|| AppError::Validation(format!("Not an upload path: {}", web_path)))?;

        let (dir, name) = rest
            .split_once('/')
            .ok_or_else(|| AppError::Validation(format!("Malformed upload path: {}", web_path)))?;

        let bucket = Bucket::from_dir_name(dir)
            .ok_or_else(|| AppError::Validation(format!("Unknown bucket: {}", dir)))?;

        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(AppError::Validation(format!(
                "Invalid artifact name: {}",
                name
            )));
        }

        Ok(self.fs_path(bucket, name))
    }

    /// Delete a file if it exists. A missing file is not an error.
    pub fn remove_if_exists(&self, path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Delete the file behind a stored web path, ignoring paths that do not
    /// resolve (rows can outlive renamed storage roots).
    pub fn remove_web_path(&self, web_path: &str) {
        if let Ok(path) = self.resolve_web_path(web_path)
            && let Err(e) = self.remove_if_exists(&path)
        {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove artifact");
        }
    }

    /// Sanitize an uploaded filename for use in a source artifact name.
    pub fn sanitize_filename(name: &str) -> String {
        name.chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn web_path_round_trip() {
        let store = ArtifactStore::new("/data/uploads");
        let web = store.web_path(Bucket::Pages, "abc-1.jpg");
        assert_eq!(web, "/uploads/pages/abc-1.jpg");

        let fs = store.resolve_web_path(&web).unwrap();
        assert_eq!(fs, PathBuf::from("/data/uploads/pages/abc-1.jpg"));
    }

    #[test]
    fn resolve_rejects_traversal() {
        let store = ArtifactStore::new("/data/uploads");
        assert!(store.resolve_web_path("/uploads/pages/../secret").is_err());
        assert!(store.resolve_web_path("/uploads/pages/a/b.jpg").is_err());
        assert!(store.resolve_web_path("/uploads/unknown/a.jpg").is_err());
        assert!(store.resolve_web_path("/etc/passwd").is_err());
    }

    #[test]
    fn remove_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.ensure_dirs().unwrap();

        let path = store.fs_path(Bucket::Crops, "missing.jpg");
        assert!(store.remove_if_exists(&path).is_ok());
    }

    #[test]
    fn sanitize_filename_strips_separators() {
        assert_eq!(
            ArtifactStore::sanitize_filename("../etc/pass wd.pdf"),
            ".._etc_pass_wd.pdf"
        );
        assert_eq!(
            ArtifactStore::sanitize_filename("edition-2024.pdf"),
            "edition-2024.pdf"
        );
    }
}
