use std::path::Path;

use anyhow::Result;

/// A service for working with the file system.
pub trait FsService: Sync + Send {
    /// Determine whether the given file path points to a file.
    ///
    /// # Arguments
    ///
    /// * `path` - Filesystem path to check.
    ///
    /// # Returns
    ///
    /// true if there is a file at the given path.
    fn file_exists(&self, path: &str) -> bool;

    /// Write the given contents to a file, creating any missing parent directories.
    ///
    /// # Arguments
    ///
    /// * `path` - Path of file to write.
    /// * `contents` - Contents to write to the file.
    fn write_file(&self, path: &Path, contents: &str) -> Result<()>;
}

pub struct FsServiceImpl {}

/// Implementation of FsService.
impl FsServiceImpl {
    /// Create a new instance of FsServiceImpl.
    pub fn new() -> Self {
        Self {}
    }
}

impl FsService for FsServiceImpl {
    fn file_exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    #[test]
    fn test_write_file_should_create_missing_directories() {
        let tmp_dir = TempDir::new("fs_service").unwrap();
        let path = tmp_dir.path().join("nested").join("config.json");
        let fs_service = FsServiceImpl::new();

        fs_service.write_file(&path, "{}").unwrap();

        assert!(fs_service.file_exists(path.to_str().unwrap()));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }
}
