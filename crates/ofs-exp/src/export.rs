use std::fs;
use std::path::{Path, PathBuf};

use ofs_core::errors::{ErrorInfo, OfsError};
use tracing::info;

/// Writes `contents` to `dir/file_name`, creating `dir` first.
pub fn write_export(dir: &Path, file_name: &str, contents: &str) -> Result<PathBuf, OfsError> {
    fs::create_dir_all(dir).map_err(|err| {
        OfsError::Export(ErrorInfo::new("export-dir", err.to_string()).with_path("dir", dir))
    })?;
    let path = dir.join(file_name);
    fs::write(&path, contents).map_err(|err| {
        OfsError::Export(ErrorInfo::new("export-write", err.to_string()).with_path("path", &path))
    })?;
    info!(path = %path.display(), bytes = contents.len(), "export written");
    Ok(path)
}
