//! Sidecar caption files: `<image stem>.<ext>` next to (or alongside) an image.

use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// Normalize a user-supplied extension (`.b2cap` and `b2cap` are equivalent).
pub fn normalize_extension(ext: &str) -> &str {
    ext.trim_start_matches('.')
}

/// Sidecar path in the image's own directory.
pub fn sidecar_path(image: &Path, ext: &str) -> PathBuf {
    let dir = image.parent().unwrap_or_else(|| Path::new(""));
    sidecar_path_in(dir, image, ext)
}

/// Sidecar path in an explicit output directory.
pub fn sidecar_path_in(dir: &Path, image: &Path, ext: &str) -> PathBuf {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.join(format!("{stem}.{}", normalize_extension(ext)))
}

/// Write (or overwrite) a sidecar file.
pub fn write_sidecar(path: &Path, text: &str) -> Result<(), PipelineError> {
    std::fs::write(path, text).map_err(|source| PipelineError::Sidecar {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a sidecar file verbatim.
///
/// Returns `Ok(None)` when the file does not exist; any other read failure is
/// an error.
pub fn read_sidecar(path: &Path) -> Result<Option<String>, PipelineError> {
    if !path.is_file() {
        return Ok(None);
    }
    std::fs::read_to_string(path)
        .map(Some)
        .map_err(|source| PipelineError::Sidecar {
            path: path.to_path_buf(),
            source,
        })
}
