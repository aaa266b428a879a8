//! # Storage Module
//!
//! Finds image files on disk.
//!
//! ## Plain English
//!
//! `add_folder` hands us a directory. This module:
//! 1. Checks the directory really exists
//! 2. Lists the files directly inside it (no sub-folders)
//! 3. Keeps the ones whose extension looks like an image
//! 4. Returns them in a stable (sorted) order

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{LoaderResult, PathErrorKind};

// ============================================
// EXTENSION MATCHING
// ============================================

/// Returns true if `path` ends in one of `extensions` (case-insensitive).
///
/// `extensions` are expected lowercase and without the leading dot.
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            extensions.iter().any(|accepted| *accepted == e)
        })
        .unwrap_or(false)
}

// ============================================
// FOLDER SCANNING
// ============================================

/// Lists the image files directly inside `dir`, sorted by path.
pub fn scan_image_folder(dir: &Path, extensions: &[String]) -> LoaderResult<Vec<PathBuf>> {
    if !dir.exists() {
        return Err(PathErrorKind::PathNotFound(dir.to_path_buf()).into());
    }
    if !dir.is_dir() {
        return Err(PathErrorKind::NotADirectory(dir.to_path_buf()).into());
    }

    let mut images = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if entry.file_type()?.is_dir() {
            continue;
        }
        if has_extension(&path, extensions) {
            images.push(path);
        }
    }

    images.sort();
    log::debug!("Found {} images in {:?}", images.len(), dir);
    Ok(images)
}

/// Checks that `path` is an existing regular file with the given extension.
pub fn require_file_with_extension(path: &Path, extension: &str) -> LoaderResult<()> {
    if !path.exists() {
        return Err(PathErrorKind::PathNotFound(path.to_path_buf()).into());
    }
    if !path.is_file() {
        return Err(PathErrorKind::NotAFile(path.to_path_buf()).into());
    }
    if !has_extension(path, &[extension.to_string()]) {
        return Err(PathErrorKind::UnsupportedExtension {
            path: path.to_path_buf(),
            extension: path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
        .into());
    }
    Ok(())
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_EXTENSIONS;
    use crate::error::LoaderError;
    use tempfile::tempdir;

    fn defaults() -> Vec<String> {
        DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_extension_matching() {
        let exts = defaults();
        assert!(has_extension(Path::new("a/b.JPG"), &exts));
        assert!(has_extension(Path::new("b.webp"), &exts));
        assert!(has_extension(Path::new("b.TiFf"), &exts));
        assert!(!has_extension(Path::new("b.gif"), &exts));
        assert!(!has_extension(Path::new("README"), &exts));
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = tempdir().unwrap();
        for name in ["c.png", "a.JPEG", "notes.txt", "b.bmp"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        // Sub-folders are not descended into
        fs::create_dir(dir.path().join("nested.png")).unwrap();
        fs::write(dir.path().join("nested.png").join("d.png"), b"x").unwrap();

        let found = scan_image_folder(dir.path(), &defaults()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.JPEG", "b.bmp", "c.png"]);
    }

    #[test]
    fn test_scan_missing_folder() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("gone");
        let err = scan_image_folder(&missing, &defaults()).unwrap_err();
        assert!(matches!(
            err,
            LoaderError::Path(PathErrorKind::PathNotFound(_))
        ));
    }

    #[test]
    fn test_scan_file_is_not_a_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.png");
        fs::write(&file, b"x").unwrap();
        let err = scan_image_folder(&file, &defaults()).unwrap_err();
        assert!(matches!(
            err,
            LoaderError::Path(PathErrorKind::NotADirectory(_))
        ));
    }

    #[test]
    fn test_require_csv() {
        let dir = tempdir().unwrap();
        let csv = dir.path().join("labels.CSV");
        let json = dir.path().join("labels.json");
        fs::write(&csv, b"a,b").unwrap();
        fs::write(&json, b"{}").unwrap();

        assert!(require_file_with_extension(&csv, "csv").is_ok());
        assert!(matches!(
            require_file_with_extension(&json, "csv"),
            Err(LoaderError::Path(PathErrorKind::UnsupportedExtension { .. }))
        ));
        assert!(matches!(
            require_file_with_extension(dir.path(), "csv"),
            Err(LoaderError::Path(PathErrorKind::NotAFile(_)))
        ));
    }
}
