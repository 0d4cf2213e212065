use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use super::models::MediaType;

/// Extensions the media server indexes as images
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp", "apng"];

/// Extensions the media server indexes as videos
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "ogv", "mov", "avi", "mkv"];

/// Extensions the media server indexes as audio
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "wav", "m4a", "aac", "opus"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("scan directory must not be empty")]
    EmptyPath,
    #[error("directory does not exist: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("directory is not readable: {0}")]
    Unreadable(String),
    #[error("image size limit must be between {min} and {max} MB (got {value})")]
    ImageLimitOutOfRange { value: u32, min: u32, max: u32 },
    #[error("video size limit must be between {min} and {max} MB (got {value})")]
    VideoLimitOutOfRange { value: u32, min: u32, max: u32 },
}

/// What a readable directory looks like from the client side
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySummary {
    pub path: PathBuf,
    pub image_count: usize,
    pub video_count: usize,
    pub audio_count: usize,
}

impl DirectorySummary {
    pub fn total(&self) -> usize {
        self.image_count + self.video_count + self.audio_count
    }
}

/// Classify a file by extension
pub fn media_type_for(path: &Path) -> Option<MediaType> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Video)
    } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Audio)
    } else {
        None
    }
}

/// Checks a scan directory before it is handed to the media server
pub struct DirectoryScanner;

impl DirectoryScanner {
    /// Reject paths the server could never scan, and count what it would find
    pub fn validate<P: AsRef<Path>>(directory: P) -> Result<DirectorySummary, ValidationError> {
        let directory = directory.as_ref();
        let shown = directory.display().to_string();

        if shown.trim().is_empty() {
            return Err(ValidationError::EmptyPath);
        }
        if !directory.exists() {
            return Err(ValidationError::NotFound(shown));
        }
        if !directory.is_dir() {
            return Err(ValidationError::NotADirectory(shown));
        }
        if fs::read_dir(directory).is_err() {
            return Err(ValidationError::Unreadable(shown));
        }

        let mut summary = DirectorySummary {
            path: directory.to_path_buf(),
            ..Default::default()
        };

        for entry in WalkDir::new(directory)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();

            // Skip directories
            if !path.is_file() {
                continue;
            }

            match media_type_for(path) {
                Some(MediaType::Image) => summary.image_count += 1,
                Some(MediaType::Video) => summary.video_count += 1,
                Some(MediaType::Audio) => summary.audio_count += 1,
                None => {}
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_and_missing_paths() {
        assert_eq!(DirectoryScanner::validate(""), Err(ValidationError::EmptyPath));
        let missing = std::env::temp_dir().join("mediadeck-definitely-missing-dir");
        assert!(matches!(
            DirectoryScanner::validate(&missing),
            Err(ValidationError::NotFound(_))
        ));
    }

    #[test]
    fn test_rejects_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.png");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            DirectoryScanner::validate(&file),
            Err(ValidationError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_counts_media_recursively() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("a.PNG"), b"x").unwrap();
        fs::write(dir.path().join("nested/b.webm"), b"x").unwrap();
        fs::write(dir.path().join("nested/c.mp3"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let summary = DirectoryScanner::validate(dir.path()).unwrap();
        assert_eq!(summary.image_count, 1);
        assert_eq!(summary.video_count, 1);
        assert_eq!(summary.audio_count, 1);
        assert_eq!(summary.total(), 3);
    }
}
