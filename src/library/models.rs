// Catalog data models
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Audio,
}

impl MediaType {
    /// Video and audio have a timeline; images are shown, not played.
    pub fn is_playable(self) -> bool {
        matches!(self, MediaType::Video | MediaType::Audio)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
        };
        f.write_str(name)
    }
}

/// Which part of the catalog the playlist is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFilter {
    #[default]
    All,
    Image,
    Video,
}

impl MediaFilter {
    pub fn as_query(self) -> &'static str {
        match self {
            MediaFilter::All => "all",
            MediaFilter::Image => "image",
            MediaFilter::Video => "video",
        }
    }
}

/// One catalog entry as served by `GET /media`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    #[serde(alias = "rel_path")]
    pub relative_path: String,
    #[serde(alias = "name", default)]
    pub display_name: String,
    #[serde(alias = "type")]
    pub media_type: MediaType,
    #[serde(alias = "size", default)]
    pub size_bytes: u64,
}

impl MediaItem {
    pub fn new(relative_path: &str, media_type: MediaType, size_bytes: u64) -> Self {
        let display_name = relative_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(relative_path)
            .to_string();
        Self {
            relative_path: relative_path.to_string(),
            display_name,
            media_type,
            size_bytes,
        }
    }

    /// Absolute URL of the binary file behind this entry.
    pub fn file_url(&self, service_url: &str) -> String {
        format!(
            "{}/file/{}",
            service_url.trim_end_matches('/'),
            urlencoding::encode(&self.relative_path)
        )
    }
}
