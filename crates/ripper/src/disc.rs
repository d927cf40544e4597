//! Disc and title data model produced by a disc scan.

use crate::classify::{Classification, ContentType};
use serde::{Deserialize, Serialize};

/// Coarse physical-media category reported by the extraction tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscType {
    Dvd,
    Bd,
    Uhd,
    #[default]
    Unknown,
}

impl DiscType {
    /// Map the tool's free-text disc type ("Blu-ray disc", "DVD disc", ...) to a category.
    pub fn from_label(label: &str) -> Self {
        let lower = label.to_lowercase();
        if lower.contains("uhd") || lower.contains("ultra hd") {
            DiscType::Uhd
        } else if lower.contains("blu-ray") || lower.contains("bluray") {
            DiscType::Bd
        } else if lower.contains("dvd") {
            DiscType::Dvd
        } else {
            DiscType::Unknown
        }
    }
}

impl std::fmt::Display for DiscType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscType::Dvd => write!(f, "dvd"),
            DiscType::Bd => write!(f, "bd"),
            DiscType::Uhd => write!(f, "uhd"),
            DiscType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Kind of an elementary stream inside a title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Other,
}

impl StreamKind {
    pub fn from_label(label: &str) -> Self {
        let lower = label.to_lowercase();
        if lower.contains("video") {
            StreamKind::Video
        } else if lower.contains("audio") {
            StreamKind::Audio
        } else if lower.contains("subtitle") {
            StreamKind::Subtitle
        } else {
            StreamKind::Other
        }
    }
}

/// A stream as announced by the scan (not the probed file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: u32,
    pub kind: StreamKind,
    pub language: Option<String>,
}

/// One selectable title exposed by the disc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleInfo {
    pub id: u32,
    pub duration_seconds: u64,
    pub reported_size_bytes: Option<u64>,
    pub name: Option<String>,
    pub chapter_count: Option<u32>,
    /// File name the extraction tool will write for this title
    pub output_file_name: Option<String>,
    pub streams: Vec<StreamInfo>,
}

impl TitleInfo {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            duration_seconds: 0,
            reported_size_bytes: None,
            name: None,
            chapter_count: None,
            output_file_name: None,
            streams: Vec::new(),
        }
    }

    pub fn with_duration(id: u32, duration_seconds: u64) -> Self {
        Self {
            duration_seconds,
            ..Self::new(id)
        }
    }

    /// Human-readable label used in logs and progress captions.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => format!("title {} ({})", self.id, name),
            _ => format!("title {}", self.id),
        }
    }
}

/// Result of scanning a disc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DiscInfo {
    pub disc_name: String,
    pub disc_type: DiscType,
    pub titles: Vec<TitleInfo>,
    /// `None` when the classifier was not confident about any content type
    pub detected_content_type: Option<ContentType>,
    pub detection_confidence: f64,
}

impl DiscInfo {
    pub fn title(&self, id: u32) -> Option<&TitleInfo> {
        self.titles.iter().find(|t| t.id == id)
    }

    pub fn durations(&self) -> Vec<u64> {
        self.titles.iter().map(|t| t.duration_seconds).collect()
    }

    /// Record a classification; the leaning is only kept when it clears `threshold`.
    pub fn apply_classification(&mut self, classification: &Classification, threshold: f64) {
        self.detection_confidence = classification.confidence;
        self.detected_content_type = classification.decided(threshold);
    }
}
