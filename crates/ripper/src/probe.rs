//! Stream inspection with ffprobe and the stream-copy selection built on it.
//!
//! The transcode stage keeps the highest-resolution video stream, English (or
//! untagged) stereo and surround audio, and optionally English subtitles.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe command failed to execute.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// IO error during probe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecType {
    Video,
    Audio,
    Subtitle,
    Other,
}

impl CodecType {
    fn from_ffprobe(codec_type: &str) -> Self {
        match codec_type {
            "video" => CodecType::Video,
            "audio" => CodecType::Audio,
            "subtitle" => CodecType::Subtitle,
            _ => CodecType::Other,
        }
    }
}

/// One stream as reported by ffprobe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbedStream {
    /// Absolute stream index inside the container (used with `-map 0:<index>`).
    pub index: u32,
    pub codec_type: CodecType,
    pub codec_name: String,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// `tags.language`, if tagged
    pub language: Option<String>,
}

impl ProbedStream {
    fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    fn is_english(&self) -> bool {
        matches!(self.language.as_deref(), Some("eng") | Some("en"))
    }

    fn is_english_or_untagged(&self) -> bool {
        match self.language.as_deref() {
            None | Some("") => true,
            _ => self.is_english(),
        }
    }
}

/// Format information from ffprobe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormatInfo {
    /// Duration in seconds.
    pub duration_secs: f64,
    /// File size in bytes.
    pub size_bytes: u64,
}

/// Result of probing a media file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeResult {
    pub streams: Vec<ProbedStream>,
    pub format: FormatInfo,
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub index: Option<u32>,
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub channels: Option<u32>,
        pub tags: Option<HashMap<String, String>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
        pub size: Option<String>,
    }
}

/// Probes a media file.
///
/// Runs `<ffprobe> -v quiet -print_format json -show_streams -show_format <path>`
/// and parses the JSON output.
pub async fn probe_file(ffprobe: &str, path: &Path) -> Result<ProbeResult, ProbeError> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::FfprobeFailed(format!(
            "ffprobe exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_ffprobe_output(&stdout)
}

/// Parses ffprobe JSON output into a ProbeResult.
pub fn parse_ffprobe_output(json_str: &str) -> Result<ProbeResult, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let format = ffprobe.format.ok_or_else(|| {
        ProbeError::ParseError("Missing format information in ffprobe output".to_string())
    })?;

    let streams = ffprobe
        .streams
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(position, stream)| {
            let language = stream
                .tags
                .as_ref()
                .and_then(|tags| tags.get("language"))
                .map(|lang| lang.trim().to_lowercase())
                .filter(|lang| !lang.is_empty());
            ProbedStream {
                index: stream.index.unwrap_or(position as u32),
                codec_type: CodecType::from_ffprobe(stream.codec_type.as_deref().unwrap_or("")),
                codec_name: stream.codec_name.unwrap_or_default(),
                width: stream.width.unwrap_or(0),
                height: stream.height.unwrap_or(0),
                channels: stream.channels.unwrap_or(0),
                language,
            }
        })
        .collect();

    let duration_secs = format
        .duration
        .as_ref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);
    let size_bytes = format
        .size
        .as_ref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    Ok(ProbeResult {
        streams,
        format: FormatInfo {
            duration_secs,
            size_bytes,
        },
    })
}

/// Streams chosen for stream-copy, by container index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSelection {
    pub video: Option<u32>,
    pub audio: Vec<u32>,
    pub subtitles: Vec<u32>,
}

impl StreamSelection {
    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.audio.is_empty() && self.subtitles.is_empty()
    }

    /// `-map`/`-c` arguments copying every selected stream.
    pub fn map_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(video) = self.video {
            args.extend(["-map".to_string(), format!("0:{}", video)]);
            args.extend(["-c:v".to_string(), "copy".to_string()]);
        }
        for (n, audio) in self.audio.iter().enumerate() {
            args.extend(["-map".to_string(), format!("0:{}", audio)]);
            args.extend([format!("-c:a:{}", n), "copy".to_string()]);
        }
        for (n, subtitle) in self.subtitles.iter().enumerate() {
            args.extend(["-map".to_string(), format!("0:{}", subtitle)]);
            args.extend([format!("-c:s:{}", n), "copy".to_string()]);
        }
        args
    }
}

/// Picks the streams to keep from a probed file.
pub fn select_streams(probe: &ProbeResult, include_english_subtitles: bool) -> StreamSelection {
    // first stream wins on equal resolution
    let video = probe
        .streams
        .iter()
        .filter(|s| s.codec_type == CodecType::Video)
        .fold(None::<&ProbedStream>, |best, s| match best {
            Some(b) if b.pixel_count() >= s.pixel_count() => Some(b),
            _ => Some(s),
        })
        .map(|s| s.index);

    let audio = probe
        .streams
        .iter()
        .filter(|s| s.codec_type == CodecType::Audio)
        .filter(|s| s.is_english_or_untagged())
        .filter(|s| s.channels == 2 || s.channels >= 6)
        .map(|s| s.index)
        .collect();

    let subtitles = if include_english_subtitles {
        probe
            .streams
            .iter()
            .filter(|s| s.codec_type == CodecType::Subtitle && s.is_english())
            .map(|s| s.index)
            .collect()
    } else {
        Vec::new()
    };

    StreamSelection {
        video,
        audio,
        subtitles,
    }
}
