//! External tool drivers: makemkvcon for scanning and extraction, ffmpeg for
//! the stream-copy transcode.
//!
//! The pipeline only sees the [`Extractor`] and [`Transcoder`] traits, so the
//! real tools can be swapped for fakes in tests.

pub mod ffmpeg;
pub mod makemkv;
pub mod process;

use crate::disc::{DiscInfo, TitleInfo};
use crate::probe::ProbeError;
use crate::progress::ProgressMeter;
use crate::protocol::TrackPosition;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use ffmpeg::{build_ffmpeg_command, FfmpegProgress, FfmpegTranscoder};
pub use makemkv::{
    build_rip_command, build_scan_command, locate_extracted_file, scan_disc, MakeMkvExtractor,
    MakeMkvScanner,
};
pub use process::{run_streaming, ProcessEvent, RunOptions};

/// Error type for external tool invocations
#[derive(Debug, Error)]
pub enum ToolError {
    /// Binary could not be found
    #[error("{0} not found; is it installed and in PATH?")]
    NotFound(String),

    /// Process exited with non-zero status
    #[error("{program} failed with exit code: {code}")]
    Failed { program: String, code: i32 },

    /// Process was terminated by signal
    #[error("{0} was terminated by signal")]
    Terminated(String),

    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    /// Stopped by cancellation before finishing
    #[error("{0} cancelled")]
    Cancelled(String),

    #[error("disc scan found no titles")]
    NoTitles,

    #[error("no extracted file found for title {0}")]
    OutputMissing(u32),

    #[error("no usable streams in {0}")]
    NoStreams(PathBuf),

    #[error("probe failed: {0}")]
    Probe(#[from] ProbeError),

    /// IO error while driving the tool
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ToolError::Cancelled(_))
    }
}

/// Reads the disc's title list.
#[async_trait]
pub trait DiscScanner: Send + Sync {
    async fn scan(&self, cancel: &CancellationToken) -> Result<DiscInfo, ToolError>;
}

/// One title to pull off the disc.
#[derive(Debug, Clone)]
pub struct ExtractJob {
    pub title: TitleInfo,
    pub track: TrackPosition,
    /// Largest extracted file seen so far this run, for growth-based estimates
    pub reference_size: Option<u64>,
}

/// Pulls one title off the disc into the temp directory.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract `job.title`, driving `meter` from 0 to full scale.
    ///
    /// Returns the path of the extracted file.
    async fn extract(
        &self,
        job: &ExtractJob,
        meter: &ProgressMeter,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, ToolError>;
}

/// Turns an extracted file into the final output file.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// `abort` kills a running transcode; plain cancellation lets it finish.
    async fn transcode(
        &self,
        source: &Path,
        destination: &Path,
        meter: &ProgressMeter,
        abort: &CancellationToken,
    ) -> Result<(), ToolError>;
}
