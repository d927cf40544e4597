//! ffmpeg stream-copy transcode with `-progress` reporting.

use super::process::{run_streaming, ProcessEvent, RunOptions};
use super::{ToolError, Transcoder};
use crate::probe::{probe_file, select_streams, StreamSelection};
use crate::progress::ProgressMeter;
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Build the ffmpeg command copying `selection` from `source` into `destination`.
///
/// Progress is written as `key=value` lines on stdout.
pub fn build_ffmpeg_command(
    program: &str,
    source: &Path,
    destination: &Path,
    selection: &StreamSelection,
) -> Command {
    let mut cmd = Command::new(program);
    cmd.arg("-hide_banner").arg("-nostdin").arg("-y");
    cmd.arg("-i").arg(source);
    cmd.args(selection.map_args());
    cmd.arg("-progress").arg("pipe:1").arg("-nostats");
    cmd.arg(destination);
    cmd
}

/// Accumulates ffmpeg's `-progress` output.
#[derive(Debug, Clone, Default)]
pub struct FfmpegProgress {
    duration_secs: f64,
    out_time_secs: f64,
    speed: Option<String>,
    ended: bool,
}

impl FfmpegProgress {
    pub fn new(duration_secs: f64) -> Self {
        Self {
            duration_secs: if duration_secs.is_finite() {
                duration_secs.max(0.0)
            } else {
                0.0
            },
            ..Self::default()
        }
    }

    /// Feed one line; returns whether anything changed.
    pub fn feed(&mut self, line: &str) -> bool {
        let Some((key, value)) = line.trim().split_once('=') else {
            return false;
        };
        let value = value.trim();
        match key {
            // both keys carry microseconds
            "out_time_us" | "out_time_ms" => match value.parse::<i64>() {
                Ok(us) if us >= 0 => {
                    self.out_time_secs = us as f64 / 1_000_000.0;
                    true
                }
                _ => false,
            },
            "speed" if value != "N/A" => {
                self.speed = Some(value.to_string());
                true
            }
            "progress" => {
                self.ended = value == "end";
                self.ended
            }
            _ => false,
        }
    }

    pub fn fraction(&self) -> Option<f64> {
        if self.ended {
            Some(1.0)
        } else if self.duration_secs > 0.0 {
            Some((self.out_time_secs / self.duration_secs).clamp(0.0, 1.0))
        } else {
            None
        }
    }

    pub fn speed(&self) -> Option<&str> {
        self.speed.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.ended
    }
}

/// [`Transcoder`] that probes the source and stream-copies the chosen streams.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: String,
    ffprobe: String,
    include_english_subtitles: bool,
}

impl FfmpegTranscoder {
    pub fn new(
        ffmpeg: impl Into<String>,
        ffprobe: impl Into<String>,
        include_english_subtitles: bool,
    ) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            include_english_subtitles,
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        source: &Path,
        destination: &Path,
        meter: &ProgressMeter,
        abort: &CancellationToken,
    ) -> Result<(), ToolError> {
        let probe = probe_file(&self.ffprobe, source).await?;
        let selection = select_streams(&probe, self.include_english_subtitles);
        if selection.video.is_none() && selection.audio.is_empty() {
            return Err(ToolError::NoStreams(source.to_path_buf()));
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        meter.reset(format!("Transcoding {}", name));
        info!(
            "Transcoding {} -> {} (video {:?}, audio {:?}, subtitles {:?})",
            source.display(),
            destination.display(),
            selection.video,
            selection.audio,
            selection.subtitles
        );

        let cmd = build_ffmpeg_command(&self.ffmpeg, source, destination, &selection);
        let mut progress = FfmpegProgress::new(probe.format.duration_secs);

        run_streaming(cmd, abort, RunOptions::default(), |event| match event {
            ProcessEvent::Stdout(line) => {
                if progress.feed(line) {
                    if let Some(fraction) = progress.fraction() {
                        meter.set_fraction(fraction);
                    }
                    if let Some(speed) = progress.speed() {
                        meter.set_description(format!("Transcoding {} ({})", name, speed));
                    }
                }
            }
            ProcessEvent::Stderr(line) => {
                let line = line.trim();
                if !line.is_empty() {
                    warn!("ffmpeg: {}", line);
                    meter.log(line);
                }
            }
            ProcessEvent::Tick => {}
        })
        .await?;

        meter.complete();
        Ok(())
    }
}
