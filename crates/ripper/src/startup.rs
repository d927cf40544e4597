//! Preflight checks run before the disc is touched.
//!
//! Verifies that makemkvcon, ffmpeg and ffprobe can be spawned. Only a spawn
//! failure counts as missing; a tool that starts and exits non-zero (makemkvcon
//! prints usage and does so) is present.

use disc_ripper_config::ToolsConfig;
use std::io;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{info, warn};

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("required tools unavailable: {}", .0.join(", "))]
    MissingTools(Vec<String>),
}

/// Result of trying to run one tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolStatus {
    /// Spawned; first line of whatever it printed
    Available(Option<String>),
    /// Could not be spawned
    Missing(String),
}

/// Try to run `program` with `args` and report whether it exists.
pub fn check_tool_available(program: &str, args: &[&str]) -> ToolStatus {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output();

    match output {
        Ok(output) => {
            let text = if output.stdout.is_empty() {
                String::from_utf8_lossy(&output.stderr).into_owned()
            } else {
                String::from_utf8_lossy(&output.stdout).into_owned()
            };
            let first_line = text
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_string);
            ToolStatus::Available(first_line)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            ToolStatus::Missing(format!("{} (not found in PATH)", program))
        }
        Err(e) => ToolStatus::Missing(format!("{} ({})", program, e)),
    }
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles "ffmpeg version 6.1.1 ...", "ffprobe version n7.0-..." and
/// similar banners.
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains(" version "))?;

    let lower = version_line.to_lowercase();
    let version_part = lower
        .split(" version ")
        .nth(1)?
        .split_whitespace()
        .next()?;

    let version_str = version_part.trim_start_matches('n');
    version_str
        .split(|c| c == '.' || c == '-')
        .next()?
        .parse()
        .ok()
}

/// Check every configured tool; all missing ones are reported together.
pub fn run_startup_checks(tools: &ToolsConfig) -> Result<(), StartupError> {
    let checks: [(&str, &[&str]); 3] = [
        (tools.makemkvcon.as_str(), &[]),
        (tools.ffmpeg.as_str(), &["-version"]),
        (tools.ffprobe.as_str(), &["-version"]),
    ];

    let mut missing = Vec::new();
    for (program, args) in checks {
        match check_tool_available(program, args) {
            ToolStatus::Available(banner) => {
                match banner.as_deref().and_then(parse_ffmpeg_version) {
                    Some(major) => info!("Found {} (version {})", program, major),
                    None => info!("Found {}", program),
                }
            }
            ToolStatus::Missing(reason) => {
                warn!("Required tool unavailable: {}", reason);
                missing.push(reason);
            }
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(StartupError::MissingTools(missing))
    }
}
