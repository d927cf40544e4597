//! makemkvcon driver: disc scan and single-title extraction.

use super::process::{run_streaming, ProcessEvent, RunOptions};
use super::{DiscScanner, ExtractJob, Extractor, ToolError};
use crate::disc::{DiscInfo, TitleInfo};
use crate::progress::{ProgressMeter, TitleProgressEstimator};
use crate::protocol::{DiscScan, ProtocolEvent, ProtocolInterpreter, RawLog};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::fs;
use tokio::process::Command;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Build `makemkvcon -r info <device>`.
pub fn build_scan_command(program: &str, device: &str) -> Command {
    let mut cmd = Command::new(program);
    cmd.arg("-r").arg("info").arg(device);
    cmd
}

/// Build `makemkvcon -r --progress=-same mkv <device> <title> <dir>`.
pub fn build_rip_command(program: &str, device: &str, title_id: u32, output_dir: &Path) -> Command {
    let mut cmd = Command::new(program);
    cmd.arg("-r")
        .arg("--progress=-same")
        .arg("mkv")
        .arg(device)
        .arg(title_id.to_string())
        .arg(output_dir);
    cmd
}

/// Scan the disc and return what it holds.
///
/// Fails on a non-zero exit, a timeout, or a scan that lists no titles.
pub async fn scan_disc(
    program: &str,
    device: &str,
    timeout: Duration,
    raw_log: RawLog,
    cancel: &CancellationToken,
) -> Result<DiscInfo, ToolError> {
    let mut interpreter = ProtocolInterpreter::new().with_raw_log(raw_log);
    let mut scan = DiscScan::new();
    let options = RunOptions {
        timeout: Some(timeout),
        tick: None,
    };

    run_streaming(build_scan_command(program, device), cancel, options, |event| {
        if let ProcessEvent::Stdout(line) | ProcessEvent::Stderr(line) = event {
            if let Some(event) = interpreter.interpret(line) {
                if let ProtocolEvent::Message { text, .. } = &event {
                    debug!("makemkvcon: {}", text);
                }
                scan.apply(&event);
            }
        }
    })
    .await?;

    let disc = scan.finish();
    if disc.titles.is_empty() {
        return Err(ToolError::NoTitles);
    }
    info!(
        "Found {} titles on {} disc '{}'",
        disc.titles.len(),
        disc.disc_type,
        disc.disc_name
    );
    Ok(disc)
}

/// [`DiscScanner`] backed by `makemkvcon info`.
#[derive(Debug, Clone)]
pub struct MakeMkvScanner {
    program: String,
    device: String,
    timeout: Duration,
    raw_log: Option<PathBuf>,
}

impl MakeMkvScanner {
    pub fn new(program: impl Into<String>, device: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            device: device.into(),
            timeout,
            raw_log: None,
        }
    }

    pub fn with_raw_log(mut self, path: PathBuf) -> Self {
        self.raw_log = Some(path);
        self
    }
}

#[async_trait]
impl DiscScanner for MakeMkvScanner {
    async fn scan(&self, cancel: &CancellationToken) -> Result<DiscInfo, ToolError> {
        info!("Scanning disc at {}...", self.device);
        let raw_log = self
            .raw_log
            .as_deref()
            .map(RawLog::open)
            .unwrap_or_else(RawLog::disabled);
        scan_disc(&self.program, &self.device, self.timeout, raw_log, cancel).await
    }
}

pub(crate) fn is_mkv(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("mkv"))
}

/// Regular `.mkv` files directly inside `dir`.
pub async fn list_mkv_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && is_mkv(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.ends_with(suffix))
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map_or(false, |m| m.is_file())
}

/// Find the file makemkvcon wrote for `title`.
///
/// Tries the announced output name, then a `*_tNN.mkv` name (new files
/// first), then the newest `.mkv` that wasn't in `before`.
pub async fn locate_extracted_file(
    dir: &Path,
    title: &TitleInfo,
    before: &HashSet<PathBuf>,
) -> std::io::Result<Option<PathBuf>> {
    if let Some(name) = title.output_file_name.as_deref() {
        let path = dir.join(name);
        if is_file(&path).await {
            return Ok(Some(path));
        }
    }

    let files = list_mkv_files(dir).await?;
    let suffix = format!("_t{:02}.mkv", title.id);
    let (fresh, stale): (Vec<&PathBuf>, Vec<&PathBuf>) =
        files.iter().partition(|p| !before.contains(*p));
    if let Some(path) = fresh
        .iter()
        .chain(stale.iter())
        .find(|p| has_suffix(p, &suffix))
    {
        return Ok(Some(path.to_path_buf()));
    }

    let mut newest: Option<(SystemTime, &PathBuf)> = None;
    for path in fresh {
        let time = fs::metadata(path).await?.modified()?;
        if newest.map_or(true, |(best, _)| time > best) {
            newest = Some((time, path));
        }
    }
    Ok(newest.map(|(_, path)| path.clone()))
}

/// Size of the file being written, for growth estimates. Errors read as "unknown".
async fn polled_output_size(
    dir: &Path,
    announced: Option<&str>,
    before: &HashSet<PathBuf>,
) -> Option<u64> {
    if let Some(name) = announced {
        if let Ok(meta) = fs::metadata(dir.join(name)).await {
            return Some(meta.len());
        }
    }
    let mut largest = None;
    for path in list_mkv_files(dir).await.ok()? {
        if before.contains(&path) {
            continue;
        }
        if let Ok(meta) = fs::metadata(&path).await {
            largest = largest.max(Some(meta.len()));
        }
    }
    largest
}

const SIZE_UNKNOWN: u64 = u64::MAX;

/// Poll the output size every `period` until `stop` fires.
///
/// The returned cell holds the latest size, or `SIZE_UNKNOWN`.
fn spawn_size_poller(
    dir: PathBuf,
    announced: Option<String>,
    before: HashSet<PathBuf>,
    period: Duration,
    stop: CancellationToken,
) -> Arc<AtomicU64> {
    let latest = Arc::new(AtomicU64::new(SIZE_UNKNOWN));
    let cell = Arc::clone(&latest);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {
                    if let Some(size) = polled_output_size(&dir, announced.as_deref(), &before).await {
                        cell.store(size, Ordering::Relaxed);
                    }
                }
            }
        }
    });
    latest
}

/// Remove `.mkv` files that appeared in `dir` during a failed extraction, so
/// a later run can't mistake them for finished titles.
async fn discard_partial_output(dir: &Path, before: &HashSet<PathBuf>) {
    let files = match list_mkv_files(dir).await {
        Ok(files) => files,
        Err(e) => {
            warn!("Could not list {} to clean up: {}", dir.display(), e);
            return;
        }
    };
    for path in files.into_iter().filter(|p| !before.contains(p)) {
        match fs::remove_file(&path).await {
            Ok(()) => info!("Removed partial extraction {}", path.display()),
            Err(e) => warn!("Failed to remove partial extraction {}: {}", path.display(), e),
        }
    }
}

/// [`Extractor`] backed by makemkvcon.
#[derive(Debug, Clone)]
pub struct MakeMkvExtractor {
    program: String,
    device: String,
    output_dir: PathBuf,
    raw_log: Option<PathBuf>,
    poll_interval: Duration,
}

impl MakeMkvExtractor {
    pub fn new(program: impl Into<String>, device: impl Into<String>, output_dir: PathBuf) -> Self {
        Self {
            program: program.into(),
            device: device.into(),
            output_dir,
            raw_log: None,
            poll_interval: Duration::from_millis(500),
        }
    }

    /// Append every protocol line to `path`.
    pub fn with_raw_log(mut self, path: PathBuf) -> Self {
        self.raw_log = Some(path);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[async_trait]
impl Extractor for MakeMkvExtractor {
    async fn extract(
        &self,
        job: &ExtractJob,
        meter: &ProgressMeter,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, ToolError> {
        let title = &job.title;
        let before: HashSet<PathBuf> = list_mkv_files(&self.output_dir).await?.into_iter().collect();

        let raw_log = self
            .raw_log
            .as_deref()
            .map(RawLog::open)
            .unwrap_or_else(RawLog::disabled);
        let mut interpreter = ProtocolInterpreter::new()
            .with_expected_total(title.reported_size_bytes)
            .with_track(job.track)
            .with_raw_log(raw_log);
        let mut estimator = TitleProgressEstimator::new(
            title.reported_size_bytes,
            title.duration_seconds,
            job.reference_size,
            Instant::now(),
        );

        meter.reset(format!("[{}] Extracting {}", job.track, title.label()));
        let cmd = build_rip_command(&self.program, &self.device, title.id, &self.output_dir);
        let options = RunOptions {
            timeout: None,
            tick: Some(self.poll_interval),
        };

        let stop_polling = CancellationToken::new();
        let _poller = stop_polling.clone().drop_guard();
        let polled_size = spawn_size_poller(
            self.output_dir.clone(),
            title.output_file_name.clone(),
            before.clone(),
            self.poll_interval,
            stop_polling,
        );

        let result = run_streaming(cmd, cancel, options, |event| {
            match event {
                ProcessEvent::Stdout(line) | ProcessEvent::Stderr(line) => {
                    match interpreter.interpret(line) {
                        Some(ProtocolEvent::Progress(sample)) => {
                            if let Some(fraction) = sample.fraction {
                                estimator.observe_fraction(fraction);
                            }
                            if let Some(bytes) = sample.byte_estimate {
                                estimator.observe_bytes(bytes);
                            }
                        }
                        Some(ProtocolEvent::Caption(caption)) => {
                            meter.set_description(caption.to_string());
                        }
                        Some(ProtocolEvent::Message { text, .. }) => {
                            debug!("makemkvcon: {}", text);
                            meter.log(text);
                        }
                        _ => {}
                    }
                }
                ProcessEvent::Tick => {
                    let size = polled_size.load(Ordering::Relaxed);
                    if size != SIZE_UNKNOWN && !estimator.has_direct_signal() {
                        estimator.observe_file_size(size);
                    }
                }
            }
            meter.set_fraction(estimator.estimate());
        })
        .await;

        if let Err(e) = result {
            discard_partial_output(&self.output_dir, &before).await;
            return Err(e);
        }

        let path = locate_extracted_file(&self.output_dir, title, &before)
            .await?
            .ok_or(ToolError::OutputMissing(title.id))?;
        estimator.finish();
        meter.complete();
        Ok(path)
    }
}
