//! Extraction and transcode stages joined by a bounded queue.
//!
//! The extraction stage rips titles one at a time and hands each finished
//! file to the transcode stage, which encodes into the temp directory and
//! then moves the result into the output directory. A collector gathers one
//! [`EncodeResult`] per extracted title.
//!
//! In parallel mode all three stages run at once, so title N+1 is ripped
//! while title N is encoded. Sequential mode finishes every extraction
//! before the first transcode starts.

pub mod recovery;

use crate::disc::TitleInfo;
use crate::naming::{TitlePlan, ENCODED_SUBDIR};
use crate::progress::{PipelineMeters, SCALE_UNIT};
use crate::protocol::TrackPosition;
use crate::tools::{ExtractJob, Extractor, Transcoder};
use disc_ripper_config::PipelineMode;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Scanning,
    Planning,
    Running(PipelineMode),
    Completed,
    PartiallyFailed,
    Cancelled,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Completed
                | PipelineState::PartiallyFailed
                | PipelineState::Cancelled
                | PipelineState::Failed
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::Scanning => write!(f, "scanning"),
            PipelineState::Planning => write!(f, "planning"),
            PipelineState::Running(mode) => write!(f, "running ({})", mode),
            PipelineState::Completed => write!(f, "completed"),
            PipelineState::PartiallyFailed => write!(f, "partially failed"),
            PipelineState::Cancelled => write!(f, "cancelled"),
            PipelineState::Failed => write!(f, "failed"),
        }
    }
}

/// Shared view of the run state, cloned into whoever needs to watch it.
#[derive(Debug, Clone, Default)]
pub struct StateHandle {
    inner: Arc<Mutex<PipelineState>>,
}

impl StateHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> PipelineState {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn transition(&self, next: PipelineState) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            info!("State: {} -> {}", *state, next);
            *state = next;
        }
    }
}

/// How a pipeline run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every selected title produced an output file
    Completed,
    /// Some titles produced output, some failed
    PartiallyFailed,
    /// Stopped by the user before all titles were done
    Cancelled,
    /// No title produced output
    Failed,
}

impl From<RunStatus> for PipelineState {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Completed => PipelineState::Completed,
            RunStatus::PartiallyFailed => PipelineState::PartiallyFailed,
            RunStatus::Cancelled => PipelineState::Cancelled,
            RunStatus::Failed => PipelineState::Failed,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        PipelineState::from(*self).fmt(f)
    }
}

/// A selected title together with its naming plan.
#[derive(Debug, Clone)]
pub struct PlannedTitle {
    pub title: TitleInfo,
    pub plan: TitlePlan,
}

/// An extracted file waiting for its transcode.
#[derive(Debug, Clone)]
pub struct RipJob {
    pub title_id: u32,
    pub sequence_index: usize,
    pub source_path: PathBuf,
    pub title: TitleInfo,
    /// Reused from an interrupted run instead of ripped now
    pub recovered: bool,
}

/// Outcome of one transcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeResult {
    pub title_id: u32,
    pub sequence_index: usize,
    /// Final output path, or why there isn't one
    pub output: Result<PathBuf, String>,
}

impl EncodeResult {
    pub fn is_success(&self) -> bool {
        self.output.is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub status: RunStatus,
    /// Output files in the order they finished
    pub outputs: Vec<PathBuf>,
    /// Titles that failed to extract or transcode
    pub failed_titles: Vec<u32>,
    pub results: Vec<EncodeResult>,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub mode: PipelineMode,
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
}

pub struct Pipeline {
    extractor: Arc<dyn Extractor>,
    transcoder: Arc<dyn Transcoder>,
    options: PipelineOptions,
    state: StateHandle,
}

/// Everything a stage task needs, cheap to clone into each task.
#[derive(Clone)]
struct StageContext {
    extractor: Arc<dyn Extractor>,
    transcoder: Arc<dyn Transcoder>,
    meters: PipelineMeters,
    cancel: CancellationToken,
    abort: CancellationToken,
    output_dir: PathBuf,
}

impl Pipeline {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        transcoder: Arc<dyn Transcoder>,
        options: PipelineOptions,
        state: StateHandle,
    ) -> Self {
        Self {
            extractor,
            transcoder,
            options,
            state,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Extract and transcode `titles` in order.
    ///
    /// `cancel` stops new extractions and new transcodes and kills a running
    /// extraction. `abort` additionally kills a running transcode.
    pub async fn run(
        &self,
        titles: Vec<PlannedTitle>,
        meters: &PipelineMeters,
        cancel: &CancellationToken,
        abort: &CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        let total = titles.len();
        let mode = self.options.mode;
        self.state.transition(PipelineState::Running(mode));

        tokio::fs::create_dir_all(&self.options.temp_dir).await?;
        tokio::fs::create_dir_all(self.options.temp_dir.join(ENCODED_SUBDIR)).await?;
        tokio::fs::create_dir_all(&self.options.output_dir).await?;

        let leftovers = recovery::find_leftover_files(&self.options.temp_dir).await?;
        if !leftovers.is_empty() {
            info!(
                "Found {} extracted file(s) from a previous run in {}",
                leftovers.len(),
                self.options.temp_dir.display()
            );
        }

        let plans: Vec<TitlePlan> = titles.iter().map(|t| t.plan.clone()).collect();
        let capacity = total.max(1);
        let (rip_tx, rip_rx) = mpsc::channel(capacity);
        let (result_tx, result_rx) = mpsc::channel(capacity);

        let ctx = StageContext {
            extractor: Arc::clone(&self.extractor),
            transcoder: Arc::clone(&self.transcoder),
            meters: meters.clone(),
            cancel: cancel.clone(),
            abort: abort.clone(),
            output_dir: self.options.output_dir.clone(),
        };

        info!("Processing {} title(s) in {} mode", total, mode);
        let (failed_rips, results) = match mode {
            PipelineMode::Parallel => {
                let producer = tokio::spawn(extract_stage(ctx.clone(), titles, leftovers, rip_tx));
                let consumer = tokio::spawn(transcode_stage(ctx, plans, rip_rx, result_tx));
                let collector = tokio::spawn(collect_results(result_rx));
                let (failed, consumed, results) = tokio::join!(producer, consumer, collector);
                consumed?;
                (failed?, results?)
            }
            PipelineMode::Sequential => {
                let failed =
                    tokio::spawn(extract_stage(ctx.clone(), titles, leftovers, rip_tx)).await?;
                let collector = tokio::spawn(collect_results(result_rx));
                tokio::spawn(transcode_stage(ctx, plans, rip_rx, result_tx)).await?;
                (failed, collector.await?)
            }
        };

        let outputs: Vec<PathBuf> = results
            .iter()
            .filter_map(|r| r.output.as_ref().ok().cloned())
            .collect();
        let mut failed_titles = failed_rips;
        failed_titles.extend(results.iter().filter(|r| !r.is_success()).map(|r| r.title_id));

        let status = if total > 0 && outputs.len() == total {
            RunStatus::Completed
        } else if cancel.is_cancelled() {
            RunStatus::Cancelled
        } else if !outputs.is_empty() {
            RunStatus::PartiallyFailed
        } else {
            RunStatus::Failed
        };

        if matches!(status, RunStatus::Completed | RunStatus::PartiallyFailed) {
            meters.overall.complete();
        }
        meters.stop_all();
        self.state.transition(status.into());
        info!(
            "Pipeline {}: {} of {} title(s) produced output",
            status,
            outputs.len(),
            total
        );

        Ok(PipelineOutcome {
            status,
            outputs,
            failed_titles,
            results,
        })
    }
}

/// Rip each title in order, reusing leftovers for the first positions.
///
/// Returns the ids of titles whose extraction failed.
async fn extract_stage(
    ctx: StageContext,
    titles: Vec<PlannedTitle>,
    leftovers: Vec<PathBuf>,
    tx: mpsc::Sender<RipJob>,
) -> Vec<u32> {
    let total = titles.len();
    let mut leftovers = leftovers.into_iter();
    let mut reference_size: Option<u64> = None;
    let mut failed = Vec::new();

    for (index, planned) in titles.into_iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            info!("Cancelled; not starting {}", planned.title.label());
            break;
        }

        let track = TrackPosition {
            ordinal: index + 1,
            total,
        };
        let source = match leftovers.next() {
            Some(path) => {
                info!(
                    "[{}] Reusing {} for {}",
                    track,
                    path.display(),
                    planned.plan.display_name
                );
                ctx.meters
                    .rip
                    .reset(format!("[{}] Reused {}", track, planned.plan.display_name));
                ctx.meters.rip.complete();
                Some((path, true))
            }
            None => {
                let job = ExtractJob {
                    title: planned.title.clone(),
                    track,
                    reference_size,
                };
                match ctx.extractor.extract(&job, &ctx.meters.rip, &ctx.cancel).await {
                    Ok(path) => {
                        info!("[{}] Extracted {}", track, path.display());
                        Some((path, false))
                    }
                    Err(e) if e.is_cancelled() => {
                        warn!("[{}] Extraction of {} cancelled", track, planned.title.label());
                        break;
                    }
                    Err(e) => {
                        warn!(
                            "[{}] Failed to extract {}: {}",
                            track,
                            planned.title.label(),
                            e
                        );
                        ctx.meters
                            .overall
                            .log(format!("{}: extraction failed: {}", planned.plan.display_name, e));
                        None
                    }
                }
            }
        };

        let Some((source_path, recovered)) = source else {
            failed.push(planned.title.id);
            ctx.meters.overall.advance(2 * SCALE_UNIT);
            continue;
        };

        if let Ok(metadata) = tokio::fs::metadata(&source_path).await {
            let size = metadata.len();
            reference_size = Some(reference_size.map_or(size, |r| r.max(size)));
        }
        ctx.meters.overall.advance(SCALE_UNIT);

        let job = RipJob {
            title_id: planned.title.id,
            sequence_index: index,
            source_path,
            title: planned.title,
            recovered,
        };
        if tx.send(job).await.is_err() {
            warn!("Transcode stage stopped; no more titles will be queued");
            break;
        }
    }

    failed
}

/// Transcode each queued file and move it into the output directory.
///
/// Emits exactly one result per job, including jobs skipped by cancellation.
async fn transcode_stage(
    ctx: StageContext,
    plans: Vec<TitlePlan>,
    mut rx: mpsc::Receiver<RipJob>,
    tx: mpsc::Sender<EncodeResult>,
) {
    while let Some(job) = rx.recv().await {
        let result = if ctx.cancel.is_cancelled() {
            info!(
                "Cancelled; leaving {} for the next run",
                job.source_path.display()
            );
            EncodeResult {
                title_id: job.title_id,
                sequence_index: job.sequence_index,
                output: Err("cancelled before transcoding".to_string()),
            }
        } else {
            let result = match plans.get(job.sequence_index) {
                Some(plan) => transcode_one(&ctx, &job, plan).await,
                None => EncodeResult {
                    title_id: job.title_id,
                    sequence_index: job.sequence_index,
                    output: Err("no output plan for title".to_string()),
                },
            };
            ctx.meters.overall.advance(SCALE_UNIT);
            result
        };

        if tx.send(result).await.is_err() {
            break;
        }
    }
}

async fn transcode_one(ctx: &StageContext, job: &RipJob, plan: &TitlePlan) -> EncodeResult {
    ctx.meters.encode.reset(format!("Encoding {}", plan.display_name));
    let transcoded = ctx
        .transcoder
        .transcode(
            &job.source_path,
            &plan.temp_output_path,
            &ctx.meters.encode,
            &ctx.abort,
        )
        .await;

    let output = match transcoded {
        Ok(()) => {
            let destination = ctx.output_dir.join(&plan.final_file_name);
            match move_file(&plan.temp_output_path, &destination).await {
                Ok(()) => {
                    if let Err(e) = tokio::fs::remove_file(&job.source_path).await {
                        warn!("Could not delete {}: {}", job.source_path.display(), e);
                    }
                    Ok(destination)
                }
                Err(e) => Err(format!(
                    "could not move output into {}: {}",
                    destination.display(),
                    e
                )),
            }
        }
        Err(e) => {
            remove_partial(&plan.temp_output_path).await;
            ctx.meters
                .overall
                .log(format!("{}: transcode failed: {}", plan.display_name, e));
            Err(e.to_string())
        }
    };

    EncodeResult {
        title_id: job.title_id,
        sequence_index: job.sequence_index,
        output,
    }
}

/// Rename, falling back to copy and delete across filesystems.
async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!("Rename failed ({}); copying instead", e);
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial output {}: {}", path.display(), e),
    }
}

async fn collect_results(mut rx: mpsc::Receiver<EncodeResult>) -> Vec<EncodeResult> {
    let mut results = Vec::new();
    while let Some(result) = rx.recv().await {
        match &result.output {
            Ok(path) => info!("Finished title {}: {}", result.title_id, path.display()),
            Err(e) => warn!("Title {} did not finish: {}", result.title_id, e),
        }
        results.push(result);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ContentType;
    use crate::naming::{plan_titles, NamingContext};
    use crate::progress::ProgressMeter;
    use crate::tools::ToolError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    type EventLog = Arc<Mutex<Vec<String>>>;

    struct FakeExtractor {
        dir: PathBuf,
        fail: Vec<u32>,
        /// Cancel this token while extracting the given title
        cancel_during: Option<(u32, CancellationToken)>,
        /// Cancel this token right after the given title finishes
        cancel_after: Option<(u32, CancellationToken)>,
        /// Hold the given title until this is notified
        wait_before: Option<(u32, Arc<Notify>)>,
        events: EventLog,
    }

    impl FakeExtractor {
        fn new(dir: &Path, events: &EventLog) -> Self {
            Self {
                dir: dir.to_path_buf(),
                fail: Vec::new(),
                cancel_during: None,
                cancel_after: None,
                wait_before: None,
                events: Arc::clone(events),
            }
        }
    }

    #[async_trait]
    impl Extractor for FakeExtractor {
        async fn extract(
            &self,
            job: &ExtractJob,
            meter: &ProgressMeter,
            _cancel: &CancellationToken,
        ) -> Result<PathBuf, ToolError> {
            let id = job.title.id;
            if let Some((target, gate)) = &self.wait_before {
                if *target == id {
                    gate.notified().await;
                }
            }
            self.events.lock().unwrap().push(format!("rip {}", id));
            meter.reset(format!("[{}] fake", job.track));
            meter.set_fraction(0.5);
            tokio::task::yield_now().await;

            if let Some((target, token)) = &self.cancel_during {
                if *target == id {
                    token.cancel();
                    return Err(ToolError::Cancelled("fake-makemkv".to_string()));
                }
            }
            if self.fail.contains(&id) {
                return Err(ToolError::Failed {
                    program: "fake-makemkv".to_string(),
                    code: 1,
                });
            }

            let path = self.dir.join(format!("disc_t{:02}.mkv", id));
            tokio::fs::write(&path, format!("title {}", id)).await?;
            meter.complete();

            if let Some((target, token)) = &self.cancel_after {
                if *target == id {
                    token.cancel();
                }
            }
            Ok(path)
        }
    }

    struct FakeTranscoder {
        fail: Vec<String>,
        /// Notified as each transcode starts
        started: Option<Arc<Notify>>,
        events: EventLog,
    }

    impl FakeTranscoder {
        fn new(events: &EventLog) -> Self {
            Self {
                fail: Vec::new(),
                started: None,
                events: Arc::clone(events),
            }
        }
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn transcode(
            &self,
            source: &Path,
            destination: &Path,
            meter: &ProgressMeter,
            _abort: &CancellationToken,
        ) -> Result<(), ToolError> {
            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.events.lock().unwrap().push(format!("encode {}", name));
            if let Some(started) = &self.started {
                started.notify_one();
            }
            tokio::task::yield_now().await;

            if self.fail.contains(&name) {
                tokio::fs::write(destination, b"partial").await?;
                return Err(ToolError::Failed {
                    program: "fake-ffmpeg".to_string(),
                    code: 1,
                });
            }
            tokio::fs::copy(source, destination).await?;
            meter.complete();
            Ok(())
        }
    }

    struct Fixture {
        _root: TempDir,
        temp_dir: PathBuf,
        output_dir: PathBuf,
        events: EventLog,
    }

    impl Fixture {
        fn new() -> Self {
            let root = TempDir::new().unwrap();
            let temp_dir = root.path().join("tmp");
            let output_dir = root.path().join("out");
            std::fs::create_dir_all(&temp_dir).unwrap();
            Self {
                _root: root,
                temp_dir,
                output_dir,
                events: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn planned(&self, count: u32) -> Vec<PlannedTitle> {
            let titles: Vec<TitleInfo> =
                (0..count).map(|id| TitleInfo::with_duration(id, 1440)).collect();
            let ctx = NamingContext {
                content_type: ContentType::Series,
                title: "Show".to_string(),
                year: None,
                season: 1,
                episode_start: 1,
            };
            let plans = plan_titles(&titles, &ctx, &HashMap::new(), &self.temp_dir);
            titles
                .into_iter()
                .zip(plans)
                .map(|(title, plan)| PlannedTitle { title, plan })
                .collect()
        }

        fn pipeline(
            &self,
            mode: PipelineMode,
            extractor: FakeExtractor,
            transcoder: FakeTranscoder,
        ) -> Pipeline {
            Pipeline::new(
                Arc::new(extractor),
                Arc::new(transcoder),
                PipelineOptions {
                    mode,
                    temp_dir: self.temp_dir.clone(),
                    output_dir: self.output_dir.clone(),
                },
                StateHandle::new(),
            )
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    async fn run(
        pipeline: &Pipeline,
        titles: Vec<PlannedTitle>,
        cancel: &CancellationToken,
    ) -> (PipelineOutcome, PipelineMeters) {
        let meters = PipelineMeters::new(titles.len());
        let abort = CancellationToken::new();
        let outcome = pipeline.run(titles, &meters, cancel, &abort).await.unwrap();
        (outcome, meters)
    }

    #[tokio::test]
    async fn test_parallel_run_completes_every_title() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(
            PipelineMode::Parallel,
            FakeExtractor::new(&fx.temp_dir, &fx.events),
            FakeTranscoder::new(&fx.events),
        );
        let (outcome, meters) = run(&pipeline, fx.planned(3), &CancellationToken::new()).await;

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.outputs.len(), 3);
        assert!(outcome.failed_titles.is_empty());
        for name in ["Show - S01E01.mkv", "Show - S01E02.mkv", "Show - S01E03.mkv"] {
            assert!(fx.output_dir.join(name).exists(), "missing {}", name);
        }
        // Sources are deleted once their output is in place
        assert!(recovery::find_leftover_files(&fx.temp_dir).await.unwrap().is_empty());
        assert_eq!(meters.overall.value(), meters.overall.max_value());
        assert_eq!(pipeline.state.get(), PipelineState::Completed);

        let events = fx.events();
        assert_eq!(events.len(), 6);
        assert_eq!(events[0], "rip 0");
    }

    #[tokio::test]
    async fn test_parallel_transcodes_while_next_title_extracts() {
        let fx = Fixture::new();
        let gate = Arc::new(Notify::new());
        let mut extractor = FakeExtractor::new(&fx.temp_dir, &fx.events);
        extractor.wait_before = Some((1, Arc::clone(&gate)));
        let mut transcoder = FakeTranscoder::new(&fx.events);
        transcoder.started = Some(gate);
        let pipeline = fx.pipeline(PipelineMode::Parallel, extractor, transcoder);

        // title 1 can't start extracting until title 0 is being transcoded
        let (outcome, _) = tokio::time::timeout(
            Duration::from_secs(10),
            run(&pipeline, fx.planned(3), &CancellationToken::new()),
        )
        .await
        .expect("extraction and transcoding did not overlap");

        assert_eq!(outcome.status, RunStatus::Completed);
        let events = fx.events();
        let encode_first = events.iter().position(|e| e == "encode disc_t00.mkv").unwrap();
        let rip_second = events.iter().position(|e| e == "rip 1").unwrap();
        assert!(encode_first < rip_second, "events: {:?}", events);

        let order: Vec<usize> = outcome.results.iter().map(|r| r.sequence_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        let ids: Vec<u32> = outcome.results.iter().map(|r| r.title_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(
            outcome.outputs,
            vec![
                fx.output_dir.join("Show - S01E01.mkv"),
                fx.output_dir.join("Show - S01E02.mkv"),
                fx.output_dir.join("Show - S01E03.mkv"),
            ]
        );
    }

    #[tokio::test]
    async fn test_sequential_extracts_everything_first() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(
            PipelineMode::Sequential,
            FakeExtractor::new(&fx.temp_dir, &fx.events),
            FakeTranscoder::new(&fx.events),
        );
        let (outcome, _) = run(&pipeline, fx.planned(2), &CancellationToken::new()).await;

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(
            fx.events(),
            vec![
                "rip 0",
                "rip 1",
                "encode disc_t00.mkv",
                "encode disc_t01.mkv"
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_extraction_does_not_stop_the_run() {
        let fx = Fixture::new();
        let mut extractor = FakeExtractor::new(&fx.temp_dir, &fx.events);
        extractor.fail = vec![0];
        let pipeline = fx.pipeline(
            PipelineMode::Parallel,
            extractor,
            FakeTranscoder::new(&fx.events),
        );
        let (outcome, meters) = run(&pipeline, fx.planned(2), &CancellationToken::new()).await;

        assert_eq!(outcome.status, RunStatus::PartiallyFailed);
        assert_eq!(outcome.failed_titles, vec![0]);
        assert_eq!(outcome.outputs, vec![fx.output_dir.join("Show - S01E02.mkv")]);
        assert_eq!(meters.overall.value(), meters.overall.max_value());
    }

    #[tokio::test]
    async fn test_failed_transcode_keeps_source() {
        let fx = Fixture::new();
        let mut transcoder = FakeTranscoder::new(&fx.events);
        transcoder.fail = vec!["disc_t01.mkv".to_string()];
        let pipeline = fx.pipeline(
            PipelineMode::Parallel,
            FakeExtractor::new(&fx.temp_dir, &fx.events),
            transcoder,
        );
        let (outcome, _) = run(&pipeline, fx.planned(2), &CancellationToken::new()).await;

        assert_eq!(outcome.status, RunStatus::PartiallyFailed);
        assert_eq!(outcome.failed_titles, vec![1]);
        assert!(fx.temp_dir.join("disc_t01.mkv").exists());
        assert!(!fx.temp_dir.join("disc_t00.mkv").exists());
        // Partial encode output is cleaned up
        assert!(!fx
            .temp_dir
            .join(ENCODED_SUBDIR)
            .join("Show - S01E02.mkv")
            .exists());
    }

    #[tokio::test]
    async fn test_nothing_produced_is_failure() {
        let fx = Fixture::new();
        let mut extractor = FakeExtractor::new(&fx.temp_dir, &fx.events);
        extractor.fail = vec![0, 1];
        let pipeline = fx.pipeline(
            PipelineMode::Parallel,
            extractor,
            FakeTranscoder::new(&fx.events),
        );
        let (outcome, _) = run(&pipeline, fx.planned(2), &CancellationToken::new()).await;

        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.failed_titles, vec![0, 1]);
        assert!(outcome.outputs.is_empty());
        assert_eq!(pipeline.state.get(), PipelineState::Failed);
    }

    #[tokio::test]
    async fn test_leftover_file_replaces_first_extraction() {
        let fx = Fixture::new();
        std::fs::write(fx.temp_dir.join("previous_t00.mkv"), b"from last time").unwrap();
        let pipeline = fx.pipeline(
            PipelineMode::Parallel,
            FakeExtractor::new(&fx.temp_dir, &fx.events),
            FakeTranscoder::new(&fx.events),
        );
        let (outcome, _) = run(&pipeline, fx.planned(2), &CancellationToken::new()).await;

        assert_eq!(outcome.status, RunStatus::Completed);
        let rips: Vec<String> = fx
            .events()
            .into_iter()
            .filter(|e| e.starts_with("rip"))
            .collect();
        assert_eq!(rips, vec!["rip 1"]);
        let first = std::fs::read(fx.output_dir.join("Show - S01E01.mkv")).unwrap();
        assert_eq!(first, b"from last time");
        assert!(!fx.temp_dir.join("previous_t00.mkv").exists());
    }

    #[tokio::test]
    async fn test_cancel_during_extraction() {
        let fx = Fixture::new();
        let cancel = CancellationToken::new();
        let mut extractor = FakeExtractor::new(&fx.temp_dir, &fx.events);
        extractor.cancel_during = Some((0, cancel.clone()));
        let pipeline = fx.pipeline(
            PipelineMode::Parallel,
            extractor,
            FakeTranscoder::new(&fx.events),
        );
        let (outcome, meters) = run(&pipeline, fx.planned(3), &cancel).await;

        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert_eq!(fx.events(), vec!["rip 0"]);
        assert!(outcome.outputs.is_empty());
        assert!(meters.overall.value() < meters.overall.max_value());
        assert!(meters.overall.snapshot().stopped);
        assert_eq!(pipeline.state.get(), PipelineState::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_between_titles_keeps_extracted_file() {
        let fx = Fixture::new();
        let cancel = CancellationToken::new();
        let mut extractor = FakeExtractor::new(&fx.temp_dir, &fx.events);
        extractor.cancel_after = Some((0, cancel.clone()));
        let pipeline = fx.pipeline(
            PipelineMode::Sequential,
            extractor,
            FakeTranscoder::new(&fx.events),
        );
        let (outcome, _) = run(&pipeline, fx.planned(2), &cancel).await;

        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert_eq!(fx.events(), vec!["rip 0"]);
        assert_eq!(outcome.results.len(), 1);
        assert!(!outcome.results[0].is_success());
        // Left for the next run to pick up
        assert_eq!(
            recovery::find_leftover_files(&fx.temp_dir).await.unwrap(),
            vec![fx.temp_dir.join("disc_t00.mkv")]
        );
    }

    #[tokio::test]
    async fn test_empty_selection_fails() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(
            PipelineMode::Parallel,
            FakeExtractor::new(&fx.temp_dir, &fx.events),
            FakeTranscoder::new(&fx.events),
        );
        let (outcome, _) = run(&pipeline, Vec::new(), &CancellationToken::new()).await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(fx.events().is_empty());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(
            PipelineState::Running(PipelineMode::Sequential).to_string(),
            "running (sequential)"
        );
        assert_eq!(RunStatus::PartiallyFailed.to_string(), "partially failed");
        assert!(PipelineState::Cancelled.is_terminal());
        assert!(!PipelineState::Planning.is_terminal());
    }
}
