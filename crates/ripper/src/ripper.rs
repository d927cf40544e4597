//! Whole-run driver: scan, classify, plan, then hand the titles to the
//! pipeline.
//!
//! Provides the [`Ripper`] entry point, the content-type resolution fallback
//! chain and the mapping from run outcome to process exit code.

use crate::classify::{classify, Classification, ContentType};
use crate::disc::DiscInfo;
use crate::metadata::{LocalCatalogProvider, ProviderChain};
use crate::naming::{plan_titles, NamingContext};
use crate::pipeline::{
    Pipeline, PipelineError, PipelineOptions, PipelineState, PlannedTitle, RunStatus, StateHandle,
};
use crate::progress::PipelineMeters;
use crate::selection::{select_titles, SelectionOptions};
use crate::startup::{run_startup_checks, StartupError};
use crate::tools::{
    DiscScanner, Extractor, FfmpegTranscoder, MakeMkvExtractor, MakeMkvScanner, ToolError,
    Transcoder,
};
use async_trait::async_trait;
use disc_ripper_config::Config;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// At least one output file was produced.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
/// Conventional status for a run stopped by SIGINT.
pub const EXIT_CANCELLED: i32 = 130;

const SCAN_LOG_NAME: &str = "makemkv_scan.log";
const RIP_LOG_NAME: &str = "makemkv_rip.log";
const PROGRESS_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Error type for whole-run failures
#[derive(Debug, Error)]
pub enum RipperError {
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    #[error("Disc scan failed: {0}")]
    Scan(#[from] ToolError),

    #[error(
        "Could not tell whether the disc is a movie or a series (confidence {confidence:.2}); \
         pass --movie or --tv"
    )]
    ContentTypeUnresolved { confidence: f64 },

    #[error("No titles matched the selection rules")]
    NoTitlesSelected,

    #[error("No output directory configured")]
    MissingOutputDir,

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cancelled")]
    Cancelled,
}

impl RipperError {
    pub fn exit_code(&self) -> i32 {
        match self {
            RipperError::Cancelled => EXIT_CANCELLED,
            _ => EXIT_FAILURE,
        }
    }
}

/// Asks the operator to settle the content type when the classifier can't.
#[async_trait]
pub trait ContentTypePrompt: Send + Sync {
    /// `None` means the operator gave no usable answer.
    async fn ask(&self, disc: &DiscInfo, classification: &Classification)
        -> Option<ContentType>;
}

/// Per-run inputs that don't live in the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RipRequest {
    /// Forces the content type, skipping classification
    pub content_type: Option<ContentType>,
    /// Title used for lookup and naming; defaults to the disc name
    pub title: Option<String>,
    pub year: Option<u32>,
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RipSummary {
    pub status: RunStatus,
    pub disc_name: String,
    pub content_type: ContentType,
    pub selected: usize,
    pub outputs: Vec<PathBuf>,
    pub failed_titles: Vec<u32>,
}

impl RipSummary {
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Completed | RunStatus::PartiallyFailed => EXIT_SUCCESS,
            RunStatus::Cancelled => EXIT_CANCELLED,
            RunStatus::Failed => EXIT_FAILURE,
        }
    }
}

pub struct Ripper {
    config: Config,
    scanner: Arc<dyn DiscScanner>,
    extractor: Arc<dyn Extractor>,
    transcoder: Arc<dyn Transcoder>,
    providers: ProviderChain,
    prompt: Option<Arc<dyn ContentTypePrompt>>,
    state: StateHandle,
}

impl Ripper {
    pub fn new(
        config: Config,
        scanner: Arc<dyn DiscScanner>,
        extractor: Arc<dyn Extractor>,
        transcoder: Arc<dyn Transcoder>,
        providers: ProviderChain,
    ) -> Self {
        Self {
            config,
            scanner,
            extractor,
            transcoder,
            providers,
            prompt: None,
            state: StateHandle::new(),
        }
    }

    /// Wire up makemkvcon, ffmpeg and the configured catalog.
    pub fn from_config(config: Config) -> Self {
        let temp_dir = config.disc.temp_dir.clone();
        let mut scanner = MakeMkvScanner::new(
            &config.tools.makemkvcon,
            &config.disc.device,
            Duration::from_secs(config.disc.scan_timeout_secs),
        );
        let mut extractor =
            MakeMkvExtractor::new(&config.tools.makemkvcon, &config.disc.device, temp_dir.clone())
                .with_poll_interval(Duration::from_millis(config.pipeline.poll_interval_ms.max(1)));
        if config.pipeline.raw_log {
            scanner = scanner.with_raw_log(temp_dir.join(SCAN_LOG_NAME));
            extractor = extractor.with_raw_log(temp_dir.join(RIP_LOG_NAME));
        }
        let transcoder = FfmpegTranscoder::new(
            &config.tools.ffmpeg,
            &config.tools.ffprobe,
            config.streams.include_english_subtitles,
        );

        let mut providers = ProviderChain::new();
        if let Some(path) = &config.metadata.catalog {
            let catalog = Arc::new(LocalCatalogProvider::new(
                path.clone(),
                Duration::from_secs(config.metadata.cache_ttl_secs),
            ));
            providers = providers
                .with_metadata_provider(catalog.clone())
                .with_episode_provider(catalog);
        }

        Self::new(
            config,
            Arc::new(scanner),
            Arc::new(extractor),
            Arc::new(transcoder),
            providers,
        )
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn ContentTypePrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> StateHandle {
        self.state.clone()
    }

    /// Verify the external tools before touching the disc.
    pub fn check_dependencies(&self) -> Result<(), RipperError> {
        run_startup_checks(&self.config.tools)?;
        Ok(())
    }

    /// Run one disc from scan to finished files.
    ///
    /// A run that starts the pipeline returns `Ok` even when titles failed or
    /// the operator cancelled; inspect [`RipSummary::status`].
    pub async fn run(
        &self,
        request: &RipRequest,
        cancel: &CancellationToken,
        abort: &CancellationToken,
    ) -> Result<RipSummary, RipperError> {
        let result = self.execute(request, cancel, abort).await;
        match &result {
            Err(RipperError::Cancelled) => self.state.transition(PipelineState::Cancelled),
            Err(_) => self.state.transition(PipelineState::Failed),
            Ok(_) => {}
        }
        result
    }

    async fn execute(
        &self,
        request: &RipRequest,
        cancel: &CancellationToken,
        abort: &CancellationToken,
    ) -> Result<RipSummary, RipperError> {
        let output_dir = self
            .config
            .disc
            .output_dir
            .clone()
            .ok_or(RipperError::MissingOutputDir)?;
        let temp_dir = self.config.disc.temp_dir.clone();
        if cancel.is_cancelled() {
            return Err(RipperError::Cancelled);
        }
        tokio::fs::create_dir_all(&temp_dir).await?;

        self.state.transition(PipelineState::Scanning);
        let mut disc = match self.scanner.scan(cancel).await {
            Ok(disc) => disc,
            Err(e) if e.is_cancelled() => return Err(RipperError::Cancelled),
            Err(e) => return Err(e.into()),
        };

        let classification = classify(&disc.durations());
        let threshold = self.config.classifier.effective_threshold();
        disc.apply_classification(&classification, threshold);
        info!(
            "Disc '{}' ({}): {} title(s); leaning {} at {:.2} confidence",
            disc.disc_name,
            disc.disc_type,
            disc.titles.len(),
            classification
                .leaning
                .map_or_else(|| "uncertain".to_string(), |c| c.to_string()),
            classification.confidence
        );

        self.state.transition(PipelineState::Planning);
        let content_type = self
            .resolve_content_type(request, &disc, &classification)
            .await?;
        let is_series = content_type == ContentType::Series;

        let query = request
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| disc.disc_name.clone());
        let metadata = self.providers.lookup(&query, is_series, request.year).await;
        let year = metadata.year.or(request.year);

        let options = SelectionOptions {
            explicit_titles: self.config.selection.titles.clone(),
            include_alternate_cuts: self.config.selection.include_alternate_cuts,
        };
        let selected = select_titles(&disc, content_type, &options);
        if selected.is_empty() {
            return Err(RipperError::NoTitlesSelected);
        }

        let ctx = NamingContext {
            content_type,
            title: metadata.title.clone(),
            year,
            season: self.config.naming.season,
            episode_start: self.config.naming.episode_start,
        };
        let mut episode_titles = HashMap::new();
        if is_series {
            for index in 0..selected.len() {
                let episode = ctx.episode_number(index);
                if let Some(name) = self
                    .providers
                    .episode_title(&ctx.title, ctx.season, episode, year)
                    .await
                {
                    episode_titles.insert(episode, name);
                }
            }
        }

        let plans = plan_titles(&selected, &ctx, &episode_titles, &temp_dir);
        for plan in &plans {
            info!("Title {} -> {}", plan.title_id, plan.final_file_name);
        }
        let planned: Vec<PlannedTitle> = selected
            .into_iter()
            .zip(plans)
            .map(|(title, plan)| PlannedTitle { title, plan })
            .collect();
        let selected_count = planned.len();

        let meters = PipelineMeters::new(selected_count);
        let reporter = spawn_progress_reporter(meters.clone(), PROGRESS_REPORT_INTERVAL);
        let pipeline = Pipeline::new(
            Arc::clone(&self.extractor),
            Arc::clone(&self.transcoder),
            PipelineOptions {
                mode: self.config.pipeline.mode,
                temp_dir,
                output_dir,
            },
            self.state.clone(),
        );
        let outcome = pipeline.run(planned, &meters, cancel, abort).await;
        reporter.abort();
        let outcome = outcome?;

        info!(
            "Summary: {} succeeded, {} failed ({})",
            outcome.outputs.len(),
            outcome.failed_titles.len(),
            outcome.status
        );
        for path in &outcome.outputs {
            info!("  wrote {}", path.display());
        }
        for id in &outcome.failed_titles {
            warn!("  title {} did not produce output", id);
        }

        Ok(RipSummary {
            status: outcome.status,
            disc_name: disc.disc_name,
            content_type,
            selected: selected_count,
            outputs: outcome.outputs,
            failed_titles: outcome.failed_titles,
        })
    }

    /// Override first, then a confident classification, then the operator.
    async fn resolve_content_type(
        &self,
        request: &RipRequest,
        disc: &DiscInfo,
        classification: &Classification,
    ) -> Result<ContentType, RipperError> {
        if let Some(forced) = request.content_type {
            info!("Content type set to {} by the operator", forced);
            return Ok(forced);
        }
        if let Some(detected) = disc.detected_content_type {
            return Ok(detected);
        }

        warn!(
            "Content type uncertain ({:.2} below threshold {:.2})",
            classification.confidence,
            self.config.classifier.effective_threshold()
        );
        if let Some(prompt) = &self.prompt {
            if let Some(answer) = prompt.ask(disc, classification).await {
                info!("Content type set to {} by prompt", answer);
                return Ok(answer);
            }
        }
        Err(RipperError::ContentTypeUnresolved {
            confidence: classification.confidence,
        })
    }
}

/// Log the three meters periodically until the overall meter stops.
fn spawn_progress_reporter(
    meters: PipelineMeters,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let overall = meters.overall.snapshot();
            if overall.stopped {
                break;
            }
            let rip = meters.rip.snapshot();
            let encode = meters.encode.snapshot();
            info!(
                "Overall {:.0}% | {} {:.0}% | {} {:.0}%",
                overall.fraction() * 100.0,
                rip.description,
                rip.fraction() * 100.0,
                encode.description,
                encode.fraction() * 100.0
            );
        }
    })
}
