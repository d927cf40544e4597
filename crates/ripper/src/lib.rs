//! Disc Ripper
//!
//! Drives makemkvcon and ffmpeg to turn an optical disc into named media
//! files: scans the disc, decides whether it holds a movie or a series, and
//! runs extraction and transcoding as an overlapped two-stage pipeline.

pub mod classify;
pub mod disc;
pub mod metadata;
pub mod naming;
pub mod pipeline;
pub mod probe;
pub mod progress;
pub mod protocol;
pub mod ripper;
pub mod selection;
pub mod startup;
pub mod tools;

pub use disc_ripper_config as config;
pub use disc_ripper_config::Config;
pub use classify::{classify, Classification, ContentType};
pub use disc::{DiscInfo, DiscType, StreamInfo, StreamKind, TitleInfo};
pub use metadata::{
    EpisodeTitleProvider, ExpiringCache, LocalCatalogProvider, MediaMetadata, MetadataError,
    MetadataProvider, ProviderChain,
};
pub use naming::{plan_titles, sanitize_file_name, NamingContext, TitlePlan};
pub use pipeline::{
    EncodeResult, Pipeline, PipelineError, PipelineOptions, PipelineOutcome, PipelineState,
    PlannedTitle, RipJob, RunStatus, StateHandle,
};
pub use probe::{probe_file, select_streams, ProbeError, ProbeResult, StreamSelection};
pub use progress::{MeterSnapshot, PipelineMeters, ProgressMeter, TitleProgressEstimator};
pub use protocol::{
    normalize_progress, parse_duration, DiscScan, ProgressSample, ProtocolEvent,
    ProtocolInterpreter,
};
pub use ripper::{
    ContentTypePrompt, RipRequest, RipSummary, Ripper, RipperError, EXIT_CANCELLED,
    EXIT_FAILURE, EXIT_SUCCESS,
};
pub use selection::{select_titles, SelectionOptions};
pub use startup::{run_startup_checks, StartupError};
pub use tools::{DiscScanner, ExtractJob, Extractor, ToolError, Transcoder};
