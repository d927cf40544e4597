//! CLI entry point for the disc ripper
//!
//! Parses command line arguments, layers them over the config file and runs
//! one disc. The first Ctrl-C stops new work and kills the running
//! extraction; a second one also kills the running transcode.

use async_trait::async_trait;
use clap::Parser;
use disc_ripper::config::PipelineMode;
use disc_ripper::{
    Classification, Config, ContentType, ContentTypePrompt, DiscInfo, RipRequest, Ripper,
    EXIT_FAILURE,
};
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Rip an optical disc to named MKV files
#[derive(Parser, Debug)]
#[command(name = "rip-disc")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Disc passed to makemkvcon (e.g. "disc:0" or "dev:/dev/sr0")
    #[arg(short, long)]
    disc: Option<String>,

    /// Directory for finished files
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory for extracted titles and in-progress encodes
    #[arg(long)]
    temp: Option<PathBuf>,

    /// Treat the disc as a TV series
    #[arg(long, conflicts_with = "movie")]
    tv: bool,

    /// Treat the disc as a movie
    #[arg(long)]
    movie: bool,

    /// Title used for lookup and naming; defaults to the disc name
    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    year: Option<u32>,

    #[arg(long)]
    season: Option<u32>,

    /// Episode number of the first selected title
    #[arg(long)]
    episode_start: Option<u32>,

    /// Comma-separated title ids to rip instead of the automatic selection
    #[arg(long, value_delimiter = ',')]
    titles: Vec<u32>,

    /// Keep every feature-length title of a movie disc
    #[arg(long)]
    alternate_cuts: bool,

    /// Extract everything before transcoding anything
    #[arg(long)]
    sequential: bool,

    /// Leave English subtitle streams out of the output
    #[arg(long)]
    no_subtitles: bool,

    /// Skip the makemkvcon/ffmpeg/ffprobe availability checks
    #[arg(long)]
    skip_checks: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn content_type(&self) -> Option<ContentType> {
        if self.tv {
            Some(ContentType::Series)
        } else if self.movie {
            Some(ContentType::Movie)
        } else {
            None
        }
    }

    /// Command line values win over the config file and environment.
    fn apply_to(&self, config: &mut Config) {
        if let Some(disc) = &self.disc {
            config.disc.device = disc.clone();
        }
        if let Some(output) = &self.output {
            config.disc.output_dir = Some(output.clone());
        }
        if let Some(temp) = &self.temp {
            config.disc.temp_dir = temp.clone();
        }
        if let Some(season) = self.season {
            config.naming.season = season;
        }
        if let Some(start) = self.episode_start {
            config.naming.episode_start = start;
        }
        if !self.titles.is_empty() {
            config.selection.titles = self.titles.clone();
        }
        if self.alternate_cuts {
            config.selection.include_alternate_cuts = true;
        }
        if self.sequential {
            config.pipeline.mode = PipelineMode::Sequential;
        }
        if self.no_subtitles {
            config.streams.include_english_subtitles = false;
        }
    }
}

/// Asks on the terminal when the classifier can't decide.
struct TerminalPrompt;

#[async_trait]
impl ContentTypePrompt for TerminalPrompt {
    async fn ask(&self, disc: &DiscInfo, classification: &Classification) -> Option<ContentType> {
        let leaning = classification
            .leaning
            .map_or_else(|| "unknown".to_string(), |c| c.to_string());
        let question = format!(
            "'{}' has {} title(s) and looks like a {} ({:.0}% sure). [m]ovie or [t]v series? ",
            disc.disc_name,
            disc.titles.len(),
            leaning,
            classification.confidence * 100.0
        );

        let answer = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "{}", question);
            let _ = stderr.flush();
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).ok()?;
            Some(line)
        })
        .await
        .ok()
        .flatten()?;

        parse_content_type_answer(&answer)
    }
}

fn parse_content_type_answer(answer: &str) -> Option<ContentType> {
    match answer.trim().to_lowercase().as_str() {
        "m" | "movie" => Some(ContentType::Movie),
        "t" | "tv" | "s" | "series" => Some(ContentType::Series),
        _ => None,
    }
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, disc_ripper::config::ConfigError> {
    match path {
        Some(path) => Config::load(path),
        None => Ok(Config::from_env()),
    }
}

fn spawn_interrupt_handler(cancel: CancellationToken, abort: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupted; stopping after the current transcode (Ctrl-C again to abort it)");
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted again; aborting the running transcode");
            abort.cancel();
        }
    });
}

fn exit_status(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(exit_status(code))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    let mut config = match load_config(args.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return exit_code(EXIT_FAILURE);
        }
    };
    args.apply_to(&mut config);

    info!("Disc: {}", config.disc.device);
    info!("Temp directory: {}", config.disc.temp_dir.display());

    let mut ripper = Ripper::from_config(config);
    if std::io::stdin().is_terminal() {
        ripper = ripper.with_prompt(Arc::new(TerminalPrompt));
    }

    if args.skip_checks {
        warn!("Skipping startup checks (--skip-checks enabled)");
    } else if let Err(e) = ripper.check_dependencies() {
        error!("{}", e);
        return exit_code(e.exit_code());
    }

    let cancel = CancellationToken::new();
    let abort = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone(), abort.clone());

    let request = RipRequest {
        content_type: args.content_type(),
        title: args.title.clone(),
        year: args.year,
    };

    match ripper.run(&request, &cancel, &abort).await {
        Ok(summary) => {
            info!(
                "{}: {} of {} title(s) written",
                summary.status,
                summary.outputs.len(),
                summary.selected
            );
            exit_code(summary.exit_code())
        }
        Err(e) => {
            error!("{}", e);
            exit_code(e.exit_code())
        }
    }
}
