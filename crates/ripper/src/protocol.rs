//! Interpreter for makemkvcon's robot-mode (`-r`) line protocol.
//!
//! Each line is classified by its tag (`CINFO`, `TINFO`, `SINFO`, `PRGV`,
//! `PRGC`, `PRGT`, `MSG`, `TCOUNT`) and turned into at most one typed event.
//! Unknown or malformed lines produce nothing; they are never an error.

use crate::disc::{DiscInfo, DiscType, StreamKind, TitleInfo};
use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

/// Below this expected size, mid-range progress values are read as bytes.
pub const MIB: u64 = 1024 * 1024;

const CINFO_TYPE: u32 = 1;
const CINFO_NAME: u32 = 2;
const CINFO_VOLUME_NAME: u32 = 32;

const TINFO_NAME: u32 = 2;
const TINFO_CHAPTERS: u32 = 8;
const TINFO_DURATION: u32 = 9;
const TINFO_SIZE_BYTES: u32 = 11;
const TINFO_OUTPUT_FILE: u32 = 27;

const SINFO_TYPE: u32 = 1;
const SINFO_LANG_CODE: u32 = 3;

/// Progress normalized to a fraction, with a byte estimate when the total is known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    /// `None` when the value's scale could not be determined
    pub fraction: Option<f64>,
    pub byte_estimate: Option<u64>,
}

/// Position of the track being processed, for display ("2/5").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackPosition {
    pub ordinal: usize,
    pub total: usize,
}

impl std::fmt::Display for TrackPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.ordinal, self.total)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caption {
    pub text: String,
    pub track: Option<TrackPosition>,
}

impl std::fmt::Display for Caption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.track {
            Some(track) => write!(f, "[{}] {}", track, self.text),
            None => write!(f, "{}", self.text),
        }
    }
}

/// A structured event extracted from one protocol line.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    DiscType(DiscType),
    DiscName(String),
    TitleCount(u32),
    TitleName { title_id: u32, name: String },
    TitleDuration { title_id: u32, seconds: u64 },
    TitleSize { title_id: u32, bytes: u64 },
    TitleChapters { title_id: u32, count: u32 },
    TitleOutputFile { title_id: u32, file_name: String },
    StreamKind { title_id: u32, stream_index: u32, kind: StreamKind },
    StreamLanguage { title_id: u32, stream_index: u32, language: String },
    Progress(ProgressSample),
    Caption(Caption),
    Message { code: u32, text: String },
}

/// Parse an `HH:MM:SS` duration into seconds. Anything else yields 0.
pub fn parse_duration(value: &str) -> u64 {
    let parts: Vec<&str> = value.trim().split(':').collect();
    if parts.len() != 3 {
        return 0;
    }
    let mut total = 0u64;
    for (part, scale) in parts.iter().zip([3600u64, 60, 1]) {
        match part.parse::<u64>() {
            Ok(n) => total = total.saturating_add(n.saturating_mul(scale)),
            Err(_) => return 0,
        }
    }
    total
}

/// Resolve a progress value of unknown scale into a fraction and byte estimate.
///
/// With an expected total: values up to 1.0 are fractions, values up to 100
/// are percentages when the total is at least 1 MiB, and everything else is
/// a byte count clamped to the total. Without one: fractions and percentages
/// only; larger values carry no usable fraction.
pub fn normalize_progress(value: f64, expected_total: Option<u64>) -> ProgressSample {
    let value = if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    };

    match expected_total.filter(|&total| total > 0) {
        Some(total) => {
            let total_f = total as f64;
            let fraction = if value <= 1.0 {
                value
            } else if value <= 100.0 && total >= MIB {
                value / 100.0
            } else {
                value.min(total_f) / total_f
            };
            ProgressSample {
                fraction: Some(fraction),
                byte_estimate: Some((fraction * total_f).round() as u64),
            }
        }
        None => {
            let fraction = if value <= 1.0 {
                Some(value)
            } else if value <= 100.0 {
                Some(value / 100.0)
            } else {
                None
            };
            ProgressSample {
                fraction,
                byte_estimate: None,
            }
        }
    }
}

/// Text between the first pair of double quotes.
fn first_quoted(s: &str) -> Option<&str> {
    let start = s.find('"')? + 1;
    let len = s[start..].find('"')?;
    Some(&s[start..start + len])
}

/// Quoted value if present, otherwise the trimmed raw text.
fn field_value(raw: &str) -> &str {
    first_quoted(raw).unwrap_or_else(|| raw.trim())
}

fn parse_u32(s: &str) -> Option<u32> {
    s.trim().parse().ok()
}

/// Parse a single protocol line.
///
/// `expected_total` is the size of the title being extracted (if known), and
/// `track` is attached to progress captions.
pub fn parse_line(
    line: &str,
    expected_total: Option<u64>,
    track: Option<TrackPosition>,
) -> Option<ProtocolEvent> {
    let (tag, rest) = line.trim_end().split_once(':')?;
    match tag {
        "CINFO" => parse_cinfo(rest),
        "TINFO" => parse_tinfo(rest),
        "SINFO" => parse_sinfo(rest),
        "TCOUNT" => parse_u32(rest).map(ProtocolEvent::TitleCount),
        "PRGV" => parse_progress_value(rest)
            .map(|value| ProtocolEvent::Progress(normalize_progress(value, expected_total))),
        "PRGC" | "PRGT" => first_quoted(rest).map(|text| {
            ProtocolEvent::Caption(Caption {
                text: text.to_string(),
                track,
            })
        }),
        "MSG" => {
            let (code, tail) = rest.split_once(',')?;
            let text = first_quoted(tail)?;
            Some(ProtocolEvent::Message {
                code: parse_u32(code)?,
                text: text.to_string(),
            })
        }
        _ => None,
    }
}

fn parse_cinfo(rest: &str) -> Option<ProtocolEvent> {
    let mut parts = rest.splitn(3, ',');
    let attr = parse_u32(parts.next()?)?;
    let _code = parts.next()?;
    let value = field_value(parts.next()?);

    match attr {
        CINFO_TYPE => Some(ProtocolEvent::DiscType(DiscType::from_label(value))),
        CINFO_NAME | CINFO_VOLUME_NAME if !value.is_empty() => {
            Some(ProtocolEvent::DiscName(value.to_string()))
        }
        _ => None,
    }
}

fn parse_tinfo(rest: &str) -> Option<ProtocolEvent> {
    let mut parts = rest.splitn(4, ',');
    let title_id = parse_u32(parts.next()?)?;
    let field = parse_u32(parts.next()?)?;
    let _code = parts.next()?;
    let value = field_value(parts.next()?);

    match field {
        TINFO_NAME => Some(ProtocolEvent::TitleName {
            title_id,
            name: value.to_string(),
        }),
        TINFO_DURATION => Some(ProtocolEvent::TitleDuration {
            title_id,
            seconds: parse_duration(value),
        }),
        TINFO_SIZE_BYTES => value
            .parse::<u64>()
            .ok()
            .map(|bytes| ProtocolEvent::TitleSize { title_id, bytes }),
        TINFO_CHAPTERS => {
            parse_u32(value).map(|count| ProtocolEvent::TitleChapters { title_id, count })
        }
        TINFO_OUTPUT_FILE if !value.is_empty() => Some(ProtocolEvent::TitleOutputFile {
            title_id,
            file_name: value.to_string(),
        }),
        _ => None,
    }
}

fn parse_sinfo(rest: &str) -> Option<ProtocolEvent> {
    let mut parts = rest.splitn(5, ',');
    let title_id = parse_u32(parts.next()?)?;
    let stream_index = parse_u32(parts.next()?)?;
    let field = parse_u32(parts.next()?)?;
    let _code = parts.next()?;
    let value = field_value(parts.next()?);

    match field {
        SINFO_TYPE => Some(ProtocolEvent::StreamKind {
            title_id,
            stream_index,
            kind: StreamKind::from_label(value),
        }),
        SINFO_LANG_CODE if !value.is_empty() => Some(ProtocolEvent::StreamLanguage {
            title_id,
            stream_index,
            language: value.to_string(),
        }),
        _ => None,
    }
}

/// `PRGV:<current>,<total>,<max>` carries `total / max`; a lone value is taken as-is.
fn parse_progress_value(rest: &str) -> Option<f64> {
    let parts: Vec<&str> = rest.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [single] => single.parse().ok(),
        [_, total] => total.parse().ok(),
        [_, total, max] => {
            let total: f64 = total.parse().ok()?;
            match max.parse::<f64>() {
                Ok(max) if max > 0.0 => Some(total / max),
                _ => Some(total),
            }
        }
        _ => None,
    }
}

/// Append-only transcript of raw tool output.
///
/// Write failures disable the log instead of failing the caller.
#[derive(Debug)]
pub struct RawLog {
    path: PathBuf,
    writer: Option<LineWriter<File>>,
}

impl RawLog {
    pub fn open(path: &Path) -> Self {
        let writer = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(LineWriter::new(file)),
            Err(e) => {
                warn!("Raw protocol log {} unavailable: {}", path.display(), e);
                None
            }
        };
        Self {
            path: path.to_path_buf(),
            writer,
        }
    }

    /// A log that records nothing.
    pub fn disabled() -> Self {
        Self {
            path: PathBuf::new(),
            writer: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    pub fn record(&mut self, line: &str) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(e) = writeln!(writer, "{}", line) {
            warn!("Disabling raw protocol log {}: {}", self.path.display(), e);
            self.writer = None;
        }
    }
}

/// Stateful wrapper around [`parse_line`] for one tool invocation.
#[derive(Debug)]
pub struct ProtocolInterpreter {
    expected_total: Option<u64>,
    track: Option<TrackPosition>,
    raw_log: RawLog,
}

impl Default for ProtocolInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolInterpreter {
    pub fn new() -> Self {
        Self {
            expected_total: None,
            track: None,
            raw_log: RawLog::disabled(),
        }
    }

    pub fn with_expected_total(mut self, expected_total: Option<u64>) -> Self {
        self.expected_total = expected_total;
        self
    }

    pub fn with_track(mut self, track: TrackPosition) -> Self {
        self.track = Some(track);
        self
    }

    pub fn with_raw_log(mut self, raw_log: RawLog) -> Self {
        self.raw_log = raw_log;
        self
    }

    pub fn expected_total(&self) -> Option<u64> {
        self.expected_total
    }

    pub fn interpret(&mut self, line: &str) -> Option<ProtocolEvent> {
        self.raw_log.record(line);
        let event = parse_line(line, self.expected_total, self.track);
        if event.is_none() {
            trace!("unrecognized protocol line: {}", line);
        }
        event
    }
}

/// Folds scan events into a [`DiscInfo`].
#[derive(Debug, Default)]
pub struct DiscScan {
    info: DiscInfo,
    disc_type_seen: bool,
    title_count: Option<u32>,
}

impl DiscScan {
    pub fn new() -> Self {
        Self::default()
    }

    fn title_mut(&mut self, id: u32) -> &mut TitleInfo {
        let index = match self.info.titles.iter().position(|t| t.id == id) {
            Some(index) => index,
            None => {
                self.info.titles.push(TitleInfo::new(id));
                self.info.titles.len() - 1
            }
        };
        &mut self.info.titles[index]
    }

    fn stream_mut(&mut self, title_id: u32, index: u32) -> &mut crate::disc::StreamInfo {
        let title = self.title_mut(title_id);
        let position = match title.streams.iter().position(|s| s.index == index) {
            Some(position) => position,
            None => {
                title.streams.push(crate::disc::StreamInfo {
                    index,
                    kind: StreamKind::Other,
                    language: None,
                });
                title.streams.len() - 1
            }
        };
        &mut title.streams[position]
    }

    pub fn apply(&mut self, event: &ProtocolEvent) {
        match event {
            ProtocolEvent::DiscType(disc_type) => {
                if !self.disc_type_seen {
                    self.info.disc_type = *disc_type;
                    self.disc_type_seen = true;
                }
            }
            ProtocolEvent::DiscName(name) => {
                if self.info.disc_name.is_empty() && !name.trim().is_empty() {
                    self.info.disc_name = name.trim().to_string();
                }
            }
            ProtocolEvent::TitleCount(count) => self.title_count = Some(*count),
            ProtocolEvent::TitleName { title_id, name } => {
                self.title_mut(*title_id).name = Some(name.clone()).filter(|n| !n.is_empty());
            }
            ProtocolEvent::TitleDuration { title_id, seconds } => {
                self.title_mut(*title_id).duration_seconds = *seconds;
            }
            ProtocolEvent::TitleSize { title_id, bytes } => {
                self.title_mut(*title_id).reported_size_bytes = Some(*bytes);
            }
            ProtocolEvent::TitleChapters { title_id, count } => {
                self.title_mut(*title_id).chapter_count = Some(*count);
            }
            ProtocolEvent::TitleOutputFile { title_id, file_name } => {
                self.title_mut(*title_id).output_file_name = Some(file_name.clone());
            }
            ProtocolEvent::StreamKind {
                title_id,
                stream_index,
                kind,
            } => {
                self.stream_mut(*title_id, *stream_index).kind = *kind;
            }
            ProtocolEvent::StreamLanguage {
                title_id,
                stream_index,
                language,
            } => {
                self.stream_mut(*title_id, *stream_index).language = Some(language.clone());
            }
            ProtocolEvent::Progress(_)
            | ProtocolEvent::Caption(_)
            | ProtocolEvent::Message { .. } => {}
        }
    }

    /// Title count announced by the tool, if any.
    pub fn announced_title_count(&self) -> Option<u32> {
        self.title_count
    }

    /// Without a disc or volume name the first named title stands in.
    pub fn finish(mut self) -> DiscInfo {
        if self.info.disc_name.is_empty() {
            let fallback = self.info.titles.iter().find_map(|t| {
                t.name
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
            });
            if let Some(name) = fallback {
                self.info.disc_name = name;
            }
        }
        self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    const SCAN_OUTPUT: &str = r#"MSG:1005,0,1,"MakeMKV v1.17.7 linux(x64-release) started","%1 started","MakeMKV v1.17.7 linux(x64-release)"
DRV:0,2,999,1,"BD-RE HL-DT-ST","SOME_MOVIE","/dev/sr0"
TCOUNT:2
CINFO:1,6209,"Blu-ray disc"
CINFO:2,0,"Some Movie"
CINFO:32,0,"SOME_MOVIE_VOL"
CINFO:1,6206,"DVD disc"
TINFO:0,2,0,"Some Movie"
TINFO:0,8,0,"28"
TINFO:0,9,0,"1:58:31"
TINFO:0,10,0,"33.1 GB"
TINFO:0,11,0,"35543212032"
TINFO:0,27,0,"Some_Movie_t00.mkv"
SINFO:0,0,1,6201,"Video"
SINFO:0,1,1,6202,"Audio"
SINFO:0,1,3,0,"eng"
SINFO:0,2,1,6203,"Subtitles"
SINFO:0,2,3,0,"fra"
TINFO:1,9,0,"0:02:10"
TINFO:1,11,0,"not-a-number"
garbage line without a tag
TINFO:broken"#;

    fn scan(output: &str) -> DiscInfo {
        let mut interpreter = ProtocolInterpreter::new();
        let mut scan = DiscScan::new();
        for line in output.lines() {
            if let Some(event) = interpreter.interpret(line) {
                scan.apply(&event);
            }
        }
        scan.finish()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_duration_round_trip(h in 0u64..100, m in 0u64..60, s in 0u64..60) {
            let text = format!("{:02}:{:02}:{:02}", h, m, s);
            prop_assert_eq!(parse_duration(&text), h * 3600 + m * 60 + s);
        }

        #[test]
        fn prop_malformed_duration_is_zero(text in "[a-zA-Z ]{0,12}") {
            prop_assert_eq!(parse_duration(&text), 0);
        }

        #[test]
        fn prop_fraction_without_total_is_exact(value in 0.0f64..=1.0) {
            let sample = normalize_progress(value, None);
            prop_assert_eq!(sample.fraction, Some(value));
            prop_assert_eq!(sample.byte_estimate, None);
        }

        #[test]
        fn prop_fraction_with_total_stays_in_range(
            value in -10.0f64..1e12,
            total in 1u64..100_000_000_000,
        ) {
            let sample = normalize_progress(value, Some(total));
            let fraction = sample.fraction.unwrap();
            prop_assert!((0.0..=1.0).contains(&fraction));
            prop_assert!(sample.byte_estimate.unwrap() <= total);
        }
    }

    #[test]
    fn test_parse_duration_examples() {
        assert_eq!(parse_duration("1:58:31"), 7111);
        assert_eq!(parse_duration("00:24:00"), 1440);
        assert_eq!(parse_duration(" 0:00:05 "), 5);
        assert_eq!(parse_duration(""), 0);
        assert_eq!(parse_duration("24:00"), 0);
        assert_eq!(parse_duration("1:2:3:4"), 0);
        assert_eq!(parse_duration("-1:00:00"), 0);
        assert_eq!(parse_duration("aa:bb:cc"), 0);
    }

    #[test]
    fn test_normalize_with_total() {
        let total = 4 * 1024 * MIB;
        // fraction
        let s = normalize_progress(0.25, Some(total));
        assert_eq!(s.fraction, Some(0.25));
        assert_eq!(s.byte_estimate, Some(total / 4));
        // percentage on a large total
        let s = normalize_progress(50.0, Some(total));
        assert_eq!(s.fraction, Some(0.5));
        // byte count
        let s = normalize_progress((total / 2) as f64, Some(total));
        assert_eq!(s.fraction, Some(0.5));
        // bytes beyond the total clamp
        let s = normalize_progress((total * 2) as f64, Some(total));
        assert_eq!(s.fraction, Some(1.0));
        assert_eq!(s.byte_estimate, Some(total));
    }

    #[test]
    fn test_normalize_small_total_reads_bytes() {
        // 50 on a 200-byte title is a byte count, not a percentage
        let s = normalize_progress(50.0, Some(200));
        assert_eq!(s.fraction, Some(0.25));
        assert_eq!(s.byte_estimate, Some(50));
    }

    #[test]
    fn test_normalize_without_total() {
        assert_eq!(normalize_progress(40.0, None).fraction, Some(0.4));
        assert_eq!(normalize_progress(4096.0, None).fraction, None);
        assert_eq!(normalize_progress(f64::NAN, None).fraction, Some(0.0));
        assert_eq!(normalize_progress(-3.0, None).fraction, Some(0.0));
    }

    #[test]
    fn test_prgv_uses_total_over_max() {
        let event = parse_line("PRGV:12345,32768,65536", None, None);
        assert_eq!(
            event,
            Some(ProtocolEvent::Progress(ProgressSample {
                fraction: Some(0.5),
                byte_estimate: None,
            }))
        );
    }

    #[test]
    fn test_prgv_single_value_and_zero_max() {
        let event = parse_line("PRGV:0.4", None, None);
        assert!(matches!(
            event,
            Some(ProtocolEvent::Progress(ProgressSample { fraction: Some(f), .. })) if (f - 0.4).abs() < 1e-12
        ));
        let event = parse_line("PRGV:0,75,0", None, None);
        assert!(matches!(
            event,
            Some(ProtocolEvent::Progress(ProgressSample { fraction: Some(f), .. })) if (f - 0.75).abs() < 1e-12
        ));
        assert_eq!(parse_line("PRGV:a,b,c", None, None), None);
    }

    #[test]
    fn test_caption_carries_track_position() {
        let track = TrackPosition { ordinal: 2, total: 5 };
        let event = parse_line(r#"PRGC:5017,0,"Saving to MKV file""#, None, Some(track));
        let Some(ProtocolEvent::Caption(caption)) = event else {
            panic!("expected caption, got {:?}", event);
        };
        assert_eq!(caption.text, "Saving to MKV file");
        assert_eq!(caption.track, Some(track));
        assert_eq!(caption.to_string(), "[2/5] Saving to MKV file");
    }

    #[test]
    fn test_message_event() {
        let event = parse_line(
            r#"MSG:5036,0,1,"Copy complete. 1 titles saved.","Copy complete. %1 titles saved.","1""#,
            None,
            None,
        );
        assert_eq!(
            event,
            Some(ProtocolEvent::Message {
                code: 5036,
                text: "Copy complete. 1 titles saved.".to_string(),
            })
        );
    }

    #[test]
    fn test_quoted_value_with_commas() {
        let event = parse_line(r#"TINFO:3,2,0,"Part One, Part Two""#, None, None);
        assert_eq!(
            event,
            Some(ProtocolEvent::TitleName {
                title_id: 3,
                name: "Part One, Part Two".to_string(),
            })
        );
    }

    #[test]
    fn test_unknown_and_malformed_lines() {
        assert_eq!(parse_line("", None, None), None);
        assert_eq!(parse_line("no tag here", None, None), None);
        assert_eq!(parse_line("TINFO:0,99,0,\"x\"", None, None), None);
        assert_eq!(parse_line("TINFO:x,2,0,\"x\"", None, None), None);
        assert_eq!(parse_line("PRGC:5017,0,unterminated \"quote", None, None), None);
        assert_eq!(parse_line("DRV:0,2,999,1,\"BD\",\"X\",\"/dev/sr0\"", None, None), None);
    }

    #[test]
    fn test_scan_builds_disc_info() {
        let disc = scan(SCAN_OUTPUT);

        // first disc type wins, first non-empty name wins
        assert_eq!(disc.disc_type, DiscType::Bd);
        assert_eq!(disc.disc_name, "Some Movie");
        assert_eq!(disc.titles.len(), 2);

        let feature = &disc.titles[0];
        assert_eq!(feature.id, 0);
        assert_eq!(feature.name.as_deref(), Some("Some Movie"));
        assert_eq!(feature.chapter_count, Some(28));
        assert_eq!(feature.duration_seconds, 7111);
        assert_eq!(feature.reported_size_bytes, Some(35_543_212_032));
        assert_eq!(feature.output_file_name.as_deref(), Some("Some_Movie_t00.mkv"));
        assert_eq!(feature.streams.len(), 3);
        assert_eq!(feature.streams[1].kind, StreamKind::Audio);
        assert_eq!(feature.streams[1].language.as_deref(), Some("eng"));
        assert_eq!(feature.streams[2].kind, StreamKind::Subtitle);

        // created lazily from a duration line; unparseable size stays unset
        let extra = &disc.titles[1];
        assert_eq!(extra.id, 1);
        assert_eq!(extra.duration_seconds, 130);
        assert_eq!(extra.reported_size_bytes, None);
    }

    #[test]
    fn test_volume_name_used_when_name_missing() {
        let disc = scan("CINFO:2,0,\"\"\nCINFO:32,0,\"VOLUME_LABEL\"\nCINFO:2,0,\"Later Name\"");
        assert_eq!(disc.disc_name, "VOLUME_LABEL");
    }

    #[test]
    fn test_title_name_used_when_disc_unnamed() {
        let disc = scan("TINFO:0,9,0,\"0:45:00\"\nTINFO:1,2,0,\"  \"\nTINFO:2,2,0,\"Pilot\"\nTINFO:3,2,0,\"Finale\"");
        assert_eq!(disc.disc_name, "Pilot");

        let disc = scan("CINFO:2,0,\"Box Set\"\nTINFO:0,2,0,\"Pilot\"");
        assert_eq!(disc.disc_name, "Box Set");
    }

    #[test]
    fn test_announced_title_count() {
        let mut scan = DiscScan::new();
        scan.apply(&ProtocolEvent::TitleCount(7));
        assert_eq!(scan.announced_title_count(), Some(7));
    }

    #[test]
    fn test_raw_log_records_every_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("makemkv.log");
        let mut interpreter = ProtocolInterpreter::new().with_raw_log(RawLog::open(&path));
        interpreter.interpret("garbage");
        interpreter.interpret("TCOUNT:1");
        drop(interpreter);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "garbage\nTCOUNT:1\n");
    }

    #[test]
    fn test_raw_log_open_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing-dir").join("makemkv.log");
        let mut log = RawLog::open(&path);
        assert!(!log.is_enabled());
        log.record("still fine");
    }
}
