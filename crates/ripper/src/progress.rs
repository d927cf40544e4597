//! Progress meters and the per-title extraction estimator.
//!
//! Each meter is shared between the stage that drives it and whoever renders
//! it, behind its own lock. Values are integers on a scale of [`SCALE_UNIT`]
//! per title.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Meter units per title per stage.
pub const SCALE_UNIT: u64 = 1000;

/// Messages kept in a meter's rolling log.
pub const LOG_CAPACITY: usize = 50;

/// Highest fraction shown for a title before its tool reports success.
pub const MAX_UNCONFIRMED_FRACTION: f64 = 0.99;

#[derive(Debug)]
struct MeterState {
    value: u64,
    max_value: u64,
    description: String,
    log: VecDeque<String>,
    started: Instant,
    stopped_at: Option<Instant>,
}

/// Point-in-time copy of a meter.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterSnapshot {
    pub value: u64,
    pub max_value: u64,
    pub description: String,
    pub log: Vec<String>,
    pub elapsed: Duration,
    pub stopped: bool,
}

impl MeterSnapshot {
    pub fn fraction(&self) -> f64 {
        if self.max_value == 0 {
            0.0
        } else {
            self.value as f64 / self.max_value as f64
        }
    }
}

/// A shared progress meter.
#[derive(Debug, Clone)]
pub struct ProgressMeter {
    inner: Arc<Mutex<MeterState>>,
}

impl ProgressMeter {
    pub fn new(description: impl Into<String>, max_value: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MeterState {
                value: 0,
                max_value,
                description: description.into(),
                log: VecDeque::new(),
                started: Instant::now(),
                stopped_at: None,
            })),
        }
    }

    // a panic while holding the lock leaves plain numbers behind; keep going
    fn state(&self) -> MutexGuard<'_, MeterState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the value, clamped to the maximum.
    pub fn set(&self, value: u64) {
        let mut state = self.state();
        state.value = value.min(state.max_value);
    }

    /// Set from a fraction of the maximum. Out-of-range input is clamped.
    pub fn set_fraction(&self, fraction: f64) {
        let mut state = self.state();
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        state.value = (fraction * state.max_value as f64).round() as u64;
    }

    /// Increase the value, saturating at the maximum.
    pub fn advance(&self, delta: u64) {
        let mut state = self.state();
        state.value = state.value.saturating_add(delta).min(state.max_value);
    }

    pub fn complete(&self) {
        let mut state = self.state();
        state.value = state.max_value;
    }

    /// Start over for a new unit of work.
    pub fn reset(&self, description: impl Into<String>) {
        let mut state = self.state();
        state.value = 0;
        state.description = description.into();
    }

    pub fn set_description(&self, description: impl Into<String>) {
        self.state().description = description.into();
    }

    /// Append to the rolling log, dropping the oldest entry when full.
    pub fn log(&self, message: impl Into<String>) {
        let mut state = self.state();
        if state.log.len() >= LOG_CAPACITY {
            state.log.pop_front();
        }
        state.log.push_back(message.into());
    }

    /// Freeze the elapsed clock.
    pub fn stop(&self) {
        let mut state = self.state();
        if state.stopped_at.is_none() {
            state.stopped_at = Some(Instant::now());
        }
    }

    pub fn value(&self) -> u64 {
        self.state().value
    }

    pub fn max_value(&self) -> u64 {
        self.state().max_value
    }

    pub fn snapshot(&self) -> MeterSnapshot {
        let state = self.state();
        let end = state.stopped_at.unwrap_or_else(Instant::now);
        MeterSnapshot {
            value: state.value,
            max_value: state.max_value,
            description: state.description.clone(),
            log: state.log.iter().cloned().collect(),
            elapsed: end.saturating_duration_since(state.started),
            stopped: state.stopped_at.is_some(),
        }
    }
}

/// The three meters of one run.
#[derive(Debug, Clone)]
pub struct PipelineMeters {
    pub rip: ProgressMeter,
    pub encode: ProgressMeter,
    /// One rip unit plus one encode unit per title; only ever advances
    pub overall: ProgressMeter,
}

impl PipelineMeters {
    pub fn new(title_count: usize) -> Self {
        let titles = title_count as u64;
        Self {
            rip: ProgressMeter::new("Extracting", SCALE_UNIT),
            encode: ProgressMeter::new("Transcoding", SCALE_UNIT),
            overall: ProgressMeter::new("Overall", 2 * titles * SCALE_UNIT),
        }
    }

    pub fn stop_all(&self) {
        self.rip.stop();
        self.encode.stop();
        self.overall.stop();
    }
}

/// Blends the signals available while a title is extracted into one
/// never-decreasing fraction.
///
/// Tiers, best first: the tool's own fraction; bytes written against the
/// expected size; elapsed time against 1.2x the title's duration; output
/// file growth against the largest file seen so far this run; and finally a
/// slow nudge toward 10% so a silent tool still shows life.
#[derive(Debug, Clone)]
pub struct TitleProgressEstimator {
    expected_bytes: Option<u64>,
    duration_secs: u64,
    reference_size: Option<u64>,
    started: Instant,
    fraction: Option<f64>,
    bytes: Option<u64>,
    file_size: Option<u64>,
    displayed: f64,
    finished: bool,
}

const TIME_PROXY_FACTOR: f64 = 1.2;
const GROWTH_SCALE: f64 = 0.8;
const NUDGE_AFTER: Duration = Duration::from_secs(3);
const NUDGE_CAP: f64 = 0.10;
const NUDGE_RAMP_SECS: f64 = 60.0;

impl TitleProgressEstimator {
    pub fn new(
        expected_bytes: Option<u64>,
        duration_secs: u64,
        reference_size: Option<u64>,
        started: Instant,
    ) -> Self {
        Self {
            expected_bytes: expected_bytes.filter(|&b| b > 0),
            duration_secs,
            reference_size: reference_size.filter(|&b| b > 0),
            started,
            fraction: None,
            bytes: None,
            file_size: None,
            displayed: 0.0,
            finished: false,
        }
    }

    pub fn observe_fraction(&mut self, fraction: f64) {
        if fraction.is_finite() {
            self.fraction = Some(fraction.clamp(0.0, 1.0));
        }
    }

    pub fn observe_bytes(&mut self, bytes: u64) {
        self.bytes = Some(bytes);
    }

    pub fn observe_file_size(&mut self, size: u64) {
        self.file_size = Some(size);
    }

    /// Whether any byte or fraction signal has arrived from the tool.
    pub fn has_direct_signal(&self) -> bool {
        self.fraction.is_some() || self.bytes.is_some()
    }

    fn tier_estimate(&self, now: Instant) -> Option<f64> {
        if let Some(fraction) = self.fraction {
            return Some(fraction);
        }
        if let (Some(bytes), Some(total)) = (self.bytes, self.expected_bytes) {
            return Some(bytes as f64 / total as f64);
        }

        let elapsed = now.saturating_duration_since(self.started);
        if self.duration_secs > 0 {
            return Some(
                elapsed.as_secs_f64() / (self.duration_secs as f64 * TIME_PROXY_FACTOR),
            );
        }

        if self.expected_bytes.is_none() {
            if let (Some(size), Some(reference)) = (self.file_size, self.reference_size) {
                let growth = size as f64 / reference as f64 * GROWTH_SCALE;
                return Some(growth.min(MAX_UNCONFIRMED_FRACTION));
            }
        }

        if elapsed > NUDGE_AFTER {
            let ramp = (elapsed.as_secs_f64() / NUDGE_RAMP_SECS).min(1.0);
            return Some(NUDGE_CAP * ramp);
        }
        None
    }

    /// Current displayed fraction; never lower than any earlier result.
    pub fn estimate_at(&mut self, now: Instant) -> f64 {
        if self.finished {
            return 1.0;
        }
        if let Some(estimate) = self.tier_estimate(now) {
            let capped = estimate.clamp(0.0, MAX_UNCONFIRMED_FRACTION);
            self.displayed = self.displayed.max(capped);
        }
        self.displayed
    }

    pub fn estimate(&mut self) -> f64 {
        self.estimate_at(Instant::now())
    }

    /// The tool reported success.
    pub fn finish(&mut self) -> f64 {
        self.finished = true;
        self.displayed = 1.0;
        self.displayed
    }
}
