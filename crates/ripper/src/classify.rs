//! Classifier module for deciding whether a disc holds a movie or a series.
//!
//! Discs rarely describe their own content, so the decision is made from the
//! shape of the title-duration distribution: a single feature, a feature with
//! short extras, or a cluster of similar-length episodes.

use serde::{Deserialize, Serialize};

/// What a disc contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// One feature (possibly in several cuts) plus extras.
    Movie,
    /// Several similar-length installments.
    Series,
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentType::Movie => write!(f, "movie"),
            ContentType::Series => write!(f, "series"),
        }
    }
}

/// Classifier output: a leaning plus how much to trust it.
///
/// `leaning` is `None` when no rule matched at all. A `Some` leaning with a
/// confidence under the caller's threshold still counts as uncertain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub leaning: Option<ContentType>,
    pub confidence: f64,
}

impl Classification {
    fn new(leaning: ContentType, confidence: f64) -> Self {
        Self {
            leaning: Some(leaning),
            confidence,
        }
    }

    fn uncertain(confidence: f64) -> Self {
        Self {
            leaning: None,
            confidence,
        }
    }

    pub fn is_confident(&self, threshold: f64) -> bool {
        self.leaning.is_some() && self.confidence >= threshold
    }

    /// The leaning if it clears `threshold`, otherwise `None`.
    pub fn decided(&self, threshold: f64) -> Option<ContentType> {
        if self.is_confident(threshold) {
            self.leaning
        } else {
            None
        }
    }
}

/// Titles at or below this length are extras (trailers, featurettes, menus).
const SHORT_MAX_SECS: u64 = 900;
/// Inclusive range of typical episode lengths.
const TV_LIKE_MIN_SECS: u64 = 1200;
const TV_LIKE_MAX_SECS: u64 = 3300;
/// Titles longer than this are feature-length.
const LONG_MIN_SECS: u64 = 4800;
/// Two titles this long with a ratio under `ALTERNATE_CUT_RATIO` are cuts of one film.
const ALTERNATE_CUT_MIN_SECS: u64 = 1800;
const ALTERNATE_CUT_RATIO: f64 = 1.3;
/// Coefficient of variation under which substantial titles count as one cluster.
const CLUSTER_MAX_CV: f64 = 0.18;

/// Longer than an extra.
pub fn is_substantial(duration_seconds: u64) -> bool {
    duration_seconds > SHORT_MAX_SECS
}

/// True for three or more substantial durations of near-identical length.
pub fn is_substantial_cluster(durations: &[u64]) -> bool {
    durations.len() >= 3
        && durations.iter().all(|&d| is_substantial(d))
        && mean_and_cv(durations).map_or(false, |(_, cv)| cv < CLUSTER_MAX_CV)
}

/// Classifies a disc from its title durations (seconds).
///
/// Rules, first match wins:
/// 1. No titles -> uncertain (0.0)
/// 2. One title -> movie (0.95)
/// 3. Two titles -> main feature + bonus, alternate cuts, or a weak movie lean
/// 4. Three or more -> bucket the durations and look for an episode cluster,
///    a feature with extras, two cuts, a substantial cluster, or mostly extras
pub fn classify(durations: &[u64]) -> Classification {
    match durations.len() {
        0 => Classification::uncertain(0.0),
        1 => Classification::new(ContentType::Movie, 0.95),
        2 => classify_pair(durations[0], durations[1]),
        _ => classify_many(durations),
    }
}

fn classify_pair(a: u64, b: u64) -> Classification {
    let longer = a.max(b);
    let shorter = a.min(b);

    if longer == 0 {
        return Classification::new(ContentType::Movie, 0.3);
    }

    if shorter > 0 && longer >= shorter.saturating_mul(3) {
        return Classification::new(ContentType::Movie, 0.85);
    }

    if shorter > ALTERNATE_CUT_MIN_SECS && (longer as f64 / shorter as f64) < ALTERNATE_CUT_RATIO {
        return Classification::new(ContentType::Movie, 0.75);
    }

    Classification::new(ContentType::Movie, 0.5)
}

fn classify_many(durations: &[u64]) -> Classification {
    let total = durations.len();

    let short = durations.iter().filter(|&&d| d <= SHORT_MAX_SECS).count();
    let long = durations.iter().filter(|&&d| d > LONG_MIN_SECS).count();
    let tv_like: Vec<u64> = durations
        .iter()
        .copied()
        .filter(|d| (TV_LIKE_MIN_SECS..=TV_LIKE_MAX_SECS).contains(d))
        .collect();
    let substantial: Vec<u64> = durations
        .iter()
        .copied()
        .filter(|&d| is_substantial(d))
        .collect();

    // at least 60% of all titles look like episodes
    if tv_like.len() >= 3 && tv_like.len() * 10 >= total * 6 {
        if let Some((mean, cv)) = mean_and_cv(&tv_like) {
            if mean > 0.0 {
                if cv < 0.15 {
                    return Classification::new(ContentType::Series, 0.92);
                }
                if cv < 0.25 {
                    return Classification::new(ContentType::Series, 0.78);
                }
            }
        }
    }

    if long == 1 && short >= 2 && total >= 4 {
        return Classification::new(ContentType::Movie, 0.85);
    }

    if long == 2 && tv_like.len() <= 1 {
        return Classification::new(ContentType::Movie, 0.75);
    }

    if short == 0 && is_substantial_cluster(&substantial) {
        return Classification::new(ContentType::Series, 0.8);
    }

    if short >= 3 && substantial.len() <= 2 {
        return Classification::new(ContentType::Movie, 0.7);
    }

    Classification::uncertain(0.5)
}

/// Mean and coefficient of variation (population standard deviation / mean).
///
/// Returns `None` for an empty slice or a zero mean.
fn mean_and_cv(values: &[u64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    if mean <= 0.0 {
        return None;
    }
    let variance = values
        .iter()
        .map(|&v| {
            let diff = v as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / n;
    Some((mean, variance.sqrt() / mean))
}
