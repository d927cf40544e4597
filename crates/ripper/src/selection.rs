//! Chooses which disc titles to extract.

use crate::classify::{is_substantial, is_substantial_cluster, ContentType};
use crate::disc::{DiscInfo, TitleInfo};
use tracing::{info, warn};

/// Shortest title accepted as an episode.
pub const EPISODE_MIN_SECS: u64 = 1200;
/// Longest title accepted as an episode.
pub const EPISODE_MAX_SECS: u64 = 3600;
/// Shortest title accepted as a movie feature.
pub const MOVIE_MIN_SECS: u64 = 2700;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionOptions {
    /// Title ids chosen by the user; when non-empty nothing else is considered
    pub explicit_titles: Vec<u32>,
    /// Keep every feature-length title instead of only the longest
    pub include_alternate_cuts: bool,
}

/// Pick the titles to extract, in extraction order.
pub fn select_titles(
    disc: &DiscInfo,
    content_type: ContentType,
    options: &SelectionOptions,
) -> Vec<TitleInfo> {
    if !options.explicit_titles.is_empty() {
        return select_explicit(disc, &options.explicit_titles);
    }

    let selected = match content_type {
        ContentType::Series => select_episodes(disc),
        ContentType::Movie => select_features(disc, options.include_alternate_cuts),
    };
    info!(
        "Selected {} title(s) as {}: {:?}",
        selected.len(),
        content_type,
        selected.iter().map(|t| t.id).collect::<Vec<_>>()
    );
    selected
}

fn select_explicit(disc: &DiscInfo, ids: &[u32]) -> Vec<TitleInfo> {
    let mut selected: Vec<TitleInfo> = Vec::new();
    for &id in ids {
        if selected.iter().any(|t| t.id == id) {
            continue;
        }
        match disc.title(id) {
            Some(title) => selected.push(title.clone()),
            None => warn!("Title {} is not on this disc; skipping", id),
        }
    }
    selected
}

/// Episodes are titles in the usual episode range. When every substantial
/// title forms one tight cluster that reaches outside that range (hour-long
/// or short-form episodes), the whole cluster is taken instead.
fn select_episodes(disc: &DiscInfo) -> Vec<TitleInfo> {
    let in_range: Vec<&TitleInfo> = disc
        .titles
        .iter()
        .filter(|t| (EPISODE_MIN_SECS..=EPISODE_MAX_SECS).contains(&t.duration_seconds))
        .collect();
    let substantial: Vec<&TitleInfo> = disc
        .titles
        .iter()
        .filter(|t| is_substantial(t.duration_seconds))
        .collect();
    let durations: Vec<u64> = substantial.iter().map(|t| t.duration_seconds).collect();

    let candidates = if substantial.len() > in_range.len() && is_substantial_cluster(&durations) {
        info!(
            "Episode lengths fall outside {}-{}s; taking all {} similar-length titles",
            EPISODE_MIN_SECS,
            EPISODE_MAX_SECS,
            substantial.len()
        );
        substantial
    } else {
        in_range
    };

    let mut episodes: Vec<TitleInfo> = candidates
        .into_iter()
        .filter(|t| t.chapter_count.map_or(true, |chapters| chapters >= 1))
        .cloned()
        .collect();
    episodes.sort_by_key(|t| t.id);
    episodes
}

fn select_features(disc: &DiscInfo, include_alternate_cuts: bool) -> Vec<TitleInfo> {
    let mut features: Vec<TitleInfo> = disc
        .titles
        .iter()
        .filter(|t| t.duration_seconds >= MOVIE_MIN_SECS)
        .cloned()
        .collect();
    // longest first; ties keep disc order
    features.sort_by(|a, b| b.duration_seconds.cmp(&a.duration_seconds));

    if !include_alternate_cuts {
        features.truncate(1);
    }
    features
}
