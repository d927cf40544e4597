//! Output naming and per-title plans.

use crate::classify::ContentType;
use crate::disc::TitleInfo;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Subdirectory of the temp dir that holds finished encodes before the move.
pub const ENCODED_SUBDIR: &str = "encoded";

/// Everything known about one selected title before extraction starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitlePlan {
    pub title_id: u32,
    /// Zero-based position in the selection
    pub sequence_index: usize,
    pub episode_number: Option<u32>,
    pub episode_title: Option<String>,
    /// Where the transcode writes before the file is moved into place
    pub temp_output_path: PathBuf,
    pub final_file_name: String,
    /// Ordinal suffix separating several movie titles ("title01")
    pub suffix: Option<String>,
    pub display_name: String,
}

/// Naming inputs shared by every plan in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingContext {
    pub content_type: ContentType,
    pub title: String,
    pub year: Option<u32>,
    pub season: u32,
    pub episode_start: u32,
}

impl NamingContext {
    /// Episode number for the title at `sequence_index`.
    pub fn episode_number(&self, sequence_index: usize) -> u32 {
        self.episode_start.saturating_add(sequence_index as u32)
    }
}

/// Strip characters that are invalid in file names on common filesystems.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .filter(|c| !c.is_control())
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "Unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `"<Title> - S<ss>E<ee>[ - <Episode Title>].mkv"`
pub fn episode_file_name(
    title: &str,
    season: u32,
    episode: u32,
    episode_title: Option<&str>,
) -> String {
    let mut name = format!("{} - S{:02}E{:02}", sanitize_file_name(title), season, episode);
    if let Some(episode_title) = episode_title.map(str::trim).filter(|t| !t.is_empty()) {
        name.push_str(" - ");
        name.push_str(&sanitize_file_name(episode_title));
    }
    name.push_str(".mkv");
    name
}

/// `"<Title> (<Year>)[ - <suffix>].mkv"`, or without the year when unknown.
pub fn movie_file_name(title: &str, year: Option<u32>, suffix: Option<&str>) -> String {
    let mut name = sanitize_file_name(title);
    if let Some(year) = year {
        name.push_str(&format!(" ({})", year));
    }
    if let Some(suffix) = suffix {
        name.push_str(" - ");
        name.push_str(suffix);
    }
    name.push_str(".mkv");
    name
}

/// Build a plan for each selected title, in selection order.
///
/// `episode_titles` maps episode numbers to names found by the episode lookup.
pub fn plan_titles(
    titles: &[TitleInfo],
    ctx: &NamingContext,
    episode_titles: &HashMap<u32, String>,
    temp_dir: &Path,
) -> Vec<TitlePlan> {
    let encoded_dir = temp_dir.join(ENCODED_SUBDIR);
    let disambiguate = ctx.content_type == ContentType::Movie && titles.len() > 1;

    titles
        .iter()
        .enumerate()
        .map(|(sequence_index, title)| {
            let (episode_number, episode_title, suffix, final_file_name) = match ctx.content_type
            {
                ContentType::Series => {
                    let episode = ctx.episode_number(sequence_index);
                    let episode_title = episode_titles.get(&episode).cloned();
                    let name = episode_file_name(
                        &ctx.title,
                        ctx.season,
                        episode,
                        episode_title.as_deref(),
                    );
                    (Some(episode), episode_title, None, name)
                }
                ContentType::Movie => {
                    let suffix = disambiguate.then(|| format!("title{:02}", sequence_index + 1));
                    let name = movie_file_name(&ctx.title, ctx.year, suffix.as_deref());
                    (None, None, suffix, name)
                }
            };

            let display_name = final_file_name
                .strip_suffix(".mkv")
                .unwrap_or(&final_file_name)
                .to_string();
            TitlePlan {
                title_id: title.id,
                sequence_index,
                episode_number,
                episode_title,
                temp_output_path: encoded_dir.join(&final_file_name),
                final_file_name,
                suffix,
                display_name,
            }
        })
        .collect()
}
