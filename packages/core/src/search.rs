//! Clip search scoring and the shoutout clip-selection flow.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use rand::seq::SliceRandom;

use crate::config::{ClipSearchConfig, ShoutoutConfig};
use crate::error::AppResult;
use crate::model::ClipData;
use crate::platform::PlatformClient;

const SUBSTRING_SCORE: f64 = 100.0;
const WORD_MATCH_SCALE: f64 = 80.0;
const LEVENSHTEIN_SCALE: f64 = 60.0;

/// Scores a clip title against free-text search terms. Higher is better;
/// zero means "no match".
#[must_use]
pub fn score_title(title: &str, terms: &str, fuzzy_threshold: f64) -> f64 {
    let title_lower = title.to_lowercase();
    let terms_lower = terms.to_lowercase();

    if terms_lower.is_empty() {
        return 0.0;
    }

    if title_lower.contains(&terms_lower) {
        return SUBSTRING_SCORE;
    }

    let term_words: Vec<&str> = terms_lower.split_whitespace().collect();
    if !term_words.is_empty() {
        let matched = term_words
            .iter()
            .filter(|w| title_lower.contains(**w))
            .count();
        if matched > 0 {
            return (matched as f64 / term_words.len() as f64) * WORD_MATCH_SCALE;
        }
    }

    let similarity = strsim::normalized_levenshtein(&title_lower, &terms_lower);
    if similarity >= fuzzy_threshold {
        return similarity * LEVENSHTEIN_SCALE;
    }

    0.0
}

/// Clip search over a single broadcaster's recent clip history.
pub struct ClipSearchService {
    platform: Arc<dyn PlatformClient>,
    config: ClipSearchConfig,
}

impl ClipSearchService {
    #[must_use]
    pub fn new(platform: Arc<dyn PlatformClient>, config: ClipSearchConfig) -> Self {
        Self { platform, config }
    }

    /// Finds and ranks clips matching `terms` for `broadcaster_name`.
    pub async fn search(&self, broadcaster_name: &str, terms: &str) -> AppResult<Vec<ClipData>> {
        let Some(broadcaster_id) = self.platform.get_broadcaster_id_by_name(broadcaster_name).await? else {
            return Ok(Vec::new());
        };

        let started_at = Utc::now() - ChronoDuration::days(i64::from(self.config.search_window_days));
        let clips = self
            .platform
            .get_clips_by_broadcaster(&broadcaster_id, 100, Some(started_at), None)
            .await?;

        let mut scored: Vec<(f64, ClipData)> = clips
            .into_iter()
            .map(|clip| {
                let score = score_title(&clip.title, terms, self.config.fuzzy_match_threshold);
                (score, clip)
            })
            .filter(|(score, _)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.config.max_results);

        Ok(scored.into_iter().map(|(_, clip)| clip).collect())
    }

    /// Returns only the best match, if any.
    pub async fn search_top(&self, broadcaster_name: &str, terms: &str) -> AppResult<Option<ClipData>> {
        Ok(self.search(broadcaster_name, terms).await?.into_iter().next())
    }
}

/// Widens the search window over fixed day tiers until clips exist, then
/// picks one at random subject to length and "featured first" preference.
pub struct ShoutoutClipPicker {
    platform: Arc<dyn PlatformClient>,
    config: ShoutoutConfig,
}

impl ShoutoutClipPicker {
    #[must_use]
    pub fn new(platform: Arc<dyn PlatformClient>, config: ShoutoutConfig) -> Self {
        Self { platform, config }
    }

    pub async fn pick(&self, broadcaster_id: &str) -> AppResult<Option<ClipData>> {
        for days in &self.config.max_clip_age_days_tiers {
            let started_at = Utc::now() - ChronoDuration::days(i64::from(*days));
            let clips = self
                .platform
                .get_clips_by_broadcaster(broadcaster_id, 100, Some(started_at), None)
                .await?;

            let eligible: Vec<ClipData> = clips
                .into_iter()
                .filter(|c| c.duration_seconds <= self.config.max_clip_length_seconds)
                .collect();

            if eligible.is_empty() {
                continue;
            }

            let pool: Vec<&ClipData> = if self.config.use_featured_clips_first {
                let featured: Vec<&ClipData> = eligible.iter().filter(|c| c.is_featured()).collect();
                if featured.is_empty() {
                    eligible.iter().collect()
                } else {
                    featured
                }
            } else {
                eligible.iter().collect()
            };

            if let Some(chosen) = pool.choose(&mut rand::thread_rng()) {
                return Ok(Some((*chosen).clone()));
            }
        }

        Ok(None)
    }
}

/// Formats the shoutout chat message template's placeholders.
#[must_use]
pub fn format_shoutout_message(template: &str, channel: &str, broadcaster: &str, game: &str) -> String {
    template
        .replace("{channel}", channel)
        .replace("{broadcaster}", broadcaster)
        .replace("{game}", game)
}
