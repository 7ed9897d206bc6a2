//! Adjustment factors
//!
//! The nine independent signals whose weighted sum perturbs an account
//! baseline. The applicability matrix is authoritative: an inapplicable
//! factor contributes adjustment 0 at computation time, regardless of what
//! historical cache rows might exist for it.

use crate::db::models::{Content, ContentFormat, Publication};
use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The closed set of adjustment factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    HookType,
    ContentLength,
    PostHour,
    PostWeekday,
    Niche,
    NarrativeStructure,
    SoundBgm,
    HashtagKeyword,
    CrossAccountPerformance,
}

impl Factor {
    pub const ALL: [Factor; 9] = [
        Factor::HookType,
        Factor::ContentLength,
        Factor::PostHour,
        Factor::PostWeekday,
        Factor::Niche,
        Factor::NarrativeStructure,
        Factor::SoundBgm,
        Factor::HashtagKeyword,
        Factor::CrossAccountPerformance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Factor::HookType => "hook_type",
            Factor::ContentLength => "content_length",
            Factor::PostHour => "post_hour",
            Factor::PostWeekday => "post_weekday",
            Factor::Niche => "niche",
            Factor::NarrativeStructure => "narrative_structure",
            Factor::SoundBgm => "sound_bgm",
            Factor::HashtagKeyword => "hashtag_keyword",
            Factor::CrossAccountPerformance => "cross_account_performance",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Factor::ALL.iter().copied().find(|f| f.as_str() == s)
    }

    /// Whether this factor applies to a content format.
    ///
    /// `sound_bgm` only ever applies to short videos; duration and narrative
    /// shape have no meaning for a still image.
    pub fn applies_to(&self, format: ContentFormat) -> bool {
        match self {
            Factor::SoundBgm => matches!(format, ContentFormat::ShortVideo),
            Factor::ContentLength | Factor::NarrativeStructure => {
                !matches!(format, ContentFormat::ImagePost)
            }
            _ => true,
        }
    }

    /// Factors whose historical performance is precomputed into the cache.
    /// `cross_account_performance` is always computed live.
    pub fn is_cached(&self) -> bool {
        !matches!(self, Factor::CrossAccountPerformance)
    }
}

/// Duration bucket labels for the content_length factor.
pub fn duration_bucket(seconds: f64) -> &'static str {
    if seconds <= 15.0 {
        "0-15s"
    } else if seconds <= 30.0 {
        "16-30s"
    } else if seconds <= 60.0 {
        "31-60s"
    } else {
        "60s+"
    }
}

/// UTC hour-of-day bucket labels for the post_hour factor.
pub fn hour_bucket(hour: u32) -> &'static str {
    match hour {
        0..=5 => "00-05",
        6..=8 => "06-08",
        9..=11 => "09-11",
        12..=14 => "12-14",
        15..=17 => "15-17",
        18..=20 => "18-20",
        _ => "21-23",
    }
}

/// Resolved factor values for one publication. `None` means the factor has no
/// value here (inapplicable format, or simply absent data) and contributes a
/// zero adjustment.
pub type FactorValues = BTreeMap<Factor, Option<String>>;

/// Resolve the value of every applicable factor from content + publication.
pub fn resolve_factor_values(content: &Content, publication: &Publication) -> FactorValues {
    let format = content.content_format;
    let mut values = FactorValues::new();

    for factor in Factor::ALL {
        let value = if !factor.applies_to(format) {
            None
        } else {
            match factor {
                Factor::HookType => content.hook_type.clone(),
                Factor::Niche => content.niche.clone(),
                Factor::NarrativeStructure => content.narrative_structure.clone(),
                Factor::ContentLength => content
                    .total_duration_seconds
                    .map(|d| duration_bucket(d).to_string()),
                Factor::PostHour => {
                    Some(hour_bucket(publication.posted_at.hour()).to_string())
                }
                Factor::PostWeekday => {
                    Some(publication.posted_at.weekday().num_days_from_sunday().to_string())
                }
                Factor::SoundBgm => content.sound_bgm.clone(),
                Factor::HashtagKeyword => content
                    .tags
                    .as_ref()
                    .and_then(|tags| tags.0.first().cloned()),
                // Live-computed, carries its numeric value instead
                Factor::CrossAccountPerformance => None,
            }
        };
        values.insert(factor, value);
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applicability_matrix() {
        assert!(Factor::SoundBgm.applies_to(ContentFormat::ShortVideo));
        assert!(!Factor::SoundBgm.applies_to(ContentFormat::TextPost));
        assert!(!Factor::SoundBgm.applies_to(ContentFormat::ImagePost));

        assert!(Factor::ContentLength.applies_to(ContentFormat::ShortVideo));
        assert!(Factor::ContentLength.applies_to(ContentFormat::TextPost));
        assert!(!Factor::ContentLength.applies_to(ContentFormat::ImagePost));

        assert!(!Factor::NarrativeStructure.applies_to(ContentFormat::ImagePost));

        // Everything else applies everywhere
        for format in [
            ContentFormat::ShortVideo,
            ContentFormat::TextPost,
            ContentFormat::ImagePost,
        ] {
            assert!(Factor::HookType.applies_to(format));
            assert!(Factor::PostHour.applies_to(format));
            assert!(Factor::CrossAccountPerformance.applies_to(format));
        }
    }

    #[test]
    fn duration_buckets() {
        assert_eq!(duration_bucket(10.0), "0-15s");
        assert_eq!(duration_bucket(15.0), "0-15s");
        assert_eq!(duration_bucket(16.0), "16-30s");
        assert_eq!(duration_bucket(45.0), "31-60s");
        assert_eq!(duration_bucket(61.0), "60s+");
    }

    #[test]
    fn hour_buckets() {
        assert_eq!(hour_bucket(0), "00-05");
        assert_eq!(hour_bucket(5), "00-05");
        assert_eq!(hour_bucket(6), "06-08");
        assert_eq!(hour_bucket(13), "12-14");
        assert_eq!(hour_bucket(23), "21-23");
    }

    #[test]
    fn factor_name_roundtrip() {
        for factor in Factor::ALL {
            assert_eq!(Factor::from_str(factor.as_str()), Some(factor));
        }
        assert_eq!(Factor::from_str("unknown_factor"), None);
    }
}
