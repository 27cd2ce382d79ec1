use super::SkipType;
use crate::playback::PlaybackSnapshot;
use std::collections::VecDeque;

/// Anything under this much exposure is a quick sample, whatever the track length.
pub const PREVIEW_LIMIT_MS: u64 = 2_000;
pub const NEAR_END_START: f64 = 0.90;
pub const COMPLETION_FRACTION: f64 = 0.98;
/// Skips under this fraction count towards the quick-skip streak.
pub const QUICK_SKIP_FRACTION: f64 = 0.05;
pub const QUICK_SKIP_STREAK: u32 = 3;
pub const PATTERN_WINDOW: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionVerdict {
    pub is_skip: bool,
    pub skip_type: SkipType,
    pub confidence: f64,
    pub reason: String,
}

impl TransitionVerdict {
    fn skip(skip_type: SkipType, confidence: f64, reason: String) -> Self {
        Self {
            is_skip: true,
            skip_type,
            confidence,
            reason,
        }
    }

    fn not_skip(confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            is_skip: false,
            skip_type: SkipType::None,
            confidence,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntentVerdict {
    pub is_manual: bool,
    pub confidence: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecentSkip {
    pub track_id: String,
    pub timestamp: i64,
    pub progress_fraction: f64,
}

/// Decide whether the track that just ended was skipped. First matching rule wins.
///
/// The threshold rule runs before the near-end rule, so with a threshold at or
/// above 0.90 a late skip is reported as `standard`, never `near_end`.
pub fn classify_transition(previous: &PlaybackSnapshot, skip_threshold: f64) -> TransitionVerdict {
    let (Some(duration), Some(progress)) = (
        previous.current_track_duration.filter(|d| *d > 0),
        previous.last_progress,
    ) else {
        return TransitionVerdict::not_skip(0.0, "Missing duration or progress data");
    };

    if progress < PREVIEW_LIMIT_MS {
        return TransitionVerdict::skip(
            SkipType::Preview,
            0.9,
            format!("Played only {}ms before moving on", progress),
        );
    }

    let fraction = progress as f64 / duration as f64;

    if fraction < skip_threshold {
        let confidence = (1.0 - fraction / skip_threshold).min(0.95);
        return TransitionVerdict::skip(
            SkipType::Standard,
            confidence,
            format!(
                "Played {:.1}% of track, below the {:.0}% threshold",
                fraction * 100.0,
                skip_threshold * 100.0
            ),
        );
    }

    if fraction > NEAR_END_START && fraction < COMPLETION_FRACTION {
        return TransitionVerdict::skip(
            SkipType::NearEnd,
            0.7,
            format!("Skipped near the end at {:.1}%", fraction * 100.0),
        );
    }

    if fraction >= COMPLETION_FRACTION {
        return TransitionVerdict::not_skip(0.95, "Track played to completion");
    }

    TransitionVerdict::not_skip(0.0, format!("Played {:.1}%, no skip rule matched", fraction * 100.0))
}

/// Owns the only cross-call state of the skip logic: the short window of
/// recent skips and the quick-skip streak. Reset it at session boundaries.
#[derive(Debug, Default)]
pub struct SkipClassifier {
    recent: VecDeque<RecentSkip>,
    consecutive_quick_skips: u32,
}

impl SkipClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify_transition(&self, previous: &PlaybackSnapshot, skip_threshold: f64) -> TransitionVerdict {
        classify_transition(previous, skip_threshold)
    }

    /// Was the skip the user's doing, or did the player move on by itself?
    pub fn classify_intent(&self, current: &PlaybackSnapshot, previous: &PlaybackSnapshot) -> IntentVerdict {
        if !current.is_playing {
            return IntentVerdict {
                is_manual: true,
                confidence: 0.9,
                reason: "Playback stopped right after the change".to_string(),
            };
        }

        if previous.progress_fraction().is_some_and(|f| f > COMPLETION_FRACTION) {
            return IntentVerdict {
                is_manual: false,
                confidence: 0.95,
                reason: "Previous track finished, natural progression".to_string(),
            };
        }

        if self.consecutive_quick_skips >= QUICK_SKIP_STREAK {
            return IntentVerdict {
                is_manual: true,
                confidence: 0.95,
                reason: format!("{} quick skips in a row", self.consecutive_quick_skips),
            };
        }

        IntentVerdict {
            is_manual: true,
            confidence: 0.6,
            reason: "No strong signal, assuming user intent".to_string(),
        }
    }

    pub fn record_for_pattern_analysis(&mut self, track_id: &str, progress_fraction: f64, now: i64) {
        self.recent.push_front(RecentSkip {
            track_id: track_id.to_string(),
            timestamp: now,
            progress_fraction,
        });
        self.recent.truncate(PATTERN_WINDOW);

        if progress_fraction < QUICK_SKIP_FRACTION {
            self.consecutive_quick_skips += 1;
        } else {
            self.consecutive_quick_skips = 0;
        }
    }

    pub fn recent_skips(&self) -> impl Iterator<Item = &RecentSkip> {
        self.recent.iter()
    }

    pub fn consecutive_quick_skips(&self) -> u32 {
        self.consecutive_quick_skips
    }

    pub fn reset(&mut self) {
        self.recent.clear();
        self.consecutive_quick_skips = 0;
    }
}
