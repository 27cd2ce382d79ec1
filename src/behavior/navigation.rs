use std::collections::VecDeque;

pub const HISTORY_LIMIT: usize = 50;
/// A repeat within this many history entries counts as going back.
pub const RECENT_ENTRY_LIMIT: usize = 10;
pub const RECENT_PLAY_WINDOW_MS: i64 = 2 * 60 * 1000;
/// After going back to a track, leaving it again this soon is a forward skip.
pub const REWIND_GRACE_MS: i64 = 60 * 1000;
pub const REWIND_GRACE_FRACTION: f64 = 0.30;
/// How far apart the two tracks may sit in the provider's history.
pub const PROVIDER_HISTORY_DISTANCE: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub track_id: String,
    pub timestamp: i64,
}

/// Bounded local play history, newest first.
#[derive(Debug, Default)]
pub struct NavigationTracker {
    history: VecDeque<HistoryEntry>,
    last_navigation: Option<HistoryEntry>,
}

impl NavigationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, track_id: &str, now: i64) {
        self.history.push_front(HistoryEntry {
            track_id: track_id.to_string(),
            timestamp: now,
        });
        self.history.truncate(HISTORY_LIMIT);
    }

    pub fn recent_track_ids(&self) -> Vec<String> {
        self.history.iter().map(|e| e.track_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// The user went back to `previous_track_id` a moment ago and is now leaving
    /// it early. That is a skip forward, not another step back.
    pub fn is_forward_skip_after_rewind(
        &self,
        previous_track_id: &str,
        progress_fraction: Option<f64>,
        now: i64,
    ) -> bool {
        let Some(target) = &self.last_navigation else {
            return false;
        };

        target.track_id == previous_track_id
            && now - target.timestamp < REWIND_GRACE_MS
            && progress_fraction.is_some_and(|f| f < REWIND_GRACE_FRACTION)
    }

    /// Local check for "previous" presses: is the new track one we just played?
    pub fn is_backward_navigation(
        &mut self,
        new_track_id: &str,
        previous_track_id: &str,
        progress_fraction: Option<f64>,
        now: i64,
    ) -> bool {
        if self.is_forward_skip_after_rewind(previous_track_id, progress_fraction, now) {
            return false;
        }

        // entry 0 is the track we are leaving
        let found = self
            .history
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, entry)| entry.track_id == new_track_id);

        let Some((index, entry)) = found else {
            return false;
        };

        if index < RECENT_ENTRY_LIMIT || now - entry.timestamp <= RECENT_PLAY_WINDOW_MS {
            self.last_navigation = Some(HistoryEntry {
                track_id: new_track_id.to_string(),
                timestamp: now,
            });
            return true;
        }

        false
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.last_navigation = None;
    }
}

/// Provider-side check against its own recently played list (newest first):
/// the new track sits ahead of the previous one, at most a few places away.
pub fn provider_history_suggests_backward(recent: &[String], new_track_id: &str, previous_track_id: &str) -> bool {
    let new_index = recent.iter().position(|id| id == new_track_id);
    let previous_index = recent.iter().position(|id| id == previous_track_id);

    match (new_index, previous_index) {
        (Some(new_index), Some(previous_index)) => {
            new_index < previous_index && previous_index - new_index <= PROVIDER_HISTORY_DISTANCE
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: i64 = 60 * 1000;

    fn tracker_with(ids: &[&str], start: i64, step: i64) -> NavigationTracker {
        let mut tracker = NavigationTracker::new();
        for (i, id) in ids.iter().enumerate() {
            tracker.record(id, start + i as i64 * step);
        }
        tracker
    }

    #[test]
    fn test_history_is_bounded() {
        let mut tracker = NavigationTracker::new();
        for i in 0..(HISTORY_LIMIT + 10) {
            tracker.record(&format!("T{}", i), i as i64);
        }
        assert_eq!(tracker.len(), HISTORY_LIMIT);
        assert_eq!(tracker.recent_track_ids()[0], format!("T{}", HISTORY_LIMIT + 9));
    }

    #[test]
    fn test_going_back_to_a_recent_track() {
        let mut tracker = tracker_with(&["A", "B", "C"], 0, 30_000);
        assert!(tracker.is_backward_navigation("A", "C", Some(0.2), 90_000));
    }

    #[test]
    fn test_unknown_track_is_not_navigation() {
        let mut tracker = tracker_with(&["A", "B", "C"], 0, 30_000);
        assert!(!tracker.is_backward_navigation("D", "C", Some(0.2), 90_000));
    }

    #[test]
    fn test_current_entry_is_ignored() {
        let mut tracker = tracker_with(&["A", "B", "C"], 0, 30_000);
        assert!(!tracker.is_backward_navigation("C", "C", Some(0.2), 90_000));
    }

    #[test]
    fn test_stale_and_deep_entries_do_not_count() {
        let mut ids = vec!["OLD"];
        let fillers: Vec<String> = (0..12).map(|i| format!("F{}", i)).collect();
        ids.extend(fillers.iter().map(String::as_str));
        let mut tracker = tracker_with(&ids, 0, MINUTE);

        // OLD is 12 entries deep and 12 minutes old
        assert!(!tracker.is_backward_navigation("OLD", "F11", Some(0.5), 12 * MINUTE));
    }

    #[test]
    fn test_deep_but_recent_entry_counts() {
        let ids: Vec<String> = (0..15).map(|i| format!("F{}", i)).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let mut tracker = tracker_with(&refs, 0, 1_000);

        // F0 is deep in the list but only 15 seconds old
        assert!(tracker.is_backward_navigation("F0", "F14", Some(0.5), 15_000));
    }

    #[test]
    fn test_forward_skip_after_rewind() {
        let mut tracker = tracker_with(&["A", "B", "C"], 0, 30_000);
        assert!(tracker.is_backward_navigation("A", "C", Some(0.2), 90_000));
        tracker.record("A", 90_000);

        // leaving A again at 10% within a minute: a skip, even though B is recent
        assert!(tracker.is_forward_skip_after_rewind("A", Some(0.1), 120_000));
        assert!(!tracker.is_backward_navigation("B", "A", Some(0.1), 120_000));

        // past the grace window the normal rules apply again
        assert!(!tracker.is_forward_skip_after_rewind("A", Some(0.1), 90_000 + REWIND_GRACE_MS));
        assert!(!tracker.is_forward_skip_after_rewind("A", Some(0.5), 100_000));
        assert!(!tracker.is_forward_skip_after_rewind("A", None, 100_000));
    }

    #[test]
    fn test_provider_history_check() {
        let recent: Vec<String> = ["X", "A", "B", "C", "D", "E"].iter().map(|s| s.to_string()).collect();

        assert!(provider_history_suggests_backward(&recent, "A", "C"));
        assert!(provider_history_suggests_backward(&recent, "A", "D"));
        assert!(!provider_history_suggests_backward(&recent, "A", "E"));
        assert!(!provider_history_suggests_backward(&recent, "C", "A"));
        assert!(!provider_history_suggests_backward(&recent, "Z", "A"));
    }
}
