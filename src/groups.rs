//! Temporal grouping of plate sightings.
//!
//! A physical plate passing the camera shows up in a run of consecutive
//! frames, usually with small OCR disagreements between them. The tracker
//! coalesces those per-frame sightings into `PlateGroup`s: a sighting joins
//! an open group when its reading is close enough (exact or within the edit
//! distance tolerance) and its timestamp falls within the idle-timeout
//! window of the group's end. Groups close once no matching sighting arrives
//! inside the window; closed groups are immutable and delivered exactly once
//! via `pop_completed_groups`.
//!
//! The tracker is driven purely by frame timestamps, never the wall clock,
//! so grouping is deterministic for a given result sequence. It is touched
//! only from the caller's batch loop (single consumer, no locking here).

use serde::Serialize;
use std::collections::HashMap;

use crate::recognize::FrameResult;

/// Default idle timeout between sightings of the same plate (ms).
pub const DEFAULT_GROUP_IDLE_TIMEOUT_MS: i64 = 2_500;

/// Default Levenshtein tolerance when matching a sighting to a group.
pub const DEFAULT_EDIT_DISTANCE: usize = 1;

/// Tunables for group matching and closing.
#[derive(Clone, Copy, Debug)]
pub struct GroupSettings {
    /// Maximum gap between consecutive sightings before a group closes (ms).
    pub idle_timeout_ms: i64,
    /// Maximum edit distance for a sighting to join an existing group.
    pub max_edit_distance: usize,
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            idle_timeout_ms: DEFAULT_GROUP_IDLE_TIMEOUT_MS,
            max_edit_distance: DEFAULT_EDIT_DISTANCE,
        }
    }
}

/// A temporal cluster of sightings believed to be one physical plate.
#[derive(Clone, Debug, Serialize)]
pub struct PlateGroup {
    /// Reading with the highest cumulative confidence across member frames.
    pub best_plate: String,
    pub epoch_start_ms: i64,
    /// Monotonically non-decreasing while the group is open.
    pub epoch_end_ms: i64,
    /// Contributing frame numbers in arrival order.
    pub frame_numbers: Vec<u64>,
    pub closed: bool,
    /// Cumulative confidence per distinct reading.
    #[serde(skip)]
    tally: HashMap<String, f32>,
}

impl PlateGroup {
    fn open(first: &Sighting) -> Self {
        let mut group = Self {
            best_plate: first.plate.clone(),
            epoch_start_ms: first.epoch_ms,
            epoch_end_ms: first.epoch_ms,
            frame_numbers: vec![first.frame_number],
            closed: false,
            tally: HashMap::new(),
        };
        group.absorb_readings(first);
        group.elect_best();
        group
    }

    fn extend(&mut self, sighting: &Sighting) {
        self.epoch_end_ms = self.epoch_end_ms.max(sighting.epoch_ms);
        if self.frame_numbers.last() != Some(&sighting.frame_number) {
            self.frame_numbers.push(sighting.frame_number);
        }
        self.absorb_readings(sighting);
        self.elect_best();
    }

    fn absorb_readings(&mut self, sighting: &Sighting) {
        *self.tally.entry(sighting.plate.clone()).or_default() += sighting.confidence;
        for alt in &sighting.alternatives {
            *self.tally.entry(alt.0.clone()).or_default() += alt.1;
        }
    }

    fn elect_best(&mut self) {
        // Ties break lexicographically so election is deterministic.
        if let Some((plate, _)) = self
            .tally
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1).then_with(|| b.0.cmp(a.0)))
        {
            self.best_plate = plate.clone();
        }
    }

    /// Total span of the group in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        self.epoch_end_ms - self.epoch_start_ms
    }
}

struct Sighting {
    plate: String,
    confidence: f32,
    alternatives: Vec<(String, f32)>,
    epoch_ms: i64,
    frame_number: u64,
}

/// State machine coalescing frame results into plate groups.
#[derive(Debug)]
pub struct GroupTracker {
    settings: GroupSettings,
    open: Vec<PlateGroup>,
    completed: Vec<PlateGroup>,
}

impl GroupTracker {
    pub fn new(settings: GroupSettings) -> Self {
        Self {
            settings,
            open: Vec::new(),
            completed: Vec::new(),
        }
    }

    /// Fold one frame result into the tracker.
    ///
    /// Every candidate either extends the closest matching open group or
    /// opens a new one; afterwards any open group idle for longer than the
    /// timeout (relative to this frame's timestamp) is closed.
    pub fn observe(&mut self, result: &FrameResult) {
        for candidate in &result.plates {
            let sighting = Sighting {
                plate: candidate.best_plate.clone(),
                confidence: candidate.confidence,
                alternatives: candidate
                    .alternatives
                    .iter()
                    .map(|alt| (alt.plate.clone(), alt.confidence))
                    .collect(),
                epoch_ms: result.epoch_ms,
                frame_number: result.frame_number,
            };
            match self.find_match(&sighting) {
                Some(idx) => self.open[idx].extend(&sighting),
                None => self.open.push(PlateGroup::open(&sighting)),
            }
        }
        self.close_idle(result.epoch_ms);
    }

    /// Index of the best-matching open group for a sighting, if any.
    fn find_match(&self, sighting: &Sighting) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        for (idx, group) in self.open.iter().enumerate() {
            let gap = sighting.epoch_ms - group.epoch_end_ms;
            if gap > self.settings.idle_timeout_ms {
                continue;
            }
            let distance = levenshtein(&sighting.plate, &group.best_plate);
            if distance > self.settings.max_edit_distance {
                continue;
            }
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((idx, distance));
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Close every open group whose end timestamp fell out of the window.
    fn close_idle(&mut self, now_ms: i64) {
        let timeout = self.settings.idle_timeout_ms;
        let mut idx = 0;
        while idx < self.open.len() {
            if self.open[idx].epoch_end_ms < now_ms - timeout {
                let mut group = self.open.swap_remove(idx);
                group.closed = true;
                log::debug!(
                    "plate group '{}' closed ({} frames, {} ms)",
                    group.best_plate,
                    group.frame_numbers.len(),
                    group.duration_ms()
                );
                self.completed.push(group);
            } else {
                idx += 1;
            }
        }
    }

    /// Read-only snapshot of the open groups. Never mutates tracker state.
    pub fn peek_active_groups(&self) -> Vec<PlateGroup> {
        self.open.clone()
    }

    /// Remove and return the closed groups. Exactly-once: a group appears in
    /// one pop result only; pops with no new closures return nothing.
    pub fn pop_completed_groups(&mut self) -> Vec<PlateGroup> {
        std::mem::take(&mut self.completed)
    }

    /// Force-close every open group (end of input, disconnect).
    pub fn flush(&mut self) {
        for mut group in self.open.drain(..) {
            group.closed = true;
            self.completed.push(group);
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}

/// Classic two-row Levenshtein distance. Plates are short, so O(n*m) is fine.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitute = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitute.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognize::PlateCandidate;

    fn settings(timeout_ms: i64) -> GroupSettings {
        GroupSettings {
            idle_timeout_ms: timeout_ms,
            max_edit_distance: 1,
        }
    }

    fn result(frame_number: u64, epoch_ms: i64, plates: Vec<PlateCandidate>) -> FrameResult {
        FrameResult {
            frame_number,
            epoch_ms,
            plates,
        }
    }

    fn sighting(plate: &str, confidence: f32) -> Vec<PlateCandidate> {
        vec![PlateCandidate::new(plate, confidence)]
    }

    #[test]
    fn consecutive_sightings_merge_into_one_group() {
        let mut tracker = GroupTracker::new(settings(2_000));
        tracker.observe(&result(1, 1_000, sighting("ABC123", 0.9)));
        tracker.observe(&result(2, 1_500, sighting("ABC123", 0.9)));
        tracker.observe(&result(3, 2_000, sighting("ABC123", 0.9)));

        let active = tracker.peek_active_groups();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].epoch_start_ms, 1_000);
        assert_eq!(active[0].epoch_end_ms, 2_000);
        assert_eq!(active[0].frame_numbers, vec![1, 2, 3]);
    }

    #[test]
    fn gap_beyond_timeout_starts_a_new_group() {
        let mut tracker = GroupTracker::new(settings(2_000));
        tracker.observe(&result(1, 1_000, sighting("ABC123", 0.9)));
        tracker.observe(&result(2, 2_000, sighting("ABC123", 0.9)));
        // 3000 ms gap > 2000 ms timeout: old group closes, new one opens.
        tracker.observe(&result(3, 5_000, sighting("ABC123", 0.9)));

        let active = tracker.peek_active_groups();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].epoch_start_ms, 5_000);

        let completed = tracker.pop_completed_groups();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].epoch_start_ms, 1_000);
        assert_eq!(completed[0].epoch_end_ms, 2_000);
        assert!(completed[0].closed);
    }

    #[test]
    fn peek_never_mutates_tracker_state() {
        let mut tracker = GroupTracker::new(settings(2_000));
        tracker.observe(&result(1, 1_000, sighting("XYZ789", 0.8)));

        let first: Vec<String> = tracker
            .peek_active_groups()
            .into_iter()
            .map(|g| g.best_plate)
            .collect();
        let second: Vec<String> = tracker
            .peek_active_groups()
            .into_iter()
            .map(|g| g.best_plate)
            .collect();
        assert_eq!(first, second);
        assert_eq!(tracker.open_count(), 1);
    }

    #[test]
    fn pop_completed_is_exactly_once() {
        let mut tracker = GroupTracker::new(settings(1_000));
        tracker.observe(&result(1, 1_000, sighting("ABC123", 0.9)));
        tracker.observe(&result(2, 5_000, sighting("DEF456", 0.9)));

        assert_eq!(tracker.pop_completed_groups().len(), 1);
        assert!(tracker.pop_completed_groups().is_empty());
    }

    #[test]
    fn near_miss_reading_joins_via_edit_distance() {
        let mut tracker = GroupTracker::new(settings(2_000));
        tracker.observe(&result(1, 1_000, sighting("ABC123", 0.9)));
        // One OCR slip: "A8C123" is distance 1 from "ABC123".
        tracker.observe(&result(2, 1_200, sighting("A8C123", 0.3)));

        assert_eq!(tracker.open_count(), 1);
        let active = tracker.peek_active_groups();
        assert_eq!(active[0].frame_numbers, vec![1, 2]);
        // Cumulative confidence keeps the stronger reading.
        assert_eq!(active[0].best_plate, "ABC123");
    }

    #[test]
    fn best_plate_follows_cumulative_confidence() {
        let mut tracker = GroupTracker::new(settings(2_000));
        tracker.observe(&result(1, 1_000, sighting("ABC128", 0.6)));
        tracker.observe(&result(2, 1_100, sighting("ABC123", 0.5)));
        tracker.observe(&result(3, 1_200, sighting("ABC123", 0.5)));

        let active = tracker.peek_active_groups();
        assert_eq!(active.len(), 1);
        // 1.0 cumulative for ABC123 beats 0.6 for ABC128.
        assert_eq!(active[0].best_plate, "ABC123");
    }

    #[test]
    fn unrelated_plates_track_as_separate_groups() {
        let mut tracker = GroupTracker::new(settings(2_000));
        tracker.observe(&result(1, 1_000, sighting("ABC123", 0.9)));
        tracker.observe(&result(2, 1_100, sighting("ZZZ999", 0.9)));
        assert_eq!(tracker.open_count(), 2);
    }

    #[test]
    fn end_timestamp_is_monotone_while_open() {
        let mut tracker = GroupTracker::new(settings(2_000));
        tracker.observe(&result(1, 1_000, sighting("ABC123", 0.9)));
        tracker.observe(&result(2, 1_800, sighting("ABC123", 0.9)));
        // Same timestamp again must not move the end backwards.
        tracker.observe(&result(3, 1_800, sighting("ABC123", 0.9)));

        let active = tracker.peek_active_groups();
        assert_eq!(active[0].epoch_end_ms, 1_800);
    }

    #[test]
    fn alternatives_count_toward_the_tally() {
        let mut tracker = GroupTracker::new(settings(2_000));
        let candidate = PlateCandidate::new("ABC128", 0.4).with_alternative("ABC123", 0.35);
        tracker.observe(&result(1, 1_000, vec![candidate.clone()]));
        tracker.observe(&result(2, 1_100, vec![candidate]));
        // The alternative reading is weaker per frame but still tallied.
        let candidate = PlateCandidate::new("ABC123", 0.5);
        tracker.observe(&result(3, 1_200, vec![candidate]));

        let active = tracker.peek_active_groups();
        assert_eq!(active.len(), 1);
        // ABC123: 0.35 + 0.35 + 0.5 = 1.2 > ABC128: 0.8.
        assert_eq!(active[0].best_plate, "ABC123");
    }

    #[test]
    fn flush_closes_everything() {
        let mut tracker = GroupTracker::new(settings(2_000));
        tracker.observe(&result(1, 1_000, sighting("ABC123", 0.9)));
        tracker.observe(&result(2, 1_100, sighting("ZZZ999", 0.9)));
        tracker.flush();
        assert_eq!(tracker.open_count(), 0);
        let completed = tracker.pop_completed_groups();
        assert_eq!(completed.len(), 2);
        assert!(completed.iter().all(|g| g.closed));
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("ABC123", "ABC123"), 0);
        assert_eq!(levenshtein("ABC123", "A8C123"), 1);
        assert_eq!(levenshtein("ABC123", "ABC12"), 1);
        assert_eq!(levenshtein("", "ABC"), 3);
        assert_eq!(levenshtein("ABC123", "XYZ789"), 6);
    }
}
