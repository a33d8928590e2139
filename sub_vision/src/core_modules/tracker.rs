// THEORY:
// The `tracker` module gives the pipeline memory. Classification on a sparse grid
// is noisy: a patch of water can look like a buoy for one frame and then vanish.
// The tracker only lets a detection through once the same class has been seen
// at roughly the same place on several frames.
//
// Each tracked object is a `Track`:
// 1.  **Birth**: an accepted detection with no existing track of the class
//     within the distance tolerance starts a new track. A new track has lifetime
//     0 and is provisional, whatever the streak: nothing is published on the
//     frame a track is born.
// 2.  **Match**: a detection within tolerance of an existing track moves the
//     track there, stamps the current frame and extends its lifetime. A track
//     counts as confirmed once it has been sighted `confirmation_streak` times.
//     The nearest track wins, and a track matches at most one detection per
//     frame.
// 3.  **Death**: after all detections of the frame, tracks that have not been
//     sighted for more than `staleness_window` frames are dropped.
//
// One `Tracker` exists per object class per camera, so a track never needs to
// compare itself to detections of another class.

use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    /// Sightings needed before a track's detections are published.
    pub confirmation_streak: u32,
    /// Frames a track may go unseen before it is dropped.
    pub staleness_window: u64,
    /// Maximum Euclidean distance in pixels between a track and a matching detection.
    pub distance_tolerance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Provisional,
    /// Eligible for publishing.
    Confirmed,
}

/// One object followed across frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: u64,
    pub class_id: u8,
    pub x: f64,
    pub y: f64,
    pub last_seen: u64,
    /// Matches since the track was born.
    pub lifetime: u32,
}

impl Track {
    /// Frames this track has been observed on, including its birth.
    pub fn sightings(&self) -> u32 {
        self.lifetime.saturating_add(1)
    }

    /// A track is never confirmed on its birth frame.
    pub fn state(&self, config: &TrackerConfig) -> TrackState {
        if self.lifetime > 0 && self.sightings() >= config.confirmation_streak {
            TrackState::Confirmed
        } else {
            TrackState::Provisional
        }
    }
}

/// Track list of a single object class.
#[derive(Debug, Clone)]
pub struct Tracker {
    class_id: u8,
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u64,
}

impl Tracker {
    pub fn new(class_id: u8, config: TrackerConfig) -> Self {
        Self {
            class_id,
            config,
            tracks: Vec::new(),
            next_id: 0,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Associates an accepted detection at (`x`, `y`) on `frame` with a track and
    /// reports whether that track is now confirmed.
    pub fn observe(&mut self, x: f64, y: f64, frame: u64) -> TrackState {
        let tolerance = self.config.distance_tolerance;
        let nearest = self
            .tracks
            .iter_mut()
            .filter(|track| track.last_seen != frame)
            .map(|track| {
                let distance = (track.x - x).hypot(track.y - y);
                (distance, track)
            })
            .filter(|(distance, _)| *distance <= tolerance)
            .min_by(|a, b| a.0.total_cmp(&b.0));

        match nearest {
            Some((distance, track)) => {
                track.x = x;
                track.y = y;
                track.last_seen = frame;
                track.lifetime = track.lifetime.saturating_add(1);
                trace!(
                    class_id = self.class_id,
                    track = track.id,
                    distance,
                    lifetime = track.lifetime,
                    "Track matched"
                );
                track.state(&self.config)
            }
            None => {
                let track = Track {
                    id: self.next_id,
                    class_id: self.class_id,
                    x,
                    y,
                    last_seen: frame,
                    lifetime: 0,
                };
                self.next_id += 1;
                trace!(class_id = self.class_id, track = track.id, x, y, "Track born");
                self.tracks.push(track);
                TrackState::Provisional
            }
        }
    }

    /// Drops tracks last seen more than `staleness_window` frames before `frame`.
    /// Returns how many were dropped.
    pub fn prune(&mut self, frame: u64) -> usize {
        let window = self.config.staleness_window;
        let before = self.tracks.len();
        self.tracks
            .retain(|track| track.last_seen.saturating_add(window) >= frame);
        before - self.tracks.len()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(streak: u32) -> Tracker {
        Tracker::new(
            2,
            TrackerConfig {
                confirmation_streak: streak,
                staleness_window: 3,
                distance_tolerance: 10.0,
            },
        )
    }

    #[test]
    fn two_sightings_are_not_enough() {
        let mut tracker = tracker(3);
        assert_eq!(tracker.observe(50.0, 50.0, 1), TrackState::Provisional);
        assert_eq!(tracker.observe(51.0, 50.0, 2), TrackState::Provisional);
        assert_eq!(tracker.tracks().len(), 1);
    }

    #[test]
    fn third_consecutive_sighting_confirms() {
        let mut tracker = tracker(3);
        tracker.observe(50.0, 50.0, 1);
        tracker.observe(52.0, 49.0, 2);
        assert_eq!(tracker.observe(53.0, 48.0, 3), TrackState::Confirmed);
        let track = &tracker.tracks()[0];
        assert_eq!((track.x, track.y, track.last_seen, track.lifetime), (53.0, 48.0, 3, 2));
    }

    #[test]
    fn far_detection_starts_new_track() {
        let mut tracker = tracker(3);
        tracker.observe(0.0, 0.0, 1);
        tracker.observe(100.0, 0.0, 2);
        assert_eq!(tracker.tracks().len(), 2);
        assert!(tracker.tracks().iter().all(|t| t.lifetime == 0));
        assert_ne!(tracker.tracks()[0].id, tracker.tracks()[1].id);
    }

    #[test]
    fn nearest_track_wins() {
        let mut tracker = tracker(3);
        tracker.observe(0.0, 0.0, 1);
        tracker.observe(8.0, 0.0, 1);
        tracker.observe(7.0, 0.0, 2);
        let moved: Vec<u32> = tracker.tracks().iter().map(|t| t.lifetime).collect();
        assert_eq!(moved, vec![0, 1]);
    }

    #[test]
    fn track_matches_once_per_frame() {
        let mut tracker = tracker(3);
        tracker.observe(0.0, 0.0, 1);
        tracker.observe(1.0, 0.0, 2);
        // a second detection on the same frame cannot reuse the track
        tracker.observe(2.0, 0.0, 2);
        assert_eq!(tracker.tracks().len(), 2);
    }

    #[test]
    fn stale_tracks_are_dropped() {
        let mut tracker = tracker(3);
        tracker.observe(5.0, 5.0, 10);
        assert_eq!(tracker.prune(13), 0);
        assert_eq!(tracker.tracks().len(), 1);
        assert_eq!(tracker.prune(14), 1);
        assert!(tracker.tracks().is_empty());
    }

    #[test]
    fn new_track_is_provisional_even_with_short_streak() {
        let mut tracker = tracker(1);
        assert_eq!(tracker.observe(5.0, 5.0, 0), TrackState::Provisional);
        assert_eq!(tracker.tracks()[0].state(tracker.config()), TrackState::Provisional);
        assert_eq!(tracker.observe(6.0, 5.0, 1), TrackState::Confirmed);
    }

    #[test]
    fn clear_forgets_everything() {
        let mut tracker = tracker(3);
        tracker.observe(5.0, 5.0, 0);
        tracker.clear();
        assert!(tracker.tracks().is_empty());
    }
}
