//! Track metadata as consumed by the automix engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::key::CamelotKey;

/// Unique identifier for a track in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub i64);

impl From<i64> for TrackId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TrackId> for i64 {
    fn from(id: TrackId) -> Self {
        id.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable description of a track, produced by the catalog.
///
/// Tempo, key and energy are optional: analysis may not have run, and the
/// matcher treats unknown values explicitly rather than guessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    /// Catalog ID.
    pub id: TrackId,
    /// Track title.
    pub title: String,
    /// Artist name.
    pub artist: Option<String>,
    /// Genre tag, used to avoid repeating a genre too often.
    pub genre: Option<String>,
    /// Tempo in beats per minute.
    pub bpm: Option<f64>,
    /// Harmonic key.
    pub key: Option<CamelotKey>,
    /// Nominal energy level (0-10).
    pub energy: Option<f64>,
    /// Track duration in seconds.
    pub duration_seconds: f64,
    /// User rating (0-5 stars).
    pub rating: u8,
    /// Number of times the track has been played.
    pub play_count: u32,
    /// Structurally favorable transition points in seconds, ascending.
    pub mix_points: Vec<f64>,
}

impl TrackDescriptor {
    /// Create a descriptor with only the required fields.
    pub fn new(id: TrackId, title: impl Into<String>, duration_seconds: f64) -> Self {
        Self {
            id,
            title: title.into(),
            artist: None,
            genre: None,
            bpm: None,
            key: None,
            energy: None,
            duration_seconds,
            rating: 0,
            play_count: 0,
            mix_points: Vec::new(),
        }
    }

    pub fn with_bpm(mut self, bpm: f64) -> Self {
        self.bpm = Some(bpm);
        self
    }

    pub fn with_key(mut self, key: CamelotKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_energy(mut self, energy: f64) -> Self {
        self.energy = Some(energy.clamp(0.0, 10.0));
        self
    }

    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_popularity(mut self, rating: u8, play_count: u32) -> Self {
        self.rating = rating.min(5);
        self.play_count = play_count;
        self
    }

    /// Set mix points; they are sorted and clipped to the track length.
    pub fn with_mix_points(mut self, mut points: Vec<f64>) -> Self {
        points.retain(|p| p.is_finite() && *p >= 0.0 && *p <= self.duration_seconds);
        points.sort_by(|a, b| a.total_cmp(b));
        self.mix_points = points;
        self
    }

    /// Get a display string for the track (Artist - Title).
    pub fn display_name(&self) -> String {
        match &self.artist {
            Some(artist) => format!("{} - {}", artist, self.title),
            None => self.title.clone(),
        }
    }

    /// First mix point strictly after `position_seconds`.
    pub fn next_mix_point(&self, position_seconds: f64) -> Option<f64> {
        self.mix_points
            .iter()
            .copied()
            .find(|p| *p > position_seconds)
    }

    /// Duration of `beats` beats at this track's tempo.
    pub fn beats_to_seconds(&self, beats: u32) -> Option<f64> {
        self.bpm
            .filter(|bpm| *bpm > 0.0)
            .map(|bpm| beats as f64 * 60.0 / bpm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name() {
        let track = TrackDescriptor::new(TrackId(1), "Strings of Life", 420.0);
        assert_eq!(track.display_name(), "Strings of Life");

        let track = track.with_artist("Derrick May");
        assert_eq!(track.display_name(), "Derrick May - Strings of Life");
    }

    #[test]
    fn test_mix_points_sorted_and_clipped() {
        let track = TrackDescriptor::new(TrackId(1), "t", 300.0)
            .with_mix_points(vec![240.0, 32.0, -1.0, 480.0, 128.0]);
        assert_eq!(track.mix_points, vec![32.0, 128.0, 240.0]);

        assert_eq!(track.next_mix_point(0.0), Some(32.0));
        assert_eq!(track.next_mix_point(32.0), Some(128.0));
        assert_eq!(track.next_mix_point(250.0), None);
    }

    #[test]
    fn test_beats_to_seconds() {
        let track = TrackDescriptor::new(TrackId(1), "t", 300.0).with_bpm(120.0);
        assert!((track.beats_to_seconds(16).unwrap() - 8.0).abs() < 1e-9);

        let unknown = TrackDescriptor::new(TrackId(2), "t", 300.0);
        assert_eq!(unknown.beats_to_seconds(16), None);
    }

    #[test]
    fn test_builders_clamp() {
        let track = TrackDescriptor::new(TrackId(1), "t", 300.0)
            .with_energy(14.0)
            .with_popularity(9, 3);
        assert_eq!(track.energy, Some(10.0));
        assert_eq!(track.rating, 5);
    }
}
