//! Transport feed: last-known-state queries against the playing decks.

use async_trait::async_trait;
use tokio::time::Instant;

use crate::deck::DeckId;
use crate::error::FeedError;
use crate::library::TrackId;

/// Raw reading returned by the device for one deck.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportReading {
    /// Elapsed position in seconds.
    pub position_seconds: f64,
    /// Remaining time in seconds.
    pub remaining_seconds: f64,
    /// Current (pitch-adjusted) tempo.
    pub bpm: f64,
    /// Short-window signal energy (0.0-1.0).
    pub energy: f64,
    /// Track loaded on the deck, if the device reports it.
    pub loaded_track: Option<TrackId>,
    /// Crossfader position the device reports (0.0 = deck A, 1.0 = deck B).
    pub crossfader: Option<f64>,
}

impl TransportReading {
    pub fn new(position_seconds: f64, remaining_seconds: f64, bpm: f64, energy: f64) -> Self {
        Self {
            position_seconds,
            remaining_seconds,
            bpm,
            energy,
            loaded_track: None,
            crossfader: None,
        }
    }

    pub fn with_track(mut self, track: TrackId) -> Self {
        self.loaded_track = Some(track);
        self
    }

    pub fn with_crossfader(mut self, position: f64) -> Self {
        self.crossfader = Some(position.clamp(0.0, 1.0));
        self
    }
}

/// Point-in-time view of one deck, derived by the monitor each tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub deck: DeckId,
    pub position_seconds: f64,
    pub remaining_seconds: f64,
    pub bpm: f64,
    pub energy: f64,
    /// floor(position * bpm / 60)
    pub beat_index: u64,
    /// Beat offset within the current phrase.
    pub phrase_beat: u32,
    pub loaded_track: Option<TrackId>,
    pub captured_at: Instant,
}

impl PlaybackSnapshot {
    /// Derive beat and phrase alignment from a raw reading.
    pub fn from_reading(
        deck: DeckId,
        reading: &TransportReading,
        phrase_length: u32,
        captured_at: Instant,
    ) -> Self {
        let beat_index = if reading.bpm > 0.0 && reading.position_seconds > 0.0 {
            (reading.position_seconds * reading.bpm / 60.0).floor() as u64
        } else {
            0
        };
        let phrase_length = phrase_length.max(1);

        Self {
            deck,
            position_seconds: reading.position_seconds.max(0.0),
            remaining_seconds: reading.remaining_seconds.max(0.0),
            bpm: reading.bpm,
            energy: reading.energy.clamp(0.0, 1.0),
            beat_index,
            phrase_beat: (beat_index % phrase_length as u64) as u32,
            loaded_track: reading.loaded_track,
            captured_at,
        }
    }

    /// Snapshot advanced by `elapsed_seconds` of playback at the current tempo.
    pub fn extrapolated(&self, elapsed_seconds: f64, phrase_length: u32, now: Instant) -> Self {
        let reading = TransportReading {
            position_seconds: self.position_seconds + elapsed_seconds,
            remaining_seconds: (self.remaining_seconds - elapsed_seconds).max(0.0),
            bpm: self.bpm,
            energy: self.energy,
            loaded_track: self.loaded_track,
            crossfader: None,
        };
        Self::from_reading(self.deck, &reading, phrase_length, now)
    }

    /// Beats remaining until the next phrase starts (1..=phrase_length).
    pub fn beats_until_phrase(&self, phrase_length: u32) -> u32 {
        phrase_length.max(1) - self.phrase_beat
    }

    /// Seconds per beat at the current tempo.
    pub fn beat_seconds(&self) -> Option<f64> {
        (self.bpm > 0.0).then(|| 60.0 / self.bpm)
    }
}

/// Source of transport readings. Polled; no push interface is assumed.
#[async_trait]
pub trait TransportFeed: Send + Sync {
    async fn read_snapshot(&self, deck: DeckId) -> Result<TransportReading, FeedError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beat_and_phrase_derivation() {
        let now = Instant::now();
        // 120 BPM: 2 beats per second, position 10.3s is beat 20
        let reading = TransportReading::new(10.3, 200.0, 120.0, 0.5);
        let snap = PlaybackSnapshot::from_reading(DeckId::A, &reading, 16, now);

        assert_eq!(snap.beat_index, 20);
        assert_eq!(snap.phrase_beat, 4);
        assert_eq!(snap.beats_until_phrase(16), 12);
        assert!((snap.beat_seconds().unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_zero_tempo() {
        let reading = TransportReading::new(10.0, 20.0, 0.0, 1.5);
        let snap = PlaybackSnapshot::from_reading(DeckId::B, &reading, 16, Instant::now());
        assert_eq!(snap.beat_index, 0);
        assert_eq!(snap.beat_seconds(), None);
        assert_eq!(snap.energy, 1.0);
    }

    #[test]
    fn test_extrapolation() {
        let now = Instant::now();
        let reading = TransportReading::new(7.9, 3.0, 120.0, 0.5);
        let snap = PlaybackSnapshot::from_reading(DeckId::A, &reading, 16, now);
        let next = snap.extrapolated(0.1, 16, now);

        assert!((next.position_seconds - 8.0).abs() < 1e-9);
        assert!((next.remaining_seconds - 2.9).abs() < 1e-9);
        assert_eq!(next.beat_index, 16);
        assert_eq!(next.phrase_beat, 0);
    }
}
