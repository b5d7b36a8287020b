//! Catalog seam: where candidate tracks come from.

use parking_lot::RwLock;
use thiserror::Error;

use super::key::CamelotKey;
use super::types::{TrackDescriptor, TrackId};

/// Catalog lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackQuery {
    /// Tracks with a known tempo in `[min, max]` BPM.
    TempoRange { min: f64, max: f64 },
    /// Tracks in one of the given keys.
    Key(Vec<CamelotKey>),
    /// A single track.
    Id(TrackId),
    /// Every track.
    All,
}

impl TrackQuery {
    pub fn matches(&self, track: &TrackDescriptor) -> bool {
        match self {
            Self::TempoRange { min, max } => track
                .bpm
                .map(|bpm| bpm >= *min && bpm <= *max)
                .unwrap_or(false),
            Self::Key(keys) => track.key.map(|k| keys.contains(&k)).unwrap_or(false),
            Self::Id(id) => track.id == *id,
            Self::All => true,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Source of track metadata. Lookups must be side-effect free.
pub trait TrackCatalog: Send + Sync {
    fn find(&self, query: &TrackQuery) -> Result<Vec<TrackDescriptor>, CatalogError>;
}

/// Catalog held in memory, for hosts that already have their library loaded.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    tracks: RwLock<Vec<TrackDescriptor>>,
}

impl InMemoryCatalog {
    pub fn new(tracks: Vec<TrackDescriptor>) -> Self {
        Self {
            tracks: RwLock::new(tracks),
        }
    }

    /// Insert or replace a track by ID.
    pub fn upsert(&self, track: TrackDescriptor) {
        let mut tracks = self.tracks.write();
        match tracks.iter_mut().find(|t| t.id == track.id) {
            Some(existing) => *existing = track,
            None => tracks.push(track),
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.read().is_empty()
    }
}

impl TrackCatalog for InMemoryCatalog {
    fn find(&self, query: &TrackQuery) -> Result<Vec<TrackDescriptor>, CatalogError> {
        Ok(self
            .tracks
            .read()
            .iter()
            .filter(|t| query.matches(t))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::key::KeyMode;

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::new(vec![
            TrackDescriptor::new(TrackId(1), "one", 300.0)
                .with_bpm(124.0)
                .with_key(CamelotKey::new(8, KeyMode::A).unwrap()),
            TrackDescriptor::new(TrackId(2), "two", 300.0).with_bpm(140.0),
            TrackDescriptor::new(TrackId(3), "three", 300.0),
        ])
    }

    #[test]
    fn test_tempo_range_skips_unknown_tempo() {
        let found = catalog()
            .find(&TrackQuery::TempoRange {
                min: 120.0,
                max: 145.0,
            })
            .unwrap();
        let ids: Vec<_> = found.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![TrackId(1), TrackId(2)]);
    }

    #[test]
    fn test_key_and_id_queries() {
        let catalog = catalog();
        let by_key = catalog
            .find(&TrackQuery::Key(vec![CamelotKey::new(8, KeyMode::A).unwrap()]))
            .unwrap();
        assert_eq!(by_key.len(), 1);

        let by_id = catalog.find(&TrackQuery::Id(TrackId(3))).unwrap();
        assert_eq!(by_id[0].title, "three");
        assert_eq!(catalog.find(&TrackQuery::All).unwrap().len(), 3);
    }

    #[test]
    fn test_upsert_replaces() {
        let catalog = catalog();
        catalog.upsert(TrackDescriptor::new(TrackId(2), "two (edit)", 200.0));
        catalog.upsert(TrackDescriptor::new(TrackId(4), "four", 200.0));

        assert_eq!(catalog.len(), 4);
        let two = catalog.find(&TrackQuery::Id(TrackId(2))).unwrap();
        assert_eq!(two[0].title, "two (edit)");
    }
}
