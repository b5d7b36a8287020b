//! Compatibility matcher: ranks candidate tracks against a reference.
//!
//! Scoring is a weighted sum of tempo closeness (dominant), harmonic
//! relation on the Camelot wheel, an energy term, a popularity bonus and a
//! genre-repetition penalty. The matcher holds configuration only; history
//! such as recently played genres is passed in with each request.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::error::AutomixError;
use crate::library::{KeyRelation, TrackDescriptor, TrackId};

/// Tempo ratios accepted for half/double-time and triplet-feel mixing.
pub const TEMPO_RATIOS: [f64; 7] = [1.0, 0.5, 0.67, 0.75, 1.33, 1.5, 2.0];

/// Score multiplier for matches that rely on a non-unity tempo ratio.
const RATIO_MATCH_FACTOR: f64 = 0.9;

/// Strict applies the harmonic filter; Relaxed drops it and widens the tempo window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Strict,
    Relaxed,
}

/// External decision hint biasing one selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvisoryHint {
    PreferHigherEnergy,
    PreferLowerEnergy,
    PreferHarmonic,
    PreferTempo,
}

/// Weights of the scoring terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchWeights {
    pub tempo: f64,
    pub harmonic: f64,
    pub energy: f64,
    pub popularity: f64,
    pub genre_penalty: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            tempo: 0.55,
            harmonic: 0.30,
            energy: 0.05,
            popularity: 0.05,
            genre_penalty: 0.10,
        }
    }
}

impl MatchWeights {
    /// Weights and energy direction (+1 up, -1 down, 0 closeness) for a hint.
    fn biased(self, hint: Option<AdvisoryHint>) -> (Self, f64) {
        match hint {
            None => (self, 0.0),
            Some(AdvisoryHint::PreferHigherEnergy) => (
                Self {
                    energy: self.energy * 3.0,
                    ..self
                },
                1.0,
            ),
            Some(AdvisoryHint::PreferLowerEnergy) => (
                Self {
                    energy: self.energy * 3.0,
                    ..self
                },
                -1.0,
            ),
            Some(AdvisoryHint::PreferHarmonic) => (
                Self {
                    harmonic: self.harmonic * 1.5,
                    ..self
                },
                0.0,
            ),
            Some(AdvisoryHint::PreferTempo) => (
                Self {
                    tempo: self.tempo * 1.5,
                    ..self
                },
                0.0,
            ),
        }
    }
}

/// Matcher configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MatcherConfig {
    /// Tempo window in strict mode (BPM).
    pub tempo_tolerance_bpm: f64,
    /// Tempo window in relaxed mode (BPM).
    pub relaxed_tolerance_bpm: f64,
    /// How many recent selections count toward the genre penalty.
    pub genre_memory: usize,
    pub weights: MatchWeights,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            tempo_tolerance_bpm: 6.0,
            relaxed_tolerance_bpm: 15.0,
            genre_memory: 3,
            weights: MatchWeights::default(),
        }
    }
}

/// A candidate with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedTrack {
    pub track: TrackDescriptor,
    pub score: f64,
    /// Distance in BPM to the closest accepted ratio, if both tempos are known.
    pub tempo_delta: Option<f64>,
    /// Ratio that produced `tempo_delta`.
    pub tempo_ratio: f64,
    /// Harmonic relation, if both keys are known and compatible.
    pub key_relation: Option<KeyRelation>,
}

/// Inputs for one ranking call.
#[derive(Debug, Clone)]
pub struct RankRequest<'a> {
    pub reference: &'a TrackDescriptor,
    pub candidates: &'a [TrackDescriptor],
    pub exclude: Option<&'a HashSet<TrackId>>,
    /// Genres of the most recent selections, newest last.
    pub recent_genres: &'a [String],
    pub mode: MatchMode,
    pub hint: Option<AdvisoryHint>,
}

impl<'a> RankRequest<'a> {
    pub fn new(reference: &'a TrackDescriptor, candidates: &'a [TrackDescriptor]) -> Self {
        Self {
            reference,
            candidates,
            exclude: None,
            recent_genres: &[],
            mode: MatchMode::Strict,
            hint: None,
        }
    }

    pub fn exclude(mut self, exclude: &'a HashSet<TrackId>) -> Self {
        self.exclude = Some(exclude);
        self
    }

    pub fn recent_genres(mut self, genres: &'a [String]) -> Self {
        self.recent_genres = genres;
        self
    }

    pub fn mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn hint(mut self, hint: Option<AdvisoryHint>) -> Self {
        self.hint = hint;
        self
    }
}

/// Closest tempo relation between a reference and a candidate.
///
/// Returns `(delta, ratio)` for the ratio whose scaled reference tempo is
/// nearest to the candidate, or `None` when nothing lies within `tolerance`.
pub fn tempo_relation(reference_bpm: f64, candidate_bpm: f64, tolerance: f64) -> Option<(f64, f64)> {
    TEMPO_RATIOS
        .iter()
        .map(|ratio| ((candidate_bpm - reference_bpm * ratio).abs(), *ratio))
        .filter(|(delta, _)| *delta <= tolerance)
        .min_by(|a, b| a.0.total_cmp(&b.0))
}

/// Ranks candidates by harmonic and tempo compatibility.
#[derive(Debug, Clone, Default)]
pub struct CompatibilityMatcher {
    config: MatcherConfig,
}

impl CompatibilityMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Strict ranking with default weights and no history.
    pub fn rank(
        &self,
        reference: &TrackDescriptor,
        candidates: &[TrackDescriptor],
        exclude: &HashSet<TrackId>,
    ) -> Vec<RankedTrack> {
        self.rank_with(&RankRequest::new(reference, candidates).exclude(exclude))
    }

    /// Rank with full control over mode, hint and history.
    pub fn rank_with(&self, request: &RankRequest<'_>) -> Vec<RankedTrack> {
        let (weights, energy_direction) = self.config.weights.biased(request.hint);
        let recent: Vec<String> = request
            .recent_genres
            .iter()
            .rev()
            .take(self.config.genre_memory)
            .map(|g| g.to_lowercase())
            .collect();

        let mut ranked: Vec<RankedTrack> = request
            .candidates
            .iter()
            .filter(|c| c.id != request.reference.id)
            .filter(|c| request.exclude.map_or(true, |ex| !ex.contains(&c.id)))
            .filter_map(|c| {
                self.score(
                    request.reference,
                    c,
                    request.mode,
                    &weights,
                    energy_direction,
                    &recent,
                )
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score.total_cmp(&a.score).then_with(|| {
                let da = a.tempo_delta.unwrap_or(f64::INFINITY);
                let db = b.tempo_delta.unwrap_or(f64::INFINITY);
                da.partial_cmp(&db).unwrap_or(Ordering::Equal)
            })
        });
        ranked
    }

    /// Strict pass, then a relaxed pass if `allow_relaxed` and strict found nothing.
    pub fn rank_with_fallback(
        &self,
        request: &RankRequest<'_>,
        allow_relaxed: bool,
    ) -> Result<(MatchMode, Vec<RankedTrack>), AutomixError> {
        let strict = self.rank_with(&RankRequest {
            mode: MatchMode::Strict,
            ..request.clone()
        });
        if !strict.is_empty() {
            return Ok((MatchMode::Strict, strict));
        }

        if allow_relaxed {
            let relaxed = self.rank_with(&RankRequest {
                mode: MatchMode::Relaxed,
                ..request.clone()
            });
            if !relaxed.is_empty() {
                log::info!(
                    "No strict match for '{}', using {} relaxed candidates",
                    request.reference.display_name(),
                    relaxed.len()
                );
                return Ok((MatchMode::Relaxed, relaxed));
            }
        }

        Err(AutomixError::NoCompatibleCandidate)
    }

    fn score(
        &self,
        reference: &TrackDescriptor,
        candidate: &TrackDescriptor,
        mode: MatchMode,
        weights: &MatchWeights,
        energy_direction: f64,
        recent_genres: &[String],
    ) -> Option<RankedTrack> {
        let tolerance = match mode {
            MatchMode::Strict => self.config.tempo_tolerance_bpm,
            MatchMode::Relaxed => self.config.relaxed_tolerance_bpm,
        };

        // Tempo: unknown reference tempo disables the filter entirely
        let (tempo_score, tempo_delta, tempo_ratio) = match (reference.bpm, candidate.bpm) {
            (None, _) => (0.0, None, 1.0),
            (Some(_), None) => return None,
            (Some(ref_bpm), Some(cand_bpm)) => {
                let (delta, ratio) = tempo_relation(ref_bpm, cand_bpm, tolerance)?;
                let closeness = if tolerance > 0.0 {
                    1.0 - delta / tolerance
                } else {
                    1.0
                };
                let factor = if ratio == 1.0 { 1.0 } else { RATIO_MATCH_FACTOR };
                (closeness * factor, Some(delta), ratio)
            }
        };

        // Harmonic: unknown reference key is always satisfied
        let (harmonic_score, key_relation) = match (reference.key, candidate.key) {
            (None, _) => (1.0, None),
            (Some(ref_key), Some(cand_key)) => match ref_key.relation(&cand_key) {
                Some(relation) => (relation.score(), Some(relation)),
                None if mode == MatchMode::Relaxed => (0.0, None),
                None => return None,
            },
            (Some(_), None) if mode == MatchMode::Relaxed => (0.0, None),
            (Some(_), None) => return None,
        };

        let energy_score = match (reference.energy, candidate.energy) {
            (Some(r), Some(c)) if energy_direction != 0.0 => {
                (0.5 + energy_direction * (c - r) / 20.0).clamp(0.0, 1.0)
            }
            (Some(r), Some(c)) => 1.0 - ((c - r).abs() / 10.0).min(1.0),
            _ => 0.5,
        };

        let popularity = (candidate.rating.min(5) as f64 / 5.0) * 0.5
            + (candidate.play_count.min(50) as f64 / 50.0) * 0.5;

        let repeats_genre = candidate
            .genre
            .as_ref()
            .map(|g| recent_genres.contains(&g.to_lowercase()))
            .unwrap_or(false);

        let mut score = weights.tempo * tempo_score
            + weights.harmonic * harmonic_score
            + weights.energy * energy_score
            + weights.popularity * popularity;
        if repeats_genre {
            score -= weights.genre_penalty;
        }

        Some(RankedTrack {
            track: candidate.clone(),
            score,
            tempo_delta,
            tempo_ratio,
            key_relation,
        })
    }
}
