//! Mix opportunity values emitted by the position monitor.

use std::fmt;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::deck::DeckId;

/// What produced an opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpportunityKind {
    /// A precomputed mix point of the playing track is coming up.
    OptimalPoint,
    /// The next phrase starts within two beats.
    PhraseBoundary,
    /// The track is about to run out.
    TrackEnding,
    /// The energy trend moved past the threshold.
    EnergyShift,
}

impl OpportunityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OptimalPoint => "optimal_point",
            Self::PhraseBoundary => "phrase_boundary",
            Self::TrackEnding => "track_ending",
            Self::EnergyShift => "energy_shift",
        }
    }
}

impl fmt::Display for OpportunityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency tier, low to critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Urgency {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Urgency {
    pub fn tier(&self) -> u8 {
        *self as u8
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MixOpportunity {
    pub id: u64,
    pub kind: OpportunityKind,
    /// Deck the opportunity refers to.
    pub deck: DeckId,
    /// Track position of the event in seconds.
    pub position_seconds: f64,
    /// Track-position window in which a transition fits.
    pub window: (f64, f64),
    pub confidence: f64,
    pub quality: f64,
    pub urgency: Urgency,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl MixOpportunity {
    /// `lifetime` is floored at one millisecond so that `expires_at > created_at`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        kind: OpportunityKind,
        deck: DeckId,
        position_seconds: f64,
        window: (f64, f64),
        confidence: f64,
        quality: f64,
        urgency: Urgency,
        created_at: Instant,
        lifetime: Duration,
    ) -> Self {
        let lifetime = lifetime.max(Duration::from_millis(1));
        Self {
            id,
            kind,
            deck,
            position_seconds,
            window,
            confidence: confidence.clamp(0.0, 1.0),
            quality: quality.clamp(0.0, 1.0),
            urgency,
            created_at,
            expires_at: created_at + lifetime,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry, zero once expired.
    pub fn time_left(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

/// Subscription to newly emitted opportunities.
///
/// Expired opportunities are skipped; a lagging subscriber drops the oldest
/// entries and keeps going.
pub struct OpportunityStream {
    rx: broadcast::Receiver<MixOpportunity>,
}

impl OpportunityStream {
    pub(crate) fn new(rx: broadcast::Receiver<MixOpportunity>) -> Self {
        Self { rx }
    }

    /// Wait for the next unexpired opportunity. `None` once the monitor is gone.
    pub async fn next(&mut self) -> Option<MixOpportunity> {
        loop {
            match self.rx.recv().await {
                Ok(opportunity) => {
                    if !opportunity.is_expired(Instant::now()) {
                        return Some(opportunity);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Opportunity subscriber lagged, skipped {}", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`next`](Self::next).
    pub fn try_next(&mut self) -> Option<MixOpportunity> {
        loop {
            match self.rx.try_recv() {
                Ok(opportunity) => {
                    if !opportunity.is_expired(Instant::now()) {
                        return Some(opportunity);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
