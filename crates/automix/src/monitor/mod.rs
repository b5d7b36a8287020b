//! Position and opportunity monitor.
//!
//! Each tick the monitor reads the departing deck, derives beat and phrase
//! alignment, tracks the energy trend and runs the opportunity rules. New
//! opportunities are queued for at-most-once consumption and broadcast to
//! subscribers.

mod opportunity;

pub use opportunity::{MixOpportunity, OpportunityKind, OpportunityStream, Urgency};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use crate::deck::{DeckId, SharedDeckRoles};
use crate::error::FeedError;
use crate::library::TrackDescriptor;
use crate::transport::{PlaybackSnapshot, TransportFeed, TransportReading};

const BROADCAST_CAPACITY: usize = 64;
const MIN_TREND_SAMPLES: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub tick_interval: Duration,
    /// Beats per phrase.
    pub phrase_length: u32,
    /// Energy samples kept for the trend.
    pub energy_history_len: usize,
    /// Remaining time at which track-ending alerts start.
    pub emergency_threshold_secs: f64,
    /// Remaining time at which track-ending alerts become critical.
    pub critical_threshold_secs: f64,
    /// Absolute trend needed for an energy-shift opportunity.
    pub energy_shift_threshold: f64,
    /// Minimum spacing between two opportunities of the same kind on one deck.
    pub rule_cooldown: Duration,
    /// Time-to-point range for the optimal mix point rule.
    pub optimal_window_secs: (f64, f64),
    pub dedup_distance_secs: f64,
    pub dedup_window: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            phrase_length: 16,
            energy_history_len: 20,
            emergency_threshold_secs: 10.0,
            critical_threshold_secs: 5.0,
            energy_shift_threshold: 0.3,
            rule_cooldown: Duration::from_secs(4),
            optimal_window_secs: (5.0, 15.0),
            dedup_distance_secs: 2.0,
            dedup_window: Duration::from_secs(5),
        }
    }
}

/// Outcome of one monitor tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Snapshot the rules ran against (extrapolated on a single miss).
    pub snapshot: Option<PlaybackSnapshot>,
    pub emitted: Vec<MixOpportunity>,
    pub feed_stale: bool,
}

pub struct PositionMonitor {
    config: MonitorConfig,
    snapshots: [Option<PlaybackSnapshot>; 2],
    tracks: [Option<TrackDescriptor>; 2],
    energy_history: VecDeque<f64>,
    history_deck: Option<DeckId>,
    consecutive_misses: u32,
    feed_stale: bool,
    last_fired: HashMap<(DeckId, OpportunityKind), (Instant, Urgency)>,
    recent: Vec<MixOpportunity>,
    queue: VecDeque<MixOpportunity>,
    next_id: u64,
    tx: broadcast::Sender<MixOpportunity>,
}

impl PositionMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            energy_history: VecDeque::with_capacity(config.energy_history_len),
            config,
            snapshots: [None, None],
            tracks: [None, None],
            history_deck: None,
            consecutive_misses: 0,
            feed_stale: false,
            last_fired: HashMap::new(),
            recent: Vec::new(),
            queue: VecDeque::new(),
            next_id: 1,
            tx,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Set the track loaded on a deck; its mix points feed the optimal point rule.
    pub fn set_track(&mut self, deck: DeckId, track: Option<TrackDescriptor>) {
        self.tracks[deck.index()] = track;
    }

    pub fn track(&self, deck: DeckId) -> Option<&TrackDescriptor> {
        self.tracks[deck.index()].as_ref()
    }

    /// Last fresh snapshot for a deck.
    pub fn snapshot(&self, deck: DeckId) -> Option<&PlaybackSnapshot> {
        self.snapshots[deck.index()].as_ref()
    }

    pub fn is_feed_stale(&self) -> bool {
        self.feed_stale
    }

    pub fn subscribe(&self) -> OpportunityStream {
        OpportunityStream::new(self.tx.subscribe())
    }

    /// Pop the oldest unexpired opportunity. Each one is handed out once.
    pub fn take_next(&mut self, now: Instant) -> Option<MixOpportunity> {
        while let Some(opportunity) = self.queue.pop_front() {
            if !opportunity.is_expired(now) {
                return Some(opportunity);
            }
        }
        None
    }

    /// Unexpired opportunities waiting in the queue.
    pub fn pending(&self, now: Instant) -> usize {
        self.queue.iter().filter(|o| !o.is_expired(now)).count()
    }

    /// Normalised energy slope across the rolling window (-1.0..=1.0).
    pub fn energy_trend(&self) -> Option<f64> {
        let n = self.energy_history.len();
        if n < MIN_TREND_SAMPLES {
            return None;
        }

        let mean_x = (n - 1) as f64 / 2.0;
        let mean_y = self.energy_history.iter().sum::<f64>() / n as f64;
        let (mut cov, mut var) = (0.0, 0.0);
        for (i, y) in self.energy_history.iter().enumerate() {
            let dx = i as f64 - mean_x;
            cov += dx * (y - mean_y);
            var += dx * dx;
        }
        let slope = cov / var;
        Some((slope * (n - 1) as f64).clamp(-1.0, 1.0))
    }

    /// Clear the queue and rule memory, keeping snapshots.
    pub fn reset_opportunities(&mut self) {
        self.queue.clear();
        self.recent.clear();
        self.last_fired.clear();
    }

    /// Process one feed result for `deck` and run the rules.
    pub fn ingest(
        &mut self,
        deck: DeckId,
        result: Result<TransportReading, FeedError>,
        now: Instant,
    ) -> TickReport {
        self.purge_expired(now);

        if self.history_deck != Some(deck) {
            self.energy_history.clear();
            self.history_deck = Some(deck);
        }

        let snapshot = match result {
            Ok(reading) => {
                if self.feed_stale {
                    log::info!("Transport feed recovered on deck {}", deck);
                }
                self.consecutive_misses = 0;
                self.feed_stale = false;

                let snapshot =
                    PlaybackSnapshot::from_reading(deck, &reading, self.config.phrase_length, now);
                self.energy_history.push_back(snapshot.energy);
                while self.energy_history.len() > self.config.energy_history_len.max(1) {
                    self.energy_history.pop_front();
                }
                self.snapshots[deck.index()] = Some(snapshot.clone());
                snapshot
            }
            Err(e) => {
                self.consecutive_misses += 1;
                if self.consecutive_misses >= 2 {
                    if !self.feed_stale {
                        log::warn!("Transport feed stale on deck {}: {}", deck, e);
                    }
                    self.feed_stale = true;
                    return TickReport {
                        snapshot: None,
                        emitted: Vec::new(),
                        feed_stale: true,
                    };
                }

                log::debug!("Missed transport reading on deck {}: {}", deck, e);
                let Some(last) = self.snapshots[deck.index()].as_ref() else {
                    return TickReport::default();
                };
                last.extrapolated(
                    self.config.tick_interval.as_secs_f64(),
                    self.config.phrase_length,
                    now,
                )
            }
        };

        let mut emitted = Vec::new();
        for candidate in self.evaluate(&snapshot, now) {
            if let Some(opportunity) = self.admit(candidate, now) {
                emitted.push(opportunity);
            }
        }

        TickReport {
            snapshot: Some(snapshot),
            emitted,
            feed_stale: false,
        }
    }

    fn purge_expired(&mut self, now: Instant) {
        self.queue.retain(|o| !o.is_expired(now));
        let window = self.config.dedup_window;
        self.recent
            .retain(|o| now.saturating_duration_since(o.created_at) < window);
    }

    /// Candidate opportunities in rule order, ids not yet assigned.
    fn evaluate(&self, snapshot: &PlaybackSnapshot, now: Instant) -> Vec<MixOpportunity> {
        let mut candidates = Vec::new();
        let deck = snapshot.deck;
        let position = snapshot.position_seconds;

        if let Some(point) = self.tracks[deck.index()]
            .as_ref()
            .and_then(|t| t.next_mix_point(position))
        {
            let time_to_point = point - position;
            let (min, max) = self.config.optimal_window_secs;
            if (min..=max).contains(&time_to_point) {
                candidates.push(MixOpportunity::new(
                    0,
                    OpportunityKind::OptimalPoint,
                    deck,
                    point,
                    (point, point + 5.0),
                    0.9,
                    0.9,
                    Urgency::Medium,
                    now,
                    Duration::from_secs_f64(time_to_point + 5.0),
                ));
            }
        }

        if let Some(beat_seconds) = snapshot.beat_seconds() {
            let beats_until = snapshot.beats_until_phrase(self.config.phrase_length);
            if beats_until <= 2 {
                let boundary = position + beats_until as f64 * beat_seconds;
                let phrase_seconds = self.config.phrase_length as f64 * beat_seconds;
                candidates.push(MixOpportunity::new(
                    0,
                    OpportunityKind::PhraseBoundary,
                    deck,
                    boundary,
                    (boundary, boundary + phrase_seconds),
                    0.8,
                    0.6,
                    Urgency::Low,
                    now,
                    Duration::from_secs(8),
                ));
            }
        }

        let remaining = snapshot.remaining_seconds;
        if remaining > 0.0 && remaining <= self.config.emergency_threshold_secs {
            let urgency = if remaining <= self.config.critical_threshold_secs {
                Urgency::Critical
            } else {
                Urgency::High
            };
            candidates.push(MixOpportunity::new(
                0,
                OpportunityKind::TrackEnding,
                deck,
                position + remaining,
                (position, position + remaining),
                1.0,
                0.3,
                urgency,
                now,
                Duration::from_secs_f64(remaining),
            ));
        }

        if let Some(trend) = self.energy_trend() {
            if trend.abs() > self.config.energy_shift_threshold {
                candidates.push(MixOpportunity::new(
                    0,
                    OpportunityKind::EnergyShift,
                    deck,
                    position,
                    (position, position + 30.0),
                    trend.abs(),
                    0.5,
                    Urgency::Medium,
                    now,
                    Duration::from_secs(30),
                ));
            }
        }

        candidates
    }

    /// Apply cooldown, dedup and escalation; emit if the candidate survives.
    fn admit(&mut self, mut candidate: MixOpportunity, now: Instant) -> Option<MixOpportunity> {
        let kind = candidate.kind;
        let rule = (candidate.deck, kind);
        let last = self.last_fired.get(&rule).copied();
        let escalation = last.is_some_and(|(_, urgency)| candidate.urgency > urgency);

        if !escalation {
            if let Some((fired_at, _)) = last {
                if now.saturating_duration_since(fired_at) < self.config.rule_cooldown {
                    return None;
                }
            }
            let duplicate = self.recent.iter().any(|o| {
                o.kind == kind
                    && o.deck == candidate.deck
                    && (o.position_seconds - candidate.position_seconds).abs()
                        < self.config.dedup_distance_secs
            });
            if duplicate {
                return None;
            }
        }

        candidate.id = self.next_id;
        self.next_id += 1;

        log::debug!(
            "Opportunity {} {} on deck {} (urgency {}, position {:.1}s)",
            candidate.id,
            kind,
            candidate.deck,
            candidate.urgency.tier(),
            candidate.position_seconds
        );

        self.last_fired.insert(rule, (now, candidate.urgency));
        self.recent.push(candidate.clone());
        self.queue.push_back(candidate.clone());
        // No subscribers is not an error.
        let _ = self.tx.send(candidate.clone());
        Some(candidate)
    }
}

/// Monitor loop: poll the departing deck every tick until shutdown.
pub async fn run_monitor(
    monitor: Arc<Mutex<PositionMonitor>>,
    feed: Arc<dyn TransportFeed>,
    roles: SharedDeckRoles,
    mut shutdown: watch::Receiver<bool>,
) {
    let tick = monitor.lock().config().tick_interval;
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    log::info!("Position monitor started ({}ms tick)", tick.as_millis());

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let deck = roles.get().departing();
                let result = match tokio::time::timeout(tick, feed.read_snapshot(deck)).await {
                    Ok(result) => result,
                    Err(_) => Err(FeedError::Timeout),
                };
                monitor.lock().ingest(deck, result, Instant::now());
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    log::info!("Position monitor stopped");
}
