//! The automix engine: wires monitor, matcher, controller and channel
//! together and runs their loops.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use halo_core::{ConfigError, ConfigManager, MidiPortError, Settings};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::channel::{
    CommandDispatcher, CommandSink, ControlMessage, ControlTarget, MidiCommandSink, MidiSinkConfig,
    RetryPolicy,
};
use crate::deck::{DeckId, DeckRoles, SharedDeckRoles};
use crate::error::{AutomixError, FeedError};
use crate::library::{TrackCatalog, TrackDescriptor, TrackId, TrackQuery};
use crate::matcher::{
    AdvisoryHint, CompatibilityMatcher, MatchMode, MatcherConfig, RankRequest, RankedTrack,
    TEMPO_RATIOS,
};
use crate::midi::Z1Mapping;
use crate::monitor::{
    run_monitor, MixOpportunity, MonitorConfig, OpportunityKind, OpportunityStream,
    PositionMonitor, Urgency,
};
use crate::transition::{
    AutomationEngine, CancelOutcome, ControllerConfig, ControllerState, FaderCurve,
    TransitionController, TransitionPlan, TransitionRecord, TransitionStyle,
};
use crate::transport::TransportFeed;

const RECENT_GENRES: usize = 16;
/// Tempo used for beat-based durations when neither track has one.
const FALLBACK_BPM: f64 = 120.0;
/// Time left on the departing track that a fade must not eat into.
const ENDING_MARGIN_SECS: f64 = 0.5;

/// Engine configuration, usually derived from [`Settings`].
#[derive(Debug, Clone, PartialEq)]
pub struct AutomixConfig {
    pub monitor: MonitorConfig,
    pub controller: ControllerConfig,
    pub matcher: MatcherConfig,
    pub retry: RetryPolicy,
    pub automation_interval: Duration,
    pub allow_relaxed_fallback: bool,
    /// Default fade length in beats of the departing track.
    pub transition_beats: u32,
    pub default_curve: FaderCurve,
    pub autopilot: bool,
    /// Hardware output; `None` when MIDI is disabled.
    pub midi: Option<MidiSinkConfig>,
}

impl Default for AutomixConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl AutomixConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let tick = Duration::from_millis(settings.monitor_interval_ms.max(1));
        let default_curve = settings.fader_curve.parse::<FaderCurve>().unwrap_or_else(|e| {
            log::warn!("{}, using logarithmic", e);
            FaderCurve::Logarithmic
        });

        Self {
            monitor: MonitorConfig {
                tick_interval: tick,
                phrase_length: settings.phrase_length_beats.max(1),
                energy_history_len: settings.energy_history_len,
                emergency_threshold_secs: settings.emergency_threshold_secs,
                energy_shift_threshold: settings.energy_shift_threshold,
                rule_cooldown: Duration::from_secs_f64(settings.rule_cooldown_secs.max(0.0)),
                ..MonitorConfig::default()
            },
            controller: ControllerConfig {
                step_interval: tick,
                preparation_timeout: Duration::from_millis(settings.preparation_timeout_ms),
                ..ControllerConfig::default()
            },
            matcher: MatcherConfig {
                tempo_tolerance_bpm: settings.tempo_tolerance_bpm,
                relaxed_tolerance_bpm: settings
                    .tempo_tolerance_bpm
                    .max(MatcherConfig::default().relaxed_tolerance_bpm),
                ..MatcherConfig::default()
            },
            retry: RetryPolicy {
                retry_budget: settings.retry_budget,
                backoff: Duration::from_millis(settings.retry_backoff_ms),
            },
            automation_interval: Duration::from_millis(settings.automation_interval_ms.max(1)),
            allow_relaxed_fallback: settings.allow_relaxed_fallback,
            transition_beats: settings.transition_beats.max(1),
            default_curve,
            autopilot: settings.autopilot,
            midi: settings.midi_enabled.then(|| {
                let mut midi = MidiSinkConfig {
                    channel: settings.midi_channel.clamp(1, 16),
                    ..MidiSinkConfig::default()
                };
                if !settings.midi_device.trim().is_empty() {
                    midi.device = settings.midi_device.clone();
                }
                midi
            }),
        }
    }

    /// Open the configured MIDI sink, if any.
    pub fn command_sink(&self) -> Result<Option<Box<dyn CommandSink>>, MidiPortError> {
        match &self.midi {
            Some(midi) => {
                let sink = MidiCommandSink::from_config(midi)?;
                log::info!("Sending mixer commands to '{}'", sink.device_name());
                let sink: Box<dyn CommandSink> = Box::new(sink);
                Ok(Some(sink))
            }
            None => Ok(None),
        }
    }

    /// Load through the config manager (`~/.halo/automix.json` unless a path is given).
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut manager = ConfigManager::new(path);
        let settings = manager.load()?;
        log::info!(
            "Loaded automix settings from {}",
            manager.config_path().display()
        );
        Ok(Self::from_settings(&settings))
    }
}

/// Snapshot of engine state for hosts and UIs.
#[derive(Debug, Clone, PartialEq)]
pub struct AutomixStatus {
    pub controller_state: ControllerState,
    pub roles: DeckRoles,
    pub progress: f64,
    pub last_abort: Option<String>,
    pub dispatch_failures: u64,
    pub commands_delivered: u64,
    /// Last crossfader value the mixer accepted.
    pub crossfader: Option<u8>,
    pub feed_stale: bool,
    pub completed_transitions: usize,
    pub autopilot: bool,
    pub pending_opportunities: usize,
}

pub struct AutomixEngine {
    config: AutomixConfig,
    roles: SharedDeckRoles,
    monitor: Arc<Mutex<PositionMonitor>>,
    controller: Arc<Mutex<TransitionController>>,
    dispatcher: Arc<CommandDispatcher>,
    automation: Arc<AutomationEngine>,
    feed: Arc<dyn TransportFeed>,
    catalog: Arc<dyn TrackCatalog>,
    matcher: CompatibilityMatcher,
    deck_tracks: Arc<RwLock<[Option<TrackDescriptor>; 2]>>,
    recent_genres: Mutex<VecDeque<String>>,
    played: Mutex<HashSet<TrackId>>,
    suggestion: Mutex<Option<RankedTrack>>,
    autopilot: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AutomixEngine {
    pub fn new(
        config: AutomixConfig,
        feed: Arc<dyn TransportFeed>,
        sink: Box<dyn CommandSink>,
        catalog: Arc<dyn TrackCatalog>,
    ) -> Self {
        let roles = SharedDeckRoles::default();
        let monitor = Arc::new(Mutex::new(PositionMonitor::new(config.monitor.clone())));
        let controller = Arc::new(Mutex::new(TransitionController::new(
            config.controller.clone(),
            roles.clone(),
        )));
        let dispatcher = Arc::new(CommandDispatcher::new(sink, config.retry));
        let deck_tracks: Arc<RwLock<[Option<TrackDescriptor>; 2]>> =
            Arc::new(RwLock::new([None, None]));

        // The departed deck has played out: forget its track and the
        // opportunities raised against it.
        let finished_tracks = deck_tracks.clone();
        let finished_monitor = monitor.clone();
        let automation = Arc::new(
            AutomationEngine::new(
                controller.clone(),
                dispatcher.clone(),
                feed.clone(),
                config.automation_interval,
            )
            .on_finish(Box::new(move |departed: DeckId| {
                finished_tracks.write()[departed.index()] = None;
                let mut monitor = finished_monitor.lock();
                monitor.set_track(departed, None);
                monitor.reset_opportunities();
                log::debug!("Deck {} cleared after transition", departed);
            })),
        );
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            matcher: CompatibilityMatcher::new(config.matcher.clone()),
            autopilot: AtomicBool::new(config.autopilot),
            config,
            roles,
            monitor,
            controller,
            dispatcher,
            automation,
            feed,
            catalog,
            deck_tracks,
            recent_genres: Mutex::new(VecDeque::new()),
            played: Mutex::new(HashSet::new()),
            suggestion: Mutex::new(None),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &AutomixConfig {
        &self.config
    }

    /// Spawn the monitor, automation and autopilot loops. No-op if running.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        self.shutdown_tx.send_replace(false);

        tasks.push(tokio::spawn(run_monitor(
            self.monitor.clone(),
            self.feed.clone(),
            self.roles.clone(),
            self.shutdown_tx.subscribe(),
        )));
        tasks.push(tokio::spawn(
            self.automation.clone().run(self.shutdown_tx.subscribe()),
        ));
        tasks.push(tokio::spawn(
            self.clone().run_autopilot(self.shutdown_tx.subscribe()),
        ));

        log::info!("Automix engine started");
    }

    /// Signal all loops to stop and wait for them.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                log::error!("Automix task ended abnormally: {}", e);
            }
        }
        log::info!("Automix engine stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    /// Tell the engine which track is loaded on a deck.
    pub fn set_deck_track(&self, deck: DeckId, track: Option<TrackDescriptor>) {
        if let Some(track) = &track {
            log::info!("Deck {} loaded '{}'", deck, track.display_name());
            self.played.lock().insert(track.id);
        }
        self.monitor.lock().set_track(deck, track.clone());
        self.deck_tracks.write()[deck.index()] = track;
        *self.suggestion.lock() = None;
    }

    pub fn deck_track(&self, deck: DeckId) -> Option<TrackDescriptor> {
        self.deck_tracks.read()[deck.index()].clone()
    }

    pub fn set_autopilot(&self, enabled: bool) {
        let previous = self.autopilot.swap(enabled, Ordering::Relaxed);
        if previous != enabled {
            log::info!("Autopilot {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    pub fn autopilot(&self) -> bool {
        self.autopilot.load(Ordering::Relaxed)
    }

    pub fn roles(&self) -> DeckRoles {
        self.roles.get()
    }

    /// Submit a plan for the arriving deck. Fails with `Busy` unless idle.
    pub fn submit_plan(&self, plan: TransitionPlan) -> Result<(), AutomixError> {
        let departing = self.roles.get().departing();
        let departing_track = self.deck_track(departing).map(|t| t.id);
        let target = plan.target.clone();

        self.controller.lock().submit(
            plan,
            departing_track,
            self.dispatcher.failure_count(),
            Instant::now(),
        )?;

        self.played.lock().insert(target.id);
        if let Some(genre) = target.genre {
            let mut genres = self.recent_genres.lock();
            genres.push_back(genre);
            while genres.len() > RECENT_GENRES {
                genres.pop_front();
            }
        }
        Ok(())
    }

    pub fn get_status(&self) -> AutomixStatus {
        let controller = self.controller.lock().status();
        let (feed_stale, pending) = {
            let monitor = self.monitor.lock();
            (monitor.is_feed_stale(), monitor.pending(Instant::now()))
        };

        AutomixStatus {
            controller_state: controller.state,
            roles: self.roles.get(),
            progress: controller.progress,
            last_abort: controller.last_abort,
            dispatch_failures: self.dispatcher.failure_count(),
            commands_delivered: self.dispatcher.delivered_count(),
            crossfader: self.dispatcher.last_applied(ControlTarget::Crossfader),
            feed_stale,
            completed_transitions: self.controller.lock().history().len(),
            autopilot: self.autopilot(),
            pending_opportunities: pending,
        }
    }

    /// Stop the running transition. Never fails; see [`CancelOutcome`].
    pub async fn cancel_active_transition(&self) -> CancelOutcome {
        self.automation.cancel().await
    }

    /// Subscribe to newly detected opportunities.
    pub fn opportunities(&self) -> OpportunityStream {
        self.monitor.lock().subscribe()
    }

    /// Take the oldest unexpired opportunity from the queue.
    pub fn next_opportunity(&self) -> Option<MixOpportunity> {
        self.monitor.lock().take_next(Instant::now())
    }

    pub fn history(&self) -> Vec<TransitionRecord> {
        self.controller.lock().history().to_vec()
    }

    /// Last track suggested by the autopilot for the empty arriving deck.
    pub fn suggested_track(&self) -> Option<RankedTrack> {
        self.suggestion.lock().clone()
    }

    /// Best candidate to follow the track on the departing deck.
    pub fn select_next_track(
        &self,
        hint: Option<AdvisoryHint>,
    ) -> Result<RankedTrack, AutomixError> {
        let departing = self.roles.get().departing();
        let reference = self.deck_track(departing).ok_or_else(|| {
            log::warn!("Cannot select a track: nothing loaded on deck {}", departing);
            AutomixError::NoCompatibleCandidate
        })?;

        let candidates = self.candidates_for(&reference);
        let mut exclude = self.played.lock().clone();
        exclude.extend(self.deck_tracks.read().iter().flatten().map(|t| t.id));
        let recent: Vec<String> = self.recent_genres.lock().iter().cloned().collect();

        let request = RankRequest::new(&reference, &candidates)
            .exclude(&exclude)
            .recent_genres(&recent)
            .hint(hint);
        let (mode, ranked) = self
            .matcher
            .rank_with_fallback(&request, self.config.allow_relaxed_fallback)?;

        let best = ranked
            .into_iter()
            .next()
            .ok_or(AutomixError::NoCompatibleCandidate)?;
        log::info!(
            "Selected '{}' (score {:.2}{})",
            best.track.display_name(),
            best.score,
            if mode == MatchMode::Relaxed { ", relaxed" } else { "" }
        );
        Ok(best)
    }

    /// Plan a transition to `track` sized for `urgency`.
    pub fn plan_for(&self, track: &TrackDescriptor, urgency: Urgency) -> TransitionPlan {
        let departing = self.roles.get().departing();
        let departing_track = self.deck_track(departing);
        let beats = match urgency {
            Urgency::Low | Urgency::Medium => self.config.transition_beats,
            Urgency::High => (self.config.transition_beats / 2).max(1),
            Urgency::Critical => (self.config.transition_beats / 4).max(1),
        };
        // Beats of the departing track, else of the target.
        let mut seconds = departing_track
            .as_ref()
            .and_then(|t| t.beats_to_seconds(beats))
            .or_else(|| track.beats_to_seconds(beats))
            .unwrap_or(beats as f64 * 60.0 / FALLBACK_BPM);

        let remaining = self
            .monitor
            .lock()
            .snapshot(departing)
            .map(|s| s.remaining_seconds);
        if let Some(remaining) = remaining {
            seconds = seconds.min(remaining - ENDING_MARGIN_SECS);
        }
        if seconds < self.config.controller.step_interval.as_secs_f64() {
            return TransitionPlan::cut(track.clone());
        }

        let tempo_sync = match (departing_track.and_then(|t| t.bpm), track.bpm) {
            (Some(a), Some(b)) => (a - b).abs() > 0.5,
            _ => false,
        };
        let style = if urgency >= Urgency::High {
            TransitionStyle::LinearFade
        } else {
            TransitionStyle::CurvedFade
        };

        TransitionPlan::new(track.clone(), Duration::from_secs_f64(seconds))
            .with_style(style)
            .with_curve(self.config.default_curve)
            .with_tempo_sync(tempo_sync)
    }

    /// Transition now to the track cued on the arriving deck.
    pub fn force_transition(&self) -> Result<(), AutomixError> {
        if self.monitor.lock().is_feed_stale() {
            return Err(AutomixError::StaleFeed);
        }
        let arriving = self.roles.get().arriving();
        let track = self
            .deck_track(arriving)
            .ok_or(AutomixError::Feed(FeedError::NoTrack(arriving)))?;
        let plan = self.plan_for(&track, Urgency::High);
        log::info!("Forced transition to '{}'", track.display_name());
        self.submit_plan(plan)
    }

    /// Send a raw value to a mixer control, by Z1 CC number.
    pub async fn manual_override(&self, control: u8, value: u8) -> Result<(), AutomixError> {
        let target = Z1Mapping::target_for_cc(control).ok_or(AutomixError::UnknownControl(control))?;
        let message = ControlMessage::new(target, value);
        let mut link = self.dispatcher.acquire().await;
        link.send(&message).await?;
        log::debug!("Manual override {} = {}", target, message.value);
        Ok(())
    }

    /// Consume queued opportunities and submit a plan if one is worth acting on.
    /// Returns whether a plan was submitted.
    pub fn autopilot_step(&self) -> Result<bool, AutomixError> {
        if !self.autopilot() || self.controller.lock().state() != ControllerState::Idle {
            return Ok(false);
        }
        if self.monitor.lock().is_feed_stale() {
            return Err(AutomixError::StaleFeed);
        }

        let now = Instant::now();
        let roles = self.roles.get();
        let opportunity = loop {
            let Some(opportunity) = self.monitor.lock().take_next(now) else {
                return Ok(false);
            };
            // Opportunities raised before the last swap refer to the wrong deck.
            if opportunity.deck == roles.departing() && opportunity.urgency >= Urgency::Medium {
                break opportunity;
            }
        };

        let arriving = roles.arriving();
        let Some(track) = self.deck_track(arriving) else {
            let hint = self.hint_for(&opportunity);
            let best = self.select_next_track(hint)?;
            log::info!(
                "Autopilot suggests '{}' for deck {}",
                best.track.display_name(),
                arriving
            );
            *self.suggestion.lock() = Some(best);
            return Ok(false);
        };

        log::info!(
            "Autopilot acting on {} (urgency {})",
            opportunity.kind,
            opportunity.urgency.tier()
        );
        let plan = self.plan_for(&track, opportunity.urgency);
        self.submit_plan(plan)?;
        Ok(true)
    }

    fn hint_for(&self, opportunity: &MixOpportunity) -> Option<AdvisoryHint> {
        if opportunity.kind != OpportunityKind::EnergyShift {
            return None;
        }
        match self.monitor.lock().energy_trend() {
            Some(trend) if trend > 0.0 => Some(AdvisoryHint::PreferHigherEnergy),
            Some(_) => Some(AdvisoryHint::PreferLowerEnergy),
            None => None,
        }
    }

    /// Candidate pool from the catalog. Failures count as no candidates.
    fn candidates_for(&self, reference: &TrackDescriptor) -> Vec<TrackDescriptor> {
        let tolerance = self
            .config
            .matcher
            .tempo_tolerance_bpm
            .max(self.config.matcher.relaxed_tolerance_bpm);
        let queries: Vec<TrackQuery> = match (reference.bpm, reference.key) {
            (Some(bpm), _) => TEMPO_RATIOS
                .iter()
                .map(|ratio| TrackQuery::TempoRange {
                    min: bpm * ratio - tolerance,
                    max: bpm * ratio + tolerance,
                })
                .collect(),
            (None, Some(key)) if !self.config.allow_relaxed_fallback => {
                vec![TrackQuery::Key(key.compatible_keys().to_vec())]
            }
            _ => vec![TrackQuery::All],
        };

        let mut seen = HashSet::new();
        let mut pool = Vec::new();
        for query in &queries {
            match self.catalog.find(query) {
                Ok(tracks) => {
                    for track in tracks {
                        if seen.insert(track.id) {
                            pool.push(track);
                        }
                    }
                }
                Err(e) => log::warn!("Catalog lookup failed: {}", e),
            }
        }
        pool.sort_by_key(|t| t.id);
        pool
    }

    async fn run_autopilot(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.monitor.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.autopilot_step() {
                        Ok(_) => {}
                        Err(AutomixError::StaleFeed) => {}
                        Err(e) => log::warn!("Autopilot: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        log::debug!("Autopilot loop stopped");
    }
}
