//! Transition state machine.
//!
//! The controller is synchronous: it decides what has to be sent and when,
//! the automation loop does the sending and reports back. Every report
//! carries the plan id so a late report for an aborted plan is ignored.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::plan::{FaderCurve, TransitionPlan, TransitionStyle};
use crate::channel::{ControlMessage, ControlTarget, EqBand, MAX_VALUE, NEUTRAL};
use crate::deck::{DeckId, DeckRoles, SharedDeckRoles};
use crate::error::AutomixError;
use crate::library::TrackId;

const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Spacing of automation steps.
    pub step_interval: Duration,
    /// Bound on precondition check plus preparation commands.
    pub preparation_timeout: Duration,
    /// Arriving high band level while cued.
    pub high_band_floor: u8,
    /// Crossfader feedback within this distance counts as verified.
    pub verify_tolerance: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            step_interval: Duration::from_millis(100),
            preparation_timeout: Duration::from_secs(2),
            high_band_floor: 32,
            verify_tolerance: 0.07,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerState {
    Idle,
    Preparing,
    Active,
    Finalizing,
    Aborted,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Active => "active",
            Self::Finalizing => "finalizing",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The transition was stopped and tone controls reset.
    Cancelled,
    NothingToCancel,
    /// Too late: the roles have already swapped.
    AlreadyFinalizing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransitionOutcome {
    Completed,
    Aborted(String),
}

/// History entry for one accepted plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub target: TrackId,
    pub target_title: String,
    pub style: TransitionStyle,
    pub curve: FaderCurve,
    pub planned_duration: Duration,
    pub departing: DeckId,
    pub outcome: TransitionOutcome,
    /// Delivery failures absorbed or fatal during this transition.
    pub dispatch_failures: u64,
    /// Crossfader feedback check; `None` when the device reports nothing.
    pub verified: Option<bool>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Loaded-track check the automation loop runs against the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct PreconditionCheck {
    pub plan_id: u64,
    pub deck: DeckId,
    pub expected: TrackId,
    pub deadline: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutomationStep {
    /// 1-based step index.
    pub index: u32,
    pub total: u32,
    pub progress: f64,
    pub due_at: Instant,
    pub commands: Vec<ControlMessage>,
}

/// Crossfader feedback expected once the transition lands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerifyCheck {
    pub deck: DeckId,
    pub expected_crossfader: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Work {
    Idle,
    Prepare {
        plan_id: u64,
        commands: Vec<ControlMessage>,
    },
    Steps {
        plan_id: u64,
        steps: Vec<AutomationStep>,
    },
    Finalize {
        plan_id: u64,
        commands: Vec<ControlMessage>,
        verify: VerifyCheck,
    },
    Abort {
        plan_id: u64,
        commands: Vec<ControlMessage>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrepPhase {
    AwaitingCheck,
    Checking,
    Verified,
}

#[derive(Debug)]
struct ActiveTransition {
    id: u64,
    plan: TransitionPlan,
    roles: DeckRoles,
    total_steps: u32,
    applied: u32,
    phase: PrepPhase,
    deadline: Instant,
    active_since: Option<Instant>,
    failure_baseline: u64,
    started_at: DateTime<Utc>,
}

impl ActiveTransition {
    fn progress(&self) -> f64 {
        self.applied as f64 / self.total_steps as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerStatus {
    pub state: ControllerState,
    pub progress: f64,
    pub target: Option<TrackId>,
    pub steps_applied: u32,
    pub steps_total: u32,
    pub last_abort: Option<String>,
}

pub struct TransitionController {
    config: ControllerConfig,
    roles: SharedDeckRoles,
    state: ControllerState,
    current: Option<ActiveTransition>,
    next_id: u64,
    last_abort: Option<String>,
    history: Vec<TransitionRecord>,
}

impl TransitionController {
    pub fn new(config: ControllerConfig, roles: SharedDeckRoles) -> Self {
        Self {
            config,
            roles,
            state: ControllerState::Idle,
            current: None,
            next_id: 1,
            last_abort: None,
            history: Vec::new(),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn roles(&self) -> DeckRoles {
        self.roles.get()
    }

    pub fn progress(&self) -> f64 {
        self.current.as_ref().map_or(0.0, ActiveTransition::progress)
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            state: self.state,
            progress: self.progress(),
            target: self.current.as_ref().map(|c| c.plan.target.id),
            steps_applied: self.current.as_ref().map_or(0, |c| c.applied),
            steps_total: self.current.as_ref().map_or(0, |c| c.total_steps),
            last_abort: self.last_abort.clone(),
        }
    }

    /// Accept a plan if idle. `departing_track` is what is playing now;
    /// `failure_baseline` is the dispatcher's failure count at submission.
    pub fn submit(
        &mut self,
        plan: TransitionPlan,
        departing_track: Option<TrackId>,
        failure_baseline: u64,
        now: Instant,
    ) -> Result<u64, AutomixError> {
        if self.state != ControllerState::Idle {
            return Err(AutomixError::Busy);
        }
        if plan.style != TransitionStyle::Cut && plan.duration.is_zero() {
            return Err(AutomixError::PlanRejected(
                "fade duration must be positive".to_string(),
            ));
        }
        if departing_track == Some(plan.target.id) {
            return Err(AutomixError::PlanRejected(format!(
                "track {} is already playing",
                plan.target.id
            )));
        }

        let id = self.next_id;
        self.next_id += 1;
        let roles = self.roles.get();
        let total_steps = plan.step_count(self.config.step_interval);

        log::info!(
            "Transition {} accepted: {:?} to '{}' on deck {} ({} steps over {:.1}s)",
            id,
            plan.style,
            plan.target.display_name(),
            roles.arriving(),
            total_steps,
            plan.duration.as_secs_f64()
        );

        self.current = Some(ActiveTransition {
            id,
            plan,
            roles,
            total_steps,
            applied: 0,
            phase: PrepPhase::AwaitingCheck,
            deadline: now + self.config.preparation_timeout,
            active_since: None,
            failure_baseline,
            started_at: Utc::now(),
        });
        self.last_abort = None;
        self.state = ControllerState::Preparing;
        Ok(id)
    }

    /// Hand out the loaded-track check once per plan.
    pub fn pending_check(&mut self) -> Option<PreconditionCheck> {
        if self.state != ControllerState::Preparing {
            return None;
        }
        let current = self.current.as_mut()?;
        if current.phase != PrepPhase::AwaitingCheck {
            return None;
        }
        current.phase = PrepPhase::Checking;
        Some(PreconditionCheck {
            plan_id: current.id,
            deck: current.roles.arriving(),
            expected: current.plan.target.id,
            deadline: current.deadline,
        })
    }

    pub fn precondition_result(&mut self, plan_id: u64, result: Result<(), String>) {
        if self.state != ControllerState::Preparing {
            return;
        }
        let Some(current) = self.current.as_mut().filter(|c| c.id == plan_id) else {
            return;
        };
        match result {
            Ok(()) => current.phase = PrepPhase::Verified,
            Err(reason) => {
                self.begin_abort(format!("precondition failed: {}", reason));
            }
        }
    }

    /// What the automation loop should send now.
    pub fn next_work(&mut self, now: Instant) -> Work {
        match self.state {
            ControllerState::Idle => Work::Idle,
            ControllerState::Preparing => {
                let Some(current) = self.current.as_ref() else {
                    return Work::Idle;
                };
                if now >= current.deadline {
                    self.begin_abort("preparation timed out");
                    return self.abort_work();
                }
                if current.phase != PrepPhase::Verified {
                    return Work::Idle;
                }
                Work::Prepare {
                    plan_id: current.id,
                    commands: self.preparation_commands(current),
                }
            }
            ControllerState::Active => {
                let Some(current) = self.current.as_ref() else {
                    return Work::Idle;
                };
                let start = current.active_since.unwrap_or(now);
                let mut steps = Vec::new();
                for index in current.applied + 1..=current.total_steps {
                    let due_at = start + current.plan.duration * index / current.total_steps;
                    if due_at > now {
                        break;
                    }
                    steps.push(self.step(current, index, due_at));
                }
                if steps.is_empty() {
                    Work::Idle
                } else {
                    Work::Steps {
                        plan_id: current.id,
                        steps,
                    }
                }
            }
            ControllerState::Finalizing => {
                let Some(current) = self.current.as_ref() else {
                    return Work::Idle;
                };
                let departed = current.roles.departing();
                let arriving = current.roles.arriving();
                Work::Finalize {
                    plan_id: current.id,
                    commands: ControlMessage::neutral_eq(departed).to_vec(),
                    verify: VerifyCheck {
                        deck: arriving,
                        expected_crossfader: crossfader_position(arriving, 1.0),
                    },
                }
            }
            ControllerState::Aborted => self.abort_work(),
        }
    }

    /// Preparation commands were delivered; start the step clock.
    pub fn preparation_complete(&mut self, plan_id: u64, now: Instant) {
        if self.state != ControllerState::Preparing {
            return;
        }
        if let Some(current) = self.current.as_mut().filter(|c| c.id == plan_id) {
            current.active_since = Some(now);
            self.state = ControllerState::Active;
            log::debug!("Transition {} active", plan_id);
        }
    }

    /// Step `index` was delivered. Returns the new roles once the last step lands.
    pub fn step_applied(&mut self, plan_id: u64, index: u32) -> Option<DeckRoles> {
        if self.state != ControllerState::Active {
            return None;
        }
        let current = self.current.as_mut().filter(|c| c.id == plan_id)?;
        if index != current.applied + 1 {
            log::warn!(
                "Out of order step {} for transition {} (applied {})",
                index,
                plan_id,
                current.applied
            );
            return None;
        }
        current.applied = index;
        if index < current.total_steps {
            return None;
        }

        self.state = ControllerState::Finalizing;
        let roles = self.roles.swap();
        log::info!(
            "Transition {} reached full progress, deck {} is now playing",
            plan_id,
            roles.departing()
        );
        Some(roles)
    }

    /// Record a completed transition and return to idle. False if `plan_id`
    /// is not the plan being finalized.
    pub fn finish(&mut self, plan_id: u64, failure_count: u64, verified: Option<bool>) -> bool {
        if self.state != ControllerState::Finalizing {
            return false;
        }
        if self.current.as_ref().map(|c| c.id) != Some(plan_id) {
            return false;
        }
        let Some(current) = self.current.take() else {
            return false;
        };
        if verified == Some(false) {
            log::warn!("Transition {} finished but crossfader feedback disagrees", plan_id);
        }
        self.record(current, TransitionOutcome::Completed, failure_count, verified);
        self.state = ControllerState::Idle;
        true
    }

    /// Move to `Aborted`. Only valid while preparing or active; false otherwise.
    pub fn begin_abort(&mut self, reason: impl Into<String>) -> bool {
        if !matches!(
            self.state,
            ControllerState::Preparing | ControllerState::Active
        ) {
            return false;
        }
        let reason = reason.into();
        if let Some(current) = &self.current {
            log::error!("Transition {} aborted: {}", current.id, reason);
        }
        self.last_abort = Some(reason);
        self.state = ControllerState::Aborted;
        true
    }

    /// Neutral reset was attempted; record the abort and return to idle.
    pub fn abort_complete(&mut self, plan_id: u64, failure_count: u64) {
        if self.state != ControllerState::Aborted {
            return;
        }
        if self.current.as_ref().map(|c| c.id) != Some(plan_id) {
            return;
        }
        if let Some(current) = self.current.take() {
            let reason = self.last_abort.clone().unwrap_or_default();
            self.record(current, TransitionOutcome::Aborted(reason), failure_count, None);
        }
        self.state = ControllerState::Idle;
    }

    /// Start aborting the current transition on operator request.
    pub fn cancel(&mut self) -> CancelOutcome {
        match self.state {
            ControllerState::Preparing | ControllerState::Active => {
                self.begin_abort("cancelled");
                CancelOutcome::Cancelled
            }
            ControllerState::Finalizing => CancelOutcome::AlreadyFinalizing,
            ControllerState::Idle | ControllerState::Aborted => CancelOutcome::NothingToCancel,
        }
    }

    fn abort_work(&self) -> Work {
        let Some(current) = self.current.as_ref() else {
            return Work::Idle;
        };
        let mut commands = ControlMessage::neutral_eq(DeckId::A).to_vec();
        commands.extend(ControlMessage::neutral_eq(DeckId::B));
        Work::Abort {
            plan_id: current.id,
            commands,
        }
    }

    fn preparation_commands(&self, current: &ActiveTransition) -> Vec<ControlMessage> {
        let arriving = current.roles.arriving();
        let mut commands = Vec::new();
        if current.plan.automates_eq() {
            commands.push(ControlMessage::eq(arriving, EqBand::Low, 0));
            commands.push(ControlMessage::eq(
                arriving,
                EqBand::High,
                self.config.high_band_floor,
            ));
        }
        if current.plan.tempo_sync {
            commands.push(ControlMessage::new(
                ControlTarget::TempoSync(arriving),
                MAX_VALUE,
            ));
        }
        commands
    }

    fn step(&self, current: &ActiveTransition, index: u32, due_at: Instant) -> AutomationStep {
        let total = current.total_steps;
        let progress = index as f64 / total as f64;
        let departing = current.roles.departing();
        let arriving = current.roles.arriving();

        let level = current.plan.fader_level(progress);
        let mut commands = vec![ControlMessage::from_level(
            ControlTarget::Crossfader,
            crossfader_position(arriving, level),
        )];

        if current.plan.automates_eq() {
            let neutral = NEUTRAL as f64;
            let floor = self.config.high_band_floor as f64;
            let scale = |v: f64| v.round().clamp(0.0, MAX_VALUE as f64) as u8;
            commands.push(ControlMessage::eq(
                departing,
                EqBand::Low,
                scale(neutral * (1.0 - progress)),
            ));
            commands.push(ControlMessage::eq(
                arriving,
                EqBand::High,
                scale(floor + (neutral - floor) * progress),
            ));
            commands.push(ControlMessage::eq(
                arriving,
                EqBand::Low,
                scale(neutral * progress),
            ));
        }

        AutomationStep {
            index,
            total,
            progress,
            due_at,
            commands,
        }
    }

    fn record(
        &mut self,
        current: ActiveTransition,
        outcome: TransitionOutcome,
        failure_count: u64,
        verified: Option<bool>,
    ) {
        self.history.push(TransitionRecord {
            target: current.plan.target.id,
            target_title: current.plan.target.display_name(),
            style: current.plan.style,
            curve: current.plan.curve,
            planned_duration: current.plan.duration,
            departing: current.roles.departing(),
            outcome,
            dispatch_failures: failure_count.saturating_sub(current.failure_baseline),
            verified,
            started_at: current.started_at,
            finished_at: Utc::now(),
        });
        if self.history.len() > HISTORY_LIMIT {
            self.history.remove(0);
        }
    }
}

/// Crossfader position (0.0 = deck A, 1.0 = deck B) for a level toward `arriving`.
pub fn crossfader_position(arriving: DeckId, level: f64) -> f64 {
    match arriving {
        DeckId::B => level,
        DeckId::A => 1.0 - level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::TrackDescriptor;

    fn target() -> TrackDescriptor {
        TrackDescriptor::new(TrackId(2), "arriving", 300.0).with_bpm(128.0)
    }

    fn controller() -> (TransitionController, SharedDeckRoles) {
        let roles = SharedDeckRoles::default();
        (
            TransitionController::new(ControllerConfig::default(), roles.clone()),
            roles,
        )
    }

    /// Drive a plan through preparation.
    fn activate(controller: &mut TransitionController, plan: TransitionPlan, now: Instant) -> u64 {
        let id = controller.submit(plan, Some(TrackId(1)), 0, now).unwrap();
        let check = controller.pending_check().unwrap();
        assert_eq!(check.expected, TrackId(2));
        controller.precondition_result(id, Ok(()));
        match controller.next_work(now) {
            Work::Prepare { plan_id, .. } => assert_eq!(plan_id, id),
            other => panic!("expected preparation, got {:?}", other),
        }
        controller.preparation_complete(id, now);
        id
    }

    #[test]
    fn test_busy_while_not_idle() {
        let (mut controller, _) = controller();
        let now = Instant::now();
        let plan = TransitionPlan::new(target(), Duration::from_secs(8));

        controller.submit(plan.clone(), None, 0, now).unwrap();
        assert_eq!(controller.state(), ControllerState::Preparing);
        assert_eq!(
            controller.submit(plan, None, 0, now + Duration::from_millis(50)),
            Err(AutomixError::Busy)
        );
    }

    #[test]
    fn test_plan_rejected() {
        let (mut controller, _) = controller();
        let now = Instant::now();

        let zero = TransitionPlan::new(target(), Duration::ZERO);
        assert!(matches!(
            controller.submit(zero, None, 0, now),
            Err(AutomixError::PlanRejected(_))
        ));

        let same = TransitionPlan::new(target(), Duration::from_secs(4));
        assert!(matches!(
            controller.submit(same, Some(TrackId(2)), 0, now),
            Err(AutomixError::PlanRejected(_))
        ));
        assert_eq!(controller.state(), ControllerState::Idle);

        // A cut needs no duration.
        assert!(controller.submit(TransitionPlan::cut(target()), None, 0, now).is_ok());
    }

    #[test]
    fn test_check_handed_out_once() {
        let (mut controller, _) = controller();
        let now = Instant::now();
        controller
            .submit(TransitionPlan::new(target(), Duration::from_secs(1)), None, 0, now)
            .unwrap();
        let check = controller.pending_check().unwrap();
        assert_eq!(check.deck, DeckId::B);
        assert_eq!(check.deadline, now + Duration::from_secs(2));
        assert!(controller.pending_check().is_none());
        assert_eq!(controller.next_work(now), Work::Idle);
    }

    #[test]
    fn test_preparation_commands_for_curved_fade() {
        let (mut controller, _) = controller();
        let now = Instant::now();
        let id = controller
            .submit(TransitionPlan::new(target(), Duration::from_secs(1)), None, 0, now)
            .unwrap();
        controller.pending_check();
        controller.precondition_result(id, Ok(()));

        let Work::Prepare { commands, .. } = controller.next_work(now) else {
            panic!("expected preparation");
        };
        assert_eq!(
            commands,
            vec![
                ControlMessage::eq(DeckId::B, EqBand::Low, 0),
                ControlMessage::eq(DeckId::B, EqBand::High, 32),
                ControlMessage::new(ControlTarget::TempoSync(DeckId::B), 127),
            ]
        );
    }

    #[test]
    fn test_linear_fade_has_no_eq() {
        let (mut controller, _) = controller();
        let now = Instant::now();
        let plan = TransitionPlan::new(target(), Duration::from_secs(1))
            .with_style(TransitionStyle::LinearFade)
            .with_tempo_sync(false);
        let id = activate(&mut controller, plan, now);

        let Work::Steps { plan_id, steps } = controller.next_work(now + Duration::from_millis(500))
        else {
            panic!("expected steps");
        };
        assert_eq!(plan_id, id);
        assert_eq!(steps.len(), 5);
        assert!(steps.iter().all(|s| s.commands.len() == 1));
        assert_eq!(steps[4].commands[0], ControlMessage::new(ControlTarget::Crossfader, 64));
    }

    #[test]
    fn test_full_run_swaps_roles_once() {
        let (mut controller, roles) = controller();
        let start = Instant::now();
        let id = activate(
            &mut controller,
            TransitionPlan::new(target(), Duration::from_secs(8)),
            start,
        );

        let mut applied = 0;
        let mut last_progress = 0.0;
        let mut swaps = 0;
        for tick in 1..=80u64 {
            let now = start + Duration::from_millis(tick * 100);
            let Work::Steps { steps, .. } = controller.next_work(now) else {
                panic!("no steps at tick {}", tick);
            };
            for step in steps {
                assert!(step.progress > last_progress);
                assert!(step.due_at <= now);
                last_progress = step.progress;
                if controller.step_applied(id, step.index).is_some() {
                    swaps += 1;
                }
                applied += 1;
            }
        }

        assert_eq!(applied, 80);
        assert_eq!(swaps, 1);
        assert_eq!(last_progress, 1.0);
        assert_eq!(controller.state(), ControllerState::Finalizing);
        assert_eq!(roles.get().departing(), DeckId::B);

        let Work::Finalize { plan_id, commands, verify } = controller.next_work(start + Duration::from_secs(9)) else {
            panic!("expected finalize");
        };
        assert_eq!(plan_id, id);
        assert_eq!(commands, ControlMessage::neutral_eq(DeckId::A).to_vec());
        assert_eq!(verify.expected_crossfader, 1.0);

        assert!(controller.finish(id, 0, Some(true)));
        assert_eq!(controller.state(), ControllerState::Idle);
        // Already recorded.
        assert!(!controller.finish(id, 0, Some(true)));
        assert_eq!(controller.history().len(), 1);
        assert_eq!(controller.history()[0].outcome, TransitionOutcome::Completed);
    }

    #[test]
    fn test_overdue_steps_in_order() {
        let (mut controller, _) = controller();
        let start = Instant::now();
        let id = activate(
            &mut controller,
            TransitionPlan::new(target(), Duration::from_secs(1)),
            start,
        );

        let Work::Steps { steps, .. } = controller.next_work(start + Duration::from_secs(5)) else {
            panic!("expected steps");
        };
        let indices: Vec<u32> = steps.iter().map(|s| s.index).collect();
        assert_eq!(indices, (1..=10).collect::<Vec<_>>());

        let last = steps.last().unwrap();
        assert_eq!(last.progress, 1.0);
        assert_eq!(
            last.commands,
            vec![
                ControlMessage::new(ControlTarget::Crossfader, 127),
                ControlMessage::eq(DeckId::A, EqBand::Low, 0),
                ControlMessage::eq(DeckId::B, EqBand::High, 64),
                ControlMessage::eq(DeckId::B, EqBand::Low, 64),
            ]
        );

        // Out of order reports are ignored.
        assert!(controller.step_applied(id, 3).is_none());
        assert_eq!(controller.status().steps_applied, 0);
    }

    #[test]
    fn test_cut_is_single_step() {
        let (mut controller, roles) = controller();
        let now = Instant::now();
        let id = activate(&mut controller, TransitionPlan::cut(target()), now);

        let Work::Steps { steps, .. } = controller.next_work(now) else {
            panic!("expected steps");
        };
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].progress, 1.0);
        assert!(controller.step_applied(id, 1).is_some());
        assert_eq!(roles.get().departing(), DeckId::B);
    }

    #[test]
    fn test_cancel_and_idempotent_abort() {
        let (mut controller, roles) = controller();
        let now = Instant::now();
        let id = activate(
            &mut controller,
            TransitionPlan::new(target(), Duration::from_secs(8)),
            now,
        );

        assert_eq!(controller.cancel(), CancelOutcome::Cancelled);
        assert_eq!(controller.state(), ControllerState::Aborted);
        assert_eq!(controller.cancel(), CancelOutcome::NothingToCancel);
        assert!(!controller.begin_abort("again"));

        let Work::Abort { plan_id, commands } = controller.next_work(now) else {
            panic!("expected abort work");
        };
        assert_eq!(plan_id, id);
        assert_eq!(commands.len(), 6);
        assert!(commands.iter().all(|c| c.value == NEUTRAL));

        controller.abort_complete(id, 0);
        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(controller.status().last_abort.as_deref(), Some("cancelled"));
        assert_eq!(roles.get().departing(), DeckId::A);
        assert_eq!(controller.cancel(), CancelOutcome::NothingToCancel);
        assert_eq!(
            controller.history()[0].outcome,
            TransitionOutcome::Aborted("cancelled".into())
        );

        // Late reports for the aborted plan change nothing.
        controller.preparation_complete(id, now);
        assert_eq!(controller.state(), ControllerState::Idle);
    }

    #[test]
    fn test_cancel_while_finalizing() {
        let (mut controller, _) = controller();
        let now = Instant::now();
        let id = activate(&mut controller, TransitionPlan::cut(target()), now);
        controller.next_work(now);
        controller.step_applied(id, 1);
        assert_eq!(controller.cancel(), CancelOutcome::AlreadyFinalizing);
    }

    #[test]
    fn test_preparation_timeout() {
        let (mut controller, _) = controller();
        let now = Instant::now();
        controller
            .submit(TransitionPlan::new(target(), Duration::from_secs(8)), None, 0, now)
            .unwrap();
        controller.pending_check();

        let work = controller.next_work(now + Duration::from_secs(2));
        assert!(matches!(work, Work::Abort { .. }));
        assert_eq!(controller.state(), ControllerState::Aborted);
        assert_eq!(
            controller.status().last_abort.as_deref(),
            Some("preparation timed out")
        );
    }

    #[test]
    fn test_precondition_failure_aborts() {
        let (mut controller, _) = controller();
        let now = Instant::now();
        let id = controller
            .submit(TransitionPlan::new(target(), Duration::from_secs(8)), None, 0, now)
            .unwrap();
        controller.pending_check();
        controller.precondition_result(id, Err("deck B holds track 9".into()));
        assert_eq!(controller.state(), ControllerState::Aborted);
    }

    #[test]
    fn test_crossfader_position() {
        assert_eq!(crossfader_position(DeckId::B, 0.25), 0.25);
        assert_eq!(crossfader_position(DeckId::A, 0.25), 0.75);
    }
}
