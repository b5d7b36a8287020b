//! Automation loop: executes controller work through the command channel.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use super::controller::{
    CancelOutcome, PreconditionCheck, TransitionController, VerifyCheck, Work,
};
use crate::channel::{CommandDispatcher, DispatchLink};
use crate::deck::DeckId;
use crate::error::{AutomixError, FeedError};
use crate::transport::TransportFeed;

/// Called with the departed deck once a transition completes.
pub type FinishHook = Box<dyn Fn(DeckId) + Send + Sync>;

pub struct AutomationEngine {
    controller: Arc<Mutex<TransitionController>>,
    dispatcher: Arc<CommandDispatcher>,
    feed: Arc<dyn TransportFeed>,
    interval: Duration,
    on_finish: Option<FinishHook>,
}

impl AutomationEngine {
    pub fn new(
        controller: Arc<Mutex<TransitionController>>,
        dispatcher: Arc<CommandDispatcher>,
        feed: Arc<dyn TransportFeed>,
        interval: Duration,
    ) -> Self {
        Self {
            controller,
            dispatcher,
            feed,
            interval,
            on_finish: None,
        }
    }

    pub fn on_finish(mut self, hook: FinishHook) -> Self {
        self.on_finish = Some(hook);
        self
    }

    /// One automation tick.
    pub async fn poll(&self) {
        // The feed read runs outside the dispatch lock.
        let check = self.controller.lock().pending_check();
        if let Some(check) = check {
            let result = self.check_precondition(&check).await;
            self.controller
                .lock()
                .precondition_result(check.plan_id, result);
        }

        let pending = {
            let mut link = self.dispatcher.acquire().await;
            let work = self.controller.lock().next_work(Instant::now());
            self.execute(&mut link, work).await
        };

        // The feedback read also runs outside the dispatch lock.
        if let Some((plan_id, check)) = pending {
            let departed = check.deck.other();
            let verified = self.verify(check).await;
            let finished = self
                .controller
                .lock()
                .finish(plan_id, self.dispatcher.failure_count(), verified);
            if finished {
                log::info!("Transition {} complete", plan_id);
                if let Some(hook) = &self.on_finish {
                    hook(departed);
                }
            }
        }
    }

    /// Stop the running transition and reset tone controls.
    pub async fn cancel(&self) -> CancelOutcome {
        let mut link = self.dispatcher.acquire().await;
        let outcome = self.controller.lock().cancel();
        if outcome == CancelOutcome::Cancelled {
            log::info!("Transition cancelled by operator");
            let work = self.controller.lock().next_work(Instant::now());
            self.execute(&mut link, work).await;
        }
        outcome
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        log::info!(
            "Transition automation started ({}ms tick)",
            self.interval.as_millis()
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.poll().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        log::info!("Transition automation stopped");
    }

    /// Send what `work` asks for. Returns the verification still owed by a
    /// finalized plan.
    async fn execute(
        &self,
        link: &mut DispatchLink<'_>,
        mut work: Work,
    ) -> Option<(u64, VerifyCheck)> {
        loop {
            work = match work {
                Work::Idle => return None,
                Work::Prepare { plan_id, commands } => match link.send_all(&commands).await {
                    Ok(()) => {
                        self.controller
                            .lock()
                            .preparation_complete(plan_id, Instant::now());
                        return None;
                    }
                    Err(e) => self.abort_after(e),
                },
                Work::Steps { plan_id, steps } => {
                    let mut failure = None;
                    for step in steps {
                        if let Err(e) = link.send_all(&step.commands).await {
                            failure = Some(e);
                            break;
                        }
                        log::debug!(
                            "Step {}/{} applied ({:.0}%)",
                            step.index,
                            step.total,
                            step.progress * 100.0
                        );
                        self.controller.lock().step_applied(plan_id, step.index);
                    }
                    match failure {
                        Some(e) => self.abort_after(e),
                        None => return None,
                    }
                }
                Work::Finalize {
                    plan_id,
                    commands,
                    verify,
                } => {
                    link.send_best_effort(&commands).await;
                    return Some((plan_id, verify));
                }
                Work::Abort { plan_id, commands } => {
                    let failed = link.send_best_effort(&commands).await;
                    if failed > 0 {
                        log::error!("Neutral reset incomplete: {} controls not reset", failed);
                    }
                    self.controller
                        .lock()
                        .abort_complete(plan_id, self.dispatcher.failure_count());
                    return None;
                }
            };
        }
    }

    fn abort_after(&self, error: AutomixError) -> Work {
        let mut controller = self.controller.lock();
        controller.begin_abort(error.to_string());
        controller.next_work(Instant::now())
    }

    async fn check_precondition(&self, check: &PreconditionCheck) -> Result<(), String> {
        let remaining = check.deadline.saturating_duration_since(Instant::now());
        let reading = match tokio::time::timeout(remaining, self.feed.read_snapshot(check.deck)).await
        {
            Ok(result) => result.map_err(|e| e.to_string())?,
            Err(_) => return Err(FeedError::Timeout.to_string()),
        };

        match reading.loaded_track {
            Some(id) if id == check.expected => Ok(()),
            Some(other) => Err(format!(
                "deck {} holds track {}, expected {}",
                check.deck, other, check.expected
            )),
            None => Err(FeedError::NoTrack(check.deck).to_string()),
        }
    }

    /// Compare reported crossfader against the expected end position.
    async fn verify(&self, check: VerifyCheck) -> Option<bool> {
        let (timeout, tolerance) = {
            let controller = self.controller.lock();
            (
                controller.config().preparation_timeout,
                controller.config().verify_tolerance,
            )
        };
        let reading = tokio::time::timeout(timeout, self.feed.read_snapshot(check.deck))
            .await
            .ok()?
            .ok()?;
        reading
            .crossfader
            .map(|position| (position - check.expected_crossfader).abs() <= tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::channel::{CommandSink, ControlMessage, ControlTarget, RetryPolicy, SinkError};
    use crate::deck::{DeckId, SharedDeckRoles};
    use crate::library::{TrackDescriptor, TrackId};
    use crate::transition::{ControllerConfig, ControllerState, TransitionPlan, TransitionOutcome};
    use crate::transport::TransportReading;

    struct CuedFeed {
        arriving_track: Option<TrackId>,
    }

    #[async_trait]
    impl TransportFeed for CuedFeed {
        async fn read_snapshot(&self, deck: DeckId) -> Result<TransportReading, FeedError> {
            let reading = TransportReading::new(60.0, 240.0, 128.0, 0.5).with_crossfader(1.0);
            match (deck, self.arriving_track) {
                (DeckId::B, Some(track)) => Ok(reading.with_track(track)),
                (DeckId::B, None) => Ok(reading),
                (DeckId::A, _) => Ok(reading.with_track(TrackId(1))),
            }
        }
    }

    struct Recorder {
        sent: Arc<Mutex<Vec<ControlMessage>>>,
        fail_after: Option<usize>,
    }

    impl CommandSink for Recorder {
        fn send(&mut self, message: &ControlMessage) -> Result<(), SinkError> {
            let mut sent = self.sent.lock();
            if self.fail_after.is_some_and(|n| sent.len() >= n) {
                return Err(SinkError("cable pulled".into()));
            }
            sent.push(*message);
            Ok(())
        }
    }

    fn engine(
        arriving_track: Option<TrackId>,
        fail_after: Option<usize>,
    ) -> (AutomationEngine, Arc<Mutex<TransitionController>>, Arc<Mutex<Vec<ControlMessage>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let controller = Arc::new(Mutex::new(TransitionController::new(
            ControllerConfig::default(),
            SharedDeckRoles::default(),
        )));
        let dispatcher = Arc::new(CommandDispatcher::new(
            Box::new(Recorder {
                sent: sent.clone(),
                fail_after,
            }),
            RetryPolicy::default(),
        ));
        let engine = AutomationEngine::new(
            controller.clone(),
            dispatcher,
            Arc::new(CuedFeed { arriving_track }),
            Duration::from_millis(10),
        );
        (engine, controller, sent)
    }

    fn plan() -> TransitionPlan {
        TransitionPlan::new(
            TrackDescriptor::new(TrackId(2), "next", 300.0),
            Duration::from_secs(1),
        )
    }

    async fn run_until_idle(engine: &AutomationEngine, controller: &Arc<Mutex<TransitionController>>) {
        for _ in 0..500 {
            engine.poll().await;
            if controller.lock().state() == ControllerState::Idle {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("controller never returned to idle");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_completes_and_verifies() {
        let (engine, controller, sent) = engine(Some(TrackId(2)), None);
        controller
            .lock()
            .submit(plan(), Some(TrackId(1)), 0, Instant::now())
            .unwrap();

        run_until_idle(&engine, &controller).await;

        let controller = controller.lock();
        let record = &controller.history()[0];
        assert_eq!(record.outcome, TransitionOutcome::Completed);
        assert_eq!(record.verified, Some(true));
        assert_eq!(controller.roles().departing(), DeckId::B);

        let faders: Vec<u8> = sent
            .lock()
            .iter()
            .filter(|m| m.target == ControlTarget::Crossfader)
            .map(|m| m.value)
            .collect();
        assert_eq!(faders.len(), 10);
        assert!(faders.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(faders.last(), Some(&127));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_hook_names_departed_deck() {
        let departed = Arc::new(Mutex::new(Vec::new()));

        let (engine, controller, _) = engine(Some(TrackId(2)), None);
        let seen = departed.clone();
        let engine = engine.on_finish(Box::new(move |deck: DeckId| seen.lock().push(deck)));
        controller
            .lock()
            .submit(plan(), Some(TrackId(1)), 0, Instant::now())
            .unwrap();
        run_until_idle(&engine, &controller).await;
        assert_eq!(departed.lock().as_slice(), &[DeckId::A]);

        // Aborted transitions leave both decks alone.
        let (engine, controller, _) = self::engine(Some(TrackId(9)), None);
        let seen = departed.clone();
        let engine = engine.on_finish(Box::new(move |deck: DeckId| seen.lock().push(deck)));
        controller
            .lock()
            .submit(plan(), Some(TrackId(1)), 0, Instant::now())
            .unwrap();
        run_until_idle(&engine, &controller).await;
        assert_eq!(departed.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_track_aborts() {
        let (engine, controller, sent) = engine(Some(TrackId(9)), None);
        controller
            .lock()
            .submit(plan(), Some(TrackId(1)), 0, Instant::now())
            .unwrap();

        run_until_idle(&engine, &controller).await;

        let controller = controller.lock();
        assert!(controller
            .status()
            .last_abort
            .unwrap()
            .contains("holds track 9"));
        assert_eq!(controller.roles().departing(), DeckId::A);
        // Only the neutral reset went out.
        assert_eq!(sent.lock().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_aborts_and_keeps_roles() {
        // Preparation (3) and the first step (4) go out, then the port dies.
        let (engine, controller, _) = engine(Some(TrackId(2)), Some(7));
        controller
            .lock()
            .submit(plan(), Some(TrackId(1)), 0, Instant::now())
            .unwrap();

        run_until_idle(&engine, &controller).await;

        let controller = controller.lock();
        let record = &controller.history()[0];
        assert!(matches!(record.outcome, TransitionOutcome::Aborted(_)));
        // One fatal send (4 attempts) plus six failed resets (4 attempts each).
        assert_eq!(record.dispatch_failures, 28);
        assert_eq!(controller.roles().departing(), DeckId::A);
        assert!(controller.status().last_abort.unwrap().contains("cable pulled"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_transition() {
        let (engine, controller, sent) = engine(Some(TrackId(2)), None);
        controller
            .lock()
            .submit(plan(), Some(TrackId(1)), 0, Instant::now())
            .unwrap();

        for _ in 0..30 {
            engine.poll().await;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(controller.lock().state(), ControllerState::Active);

        assert_eq!(engine.cancel().await, CancelOutcome::Cancelled);
        assert_eq!(controller.lock().state(), ControllerState::Idle);
        assert_eq!(engine.cancel().await, CancelOutcome::NothingToCancel);

        let count = sent.lock().len();
        engine.poll().await;
        assert_eq!(sent.lock().len(), count);

        let tail: Vec<ControlMessage> = sent.lock()[count - 6..].to_vec();
        let mut expected = ControlMessage::neutral_eq(DeckId::A).to_vec();
        expected.extend(ControlMessage::neutral_eq(DeckId::B));
        assert_eq!(tail, expected);
    }
}
