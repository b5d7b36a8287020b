//! Automix module: hosts the engine inside the Halo module system.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use halo_core::{AsyncModule, AutomixRequest, MidiMessage, ModuleEvent, ModuleId, ModuleMessage};
use tokio::sync::mpsc;

use crate::engine::AutomixEngine;
use crate::midi::Z1Mapping;
use crate::monitor::MixOpportunity;
use crate::transition::ControllerState;

/// Interval at which transition progress is published.
const STATUS_INTERVAL: Duration = Duration::from_millis(100);

pub struct AutomixModule {
    engine: Arc<AutomixEngine>,
    /// Last state/progress published, to skip duplicates.
    last_published: Option<(ControllerState, f64)>,
}

impl AutomixModule {
    pub fn new(engine: Arc<AutomixEngine>) -> Self {
        Self {
            engine,
            last_published: None,
        }
    }

    pub fn engine(&self) -> &Arc<AutomixEngine> {
        &self.engine
    }

    /// Apply a request; the returned message (if any) goes back to the host.
    async fn handle_request(&self, request: AutomixRequest) -> Option<ModuleMessage> {
        log::debug!("Automix request: {:?}", request);
        match request {
            AutomixRequest::ForceTransition => match self.engine.force_transition() {
                Ok(()) => None,
                Err(e) => Some(ModuleMessage::Error(format!("Force transition failed: {}", e))),
            },
            AutomixRequest::CancelTransition => {
                let outcome = self.engine.cancel_active_transition().await;
                Some(ModuleMessage::Status(format!("Cancel: {:?}", outcome)))
            }
            AutomixRequest::SetAutopilot(enabled) => {
                self.engine.set_autopilot(enabled);
                None
            }
            AutomixRequest::ToggleAutopilot => {
                self.engine.set_autopilot(!self.engine.autopilot());
                None
            }
            AutomixRequest::ManualOverride { control, value } => {
                match self.engine.manual_override(control, value).await {
                    Ok(()) => None,
                    Err(e) => Some(ModuleMessage::Error(format!("Manual override failed: {}", e))),
                }
            }
            AutomixRequest::QueryStatus => {
                let status = self.engine.get_status();
                Some(ModuleMessage::Status(format!(
                    "state={} progress={:.2} departing={} autopilot={} failures={} stale={}",
                    status.controller_state,
                    status.progress,
                    status.roles.departing(),
                    status.autopilot,
                    status.dispatch_failures,
                    status.feed_stale
                )))
            }
        }
    }

    fn opportunity_event(opportunity: &MixOpportunity) -> ModuleEvent {
        ModuleEvent::AutomixOpportunity {
            kind: opportunity.kind.to_string(),
            deck: opportunity.deck.as_u8(),
            urgency: opportunity.urgency.tier(),
            expires_in_secs: opportunity
                .time_left(tokio::time::Instant::now())
                .as_secs_f64(),
        }
    }

    /// Transition event if state or progress moved since the last one.
    fn transition_event(&mut self) -> Option<ModuleEvent> {
        let status = self.engine.get_status();
        let current = (status.controller_state, status.progress);
        if self.last_published == Some(current) {
            return None;
        }
        self.last_published = Some(current);
        Some(ModuleEvent::AutomixTransition {
            state: status.controller_state.to_string(),
            progress: status.progress,
            departing_deck: status.roles.departing().as_u8(),
        })
    }
}

#[async_trait]
impl AsyncModule for AutomixModule {
    fn id(&self) -> ModuleId {
        ModuleId::Automix
    }

    async fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        log::info!("Initializing automix module");
        self.engine.start();
        log::info!("Automix module initialized");
        Ok(())
    }

    async fn run(
        &mut self,
        mut rx: mpsc::Receiver<ModuleEvent>,
        tx: mpsc::Sender<ModuleMessage>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        log::info!("Automix module running");

        let mut opportunities = self.engine.opportunities();
        let mut status_interval = tokio::time::interval(STATUS_INTERVAL);

        loop {
            tokio::select! {
                Some(event) = rx.recv() => {
                    let request = match event {
                        ModuleEvent::Shutdown => {
                            log::info!("Automix module received shutdown");
                            break;
                        }
                        ModuleEvent::MidiInput(MidiMessage::NoteOn(note, velocity)) => {
                            Z1Mapping::translate_note_on(note, velocity)
                        }
                        ModuleEvent::Automix(request) => Some(request),
                        _ => None,
                    };

                    if let Some(request) = request {
                        if let Some(reply) = self.handle_request(request).await {
                            let _ = tx.send(reply).await;
                        }
                    }
                }
                Some(opportunity) = opportunities.next() => {
                    let event = Self::opportunity_event(&opportunity);
                    let _ = tx.send(ModuleMessage::Event(event)).await;
                }
                _ = status_interval.tick() => {
                    if let Some(event) = self.transition_event() {
                        let _ = tx.send(ModuleMessage::Event(event)).await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        log::info!("Shutting down automix module");
        self.engine.shutdown().await;
        log::info!("Automix module shutdown complete");
        Ok(())
    }

    fn status(&self) -> HashMap<String, String> {
        let engine_status = self.engine.get_status();

        let mut status = HashMap::new();
        status.insert(
            "state".to_string(),
            engine_status.controller_state.to_string(),
        );
        status.insert(
            "progress".to_string(),
            format!("{:.2}", engine_status.progress),
        );
        status.insert(
            "departing_deck".to_string(),
            engine_status.roles.departing().to_string(),
        );
        status.insert("autopilot".to_string(), engine_status.autopilot.to_string());
        status.insert(
            "dispatch_failures".to_string(),
            engine_status.dispatch_failures.to_string(),
        );
        status.insert(
            "commands_delivered".to_string(),
            engine_status.commands_delivered.to_string(),
        );
        if let Some(value) = engine_status.crossfader {
            status.insert("crossfader".to_string(), value.to_string());
        }
        status.insert("feed_stale".to_string(), engine_status.feed_stale.to_string());
        status.insert(
            "completed_transitions".to_string(),
            engine_status.completed_transitions.to_string(),
        );
        if let Some(reason) = engine_status.last_abort {
            status.insert("last_abort".to_string(), reason);
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{CommandSink, ControlMessage, SinkError};
    use crate::deck::DeckId;
    use crate::engine::AutomixConfig;
    use crate::error::FeedError;
    use crate::library::InMemoryCatalog;
    use crate::transport::{TransportFeed, TransportReading};

    struct IdleFeed;

    #[async_trait]
    impl TransportFeed for IdleFeed {
        async fn read_snapshot(&self, _deck: DeckId) -> Result<TransportReading, FeedError> {
            Ok(TransportReading::new(30.0, 200.0, 120.0, 0.5))
        }
    }

    struct DropSink;

    impl CommandSink for DropSink {
        fn send(&mut self, _message: &ControlMessage) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn module() -> AutomixModule {
        let engine = AutomixEngine::new(
            AutomixConfig::default(),
            Arc::new(IdleFeed),
            Box::new(DropSink),
            Arc::new(InMemoryCatalog::default()),
        );
        AutomixModule::new(Arc::new(engine))
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_and_midi_input() {
        let mut module = module();
        let (event_tx, event_rx) = mpsc::channel(16);
        let (msg_tx, mut msg_rx) = mpsc::channel(16);

        event_tx
            .send(ModuleEvent::Automix(AutomixRequest::SetAutopilot(true)))
            .await
            .unwrap();
        // Mode button flips it back off.
        event_tx
            .send(ModuleEvent::MidiInput(MidiMessage::NoteOn(Z1Mapping::NOTE_MODE, 127)))
            .await
            .unwrap();
        event_tx
            .send(ModuleEvent::Automix(AutomixRequest::ForceTransition))
            .await
            .unwrap();
        event_tx.send(ModuleEvent::Shutdown).await.unwrap();

        module.run(event_rx, msg_tx).await.unwrap();
        assert!(!module.engine().autopilot());

        let mut saw_error = false;
        while let Ok(message) = msg_rx.try_recv() {
            if let ModuleMessage::Error(text) = message {
                assert!(text.contains("no track loaded on deck B"));
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[test]
    fn test_status_map() {
        let module = module();
        let status = module.status();
        assert_eq!(status.get("state").map(String::as_str), Some("idle"));
        assert_eq!(status.get("departing_deck").map(String::as_str), Some("A"));
        assert_eq!(status.get("commands_delivered").map(String::as_str), Some("0"));
        assert!(!status.contains_key("crossfader"));
        assert!(!status.contains_key("last_abort"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_crossfader() {
        let module = module();
        module
            .engine()
            .manual_override(Z1Mapping::CC_CROSSFADER, 64)
            .await
            .unwrap();
        let status = module.status();
        assert_eq!(status.get("crossfader").map(String::as_str), Some("64"));
        assert_eq!(status.get("commands_delivered").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_transition_event_deduplicated() {
        let mut module = module();
        assert!(matches!(
            module.transition_event(),
            Some(ModuleEvent::AutomixTransition { .. })
        ));
        assert!(module.transition_event().is_none());
    }
}
