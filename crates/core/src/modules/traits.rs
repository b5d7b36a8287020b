use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::messages::AutomixRequest;
use crate::midi::midi::MidiMessage;

/// Unique identifier for each module type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModuleId {
    Midi,
    Automix,
}

/// Events that can be sent between modules
#[derive(Debug, Clone)]
pub enum ModuleEvent {
    /// MIDI input events
    MidiInput(MidiMessage),
    /// MIDI message to send to the connected device
    MidiOutput(MidiMessage),
    /// Request for the automix engine
    Automix(AutomixRequest),
    /// A mix opportunity was detected
    AutomixOpportunity {
        kind: String,
        deck: u8,
        urgency: u8,
        expires_in_secs: f64,
    },
    /// Transition controller state changed
    AutomixTransition {
        state: String,
        progress: f64,
        departing_deck: u8,
    },
    /// System events
    Shutdown,
}

/// Messages passed between modules and the module manager
#[derive(Debug)]
pub enum ModuleMessage {
    Event(ModuleEvent),
    Status(String),
    Error(String),
}

/// Trait that all async modules must implement
#[async_trait]
pub trait AsyncModule: Send + Sync {
    /// Get the unique identifier for this module
    fn id(&self) -> ModuleId;

    /// Initialize the module (called once at startup)
    async fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Start the module's main loop
    async fn run(
        &mut self,
        mut rx: mpsc::Receiver<ModuleEvent>,
        tx: mpsc::Sender<ModuleMessage>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Shutdown the module gracefully
    async fn shutdown(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Get the module's status
    fn status(&self) -> HashMap<String, String>;
}
