//! Halo core plumbing shared by the automix engine and its host.
//!
//! - Settings and the JSON config manager
//! - MIDI message model and output port
//! - The async module system (`AsyncModule`, `ModuleEvent`, `ModuleMessage`)

pub use config::{ConfigError, ConfigManager, ConfigSchema, FADER_CURVES};
pub use messages::{AutomixRequest, Settings};
pub use midi::midi::MidiMessage;
pub use midi::output::{MidiOutputPort, MidiPortError};
// Async module system exports
pub use modules::{AsyncModule, MidiModule, ModuleEvent, ModuleId, ModuleMessage};

mod config;
pub mod messages;
mod midi;
mod modules;
