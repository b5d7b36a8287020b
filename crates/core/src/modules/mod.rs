pub mod midi_module;
pub mod traits;

// Re-export for convenience
pub use midi_module::MidiModule;
pub use traits::{AsyncModule, ModuleEvent, ModuleId, ModuleMessage};
