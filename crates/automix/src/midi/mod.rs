//! MIDI controller mappings.

pub mod z1_mapping;

pub use z1_mapping::Z1Mapping;
