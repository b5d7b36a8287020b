pub mod midi;
pub mod output;
