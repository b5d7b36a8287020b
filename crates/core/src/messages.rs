use serde::{Deserialize, Serialize};

/// Requests routed to the automix module from the host (UI, MIDI, scripts).
#[derive(Debug, Clone, PartialEq)]
pub enum AutomixRequest {
    /// Start a transition to the track loaded on the arriving deck now.
    ForceTransition,
    /// Cancel the in-flight transition, if any.
    CancelTransition,
    /// Enable or disable automatic transitions on detected opportunities.
    SetAutopilot(bool),
    /// Flip the autopilot flag.
    ToggleAutopilot,
    /// Send a raw control value (0-127) to the mixer, bypassing automation.
    ManualOverride { control: u8, value: u8 },
    /// Ask the module to publish its current status.
    QueryStatus,
}

/// Settings configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    // Monitor settings
    pub monitor_interval_ms: u64,
    pub phrase_length_beats: u32,
    pub energy_history_len: usize,
    pub emergency_threshold_secs: f64,
    pub energy_shift_threshold: f64,
    pub rule_cooldown_secs: f64,

    // Matcher settings
    pub tempo_tolerance_bpm: f64,
    pub allow_relaxed_fallback: bool,

    // Automation settings
    pub automation_interval_ms: u64,
    pub retry_budget: u32,
    pub retry_backoff_ms: u64,
    pub preparation_timeout_ms: u64,
    pub transition_beats: u32,
    pub fader_curve: String,
    pub autopilot: bool,

    // MIDI settings
    pub midi_enabled: bool,
    pub midi_device: String,
    pub midi_channel: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            // Monitor defaults
            monitor_interval_ms: 100,
            phrase_length_beats: 16,
            energy_history_len: 20,
            emergency_threshold_secs: 10.0,
            energy_shift_threshold: 0.3,
            rule_cooldown_secs: 4.0,

            // Matcher defaults
            tempo_tolerance_bpm: 6.0,
            allow_relaxed_fallback: true,

            // Automation defaults
            automation_interval_ms: 10,
            retry_budget: 3,
            retry_backoff_ms: 2,
            preparation_timeout_ms: 2000,
            transition_beats: 32,
            fader_curve: "logarithmic".to_string(),
            autopilot: false,

            // MIDI defaults
            midi_enabled: false,
            midi_device: "Traktor Kontrol Z1".to_string(),
            midi_channel: 1,
        }
    }
}
