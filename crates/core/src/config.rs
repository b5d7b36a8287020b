use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Settings;

/// Fader curve names accepted in the `fader_curve` setting.
pub const FADER_CURVES: [&str; 3] = ["linear", "logarithmic", "exponential"];

/// Configuration manager for automix settings
/// Keeps the schema (available options and their limits) apart from the persisted values.
/// Settings are stored in ~/.halo/automix.json by default
pub struct ConfigManager {
    config_path: PathBuf,
    settings: Settings,
}

/// Available configuration options with validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub monitor: MonitorConfigSchema,
    pub matcher: MatcherConfigSchema,
    pub automation: AutomationConfigSchema,
    pub midi: MidiConfigSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfigSchema {
    pub monitor_interval_ms: ConfigOption<u64>,
    pub phrase_length_beats: ConfigOption<u32>,
    pub energy_history_len: ConfigOption<usize>,
    pub emergency_threshold_secs: ConfigOption<f64>,
    pub energy_shift_threshold: ConfigOption<f64>,
    pub rule_cooldown_secs: ConfigOption<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfigSchema {
    pub tempo_tolerance_bpm: ConfigOption<f64>,
    pub allow_relaxed_fallback: ConfigOption<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfigSchema {
    pub automation_interval_ms: ConfigOption<u64>,
    pub retry_budget: ConfigOption<u32>,
    pub retry_backoff_ms: ConfigOption<u64>,
    pub preparation_timeout_ms: ConfigOption<u64>,
    pub transition_beats: ConfigOption<u32>,
    pub fader_curve: ConfigOption<String>,
    pub autopilot: ConfigOption<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MidiConfigSchema {
    pub midi_enabled: ConfigOption<bool>,
    pub midi_device: ConfigOption<String>,
    pub midi_channel: ConfigOption<u8>,
}

/// Configuration option with validation and available choices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOption<T> {
    pub default: T,
    pub valid_range: Option<(T, T)>,
    pub valid_choices: Option<Vec<T>>,
    pub description: String,
    pub requires_restart: bool,
}

impl<T> ConfigOption<T> {
    fn new(default: T, description: &str) -> Self {
        Self {
            default,
            valid_range: None,
            valid_choices: None,
            description: description.to_string(),
            requires_restart: false,
        }
    }

    fn range(mut self, min: T, max: T) -> Self {
        self.valid_range = Some((min, max));
        self
    }

    fn choices(mut self, choices: Vec<T>) -> Self {
        self.valid_choices = Some(choices);
        self
    }

    fn restart(mut self) -> Self {
        self.requires_restart = true;
        self
    }
}

/// Persisted configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    pub settings: Settings,
    pub created_at: String,
    pub modified_at: String,
}

impl ConfigManager {
    /// Create a new configuration manager
    /// If no path is provided, defaults to ~/.halo/automix.json
    pub fn new(config_path: Option<PathBuf>) -> Self {
        let config_path = config_path.unwrap_or_else(Self::default_path);

        Self {
            config_path,
            settings: Settings::default(),
        }
    }

    /// Default location of the settings file.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".halo")
            .join("automix.json")
    }

    /// Load settings from configuration file
    /// Writes and returns the defaults if the file doesn't exist yet
    pub fn load(&mut self) -> Result<Settings, ConfigError> {
        if !self.config_path.exists() {
            self.save()?;
            return Ok(self.settings.clone());
        }

        let content = fs::read_to_string(&self.config_path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let config_file: ConfigFile =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if config_file.version != env!("CARGO_PKG_VERSION") {
            log::warn!(
                "Config file version {} doesn't match application version {}. Missing settings use defaults.",
                config_file.version,
                env!("CARGO_PKG_VERSION")
            );
        }

        Self::validate_settings(&config_file.settings).map_err(ConfigError::ValidationError)?;

        self.settings = config_file.settings;
        Ok(self.settings.clone())
    }

    /// Save current settings to configuration file
    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            if parent != Path::new("") && parent != Path::new(".") {
                fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError(e.to_string()))?;
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        let created_at = self.read_created_at().unwrap_or_else(|| now.clone());
        let config_file = ConfigFile {
            version: env!("CARGO_PKG_VERSION").to_string(),
            settings: self.settings.clone(),
            created_at,
            modified_at: now,
        };

        let content = serde_json::to_string_pretty(&config_file)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(&self.config_path, content)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;

        log::debug!("Saved automix settings to {:?}", self.config_path);
        Ok(())
    }

    // Keep the original creation stamp when rewriting an existing file.
    fn read_created_at(&self) -> Option<String> {
        let content = fs::read_to_string(&self.config_path).ok()?;
        let file: ConfigFile = serde_json::from_str(&content).ok()?;
        Some(file.created_at)
    }

    /// Validate, then update settings and save to file
    pub fn update_settings(&mut self, settings: Settings) -> Result<(), ConfigError> {
        Self::validate_settings(&settings).map_err(ConfigError::ValidationError)?;
        self.settings = settings;
        self.save()
    }

    /// Get current settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Get configuration file path
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Get configuration schema with available options
    pub fn schema() -> ConfigSchema {
        let defaults = Settings::default();
        ConfigSchema {
            monitor: MonitorConfigSchema {
                monitor_interval_ms: ConfigOption::new(
                    defaults.monitor_interval_ms,
                    "Transport polling interval in milliseconds",
                )
                .range(20, 500)
                .restart(),
                phrase_length_beats: ConfigOption::new(
                    defaults.phrase_length_beats,
                    "Beats per phrase used for phrase-boundary detection",
                )
                .choices(vec![8, 16, 32, 64]),
                energy_history_len: ConfigOption::new(
                    defaults.energy_history_len,
                    "Number of energy samples kept for trend estimation",
                )
                .range(5, 200),
                emergency_threshold_secs: ConfigOption::new(
                    defaults.emergency_threshold_secs,
                    "Remaining time that raises a track-ending alert",
                )
                .range(5.0, 60.0),
                energy_shift_threshold: ConfigOption::new(
                    defaults.energy_shift_threshold,
                    "Absolute energy trend that raises an energy-shift alert",
                )
                .range(0.05, 1.0),
                rule_cooldown_secs: ConfigOption::new(
                    defaults.rule_cooldown_secs,
                    "Minimum time between two alerts of the same rule",
                )
                .range(0.0, 60.0),
            },
            matcher: MatcherConfigSchema {
                tempo_tolerance_bpm: ConfigOption::new(
                    defaults.tempo_tolerance_bpm,
                    "Maximum tempo distance for a candidate to be mixable",
                )
                .range(0.5, 20.0),
                allow_relaxed_fallback: ConfigOption::new(
                    defaults.allow_relaxed_fallback,
                    "Fall back to tempo-only matching when no harmonic match exists",
                ),
            },
            automation: AutomationConfigSchema {
                automation_interval_ms: ConfigOption::new(
                    defaults.automation_interval_ms,
                    "Automation loop polling interval in milliseconds",
                )
                .range(1, 50)
                .restart(),
                retry_budget: ConfigOption::new(
                    defaults.retry_budget,
                    "Command retries before a transition is aborted",
                )
                .range(0, 10),
                retry_backoff_ms: ConfigOption::new(
                    defaults.retry_backoff_ms,
                    "Backoff step between command retries in milliseconds",
                )
                .range(0, 50),
                preparation_timeout_ms: ConfigOption::new(
                    defaults.preparation_timeout_ms,
                    "Upper bound on the preparation phase in milliseconds",
                )
                .range(100, 10_000),
                transition_beats: ConfigOption::new(
                    defaults.transition_beats,
                    "Default blend length in beats",
                )
                .choices(vec![4, 8, 16, 32, 64]),
                fader_curve: ConfigOption::new(
                    defaults.fader_curve.clone(),
                    "Default crossfader curve for curved fades",
                )
                .choices(FADER_CURVES.iter().map(|c| c.to_string()).collect()),
                autopilot: ConfigOption::new(
                    defaults.autopilot,
                    "Start transitions automatically on detected opportunities",
                ),
            },
            midi: MidiConfigSchema {
                midi_enabled: ConfigOption::new(
                    defaults.midi_enabled,
                    "Send automation to a MIDI mixer",
                )
                .restart(),
                midi_device: ConfigOption::new(
                    defaults.midi_device.clone(),
                    "MIDI mixer device name (substring match)",
                )
                .restart(),
                midi_channel: ConfigOption::new(
                    defaults.midi_channel,
                    "MIDI channel for control changes (1-16)",
                )
                .range(1, 16)
                .restart(),
            },
        }
    }

    /// Validate settings against schema
    pub fn validate_settings(settings: &Settings) -> Result<(), Vec<String>> {
        fn check_range<T: PartialOrd + std::fmt::Display + Copy>(
            errors: &mut Vec<String>,
            name: &str,
            value: T,
            option: &ConfigOption<T>,
        ) {
            if let Some((min, max)) = option.valid_range {
                if value < min || value > max {
                    errors.push(format!("{} must be between {} and {}", name, min, max));
                }
            }
        }

        fn check_choice<T: PartialEq + std::fmt::Debug>(
            errors: &mut Vec<String>,
            name: &str,
            value: &T,
            option: &ConfigOption<T>,
        ) {
            if let Some(choices) = &option.valid_choices {
                if !choices.contains(value) {
                    errors.push(format!("{} must be one of: {:?}", name, choices));
                }
            }
        }

        let mut errors = Vec::new();
        let schema = Self::schema();

        // Monitor
        let monitor = &schema.monitor;
        check_range(&mut errors, "monitor_interval_ms", settings.monitor_interval_ms, &monitor.monitor_interval_ms);
        check_choice(&mut errors, "phrase_length_beats", &settings.phrase_length_beats, &monitor.phrase_length_beats);
        check_range(&mut errors, "energy_history_len", settings.energy_history_len, &monitor.energy_history_len);
        check_range(&mut errors, "emergency_threshold_secs", settings.emergency_threshold_secs, &monitor.emergency_threshold_secs);
        check_range(&mut errors, "energy_shift_threshold", settings.energy_shift_threshold, &monitor.energy_shift_threshold);
        check_range(&mut errors, "rule_cooldown_secs", settings.rule_cooldown_secs, &monitor.rule_cooldown_secs);

        // Matcher
        check_range(&mut errors, "tempo_tolerance_bpm", settings.tempo_tolerance_bpm, &schema.matcher.tempo_tolerance_bpm);

        // Automation
        let automation = &schema.automation;
        check_range(&mut errors, "automation_interval_ms", settings.automation_interval_ms, &automation.automation_interval_ms);
        check_range(&mut errors, "retry_budget", settings.retry_budget, &automation.retry_budget);
        check_range(&mut errors, "retry_backoff_ms", settings.retry_backoff_ms, &automation.retry_backoff_ms);
        check_range(&mut errors, "preparation_timeout_ms", settings.preparation_timeout_ms, &automation.preparation_timeout_ms);
        check_choice(&mut errors, "transition_beats", &settings.transition_beats, &automation.transition_beats);
        check_choice(&mut errors, "fader_curve", &settings.fader_curve, &automation.fader_curve);

        if settings.automation_interval_ms >= settings.monitor_interval_ms {
            errors.push("automation_interval_ms must be shorter than monitor_interval_ms".to_string());
        }

        // MIDI
        check_range(&mut errors, "midi_channel", settings.midi_channel, &schema.midi.midi_channel);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Reset settings to defaults
    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.settings = Settings::default();
        self.save()
    }
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    ReadError(String),
    WriteError(String),
    ParseError(String),
    SerializeError(String),
    ValidationError(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(msg) => write!(f, "Failed to read config file: {}", msg),
            ConfigError::WriteError(msg) => write!(f, "Failed to write config file: {}", msg),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config file: {}", msg),
            ConfigError::SerializeError(msg) => write!(f, "Failed to serialize config: {}", msg),
            ConfigError::ValidationError(errors) => {
                write!(f, "Config validation errors: {}", errors.join(", "))
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_config_manager_new() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("automix.json");

        let manager = ConfigManager::new(Some(config_path.clone()));
        assert_eq!(manager.config_path(), config_path);
        assert_eq!(manager.settings(), &Settings::default());
    }

    #[test]
    fn test_load_creates_default_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("automix.json");

        let mut manager = ConfigManager::new(Some(config_path.clone()));
        let settings = manager.load().unwrap();

        assert_eq!(settings, Settings::default());
        assert!(config_path.exists());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("automix.json");

        let mut manager = ConfigManager::new(Some(config_path.clone()));

        let mut settings = Settings::default();
        settings.tempo_tolerance_bpm = 4.0;
        settings.fader_curve = "exponential".to_string();
        manager.update_settings(settings).unwrap();

        let mut manager2 = ConfigManager::new(Some(config_path));
        let loaded = manager2.load().unwrap();

        assert!((loaded.tempo_tolerance_bpm - 4.0).abs() < f64::EPSILON);
        assert_eq!(loaded.fader_curve, "exponential");
    }

    #[test]
    fn test_update_rejects_invalid_settings() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = ConfigManager::new(Some(temp_dir.path().join("automix.json")));

        let mut settings = Settings::default();
        settings.retry_budget = 50;

        let result = manager.update_settings(settings);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
        assert_eq!(manager.settings().retry_budget, 3);
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        assert!(ConfigManager::validate_settings(&settings).is_ok());

        settings.midi_channel = 20;
        assert!(ConfigManager::validate_settings(&settings).is_err());

        settings.midi_channel = 1;
        settings.fader_curve = "s-curve".to_string();
        assert!(ConfigManager::validate_settings(&settings).is_err());

        settings.fader_curve = "linear".to_string();
        settings.automation_interval_ms = 40;
        settings.monitor_interval_ms = 30;
        let errors = ConfigManager::validate_settings(&settings).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("shorter than")));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("automix.json");
        std::fs::write(
            &config_path,
            r#"{
                "version": "0.0.1",
                "settings": { "autopilot": true },
                "created_at": "2024-01-01T00:00:00Z",
                "modified_at": "2024-01-01T00:00:00Z"
            }"#,
        )
        .unwrap();

        let mut manager = ConfigManager::new(Some(config_path));
        let settings = manager.load().unwrap();
        assert!(settings.autopilot);
        assert_eq!(settings.monitor_interval_ms, 100);
    }

    #[test]
    fn test_schema_completeness() {
        let schema = ConfigManager::schema();

        assert_eq!(schema.monitor.monitor_interval_ms.default, 100);
        assert!(schema.midi.midi_channel.valid_range.is_some());
        assert_eq!(
            schema.automation.fader_curve.valid_choices.as_ref().map(Vec::len),
            Some(FADER_CURVES.len())
        );
        assert!(!schema.matcher.tempo_tolerance_bpm.description.is_empty());
    }
}
