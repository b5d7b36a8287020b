use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::library::TrackDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionStyle {
    /// Single step straight to the arriving deck.
    Cut,
    /// Crossfader only.
    LinearFade,
    /// Curved crossfader with EQ automation.
    CurvedFade,
}

/// Crossfader shape over progress 0.0..=1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaderCurve {
    Linear,
    /// Slow start, accelerating past the midpoint.
    Logarithmic,
    /// Front-loaded.
    Exponential,
}

impl FaderCurve {
    /// Curve value at `progress`. Exactly 0.0 at 0.0 and 1.0 at 1.0.
    pub fn apply(&self, progress: f64) -> f64 {
        let p = progress.clamp(0.0, 1.0);
        if p <= 0.0 {
            return 0.0;
        }
        if p >= 1.0 {
            return 1.0;
        }
        let value = match self {
            Self::Linear => p,
            Self::Logarithmic => (10f64.powf(p) - 1.0) / 9.0,
            Self::Exponential => (1.0 - (-5.0 * p).exp()) / (1.0 - (-5.0f64).exp()),
        };
        value.clamp(0.0, 1.0)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Logarithmic => "logarithmic",
            Self::Exponential => "exponential",
        }
    }
}

impl fmt::Display for FaderCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaderCurve {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "logarithmic" | "log" => Ok(Self::Logarithmic),
            "exponential" | "exp" => Ok(Self::Exponential),
            other => Err(format!("unknown fader curve '{}'", other)),
        }
    }
}

/// A transition to run on the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    pub target: TrackDescriptor,
    pub style: TransitionStyle,
    pub duration: Duration,
    pub curve: FaderCurve,
    pub tempo_sync: bool,
}

impl TransitionPlan {
    /// Curved fade with tempo sync, the default autopilot plan.
    pub fn new(target: TrackDescriptor, duration: Duration) -> Self {
        Self {
            target,
            style: TransitionStyle::CurvedFade,
            duration,
            curve: FaderCurve::Logarithmic,
            tempo_sync: true,
        }
    }

    pub fn cut(target: TrackDescriptor) -> Self {
        Self {
            target,
            style: TransitionStyle::Cut,
            duration: Duration::ZERO,
            curve: FaderCurve::Linear,
            tempo_sync: false,
        }
    }

    pub fn with_style(mut self, style: TransitionStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_curve(mut self, curve: FaderCurve) -> Self {
        self.curve = curve;
        self
    }

    pub fn with_tempo_sync(mut self, tempo_sync: bool) -> Self {
        self.tempo_sync = tempo_sync;
        self
    }

    /// Number of automation steps at `step_interval`; a cut is always one.
    pub fn step_count(&self, step_interval: Duration) -> u32 {
        if self.style == TransitionStyle::Cut || step_interval.is_zero() {
            return 1;
        }
        let steps = (self.duration.as_secs_f64() / step_interval.as_secs_f64()).round();
        (steps as u32).max(1)
    }

    /// Crossfader level at `progress`; a linear fade ignores the curve.
    pub fn fader_level(&self, progress: f64) -> f64 {
        match self.style {
            TransitionStyle::Cut => FaderCurve::Linear.apply(progress),
            TransitionStyle::LinearFade => FaderCurve::Linear.apply(progress),
            TransitionStyle::CurvedFade => self.curve.apply(progress),
        }
    }

    pub fn automates_eq(&self) -> bool {
        self.style == TransitionStyle::CurvedFade
    }
}
