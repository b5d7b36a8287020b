//! Mix transition planning, state machine and automation.

mod automation;
mod controller;
mod plan;

pub use automation::{AutomationEngine, FinishHook};
pub use controller::{
    crossfader_position, AutomationStep, CancelOutcome, ControllerConfig, ControllerState,
    ControllerStatus, PreconditionCheck, TransitionController, TransitionOutcome,
    TransitionRecord, VerifyCheck, Work,
};
pub use plan::{FaderCurve, TransitionPlan, TransitionStyle};
