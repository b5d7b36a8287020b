//! Halo Automix
//!
//! Autonomous mix transitions between two decks driven by an external
//! mixer controller.
//!
//! # Features
//!
//! - Compatibility matching on tempo (with half/double-time ratios), Camelot
//!   key, energy, popularity and genre history
//! - Playback monitoring with phrase, mix point, track ending and energy
//!   shift opportunities
//! - Transition state machine with curved crossfades and EQ automation
//! - Command channel with bounded retry over MIDI (TRAKTOR Z1 MK1)
//! - Autopilot and a Halo `AsyncModule` host adapter

pub mod channel;
pub mod deck;
pub mod engine;
pub mod error;
pub mod library;
pub mod matcher;
pub mod midi;
pub mod module;
pub mod monitor;
pub mod transition;
pub mod transport;

// Re-export main types
pub use channel::{
    CommandDispatcher, CommandSink, ControlMessage, ControlTarget, EqBand, MidiCommandSink,
    MidiSinkConfig, RetryPolicy, SinkError,
};
pub use deck::{DeckId, DeckRole, DeckRoles, SharedDeckRoles};
pub use engine::{AutomixConfig, AutomixEngine, AutomixStatus};
pub use error::{AutomixError, FeedError};
pub use library::{
    CamelotKey, InMemoryCatalog, KeyMode, TrackCatalog, TrackDescriptor, TrackId, TrackQuery,
};
pub use matcher::{AdvisoryHint, CompatibilityMatcher, MatchMode, MatcherConfig, RankedTrack};
pub use module::AutomixModule;
pub use monitor::{MixOpportunity, MonitorConfig, OpportunityKind, OpportunityStream, Urgency};
pub use transition::{
    CancelOutcome, ControllerState, FaderCurve, TransitionPlan, TransitionRecord,
    TransitionStyle,
};
pub use transport::{PlaybackSnapshot, TransportFeed, TransportReading};
