//! Error types for the automix engine.

use thiserror::Error;

use crate::deck::DeckId;

/// Failure reading the transport feed for one deck.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FeedError {
    #[error("transport feed unreachable: {0}")]
    Unreachable(String),

    #[error("no track loaded on deck {0}")]
    NoTrack(DeckId),

    #[error("transport feed timed out")]
    Timeout,
}

/// Errors surfaced by the automix engine.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AutomixError {
    /// The transport snapshot is older than two monitor ticks.
    #[error("transport feed is stale")]
    StaleFeed,

    /// Nothing in the catalog is compatible, even after the relaxed pass.
    #[error("no compatible candidate track")]
    NoCompatibleCandidate,

    /// A control message could not be delivered within the retry budget.
    #[error("command channel send failed after {attempts} attempts: {reason}")]
    ChannelSendFailure { attempts: u32, reason: String },

    /// A plan was submitted while another transition is in progress.
    #[error("transition controller is busy")]
    Busy,

    #[error("transition plan rejected: {0}")]
    PlanRejected(String),

    #[error("no mixer control mapped to CC {0}")]
    UnknownControl(u8),

    #[error(transparent)]
    Feed(#[from] FeedError),
}
