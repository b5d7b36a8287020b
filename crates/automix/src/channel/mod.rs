//! Outbound command channel.
//!
//! One message carries one control and one 7-bit value. Every writer
//! (automation steps, cancellation resets, manual overrides) goes through the
//! single [`CommandDispatcher`], which serialises access to the sink and
//! absorbs transient failures with a bounded retry.

mod midi_sink;

pub use midi_sink::{MidiCommandSink, MidiSinkConfig};

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::deck::DeckId;
use crate::error::AutomixError;

/// Centre value for EQ knobs.
pub const NEUTRAL: u8 = 64;
pub const MAX_VALUE: u8 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EqBand {
    Low,
    Mid,
    High,
}

/// A single addressable mixer control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlTarget {
    Crossfader,
    Volume(DeckId),
    Eq { deck: DeckId, band: EqBand },
    TempoSync(DeckId),
}

impl fmt::Display for ControlTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crossfader => write!(f, "crossfader"),
            Self::Volume(deck) => write!(f, "volume {}", deck),
            Self::Eq { deck, band } => write!(f, "eq {:?} {}", band, deck),
            Self::TempoSync(deck) => write!(f, "tempo sync {}", deck),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlMessage {
    pub target: ControlTarget,
    pub value: u8,
}

impl ControlMessage {
    /// Values above 127 are clamped.
    pub fn new(target: ControlTarget, value: u8) -> Self {
        Self {
            target,
            value: value.min(MAX_VALUE),
        }
    }

    /// Map a 0.0-1.0 level onto the 7-bit range.
    pub fn from_level(target: ControlTarget, level: f64) -> Self {
        let value = (level.clamp(0.0, 1.0) * MAX_VALUE as f64).round() as u8;
        Self::new(target, value)
    }

    pub fn eq(deck: DeckId, band: EqBand, value: u8) -> Self {
        Self::new(ControlTarget::Eq { deck, band }, value)
    }

    /// All three EQ bands of `deck` back to neutral.
    pub fn neutral_eq(deck: DeckId) -> [ControlMessage; 3] {
        [
            Self::eq(deck, EqBand::Low, NEUTRAL),
            Self::eq(deck, EqBand::Mid, NEUTRAL),
            Self::eq(deck, EqBand::High, NEUTRAL),
        ]
    }
}

/// Error reported by a sink for one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct SinkError(pub String);

impl From<halo_core::MidiPortError> for SinkError {
    fn from(e: halo_core::MidiPortError) -> Self {
        Self(e.to_string())
    }
}

/// Destination for control messages (a MIDI port, a test recorder, ...).
pub trait CommandSink: Send {
    fn send(&mut self, message: &ControlMessage) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retry_budget: u32,
    /// Backoff unit; retry `n` waits `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_budget: 3,
            backoff: Duration::from_millis(2),
        }
    }
}

pub struct CommandDispatcher {
    sink: Mutex<Box<dyn CommandSink>>,
    policy: RetryPolicy,
    failures: AtomicU64,
    delivered: AtomicU64,
    last_applied: parking_lot::Mutex<HashMap<ControlTarget, u8>>,
}

impl CommandDispatcher {
    pub fn new(sink: Box<dyn CommandSink>, policy: RetryPolicy) -> Self {
        Self {
            sink: Mutex::new(sink),
            policy,
            failures: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            last_applied: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Take exclusive use of the channel until the link is dropped.
    pub async fn acquire(&self) -> DispatchLink<'_> {
        DispatchLink {
            sink: self.sink.lock().await,
            dispatcher: self,
        }
    }

    /// Failed delivery attempts since start, absorbed or not.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Last value successfully delivered to `target`.
    pub fn last_applied(&self, target: ControlTarget) -> Option<u8> {
        self.last_applied.lock().get(&target).copied()
    }
}

/// Exclusive handle on the command channel.
pub struct DispatchLink<'a> {
    sink: MutexGuard<'a, Box<dyn CommandSink>>,
    dispatcher: &'a CommandDispatcher,
}

impl DispatchLink<'_> {
    /// Deliver one message, retrying up to the budget with linear backoff.
    pub async fn send(&mut self, message: &ControlMessage) -> Result<(), AutomixError> {
        let policy = self.dispatcher.policy;
        let attempts = policy.retry_budget + 1;
        let mut last_error = SinkError(String::new());

        for attempt in 1..=attempts {
            match self.sink.send(message) {
                Ok(()) => {
                    self.dispatcher.delivered.fetch_add(1, Ordering::Relaxed);
                    self.dispatcher
                        .last_applied
                        .lock()
                        .insert(message.target, message.value);
                    return Ok(());
                }
                Err(e) => {
                    self.dispatcher.failures.fetch_add(1, Ordering::Relaxed);
                    if attempt < attempts {
                        log::warn!(
                            "Send of {} failed (attempt {}/{}): {}",
                            message.target,
                            attempt,
                            attempts,
                            e
                        );
                        tokio::time::sleep(policy.backoff * attempt).await;
                    }
                    last_error = e;
                }
            }
        }

        Err(AutomixError::ChannelSendFailure {
            attempts,
            reason: last_error.0,
        })
    }

    /// Deliver messages in order, stopping at the first failure.
    pub async fn send_all(&mut self, messages: &[ControlMessage]) -> Result<(), AutomixError> {
        for message in messages {
            self.send(message).await?;
        }
        Ok(())
    }

    /// Deliver every message regardless of failures; returns how many failed.
    pub async fn send_best_effort(&mut self, messages: &[ControlMessage]) -> usize {
        let mut failed = 0;
        for message in messages {
            if let Err(e) = self.send(message).await {
                log::error!("Could not deliver {}: {}", message.target, e);
                failed += 1;
            }
        }
        failed
    }
}
