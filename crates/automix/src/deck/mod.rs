//! Deck identifiers and the departing/arriving role pair.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Deck identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeckId {
    A,
    B,
}

impl DeckId {
    /// Get the deck as a numeric index (0 for A, 1 for B).
    pub fn index(&self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }

    /// Get the deck as a u8 (0 for A, 1 for B).
    pub fn as_u8(&self) -> u8 {
        self.index() as u8
    }

    /// Get the deck from a numeric index.
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::A),
            1 => Some(Self::B),
            _ => None,
        }
    }

    /// Get the other deck.
    pub fn other(&self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

impl std::fmt::Display for DeckId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

/// Role a deck plays in the current (or next) transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeckRole {
    /// Audible deck, fading out.
    Departing,
    /// Cued deck, fading in.
    Arriving,
}

/// Which deck holds which role.
///
/// Only the departing deck is stored, so exactly one deck holds each role
/// by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeckRoles {
    departing: DeckId,
}

impl DeckRoles {
    pub fn new(departing: DeckId) -> Self {
        Self { departing }
    }

    pub fn departing(&self) -> DeckId {
        self.departing
    }

    pub fn arriving(&self) -> DeckId {
        self.departing.other()
    }

    pub fn role_of(&self, deck: DeckId) -> DeckRole {
        if deck == self.departing {
            DeckRole::Departing
        } else {
            DeckRole::Arriving
        }
    }

    /// Roles after a completed transition.
    pub fn swapped(&self) -> Self {
        Self::new(self.arriving())
    }
}

impl Default for DeckRoles {
    fn default() -> Self {
        Self::new(DeckId::A)
    }
}

/// Role pair shared by the monitor (reader) and the controller (writer).
///
/// Readers always get a complete `DeckRoles` copy; the swap is a single
/// assignment under the write lock.
#[derive(Debug, Clone, Default)]
pub struct SharedDeckRoles(Arc<RwLock<DeckRoles>>);

impl SharedDeckRoles {
    pub fn new(roles: DeckRoles) -> Self {
        Self(Arc::new(RwLock::new(roles)))
    }

    pub fn get(&self) -> DeckRoles {
        *self.0.read()
    }

    /// Swap departing and arriving, returning the new roles.
    pub fn swap(&self) -> DeckRoles {
        let mut roles = self.0.write();
        *roles = roles.swapped();
        *roles
    }
}
