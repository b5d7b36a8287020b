//! Camelot wheel key notation.
//!
//! The wheel has 12 positions in two modes: `A` (minor) and `B` (major).
//! Moving one position is a step of a fifth, so neighbours share six of
//! seven scale notes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Mode half of the wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyMode {
    /// Minor keys (inner ring).
    A,
    /// Major keys (outer ring).
    B,
}

impl KeyMode {
    pub fn opposite(&self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// How two compatible keys relate on the wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRelation {
    /// Same position, same mode.
    Identical,
    /// Same position, opposite mode (relative major/minor).
    Relative,
    /// One position apart, same mode.
    Adjacent,
}

impl KeyRelation {
    /// Harmonic score used by the matcher.
    pub fn score(&self) -> f64 {
        match self {
            Self::Identical => 1.0,
            Self::Relative => 0.9,
            Self::Adjacent => 0.85,
        }
    }
}

/// A key on the Camelot wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CamelotKey {
    position: u8,
    mode: KeyMode,
}

/// Error parsing a key string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised key notation: {0:?}")]
pub struct KeyParseError(pub String);

impl CamelotKey {
    /// Create a key. Returns `None` unless `position` is in 1..=12.
    pub fn new(position: u8, mode: KeyMode) -> Option<Self> {
        (1..=12)
            .contains(&position)
            .then_some(Self { position, mode })
    }

    pub fn position(&self) -> u8 {
        self.position
    }

    pub fn mode(&self) -> KeyMode {
        self.mode
    }

    /// Steps between two positions going the short way round (0..=6).
    pub fn wheel_distance(&self, other: &CamelotKey) -> u8 {
        let d = (self.position as i16 - other.position as i16).rem_euclid(12) as u8;
        d.min(12 - d)
    }

    /// Relation to `other`, or `None` when the keys clash.
    pub fn relation(&self, other: &CamelotKey) -> Option<KeyRelation> {
        let distance = self.wheel_distance(other);
        match (distance, self.mode == other.mode) {
            (0, true) => Some(KeyRelation::Identical),
            (0, false) => Some(KeyRelation::Relative),
            (1, true) => Some(KeyRelation::Adjacent),
            _ => None,
        }
    }

    /// Symmetric: `a.is_compatible(&b) == b.is_compatible(&a)`.
    pub fn is_compatible(&self, other: &CamelotKey) -> bool {
        self.relation(other).is_some()
    }

    /// All keys compatible with this one, itself first.
    pub fn compatible_keys(&self) -> [CamelotKey; 4] {
        let up = self.position % 12 + 1;
        let down = (self.position + 10) % 12 + 1;
        [
            *self,
            Self {
                position: self.position,
                mode: self.mode.opposite(),
            },
            Self {
                position: up,
                mode: self.mode,
            },
            Self {
                position: down,
                mode: self.mode,
            },
        ]
    }

    /// Convert a pitch class (C = 0 .. B = 11) and mode to its wheel position.
    pub fn from_pitch_class(pitch_class: u8, mode: KeyMode) -> Self {
        // 1A is A-flat minor, 1B is B major; each step adds a fifth (7 semitones),
        // and 7 is its own inverse mod 12.
        let anchor = match mode {
            KeyMode::A => 8,
            KeyMode::B => 11,
        };
        let steps = ((pitch_class as i16 - anchor).rem_euclid(12) * 7).rem_euclid(12);
        Self {
            position: steps as u8 + 1,
            mode,
        }
    }

    /// Parse Camelot (`"8A"`) or musical (`"Am"`, `"F#"`, `"Db minor"`) notation.
    pub fn parse(text: &str) -> Result<Self, KeyParseError> {
        let trimmed = text.trim();
        Self::parse_camelot(trimmed)
            .or_else(|| Self::parse_musical(trimmed))
            .ok_or_else(|| KeyParseError(text.to_string()))
    }

    fn parse_camelot(text: &str) -> Option<Self> {
        let split = text.find(|c: char| !c.is_ascii_digit())?;
        let (digits, rest) = text.split_at(split);
        let position: u8 = digits.parse().ok()?;
        let mode = match rest {
            "A" | "a" => KeyMode::A,
            "B" | "b" => KeyMode::B,
            _ => return None,
        };
        Self::new(position, mode)
    }

    fn parse_musical(text: &str) -> Option<Self> {
        let mut chars = text.chars();
        let natural = match chars.next()?.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };

        let rest: String = chars.collect();
        let (accidental, suffix) = match rest.chars().next() {
            Some('#') | Some('♯') => (1, &rest[rest.chars().next()?.len_utf8()..]),
            Some('b') | Some('♭') => (-1, &rest[rest.chars().next()?.len_utf8()..]),
            _ => (0, rest.as_str()),
        };

        let mode = match suffix.trim().to_ascii_lowercase().as_str() {
            "m" | "min" | "minor" => KeyMode::A,
            "" | "maj" | "major" => KeyMode::B,
            _ => return None,
        };

        let pitch_class = (natural + accidental as i16).rem_euclid(12) as u8;
        Some(Self::from_pitch_class(pitch_class, mode))
    }
}

impl fmt::Display for CamelotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            KeyMode::A => 'A',
            KeyMode::B => 'B',
        };
        write!(f, "{}{}", self.position, mode)
    }
}

impl FromStr for CamelotKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(position: u8, mode: KeyMode) -> CamelotKey {
        CamelotKey::new(position, mode).unwrap()
    }

    #[test]
    fn test_parse_camelot() {
        assert_eq!(CamelotKey::parse("8A").unwrap(), key(8, KeyMode::A));
        assert_eq!(CamelotKey::parse(" 12b ").unwrap(), key(12, KeyMode::B));
        assert!(CamelotKey::parse("13A").is_err());
        assert!(CamelotKey::parse("0B").is_err());
        assert!(CamelotKey::parse("8C").is_err());
    }

    #[test]
    fn test_parse_musical() {
        assert_eq!(CamelotKey::parse("Am").unwrap(), key(8, KeyMode::A));
        assert_eq!(CamelotKey::parse("C").unwrap(), key(8, KeyMode::B));
        assert_eq!(CamelotKey::parse("Abm").unwrap(), key(1, KeyMode::A));
        assert_eq!(CamelotKey::parse("B").unwrap(), key(1, KeyMode::B));
        assert_eq!(CamelotKey::parse("F#m").unwrap(), key(11, KeyMode::A));
        assert_eq!(CamelotKey::parse("Db major").unwrap(), key(3, KeyMode::B));
        assert_eq!(CamelotKey::parse("C#m").unwrap(), key(12, KeyMode::A));
        assert_eq!(CamelotKey::parse("E").unwrap(), key(12, KeyMode::B));
        assert!(CamelotKey::parse("H").is_err());
        assert!(CamelotKey::parse("Cdorian").is_err());
    }

    #[test]
    fn test_relations() {
        let a8 = key(8, KeyMode::A);
        assert_eq!(a8.relation(&a8), Some(KeyRelation::Identical));
        assert_eq!(a8.relation(&key(8, KeyMode::B)), Some(KeyRelation::Relative));
        assert_eq!(a8.relation(&key(9, KeyMode::A)), Some(KeyRelation::Adjacent));
        assert_eq!(a8.relation(&key(7, KeyMode::A)), Some(KeyRelation::Adjacent));
        assert_eq!(a8.relation(&key(9, KeyMode::B)), None);
        assert_eq!(a8.relation(&key(3, KeyMode::B)), None);
    }

    #[test]
    fn test_adjacency_wraps() {
        let a12 = key(12, KeyMode::A);
        let a1 = key(1, KeyMode::A);
        assert!(a12.is_compatible(&a1));
        assert!(a1.is_compatible(&a12));
        assert_eq!(a12.wheel_distance(&a1), 1);
    }

    #[test]
    fn test_compatibility_is_symmetric() {
        let modes = [KeyMode::A, KeyMode::B];
        for p1 in 1..=12 {
            for p2 in 1..=12 {
                for m1 in modes {
                    for m2 in modes {
                        let a = key(p1, m1);
                        let b = key(p2, m2);
                        assert_eq!(a.is_compatible(&b), b.is_compatible(&a), "{} vs {}", a, b);
                    }
                }
            }
        }
    }

    #[test]
    fn test_compatible_keys() {
        let keys = key(1, KeyMode::B).compatible_keys();
        assert_eq!(keys[0], key(1, KeyMode::B));
        assert_eq!(keys[1], key(1, KeyMode::A));
        assert_eq!(keys[2], key(2, KeyMode::B));
        assert_eq!(keys[3], key(12, KeyMode::B));
        assert!(keys.iter().all(|k| k.is_compatible(&keys[0])));
    }

    #[test]
    fn test_display() {
        assert_eq!(key(8, KeyMode::A).to_string(), "8A");
        assert_eq!("11B".parse::<CamelotKey>().unwrap().to_string(), "11B");
    }
}
