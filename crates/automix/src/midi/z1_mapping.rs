//! TRAKTOR Kontrol Z1 MK1 MIDI mapping.
//!
//! Outbound, the engine drives the Z1's mixer section (EQ, volume,
//! crossfader) by Control Change. Inbound, the FX and Mode buttons are
//! repurposed as automix controls.

use halo_core::AutomixRequest;

use crate::channel::{ControlTarget, EqBand};
use crate::deck::DeckId;

/// TRAKTOR Kontrol Z1 MK1 MIDI CC and Note mappings.
///
/// Note: These values are based on the default Z1 MIDI mapping.
/// Actual values may vary and should be verified via MIDI learn.
pub struct Z1Mapping;

impl Z1Mapping {
    // Control Change (CC) numbers for knobs and faders
    pub const CC_EQ_HI_A: u8 = 18;
    pub const CC_EQ_MID_A: u8 = 19;
    pub const CC_EQ_LO_A: u8 = 20;
    pub const CC_EQ_HI_B: u8 = 21;
    pub const CC_EQ_MID_B: u8 = 22;
    pub const CC_EQ_LO_B: u8 = 23;
    pub const CC_VOLUME_A: u8 = 26;
    pub const CC_VOLUME_B: u8 = 27;
    pub const CC_CROSSFADER: u8 = 28;

    // Software-only; the Z1 has no sync control, so the host learns these.
    pub const CC_TEMPO_SYNC_A: u8 = 29;
    pub const CC_TEMPO_SYNC_B: u8 = 30;

    // Note numbers for buttons
    pub const NOTE_CUE_A: u8 = 1;
    pub const NOTE_CUE_B: u8 = 2;
    pub const NOTE_FX_A: u8 = 3;
    pub const NOTE_FX_B: u8 = 4;
    pub const NOTE_MODE: u8 = 5;

    /// Translate a button press into an automix request.
    pub fn translate_note_on(note: u8, _velocity: u8) -> Option<AutomixRequest> {
        match note {
            Self::NOTE_FX_A => Some(AutomixRequest::ForceTransition),
            Self::NOTE_FX_B => Some(AutomixRequest::CancelTransition),
            Self::NOTE_MODE => Some(AutomixRequest::ToggleAutopilot),
            _ => None,
        }
    }

    /// CC number that drives `target`.
    pub fn cc_for(target: ControlTarget) -> u8 {
        match target {
            ControlTarget::Crossfader => Self::CC_CROSSFADER,
            ControlTarget::Volume(DeckId::A) => Self::CC_VOLUME_A,
            ControlTarget::Volume(DeckId::B) => Self::CC_VOLUME_B,
            ControlTarget::Eq { deck, band } => match (deck, band) {
                (DeckId::A, EqBand::High) => Self::CC_EQ_HI_A,
                (DeckId::A, EqBand::Mid) => Self::CC_EQ_MID_A,
                (DeckId::A, EqBand::Low) => Self::CC_EQ_LO_A,
                (DeckId::B, EqBand::High) => Self::CC_EQ_HI_B,
                (DeckId::B, EqBand::Mid) => Self::CC_EQ_MID_B,
                (DeckId::B, EqBand::Low) => Self::CC_EQ_LO_B,
            },
            ControlTarget::TempoSync(DeckId::A) => Self::CC_TEMPO_SYNC_A,
            ControlTarget::TempoSync(DeckId::B) => Self::CC_TEMPO_SYNC_B,
        }
    }

    /// Control addressed by a CC number, if the engine drives it.
    pub fn target_for_cc(cc: u8) -> Option<ControlTarget> {
        let eq = |deck, band| Some(ControlTarget::Eq { deck, band });
        match cc {
            Self::CC_CROSSFADER => Some(ControlTarget::Crossfader),
            Self::CC_VOLUME_A => Some(ControlTarget::Volume(DeckId::A)),
            Self::CC_VOLUME_B => Some(ControlTarget::Volume(DeckId::B)),
            Self::CC_EQ_HI_A => eq(DeckId::A, EqBand::High),
            Self::CC_EQ_MID_A => eq(DeckId::A, EqBand::Mid),
            Self::CC_EQ_LO_A => eq(DeckId::A, EqBand::Low),
            Self::CC_EQ_HI_B => eq(DeckId::B, EqBand::High),
            Self::CC_EQ_MID_B => eq(DeckId::B, EqBand::Mid),
            Self::CC_EQ_LO_B => eq(DeckId::B, EqBand::Low),
            Self::CC_TEMPO_SYNC_A => Some(ControlTarget::TempoSync(DeckId::A)),
            Self::CC_TEMPO_SYNC_B => Some(ControlTarget::TempoSync(DeckId::B)),
            _ => None,
        }
    }

    /// Get the Z1 device name for MIDI port matching.
    pub fn device_name() -> &'static str {
        "Traktor Kontrol Z1"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_note_on() {
        assert_eq!(
            Z1Mapping::translate_note_on(Z1Mapping::NOTE_FX_A, 127),
            Some(AutomixRequest::ForceTransition)
        );
        assert_eq!(
            Z1Mapping::translate_note_on(Z1Mapping::NOTE_MODE, 127),
            Some(AutomixRequest::ToggleAutopilot)
        );
        assert_eq!(Z1Mapping::translate_note_on(Z1Mapping::NOTE_CUE_A, 127), None);
    }

    #[test]
    fn test_cc_mapping() {
        assert_eq!(Z1Mapping::cc_for(ControlTarget::Crossfader), 28);
        assert_eq!(
            Z1Mapping::cc_for(ControlTarget::Eq {
                deck: DeckId::B,
                band: EqBand::Low
            }),
            23
        );
        assert_eq!(
            Z1Mapping::target_for_cc(Z1Mapping::CC_EQ_HI_A),
            Some(ControlTarget::Eq {
                deck: DeckId::A,
                band: EqBand::High
            })
        );
        // Filter knobs stay on the hardware.
        assert_eq!(Z1Mapping::target_for_cc(24), None);
    }

    #[test]
    fn test_every_cc_maps_back() {
        for cc in 0..128u8 {
            if let Some(target) = Z1Mapping::target_for_cc(cc) {
                assert_eq!(Z1Mapping::cc_for(target), cc);
            }
        }
    }
}
