// MIDI message types we care about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn(u8, u8),        // (note, velocity)
    NoteOff(u8),           // note
    ControlChange(u8, u8), // (controller number, value)
    Clock,                 // MIDI clock messages
}

impl MidiMessage {
    /// Decode a raw MIDI packet. Unsupported status bytes yield `None`.
    pub fn from_bytes(message: &[u8]) -> Option<Self> {
        let status = *message.first()?;
        if status == 0xF8 {
            return Some(Self::Clock);
        }
        if message.len() < 3 {
            return None;
        }
        match status & 0xF0 {
            0x90 if message[2] > 0 => Some(Self::NoteOn(message[1], message[2])),
            // Note On with zero velocity is a Note Off
            0x90 | 0x80 => Some(Self::NoteOff(message[1])),
            0xB0 => Some(Self::ControlChange(message[1], message[2])),
            _ => None,
        }
    }

    /// Encode for a 1-based MIDI channel (1-16). Data bytes are masked to 7 bits.
    pub fn to_bytes(&self, channel: u8) -> Vec<u8> {
        let ch = channel.clamp(1, 16) - 1;
        match *self {
            Self::NoteOn(note, velocity) => vec![0x90 | ch, note & 0x7F, velocity & 0x7F],
            Self::NoteOff(note) => vec![0x80 | ch, note & 0x7F, 0],
            Self::ControlChange(cc, value) => vec![0xB0 | ch, cc & 0x7F, value & 0x7F],
            Self::Clock => vec![0xF8],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_change_encoding() {
        let bytes = MidiMessage::ControlChange(28, 64).to_bytes(1);
        assert_eq!(bytes, vec![0xB0, 28, 64]);

        let bytes = MidiMessage::ControlChange(20, 200).to_bytes(16);
        assert_eq!(bytes, vec![0xBF, 20, 200 & 0x7F]);
    }

    #[test]
    fn test_decode() {
        assert_eq!(
            MidiMessage::from_bytes(&[0x91, 3, 100]),
            Some(MidiMessage::NoteOn(3, 100))
        );
        assert_eq!(
            MidiMessage::from_bytes(&[0x90, 3, 0]),
            Some(MidiMessage::NoteOff(3))
        );
        assert_eq!(
            MidiMessage::from_bytes(&[0xB2, 28, 5]),
            Some(MidiMessage::ControlChange(28, 5))
        );
        assert_eq!(MidiMessage::from_bytes(&[0xF8]), Some(MidiMessage::Clock));
        assert_eq!(MidiMessage::from_bytes(&[0xE0, 0, 0]), None);
        assert_eq!(MidiMessage::from_bytes(&[]), None);
    }
}
