use halo_core::{MidiMessage, MidiOutputPort, MidiPortError};

use super::{CommandSink, ControlMessage, SinkError};
use crate::midi::Z1Mapping;

/// Where the MIDI sink sends its messages.
#[derive(Debug, Clone, PartialEq)]
pub struct MidiSinkConfig {
    pub device: String,
    /// 1-based MIDI channel.
    pub channel: u8,
}

impl Default for MidiSinkConfig {
    fn default() -> Self {
        Self {
            device: Z1Mapping::device_name().to_string(),
            channel: 1,
        }
    }
}

/// Sends control messages to the mixer as MIDI Control Change.
pub struct MidiCommandSink {
    port: MidiOutputPort,
}

impl MidiCommandSink {
    pub fn new(port: MidiOutputPort) -> Self {
        Self { port }
    }

    /// Open the named output port on a 1-based channel.
    pub fn open(device_name: &str, channel: u8) -> Result<Self, MidiPortError> {
        MidiOutputPort::open(device_name, channel).map(Self::new)
    }

    pub fn from_config(config: &MidiSinkConfig) -> Result<Self, MidiPortError> {
        Self::open(&config.device, config.channel)
    }

    pub fn device_name(&self) -> &str {
        self.port.device_name()
    }

    /// Encode a control message the way the Z1 expects it.
    pub fn encode(message: &ControlMessage) -> MidiMessage {
        MidiMessage::ControlChange(Z1Mapping::cc_for(message.target), message.value)
    }
}

impl CommandSink for MidiCommandSink {
    fn send(&mut self, message: &ControlMessage) -> Result<(), SinkError> {
        self.port.send(Self::encode(message))?;
        Ok(())
    }
}
