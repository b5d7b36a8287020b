use midir::{MidiOutput, MidiOutputConnection};
use thiserror::Error;

use super::midi::MidiMessage;

/// Errors raised by the MIDI output port.
#[derive(Debug, Error)]
pub enum MidiPortError {
    #[error("MIDI backend unavailable: {0}")]
    Backend(String),

    #[error("{0} output not found")]
    DeviceNotFound(String),

    #[error("Failed to connect MIDI output: {0}")]
    Connect(String),

    #[error("Failed to send MIDI: {0}")]
    Send(String),
}

/// An open MIDI output connection to a mixer or controller.
pub struct MidiOutputPort {
    device_name: String,
    channel: u8,
    connection: MidiOutputConnection,
}

impl MidiOutputPort {
    /// Open the first output port whose name contains `device_name`.
    pub fn open(device_name: &str, channel: u8) -> Result<Self, MidiPortError> {
        let midi_out = MidiOutput::new("halo_automix_output")
            .map_err(|e| MidiPortError::Backend(e.to_string()))?;

        let out_port = midi_out
            .ports()
            .into_iter()
            .find(|port| {
                midi_out
                    .port_name(port)
                    .map(|name| name.contains(device_name))
                    .unwrap_or(false)
            })
            .ok_or_else(|| MidiPortError::DeviceNotFound(device_name.to_string()))?;

        let connection = midi_out
            .connect(&out_port, "automix-output")
            .map_err(|e| MidiPortError::Connect(e.to_string()))?;

        log::info!(
            "MIDI output '{}' connected on channel {}",
            device_name,
            channel
        );

        Ok(Self {
            device_name: device_name.to_string(),
            channel,
            connection,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn send(&mut self, message: MidiMessage) -> Result<(), MidiPortError> {
        self.connection
            .send(&message.to_bytes(self.channel))
            .map_err(|e| MidiPortError::Send(e.to_string()))
    }
}
