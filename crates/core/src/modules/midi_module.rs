use std::collections::HashMap;

use async_trait::async_trait;
use midir::{MidiInput, MidiInputConnection};
use tokio::sync::mpsc;

use super::traits::{AsyncModule, ModuleEvent, ModuleId, ModuleMessage};
use crate::midi::midi::MidiMessage;
use crate::midi::output::MidiOutputPort;

/// Bridges a MIDI controller into the module system.
///
/// Input is forwarded as `ModuleEvent::MidiInput`; `ModuleEvent::MidiOutput`
/// events are written to the device (LED feedback, soft takeover values).
pub struct MidiModule {
    device_name: String,
    channel: u8,
    input_connection: Option<MidiInputConnection<()>>,
    output_port: Option<MidiOutputPort>,
    status: HashMap<String, String>,
}

// SAFETY: the ALSA-backed midir connections are `Send` but not `Sync`. They
// are only ever touched through `&mut self`; shared `&self` access reaches
// nothing but `status` and `device_name`, which are `Sync`.
unsafe impl Sync for MidiModule {}

impl MidiModule {
    pub fn new(device_name: String, channel: u8) -> Self {
        Self {
            device_name,
            channel,
            input_connection: None,
            output_port: None,
            status: HashMap::new(),
        }
    }

    fn connect_input(
        &mut self,
        tx: mpsc::Sender<ModuleMessage>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let midi_in = MidiInput::new("halo_automix_controller")?;

        let in_port = midi_in
            .ports()
            .into_iter()
            .find(|port| {
                midi_in
                    .port_name(port)
                    .map(|name| name.contains(&self.device_name))
                    .unwrap_or(false)
            })
            .ok_or_else(|| format!("{} input not found", self.device_name))?;

        let connection = midi_in
            .connect(
                &in_port,
                "automix-midi-input",
                move |_timestamp, message, _| {
                    if let Some(midi_msg) = MidiMessage::from_bytes(message) {
                        if midi_msg == MidiMessage::Clock {
                            return;
                        }
                        // Callback context: never block on a full channel
                        if let Err(e) =
                            tx.try_send(ModuleMessage::Event(ModuleEvent::MidiInput(midi_msg)))
                        {
                            log::warn!("Failed to forward MIDI message: {}", e);
                        }
                    }
                },
                (),
            )
            .map_err(|_| "Failed to connect MIDI input")?;

        self.input_connection = Some(connection);
        self.status
            .insert("input_connected".to_string(), "true".to_string());
        Ok(())
    }

    pub fn send_midi_message(&mut self, message: MidiMessage) -> Result<(), String> {
        match &mut self.output_port {
            Some(port) => port.send(message).map_err(|e| e.to_string()),
            None => Err("MIDI output not connected".to_string()),
        }
    }
}

#[async_trait]
impl AsyncModule for MidiModule {
    fn id(&self) -> ModuleId {
        ModuleId::Midi
    }

    async fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        log::info!("Initializing MIDI module for device: {}", self.device_name);

        self.status
            .insert("device_name".to_string(), self.device_name.clone());
        self.status
            .insert("channel".to_string(), self.channel.to_string());
        self.status
            .insert("status".to_string(), "initialized".to_string());
        self.status
            .insert("input_connected".to_string(), "false".to_string());
        self.status
            .insert("output_connected".to_string(), "false".to_string());

        Ok(())
    }

    async fn run(
        &mut self,
        mut rx: mpsc::Receiver<ModuleEvent>,
        tx: mpsc::Sender<ModuleMessage>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        log::info!("MIDI module starting for device: {}", self.device_name);

        match self.connect_input(tx.clone()) {
            Ok(()) => {
                let _ = tx
                    .send(ModuleMessage::Status(format!(
                        "MIDI device '{}' connected",
                        self.device_name
                    )))
                    .await;
            }
            Err(e) => {
                // Keep running without hardware
                let error_msg = format!(
                    "Failed to connect MIDI input '{}': {}",
                    self.device_name, e
                );
                log::error!("{}", error_msg);
                let _ = tx.send(ModuleMessage::Error(error_msg)).await;
            }
        }

        match MidiOutputPort::open(&self.device_name, self.channel) {
            Ok(port) => {
                self.output_port = Some(port);
                self.status
                    .insert("output_connected".to_string(), "true".to_string());
            }
            Err(e) => log::warn!("MIDI output unavailable: {}", e),
        }

        while let Some(event) = rx.recv().await {
            match event {
                ModuleEvent::Shutdown => {
                    log::info!("MIDI module received shutdown signal");
                    break;
                }
                ModuleEvent::MidiOutput(message) => {
                    if let Err(e) = self.send_midi_message(message) {
                        log::debug!("Dropped MIDI output {:?}: {}", message, e);
                    }
                }
                _ => {}
            }
        }

        log::info!("MIDI module shutting down");
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Dropping the connections closes the ports
        self.input_connection = None;
        self.output_port = None;

        self.status
            .insert("status".to_string(), "shutdown".to_string());
        self.status
            .insert("input_connected".to_string(), "false".to_string());
        self.status
            .insert("output_connected".to_string(), "false".to_string());

        log::info!("MIDI module shutdown complete");
        Ok(())
    }

    fn status(&self) -> HashMap<String, String> {
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initialize_reports_disconnected() {
        let mut module = MidiModule::new("Traktor Kontrol Z1".to_string(), 1);
        module.initialize().await.unwrap();

        let status = module.status();
        assert_eq!(status.get("channel").map(String::as_str), Some("1"));
        assert_eq!(
            status.get("output_connected").map(String::as_str),
            Some("false")
        );
        assert_eq!(module.id(), ModuleId::Midi);
    }

    #[test]
    fn test_send_without_output_fails() {
        let mut module = MidiModule::new("Traktor Kontrol Z1".to_string(), 1);
        assert!(module
            .send_midi_message(MidiMessage::ControlChange(28, 64))
            .is_err());
    }

    #[tokio::test]
    async fn test_shutdown_marks_status() {
        let mut module = MidiModule::new("Z1".to_string(), 2);
        module.initialize().await.unwrap();
        module.shutdown().await.unwrap();
        assert_eq!(
            module.status().get("status").map(String::as_str),
            Some("shutdown")
        );
    }
}
