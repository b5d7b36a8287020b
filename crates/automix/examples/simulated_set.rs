//! Simulated two-deck set with the autopilot on.
//!
//! A fake transport plays a short track on deck A while a second one waits
//! on deck B. The monitor flags the ending, the autopilot plans a fade and
//! the mixer commands are printed unless MIDI is enabled in the settings.
//!
//! Usage: cargo run --package halo-automix --example simulated_set

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use halo_automix::{
    AutomixConfig, AutomixEngine, CamelotKey, CommandSink, ControlMessage, DeckId, FeedError,
    InMemoryCatalog, KeyMode, SinkError, TrackDescriptor, TrackId, TransportFeed,
    TransportReading,
};

struct FakeTransport {
    started: Instant,
    durations: [f64; 2],
    crossfader: Arc<Mutex<f64>>,
}

#[async_trait]
impl TransportFeed for FakeTransport {
    async fn read_snapshot(&self, deck: DeckId) -> Result<TransportReading, FeedError> {
        let elapsed = self.started.elapsed().as_secs_f64();
        let duration = self.durations[deck.index()];
        let position = elapsed.min(duration);
        Ok(
            TransportReading::new(position, duration - position, 124.0, 0.6)
                .with_track(TrackId(deck.index() as i64 + 1))
                .with_crossfader(*self.crossfader.lock()),
        )
    }
}

struct PrintSink {
    crossfader: Arc<Mutex<f64>>,
}

impl CommandSink for PrintSink {
    fn send(&mut self, message: &ControlMessage) -> Result<(), SinkError> {
        println!("  -> {} = {}", message.target, message.value);
        if message.target == halo_automix::ControlTarget::Crossfader {
            *self.crossfader.lock() = message.value as f64 / 127.0;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let key = CamelotKey::new(8, KeyMode::A).ok_or("bad key")?;
    let opener = TrackDescriptor::new(TrackId(1), "Opener", 20.0)
        .with_bpm(124.0)
        .with_key(key);
    let follower = TrackDescriptor::new(TrackId(2), "Follower", 300.0)
        .with_bpm(124.0)
        .with_key(key);

    let crossfader = Arc::new(Mutex::new(0.0));
    let feed = FakeTransport {
        started: Instant::now(),
        durations: [20.0, 300.0],
        crossfader: crossfader.clone(),
    };
    let config = AutomixConfig::load(None).unwrap_or_else(|e| {
        log::warn!("{}, using defaults", e);
        AutomixConfig::default()
    });
    let config = AutomixConfig {
        autopilot: true,
        ..config
    };

    // Hardware when MIDI is enabled in the settings, otherwise print.
    let sink: Box<dyn CommandSink> = match config.command_sink() {
        Ok(Some(sink)) => sink,
        Ok(None) => Box::new(PrintSink { crossfader }),
        Err(e) => {
            log::warn!("{}, printing commands instead", e);
            Box::new(PrintSink { crossfader })
        }
    };

    let engine = Arc::new(AutomixEngine::new(
        config,
        Arc::new(feed),
        sink,
        Arc::new(InMemoryCatalog::new(vec![opener.clone(), follower.clone()])),
    ));
    engine.set_deck_track(DeckId::A, Some(opener));
    engine.set_deck_track(DeckId::B, Some(follower));

    println!("Simulated Set");
    println!("=============\n");
    engine.start();

    for _ in 0..25 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let status = engine.get_status();
        println!(
            "[{}] progress {:.0}% departing {} pending {}",
            status.controller_state,
            status.progress * 100.0,
            status.roles.departing(),
            status.pending_opportunities
        );
    }

    engine.shutdown().await;

    for record in engine.history() {
        println!(
            "\n{} -> '{}' over {:.1}s: {:?} (verified {:?})",
            record.departing,
            record.target_title,
            record.planned_duration.as_secs_f64(),
            record.outcome,
            record.verified
        );
    }
    Ok(())
}
