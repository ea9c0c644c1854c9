//! voiceloop diagnostics entrypoint.
//!
//! The pipeline itself is a library; embedding applications supply their own
//! recognition engine and consume finalized utterances. This binary exposes
//! the parts that are useful standalone: input device discovery and a live
//! energy monitor for tuning the silence threshold.

use anyhow::Result;
use crossbeam_channel::{bounded, select, unbounded};
use std::io::{self, BufRead};
use std::panic;
use std::thread;
use voiceloop::audio::{
    AudioEnergyMonitor, CaptureBackend, EnergyEvent, MicrophoneBackend, MonitorConfig,
};
use voiceloop::config::AppConfig;
use voiceloop::telemetry::init_tracing;
use voiceloop::{init_logging, log_panic};

fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;
    init_logging(&config);
    init_tracing(&config);
    install_panic_hook();

    if config.list_input_devices {
        list_input_devices();
        return Ok(());
    }
    if config.monitor {
        return run_monitor(&config);
    }

    print_summary(&config);
    Ok(())
}

fn install_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        log_panic(info);
        default_hook(info);
    }));
}

fn list_input_devices() {
    match MicrophoneBackend::list_devices() {
        Ok(devices) if devices.is_empty() => {
            println!("No audio input devices detected.");
        }
        Ok(devices) => {
            println!("Detected audio input devices:");
            for (index, name) in devices.iter().enumerate() {
                println!("  {index}: {name}");
            }
        }
        Err(err) => {
            println!("Failed to list audio input devices: {err}");
        }
    }
}

/// Open the microphone and print voice/silence transitions until the user
/// presses Enter. Meant for picking a `--silence-threshold-db` that matches
/// the room.
fn run_monitor(config: &AppConfig) -> Result<()> {
    let cfg = config.pipeline_config();
    let mut backend = MicrophoneBackend::new(config.input_device.clone());
    let mut streams = backend.open(&cfg)?;

    let (events_tx, events_rx) = unbounded();
    let monitor =
        AudioEnergyMonitor::attach(streams.meter.clone(), MonitorConfig::from(&cfg), events_tx);
    println!(
        "Monitoring input energy (threshold {} dB, silence window {} ms). Press Enter to stop.",
        cfg.silence_threshold_db, cfg.silence_duration_ms
    );

    let (stop_tx, stop_rx) = bounded(1);
    thread::spawn(move || {
        let mut line = String::new();
        let _ = io::stdin().lock().read_line(&mut line);
        let _ = stop_tx.send(());
    });

    loop {
        select! {
            recv(events_rx) -> event => match event {
                Ok(EnergyEvent::VoiceDetected) => println!("voice detected"),
                Ok(EnergyEvent::SilenceDetected) => println!("silence detected"),
                Err(_) => break,
            },
            recv(stop_rx) -> _ => break,
        }
    }

    monitor.detach();
    streams.session.close();
    Ok(())
}

fn print_summary(config: &AppConfig) {
    println!("voiceloop {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  capture: {} Hz, {} ms frames, device {}",
        config.sample_rate,
        config.frame_ms,
        config.input_device.as_deref().unwrap_or("(default)")
    );
    println!(
        "  detection: threshold {} dB, silence {} ms, poll {} ms",
        config.silence_threshold_db, config.silence_duration_ms, config.energy_poll_ms
    );
    println!(
        "  finalization: {} ms debounce, lang {}",
        config.finalize_debounce_ms, config.lang
    );
    println!(
        "  tts: {} (voice {}, speed {})",
        config.tts_url, config.tts_voice, config.tts_speed
    );
    println!();
    println!("The pipeline runs embedded; see --list-input-devices and --monitor for diagnostics.");
}
