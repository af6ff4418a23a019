//! wx-sim — WeatherLink station simulator entry point.
//!
//! Serves the raw byte protocol over TCP so the logger can connect with
//! a `tcp:` port name instead of real hardware. Two loops run
//! concurrently: a drift loop nudging the sensor image so consecutive
//! LOOP packets differ, and the listener feeding connection bytes into
//! the shared station.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{info, warn};

use wx_simulator::SimulatedStation;
use wx_types::StationFamily;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "wx-sim", about = "WeatherLink station simulator")]
struct Args {
    /// Station family to simulate
    #[arg(long, default_value = "monitor")]
    family: String,
    /// TCP listen address
    #[arg(long, default_value = "127.0.0.1:7762")]
    listen: String,
    /// Corrupt the CRC of every Nth response (0 = never)
    #[arg(long, default_value = "0")]
    corrupt_every: u32,
    /// Freeze the sensor image instead of drifting it
    #[arg(long)]
    no_drift: bool,
}

fn parse_family(name: &str) -> Option<StationFamily> {
    match name.to_ascii_lowercase().as_str() {
        "wizard3" | "wizard-iii" => Some(StationFamily::WizardIII),
        "wizard2" | "wizard-ii" => Some(StationFamily::WizardII),
        "monitor" => Some(StationFamily::Monitor),
        "perception" => Some(StationFamily::Perception),
        "groweather" => Some(StationFamily::GroWeather),
        "energy" => Some(StationFamily::Energy),
        "health" => Some(StationFamily::Health),
        "oldlink" => Some(StationFamily::OldLink),
        _ => None,
    }
}

// ── Drift loop ────────────────────────────────────────────────────────────────

/// Nudge the sensor image every few seconds so the logger sees live data.
async fn run_drift(station: Arc<Mutex<SimulatedStation>>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        let mut rng = rand::thread_rng();
        let mut s = station.lock().unwrap();
        if let Some(t) = s.reading.outside_temp {
            s.reading.outside_temp = Some(t + rng.gen_range(-3i16..=3));
        }
        if let Some(w) = s.reading.wind_speed {
            let delta = rng.gen_range(-2i16..=2);
            s.reading.wind_speed = Some((w as i16 + delta).clamp(0, 60) as u8);
        }
        if let Some(d) = s.reading.wind_direction {
            s.reading.wind_direction = Some((d + rng.gen_range(0..=10)) % 360);
        }
        if let Some(b) = s.reading.barometer {
            s.reading.barometer = Some((b as i32 + rng.gen_range(-4i32..=4)) as u16);
        }
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wx_simulator=info".into()),
        )
        .init();

    let args = Args::parse();
    let family = match parse_family(&args.family) {
        Some(f) => f,
        None => {
            eprintln!("unknown family: {}", args.family);
            std::process::exit(2);
        }
    };

    let station = Arc::new(Mutex::new(SimulatedStation::new(family)));
    info!(
        "wx-sim starting — {} on {}",
        family.display_name(),
        args.listen
    );

    if !args.no_drift {
        tokio::spawn(run_drift(station.clone()));
    }

    let listener = match TcpListener::bind(&args.listen).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("could not bind {}: {e}", args.listen);
            std::process::exit(1);
        }
    };

    let corrupt_every = args.corrupt_every;
    let mut served: u32 = 0;

    loop {
        let (mut socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        info!("logger connected from {peer}");

        served += 1;
        if corrupt_every > 0 && served % corrupt_every == 0 {
            station.lock().unwrap().corrupt_next_crc = 1;
        }

        let station = station.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let mut out = [0u8; 512];
            loop {
                let n = match socket.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        warn!("read error from {peer}: {e}");
                        break;
                    }
                };

                let reply_len = {
                    let mut s = station.lock().unwrap();
                    s.push_bytes(&buf[..n]);
                    s.pull_bytes(&mut out)
                };

                if reply_len > 0 {
                    if let Err(e) = socket.write_all(&out[..reply_len]).await {
                        warn!("write error to {peer}: {e}");
                        break;
                    }
                }
            }
            info!("logger disconnected from {peer}");
        });
    }
}
