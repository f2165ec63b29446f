//! VFD Modbus Demo
//!
//! Drives a simulated (or, with the `rtu` feature, a real) drive through a
//! full session:
//! - Connect and print the model's register map
//! - Set frequency and direction, start, and poll the live snapshot
//! - Fault cycle: silence the link until the session faults, then recover
//! - Drive trip and fault reset
//! - Stop and disconnect
//!
//! Usage: cargo run --features cli --bin demo -- [--model CDE550] [--setpoint 30]
//! Logging: RUST_LOG=vfd_modbus=debug cargo run --features cli --bin demo

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use tokio::time::sleep;
use vfd_modbus::catalog::fault_codes;
use vfd_modbus::{
    Catalog, DriveEvent, DriveSession, LinkConfig, ParameterSnapshot, Rotation, SessionConfig,
    SessionState, SimulatedDrive, SimulatorConfig, SimulatorHandle,
};

/// Configuration file layout
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DemoConfig {
    session: SessionConfig,
    link: Option<LinkConfig>,
    simulator: Option<SimulatorConfig>,
}

/// VFD Modbus demo
#[derive(Parser, Debug)]
#[command(
    name = "demo",
    version,
    about = "Poll and control a variable-frequency drive over Modbus RTU",
    long_about = None
)]
struct Cli {
    /// Drive model
    #[arg(short, long, default_value = "CDE550")]
    model: String,

    /// Drive profile file (JSON) instead of the built-in catalog
    #[arg(long)]
    profiles: Option<PathBuf>,

    /// Station address
    #[arg(short, long)]
    station: Option<u8>,

    /// Number of poll ticks to show while running
    #[arg(long, default_value_t = 8)]
    polls: u32,

    /// Frequency setpoint (Hz)
    #[arg(long, default_value_t = 25.0)]
    setpoint: f64,

    /// Poll interval (milliseconds)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Configuration file: { "session": …, "link": …, "simulator": … }
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port; the simulated drive is used when absent
    #[cfg(feature = "rtu")]
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[cfg(feature = "rtu")]
    #[arg(short, long)]
    baud: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    println!("⚡ {}", vfd_modbus::info());
    println!("=====================================\n");

    // =========================================================================
    // Configuration
    // =========================================================================
    let mut config = match &cli.config {
        Some(path) => serde_json::from_str::<DemoConfig>(&std::fs::read_to_string(path)?)?,
        None => DemoConfig::default(),
    };
    if let Some(station) = cli.station {
        config.session.station = station;
    }
    if let Some(interval_ms) = cli.interval_ms {
        config.session.poll_interval_ms = interval_ms;
    }
    #[cfg(feature = "rtu")]
    if let Some(port) = &cli.port {
        let link = config.link.take().unwrap_or_default();
        let mut link = LinkConfig { port: port.clone(), ..link };
        if let Some(baud) = cli.baud {
            link.baud_rate = baud;
        }
        config.link = Some(link);
    }

    let catalog = match &cli.profiles {
        Some(path) => Catalog::from_path(path)?,
        None => Catalog::builtin()?,
    };
    let profile = catalog.profile(&cli.model)?;
    let ratings = profile.ratings();

    println!("📋 {} - {}", profile.name(), profile.description());
    println!(
        "   {} Hz max, {} A, {} kW, {} V",
        ratings.max_frequency_hz,
        ratings.rated_current_a,
        ratings.rated_power_kw,
        ratings.rated_voltage_v
    );
    for register in profile.registers() {
        println!(
            "   {:<36} {:>10} {}",
            register.to_string(),
            format!("{:?}", register.access),
            if register.poll { "polled" } else { "" }
        );
    }

    // =========================================================================
    // Connect
    // =========================================================================
    let mut session = DriveSession::new(profile.clone(), config.session.clone())?;
    let mut events = session.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("   📣 {}", event);
            if matches!(event, DriveEvent::Disconnected { .. }) {
                break;
            }
        }
    });

    let simulator = match config.link.as_ref() {
        #[cfg(feature = "rtu")]
        Some(link) => {
            println!("\n🔌 Connecting to {}", link);
            session.connect_serial(link).await?;
            None
        }
        _ => {
            let sim_config = config.simulator.clone().unwrap_or_else(|| {
                SimulatorConfig::default()
                    .with_station(config.session.station)
                    .with_animation(5.0)
            });
            sim_config.validate()?;
            println!("\n🔌 Connecting to simulated {}", profile.name());
            let (transport, handle) = SimulatedDrive::new(profile.clone(), sim_config).spawn();
            session.connect(transport).await?;
            Some(handle)
        }
    };
    println!("   state: {}", session.state());

    // =========================================================================
    // Run
    // =========================================================================
    println!("\n🚀 Start at {} Hz", cli.setpoint);
    let control = session
        .control()
        .ok_or("session has no link after connect")?;
    control.set_direction(Rotation::Forward).await?;
    let raw = control.set_frequency(cli.setpoint).await?;
    println!("   setpoint written as raw {}", raw);
    control.start().await?;

    for _ in 0..cli.polls {
        sleep(config.session.poll_interval()).await;
        match session.poll().await {
            Ok(()) => print_snapshot(&session.snapshot()),
            Err(e) => println!("   ❌ poll failed: {}", e),
        }
    }

    if let Some(sim) = &simulator {
        fault_cycle(&mut session, sim).await;
    }

    // =========================================================================
    // Stop
    // =========================================================================
    println!("\n🛑 Stop");
    control.stop().await?;
    for _ in 0..3 {
        sleep(config.session.poll_interval()).await;
        if session.poll().await.is_ok() {
            print_snapshot(&session.snapshot());
        }
    }

    session.disconnect().await;
    println!("   state: {}", session.state());
    if let Some(sim) = simulator {
        let stats = sim.stats();
        println!(
            "\n📊 Simulator: {} requests, {} responses, {} dropped, {} exceptions",
            stats.requests, stats.responses, stats.dropped, stats.exceptions
        );
    }

    Ok(())
}

/// Silence the link until the session faults, recover, then trip and reset the drive
async fn fault_cycle(session: &mut DriveSession, sim: &SimulatorHandle) {
    println!("\n⚠️  Link fault");
    sim.set_silent(true);
    while session.state() != SessionState::Faulted {
        if let Err(e) = session.poll().await {
            println!(
                "   poll {} failed: {}",
                session.consecutive_failures(),
                e
            );
        }
    }
    sim.set_silent(false);
    if session.poll().await.is_ok() {
        println!("   recovered: {}", session.state());
    }

    println!("\n⚠️  Drive trip");
    sim.trip(fault_codes::OVERCURRENT);
    if session.poll().await.is_ok() {
        if let Some((code, description)) = session.snapshot().drive_fault() {
            println!("   drive fault 0x{:02X}: {}", code, description);
        }
    }
    match session.reset_fault().await {
        Ok(()) => println!("   fault reset, tripped: {}", sim.is_tripped()),
        Err(e) => println!("   ❌ reset failed: {}", e),
    }
}

fn print_snapshot(snapshot: &ParameterSnapshot) {
    let value = |name: &str| snapshot.get(name).unwrap_or(f64::NAN);
    let status = snapshot.status().unwrap_or_default();
    println!(
        "   #{:<3} {:>6.1} Hz {:>6.2} A {:>5.0} V {:>6.0} rpm {:>5.1} °C  {}{}{}",
        snapshot.sequence,
        value("output_frequency"),
        value("output_current"),
        value("output_voltage"),
        value("motor_speed"),
        value("drive_temperature"),
        if status.is_running() { "RUN" } else { "STOP" },
        if status.is_at_speed() { " AT-SPEED" } else { "" },
        if status.is_reverse() { " REV" } else { "" },
    );
}
