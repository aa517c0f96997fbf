// src/main.rs
use std::path::Path;
use anyhow::{Context, Result};
use log::info;
use smu_sweep::config::RigConfig;
use smu_sweep::drivers::{
    FramedChannel, InstrumentSession, PortLink, SerialLink, SimulatedSmu, SweepController,
};
use smu_sweep::recorder::CsvRecorder;
use smu_sweep::types::ConnectionMode;
fn run<L: SerialLink>(link: L, config: &RigConfig) -> Result<()> {
    let channel = FramedChannel::new(link, config.framing)
        .with_poll_interval(config.connection.poll_interval());
    let mut session = InstrumentSession::new(channel, config.timing, config.session);
    session.identify().context("instrument did not identify")?;
    session
        .clear_errors()
        .context("could not clear the instrument error queue")?;
    let mut recorder = CsvRecorder::create(&config.output_csv)
        .with_context(|| format!("cannot write {}", config.output_csv.display()))?;
    let curve = SweepController::new(config.sweep.clone(), config.timing)
        .run(&mut session, &mut recorder)
        .context("sweep aborted")?;
    info!(
        "sweep done: {} points, {} measurement retries",
        curve.len(),
        session.retry_warnings()
    );
    Ok(())
}
// usage: smu-sweep [config.json]
fn main() -> Result<()> {
    env_logger::init();
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "sweep.json".to_owned());
    let config = if Path::new(&path).exists() {
        RigConfig::load(&path)?
    } else {
        info!("{path} not found, using built-in defaults");
        RigConfig::default()
    };
    match config.connection.mode {
        ConnectionMode::Hardware => {
            let link = PortLink::open(&config.connection)
                .with_context(|| format!("failed to open {}", config.connection.port))?;
            if let Some(name) = link.name() {
                info!("using {name}");
            }
            run(link, &config)
        }
        ConnectionMode::Simulation => {
            info!("✅ simulated SMU with a 100 Ω load");
            run(SimulatedSmu::default(), &config)
        }
    }
}
