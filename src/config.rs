use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::types::ConnectionMode;
/// Control byte some firmware sends in front of a response.
pub const SER_BEGIN: u8 = 0x13;
/// Control byte some firmware sends after a response.
pub const SER_END: u8 = 0x11;
pub const CARRIAGE_RETURN: u8 = b'\r';
/// Everything the driver binary needs, loaded from one JSON file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub connection: ConnectionConfig,
    pub framing: Framing,
    pub timing: Timing,
    pub session: SessionConfig,
    pub sweep: SweepPlan,
    pub output_csv: PathBuf,
}
impl Default for RigConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            framing: Framing::default(),
            timing: Timing::default(),
            session: SessionConfig::default(),
            sweep: SweepPlan::default(),
            output_csv: PathBuf::from("out.csv"),
        }
    }
}
impl RigConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }
}
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub mode: ConnectionMode,
    pub port: String,
    pub baud_rate: u32,
    pub poll_interval_ms: u64,
}
impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::Hardware,
            port: "/dev/ttyUSB0".to_owned(),
            baud_rate: 57_600,
            poll_interval_ms: 1,
        }
    }
}
impl ConnectionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
/// Message boundary bytes for the framed channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Framing {
    pub begin: u8,
    pub end: u8,
    pub terminator: u8,
}
impl Default for Framing {
    fn default() -> Self {
        Self {
            begin: SER_BEGIN,
            end: SER_END,
            terminator: CARRIAGE_RETURN,
        }
    }
}
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// 150 ms intermittently truncates responses on a K2401.
    pub settle_ms: u64,
    pub read_timeout_ms: u64,
    pub first_sample_delay_ms: u64,
    pub stabilize_ms: u64,
}
impl Default for Timing {
    fn default() -> Self {
        Self {
            settle_ms: 200,
            read_timeout_ms: 1_000,
            first_sample_delay_ms: 1_000,
            stabilize_ms: 1_000,
        }
    }
}
impl Timing {
    /// No pauses at all; for simulated instruments.
    pub fn immediate() -> Self {
        Self {
            settle_ms: 0,
            read_timeout_ms: 50,
            first_sample_delay_ms: 0,
            stabilize_ms: 0,
        }
    }
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
    pub fn first_sample_delay(&self) -> Duration {
        Duration::from_millis(self.first_sample_delay_ms)
    }
    pub fn stabilize(&self) -> Duration {
        Duration::from_millis(self.stabilize_ms)
    }
}
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorPolicy {
    /// Non-zero error codes are logged and the command still succeeds.
    #[default]
    Log,
    /// Non-zero error codes fail the command.
    Strict,
}
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub error_policy: ErrorPolicy,
    pub retry_attempts: u32,
    pub max_drain_attempts: u32,
}
impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            error_policy: ErrorPolicy::Log,
            retry_attempts: 3,
            max_drain_attempts: 16,
        }
    }
}
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepPlan {
    pub setpoints: Vec<f64>,
    pub samples_per_point: usize,
    pub compliance_amps: f64,
}
impl Default for SweepPlan {
    fn default() -> Self {
        Self {
            // -5 V to +5 V in 0.5 V steps
            setpoints: (-10..=10).map(|step| step as f64 * 0.5).collect(),
            samples_per_point: 3,
            compliance_amps: 0.1,
        }
    }
}
impl SweepPlan {
    pub fn new(setpoints: Vec<f64>) -> Self {
        Self {
            setpoints,
            ..Default::default()
        }
    }
}
