// src/types.rs
use serde::{Deserialize, Serialize};
use std::fmt;

// Where the instrument lives
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub enum ConnectionMode {
    Simulation,
    #[default]
    Hardware,
}

// Session lifecycle, see `InstrumentSession`
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum SessionState {
    Disconnected,
    Identified,
    Configured,
    Sourcing,
    Idle,
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum MeasurementKind {
    Voltage,
    Current,
    Resistance,
}

/// One V/I/R reading as the instrument reports it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VirTriple {
    pub volts: f64,
    pub amps: f64,
    pub ohms: f64,
}

impl VirTriple {
    pub fn component(&self, kind: MeasurementKind) -> f64 {
        match kind {
            MeasurementKind::Voltage => self.volts,
            MeasurementKind::Current => self.amps,
            MeasurementKind::Resistance => self.ohms,
        }
    }
}

/// Entry from the instrument's error queue. Code 0 means the queue is empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorStatus {
    pub code: i32,
    pub message: String,
}

impl ErrorStatus {
    pub fn is_clear(&self) -> bool {
        self.code == 0
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},\"{}\"", self.code, self.message)
    }
}

// *IDN? fields
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub vendor: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
}

/// Median V/I/R taken at one set-point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepPoint {
    pub setpoint: f64,
    pub volts: f64,
    pub amps: f64,
    pub ohms: f64,
}

/// Ordered result of a sweep, one point per set-point.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IvCurve {
    pub points: Vec<SweepPoint>,
}

impl IvCurve {
    pub fn len(&self) -> usize {
        self.points.len()
    }
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
    pub fn voltages(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.volts).collect()
    }
    pub fn currents(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.amps).collect()
    }
}
