use std::time::Duration;
use thiserror::Error;
use crate::types::{ErrorStatus, SessionState};
#[derive(Debug, Error)]
pub enum SmuError {
    #[error("no framed response within {waited:?} (have {partial:?})")]
    Timeout { waited: Duration, partial: String },
    #[error("could not parse {what} from {raw:?}")]
    Parse { what: &'static str, raw: String },
    #[error("instrument reported error {code}: {message}")]
    Instrument { code: i32, message: String },
    #[error("error queue still not clear after {attempts} reads (last: {last})")]
    ErrorsNeverCleared { attempts: u32, last: ErrorStatus },
    #[error("{operation} is not allowed while the session is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    #[error("invalid sweep plan: {0}")]
    InvalidPlan(String),
    #[error("serial i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}
impl SmuError {
    pub(crate) fn parse(what: &'static str, raw: &str) -> Self {
        SmuError::Parse {
            what,
            raw: raw.to_owned(),
        }
    }
    /// Faults worth another round-trip: the wire or the text was bad, not the instrument state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SmuError::Timeout { .. } | SmuError::Parse { .. } | SmuError::Io(_)
        )
    }
}
