// src/drivers/mod.rs
pub mod channel;
pub mod error;
pub mod link;
pub mod parse;
pub mod retry;
pub mod session;
pub mod simulated;
pub mod sweep;
// flat re-exports for the binary and for tests
pub use channel::{FrameAccumulator, FrameState, FramedChannel, Termination};
pub use error::SmuError;
pub use link::{ManualLink, PortLink, SerialLink};
pub use parse::{parse_error_status, parse_identity, parse_triple};
pub use retry::RetryPolicy;
pub use session::{InstrumentSession, SourcingGuard};
pub use simulated::SimulatedSmu;
pub use sweep::{median, SweepController, SweepReporter};
