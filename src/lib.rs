//! Serial automation for a source-measure unit: framed request/response
//! transport, an SCPI session with error-queue handling and retries, and a
//! voltage sweep that records median V/I/R per set-point.
pub mod config;
pub mod drivers;
pub mod recorder;
pub mod types;
