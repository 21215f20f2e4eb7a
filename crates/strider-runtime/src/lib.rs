//! `strider-runtime` – runs the Strider front end online or from a log.
//!
//! - [`frontend`] – [`Frontend`][frontend::Frontend]: callbacks and the scan
//!   pipeline.
//! - [`config`] – [`FrontendConfig`][config::FrontendConfig].
//! - [`node`] – bus wiring for online operation.
//! - [`replay`] – deterministic offline replay and TUM trajectory output.
//! - [`pcd`] – ASCII PCD reader for ground-truth map seeding.
//! - [`telemetry`] – tracing subscriber and OTLP export.

pub mod config;
pub mod frontend;
pub mod node;
pub mod pcd;
pub mod replay;
pub mod telemetry;

pub use config::FrontendConfig;
pub use frontend::{Frontend, ScanOutput};
