//! `strider-middleware` – Topic bus connecting sensor drivers to the front end.
//!
//! The front end subscribes to the input topics of an [`EventBus`] and
//! publishes its estimates, diagnostics and timings on the output topics.
//! Everything is in-process; no network transport is involved.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};
