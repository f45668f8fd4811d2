pub mod config;
pub mod error;
pub mod outbox;
pub mod ports;
pub mod types;

pub use config::{Config, InstrumentSet};
pub use error::{Error, Result};
pub use outbox::{Delivery, Outbox};
pub use ports::{Notifier, SnapshotStore, TradeReporter};
pub use types::*;
