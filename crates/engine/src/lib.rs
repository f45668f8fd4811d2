pub mod coordinator;
pub mod delivery;
pub mod feed;
pub mod http_reporter;
pub mod lifecycle;
pub mod store;

pub use coordinator::{Coordinator, StatusBoard};
pub use delivery::DeliveryWorker;
pub use feed::{Backoff, BinanceFeed, FinnhubFeed};
pub use http_reporter::HttpReporter;
pub use lifecycle::{Engine, EngineHandle};
pub use store::SqliteStore;
