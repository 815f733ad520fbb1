//! Outbound HTTP utilities and the persisted store boundary for betascan.

mod http;
mod memory;
mod postgres;
mod store;

pub use http::{FetchError, FetchedResponse, HttpClientConfig, HttpFetcher};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{AppRepository, CursorStore, InteractionSource, NotificationLedger, Store, StoreError};

pub const CRATE_NAME: &str = "betascan-storage";
