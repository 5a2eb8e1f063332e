//! Storage seams for the gateway
//!
//! - **KeyStore**: durable API key records, consulted on every keyed request

mod key_store;

pub use key_store::{ApiKeyRecord, DEFAULT_RATE_LIMIT, KeyStore, StoreError};
