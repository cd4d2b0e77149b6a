//! Discovery and Synchronization Service (DSS).
//!
//! A shared registry for a multi-operator airspace: providers publish
//! Identification Service Areas and subscribe to notifications about ISA
//! changes in a region of interest. The DSS stores pointers and geo-temporal
//! extents only, never flight data.

pub mod auth;
pub mod config;
pub mod geo;
pub mod models;
pub mod services;
pub mod store;
pub mod test_utils;
pub mod utils;

// Re-export generated proto types
pub mod proto {
    tonic::include_proto!("dss");
}

// Re-export common types for library usage
pub use config::Config;
pub use services::DssService;
pub use store::{PgStore, Store, StoreError};
