//! gRPC service implementations.

mod dss;

pub use dss::DssService;
