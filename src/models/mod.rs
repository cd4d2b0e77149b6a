//! Pure domain values.
//!
//! This layer holds the entities and their invariants only. It never touches
//! SQL or wire types; the store and the service façade convert at their own
//! boundaries.

mod isa;
mod subscription;
pub mod version;

pub use isa::{IdentificationServiceArea, IsaPatch};
pub use subscription::{Subscription, SubscriptionPatch};

use thiserror::Error;

/// Errors raised by domain-level validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("time window start {starts} is not before end {ends}")]
    InvertedTimeWindow {
        starts: chrono::DateTime<chrono::Utc>,
        ends: chrono::DateTime<chrono::Utc>,
    },

    #[error("entity has no cells")]
    NoCells,

    #[error("owner is not set")]
    MissingOwner,
}
