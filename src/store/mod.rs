//! Transactional persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use s2::cellid::CellID;
use uuid::Uuid;

use crate::models::{
    IdentificationServiceArea, IsaPatch, Subscription, SubscriptionPatch, ValidationError,
};

pub mod postgres;
pub mod schema;

pub use postgres::PgStore;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no entity with id {0}")]
    NotFound(Uuid),

    #[error("version mismatch for {0}")]
    VersionMismatch(Uuid),

    #[error("{owner} does not own {id}")]
    PermissionDenied { id: Uuid, owner: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Interface for the geo-temporal registry.
///
/// Every mutation runs in a single SERIALIZABLE transaction: the entity row,
/// its cell-join rows, and the affected-subscriber read either all take
/// effect or none do. `updated_at` is assigned from the transaction
/// timestamp, never from the caller.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch one ISA by id.
    async fn get_isa(&self, id: Uuid) -> Result<IdentificationServiceArea>;

    /// Create an ISA. Fails with [`StoreError::VersionMismatch`] when the id
    /// already exists; mutating an existing ISA requires its version via
    /// [`Store::update_isa`].
    ///
    /// Returns the stored ISA and the subscriptions to notify: owned by
    /// someone else, intersecting the ISA's cells, active now.
    async fn insert_isa(
        &self,
        isa: IdentificationServiceArea,
    ) -> Result<(IdentificationServiceArea, Vec<Subscription>)>;

    /// Apply `patch` to the stored ISA under an optimistic-concurrency
    /// check. An empty `version` is a blind write.
    async fn update_isa(
        &self,
        id: Uuid,
        owner: &str,
        version: &str,
        patch: IsaPatch,
    ) -> Result<(IdentificationServiceArea, Vec<Subscription>)>;

    /// Delete an ISA owned by `owner`. The affected-subscriber set is
    /// computed before the delete; the cascade would otherwise drop the
    /// evidence.
    async fn delete_isa(
        &self,
        id: Uuid,
        owner: &str,
        version: &str,
    ) -> Result<(IdentificationServiceArea, Vec<Subscription>)>;

    /// ISAs intersecting `cells` whose time window overlaps
    /// `[earliest, latest]`; missing bounds widen to infinity.
    async fn search_isas(
        &self,
        cells: &[CellID],
        earliest: Option<DateTime<Utc>>,
        latest: Option<DateTime<Utc>>,
    ) -> Result<Vec<IdentificationServiceArea>>;

    /// Fetch one subscription by id.
    async fn get_subscription(&self, id: Uuid) -> Result<Subscription>;

    /// Create a subscription; the notification index starts at zero. Fails
    /// with [`StoreError::VersionMismatch`] when the id already exists.
    async fn insert_subscription(&self, subscription: Subscription) -> Result<Subscription>;

    /// Apply `patch` to the stored subscription under an
    /// optimistic-concurrency check.
    async fn update_subscription(
        &self,
        id: Uuid,
        owner: &str,
        version: &str,
        patch: SubscriptionPatch,
    ) -> Result<Subscription>;

    /// Delete a subscription owned by `owner`.
    async fn delete_subscription(
        &self,
        id: Uuid,
        owner: &str,
        version: &str,
    ) -> Result<Subscription>;

    /// Subscriptions of `owner` intersecting `cells`. A subscription is a
    /// private interest, so search never crosses owners.
    async fn search_subscriptions(
        &self,
        cells: &[CellID],
        owner: &str,
    ) -> Result<Vec<Subscription>>;
}
