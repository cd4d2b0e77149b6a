//! Postgres-wire store implementation.
//!
//! Targets CockroachDB in the reference deployment; any backend speaking the
//! Postgres protocol with SERIALIZABLE transactions works. `updated_at` is
//! always `transaction_timestamp()` so that version ordering is decided by
//! the database, not by whichever server handled the request.

mod isa;
mod subscription;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use s2::cellid::CellID;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::models::{
    IdentificationServiceArea, IsaPatch, Subscription, SubscriptionPatch,
};
use crate::store::schema::BOOTSTRAP_DDL;
use crate::store::{Result, Store, StoreError};

/// Store backed by a Postgres-wire database.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new store over an established pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the tables and indexes if they do not exist yet.
    pub async fn bootstrap(&self) -> Result<()> {
        for statement in BOOTSTRAP_DDL {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("store bootstrapped");
        Ok(())
    }

    /// Open a SERIALIZABLE transaction.
    ///
    /// Dropping the returned transaction without committing rolls it back,
    /// which is also the cancellation path when a caller disconnects.
    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

/// Cell ids as they are stored in the join tables.
fn cell_ids_as_i64(cells: &[CellID]) -> Vec<i64> {
    cells.iter().map(|c| c.0 as i64).collect()
}

#[async_trait]
impl Store for PgStore {
    async fn get_isa(&self, id: Uuid) -> Result<IdentificationServiceArea> {
        isa::get(&self.pool, id).await
    }

    async fn insert_isa(
        &self,
        isa: IdentificationServiceArea,
    ) -> Result<(IdentificationServiceArea, Vec<Subscription>)> {
        isa.validate()?;

        let mut tx = self.begin().await?;
        let result = isa::insert(&mut tx, isa).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn update_isa(
        &self,
        id: Uuid,
        owner: &str,
        version: &str,
        patch: IsaPatch,
    ) -> Result<(IdentificationServiceArea, Vec<Subscription>)> {
        let mut tx = self.begin().await?;
        let result = isa::update(&mut tx, id, owner, version, patch).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn delete_isa(
        &self,
        id: Uuid,
        owner: &str,
        version: &str,
    ) -> Result<(IdentificationServiceArea, Vec<Subscription>)> {
        let mut tx = self.begin().await?;
        let result = isa::delete(&mut tx, id, owner, version).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn search_isas(
        &self,
        cells: &[CellID],
        earliest: Option<DateTime<Utc>>,
        latest: Option<DateTime<Utc>>,
    ) -> Result<Vec<IdentificationServiceArea>> {
        if cells.is_empty() {
            return Err(StoreError::InvalidInput(
                "missing cell ids for query".to_string(),
            ));
        }
        isa::search(&self.pool, cells, earliest, latest).await
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Subscription> {
        subscription::get(&self.pool, id).await
    }

    async fn insert_subscription(&self, sub: Subscription) -> Result<Subscription> {
        sub.validate()?;

        let mut tx = self.begin().await?;
        let stored = subscription::insert(&mut tx, sub).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn update_subscription(
        &self,
        id: Uuid,
        owner: &str,
        version: &str,
        patch: SubscriptionPatch,
    ) -> Result<Subscription> {
        let mut tx = self.begin().await?;
        let stored = subscription::update(&mut tx, id, owner, version, patch).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn delete_subscription(
        &self,
        id: Uuid,
        owner: &str,
        version: &str,
    ) -> Result<Subscription> {
        let mut tx = self.begin().await?;
        let deleted = subscription::delete(&mut tx, id, owner, version).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    async fn search_subscriptions(
        &self,
        cells: &[CellID],
        owner: &str,
    ) -> Result<Vec<Subscription>> {
        if cells.is_empty() {
            return Err(StoreError::InvalidInput(
                "missing cell ids for query".to_string(),
            ));
        }
        subscription::search(&self.pool, cells, owner).await
    }
}
