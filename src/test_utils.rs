//! Test utilities and mock implementations.
//!
//! `MockStore` mirrors the store contract in memory so the service façade
//! and scenario tests run without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use s2::cellid::CellID;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    version, IdentificationServiceArea, IsaPatch, Subscription, SubscriptionPatch,
};
use crate::store::{Result, Store, StoreError};

/// In-memory store with the same observable behavior as `PgStore`.
#[derive(Default)]
pub struct MockStore {
    isas: RwLock<HashMap<Uuid, IdentificationServiceArea>>,
    subscriptions: RwLock<HashMap<Uuid, Subscription>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a subscription without going through insert.
    pub async fn seed_subscription(&self, sub: Subscription) {
        self.subscriptions.write().await.insert(sub.id, sub);
    }

    async fn affected(&self, cells: &[CellID], writer_owner: &str) -> Vec<Subscription> {
        let now = Utc::now();
        let mut affected: Vec<Subscription> = self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|sub| sub.owner != writer_owner)
            .filter(|sub| sub.active_at(now))
            .filter(|sub| sub.cells.iter().any(|c| cells.contains(c)))
            .cloned()
            .collect();
        affected.sort_by_key(|sub| sub.id);
        affected
    }
}

fn check_access(
    stored_owner: &str,
    stored_updated_at: DateTime<Utc>,
    id: Uuid,
    owner: &str,
    submitted_version: &str,
) -> Result<()> {
    if stored_owner != owner {
        return Err(StoreError::PermissionDenied {
            id,
            owner: owner.to_string(),
        });
    }
    if !version::matches(submitted_version, stored_updated_at) {
        return Err(StoreError::VersionMismatch(id));
    }
    Ok(())
}

#[async_trait]
impl Store for MockStore {
    async fn get_isa(&self, id: Uuid) -> Result<IdentificationServiceArea> {
        self.isas
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn insert_isa(
        &self,
        mut isa: IdentificationServiceArea,
    ) -> Result<(IdentificationServiceArea, Vec<Subscription>)> {
        isa.validate()?;

        let mut isas = self.isas.write().await;
        if isas.contains_key(&isa.id) {
            return Err(StoreError::VersionMismatch(isa.id));
        }
        isa.updated_at = Utc::now();
        isas.insert(isa.id, isa.clone());
        drop(isas);

        let affected = self.affected(&isa.cells, &isa.owner).await;
        Ok((isa, affected))
    }

    async fn update_isa(
        &self,
        id: Uuid,
        owner: &str,
        submitted_version: &str,
        patch: IsaPatch,
    ) -> Result<(IdentificationServiceArea, Vec<Subscription>)> {
        let mut isas = self.isas.write().await;
        let old = isas.get(&id).ok_or(StoreError::NotFound(id))?;
        check_access(&old.owner, old.updated_at, id, owner, submitted_version)?;

        let mut merged = old.apply(&patch);
        merged.validate()?;
        merged.updated_at = Utc::now();
        isas.insert(id, merged.clone());
        drop(isas);

        let affected = self.affected(&merged.cells, &merged.owner).await;
        Ok((merged, affected))
    }

    async fn delete_isa(
        &self,
        id: Uuid,
        owner: &str,
        submitted_version: &str,
    ) -> Result<(IdentificationServiceArea, Vec<Subscription>)> {
        let mut isas = self.isas.write().await;
        let old = isas.get(&id).ok_or(StoreError::NotFound(id))?;
        check_access(&old.owner, old.updated_at, id, owner, submitted_version)?;

        let old = isas.remove(&id).ok_or(StoreError::NotFound(id))?;
        drop(isas);

        let affected = self.affected(&old.cells, owner).await;
        Ok((old, affected))
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

        let mut result: Vec<IdentificationServiceArea> = self
            .isas
            .read()
            .await
            .values()
            .filter(|isa| isa.cells.iter().any(|c| cells.contains(c)))
            .filter(|isa| latest.map_or(true, |l| isa.starts_at <= l))
            .filter(|isa| earliest.map_or(true, |e| isa.ends_at >= e))
            .cloned()
            .collect();
        result.sort_by_key(|isa| isa.id);
        Ok(result)
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Subscription> {
        self.subscriptions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn insert_subscription(&self, mut sub: Subscription) -> Result<Subscription> {
        sub.validate()?;

        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.contains_key(&sub.id) {
            return Err(StoreError::VersionMismatch(sub.id));
        }
        sub.notification_index = 0;
        sub.updated_at = Utc::now();
        subscriptions.insert(sub.id, sub.clone());
        Ok(sub)
    }

    async fn update_subscription(
        &self,
        id: Uuid,
        owner: &str,
        submitted_version: &str,
        patch: SubscriptionPatch,
    ) -> Result<Subscription> {
        let mut subscriptions = self.subscriptions.write().await;
        let old = subscriptions.get(&id).ok_or(StoreError::NotFound(id))?;
        check_access(&old.owner, old.updated_at, id, owner, submitted_version)?;

        let mut merged = old.apply(&patch);
        merged.validate()?;
        merged.updated_at = Utc::now();
        subscriptions.insert(id, merged.clone());
        Ok(merged)
    }

    async fn delete_subscription(
        &self,
        id: Uuid,
        owner: &str,
        submitted_version: &str,
    ) -> Result<Subscription> {
        let mut subscriptions = self.subscriptions.write().await;
        let old = subscriptions.get(&id).ok_or(StoreError::NotFound(id))?;
        check_access(&old.owner, old.updated_at, id, owner, submitted_version)?;

        subscriptions.remove(&id).ok_or(StoreError::NotFound(id))
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

        let mut result: Vec<Subscription> = self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|sub| sub.owner == owner)
            .filter(|sub| sub.cells.iter().any(|c| cells.contains(c)))
            .cloned()
            .collect();
        result.sort_by_key(|sub| sub.id);
        Ok(result)
    }
}
