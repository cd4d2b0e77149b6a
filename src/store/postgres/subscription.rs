//! Subscription persistence.

use s2::cellid::CellID;
use sea_query::{Expr, PostgresQueryBuilder, Query};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::models::{version, Subscription, SubscriptionPatch};
use crate::store::schema::{CellsSubscriptions, Subscriptions};
use crate::store::{Result, StoreError};

use super::cell_ids_as_i64;

const GET_QUERY: &str = r#"
    SELECT id, owner, url, notification_index, begins_at, expires_at, updated_at
    FROM subscriptions
    WHERE id = $1"#;

const INSERT_QUERY: &str = r#"
    INSERT INTO subscriptions
        (id, owner, url, notification_index, begins_at, expires_at, updated_at)
    VALUES
        ($1, $2, $3, 0, $4, $5, transaction_timestamp())
    RETURNING id, owner, url, notification_index, begins_at, expires_at, updated_at"#;

const UPDATE_QUERY: &str = r#"
    UPDATE subscriptions
    SET url = $2, begins_at = $3, expires_at = $4, updated_at = transaction_timestamp()
    WHERE id = $1
    RETURNING id, owner, url, notification_index, begins_at, expires_at, updated_at"#;

const DELETE_QUERY: &str = r#"
    DELETE FROM subscriptions
    WHERE id = $1"#;

const DELETE_CELLS_QUERY: &str = r#"
    DELETE FROM cells_subscriptions
    WHERE subscription_id = $1"#;

const INSERT_CELL_QUERY: &str = r#"
    INSERT INTO cells_subscriptions
        (cell_id, cell_level, subscription_id, updated_at)
    VALUES
        ($1, $2, $3, transaction_timestamp())"#;

// The owner-inequality filter is the "never notify yourself of your own
// writes" rule; the window filters drop inactive subscriptions.
const AFFECTED_QUERY: &str = r#"
    SELECT DISTINCT
        s.id, s.owner, s.url, s.notification_index, s.begins_at, s.expires_at, s.updated_at
    FROM subscriptions s
    JOIN cells_subscriptions cs ON cs.subscription_id = s.id
    WHERE cs.cell_id = ANY($1)
      AND s.owner <> $2
      AND (s.begins_at IS NULL OR s.begins_at <= transaction_timestamp())
      AND (s.expires_at IS NULL OR s.expires_at >= transaction_timestamp())"#;

fn scan_subscription(row: &sqlx::postgres::PgRow) -> Subscription {
    Subscription {
        id: row.get("id"),
        owner: row.get("owner"),
        url: row.get("url"),
        notification_index: row.get("notification_index"),
        cells: Vec::new(),
        begins_at: row.get("begins_at"),
        expires_at: row.get("expires_at"),
        updated_at: row.get("updated_at"),
        altitude_lo: 0.0,
        altitude_hi: 0.0,
    }
}

pub(super) async fn get(pool: &PgPool, id: Uuid) -> Result<Subscription> {
    let row = sqlx::query(GET_QUERY)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(StoreError::NotFound(id))?;
    Ok(scan_subscription(&row))
}

async fn fetch(
    tx: &mut Transaction<'static, Postgres>,
    id: Uuid,
) -> Result<Option<Subscription>> {
    let row = sqlx::query(GET_QUERY)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.map(|r| scan_subscription(&r)))
}

/// Replace the subscription's join rows with `cells`.
async fn rewrite_cells(
    tx: &mut Transaction<'static, Postgres>,
    id: Uuid,
    cells: &[CellID],
) -> Result<()> {
    sqlx::query(DELETE_CELLS_QUERY)
        .bind(id)
        .execute(&mut **tx)
        .await?;

    for cell in cells {
        sqlx::query(INSERT_CELL_QUERY)
            .bind(cell.0 as i64)
            .bind(cell.level() as i32)
            .bind(id)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

/// Subscriptions an ISA write must notify: owned by someone other than the
/// writer, intersecting the written cells, and active at the transaction
/// timestamp. Each subscription appears once however many cells match.
pub(super) async fn fetch_affected(
    tx: &mut Transaction<'static, Postgres>,
    cells: &[CellID],
    writer_owner: &str,
) -> Result<Vec<Subscription>> {
    let rows = sqlx::query(AFFECTED_QUERY)
        .bind(cell_ids_as_i64(cells))
        .bind(writer_owner)
        .fetch_all(&mut **tx)
        .await?;

    Ok(rows.iter().map(scan_subscription).collect())
}

pub(super) async fn insert(
    tx: &mut Transaction<'static, Postgres>,
    sub: Subscription,
) -> Result<Subscription> {
    if fetch(tx, sub.id).await?.is_some() {
        return Err(StoreError::VersionMismatch(sub.id));
    }

    let row = sqlx::query(INSERT_QUERY)
        .bind(sub.id)
        .bind(&sub.owner)
        .bind(&sub.url)
        .bind(sub.begins_at)
        .bind(sub.expires_at)
        .fetch_one(&mut **tx)
        .await?;
    let mut stored = scan_subscription(&row);
    stored.cells = sub.cells.clone();
    stored.altitude_lo = sub.altitude_lo;
    stored.altitude_hi = sub.altitude_hi;

    rewrite_cells(tx, stored.id, &stored.cells).await?;

    Ok(stored)
}

pub(super) async fn update(
    tx: &mut Transaction<'static, Postgres>,
    id: Uuid,
    owner: &str,
    submitted_version: &str,
    patch: SubscriptionPatch,
) -> Result<Subscription> {
    let old = fetch(tx, id).await?.ok_or(StoreError::NotFound(id))?;
    if old.owner != owner {
        return Err(StoreError::PermissionDenied {
            id,
            owner: owner.to_string(),
        });
    }
    if !version::matches(submitted_version, old.updated_at) {
        return Err(StoreError::VersionMismatch(id));
    }

    let merged = old.apply(&patch);
    merged.validate()?;

    let row = sqlx::query(UPDATE_QUERY)
        .bind(merged.id)
        .bind(&merged.url)
        .bind(merged.begins_at)
        .bind(merged.expires_at)
        .fetch_one(&mut **tx)
        .await?;
    let mut stored = scan_subscription(&row);
    stored.cells = merged.cells.clone();
    stored.altitude_lo = merged.altitude_lo;
    stored.altitude_hi = merged.altitude_hi;

    if patch.cells.is_some() {
        rewrite_cells(tx, stored.id, &stored.cells).await?;
    }

    Ok(stored)
}

pub(super) async fn delete(
    tx: &mut Transaction<'static, Postgres>,
    id: Uuid,
    owner: &str,
    submitted_version: &str,
) -> Result<Subscription> {
    let old = fetch(tx, id).await?.ok_or(StoreError::NotFound(id))?;
    if old.owner != owner {
        return Err(StoreError::PermissionDenied {
            id,
            owner: owner.to_string(),
        });
    }
    if !version::matches(submitted_version, old.updated_at) {
        return Err(StoreError::VersionMismatch(id));
    }

    sqlx::query(DELETE_QUERY).bind(id).execute(&mut **tx).await?;

    Ok(old)
}

pub(super) async fn search(
    pool: &PgPool,
    cells: &[CellID],
    owner: &str,
) -> Result<Vec<Subscription>> {
    let sql = {
        let mut query = Query::select();
        query
            .distinct()
            .columns([
                (Subscriptions::Table, Subscriptions::Id),
                (Subscriptions::Table, Subscriptions::Owner),
                (Subscriptions::Table, Subscriptions::Url),
                (Subscriptions::Table, Subscriptions::NotificationIndex),
                (Subscriptions::Table, Subscriptions::BeginsAt),
                (Subscriptions::Table, Subscriptions::ExpiresAt),
                (Subscriptions::Table, Subscriptions::UpdatedAt),
            ])
            .from(Subscriptions::Table)
            .inner_join(
                CellsSubscriptions::Table,
                Expr::col((CellsSubscriptions::Table, CellsSubscriptions::SubscriptionId))
                    .equals((Subscriptions::Table, Subscriptions::Id)),
            )
            .and_where(
                Expr::col((CellsSubscriptions::Table, CellsSubscriptions::CellId))
                    .is_in(cell_ids_as_i64(cells)),
            )
            .and_where(Expr::col((Subscriptions::Table, Subscriptions::Owner)).eq(owner));

        query.to_string(PostgresQueryBuilder)
    };
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    Ok(rows.iter().map(scan_subscription).collect())
}
