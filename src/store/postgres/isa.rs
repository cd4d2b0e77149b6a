//! ISA persistence.

use chrono::{DateTime, Utc};
use s2::cellid::CellID;
use sea_query::{Expr, PostgresQueryBuilder, Query};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::models::{version, IdentificationServiceArea, IsaPatch, Subscription};
use crate::store::schema::{CellsIsas, Isas};
use crate::store::{Result, StoreError};

use super::{cell_ids_as_i64, subscription};

const GET_QUERY: &str = r#"
    SELECT id, owner, url, starts_at, ends_at, updated_at
    FROM identification_service_areas
    WHERE id = $1"#;

const INSERT_QUERY: &str = r#"
    INSERT INTO identification_service_areas
        (id, owner, url, starts_at, ends_at, updated_at)
    VALUES
        ($1, $2, $3, $4, $5, transaction_timestamp())
    RETURNING id, owner, url, starts_at, ends_at, updated_at"#;

const UPDATE_QUERY: &str = r#"
    UPDATE identification_service_areas
    SET url = $2, starts_at = $3, ends_at = $4, updated_at = transaction_timestamp()
    WHERE id = $1
    RETURNING id, owner, url, starts_at, ends_at, updated_at"#;

const DELETE_QUERY: &str = r#"
    DELETE FROM identification_service_areas
    WHERE id = $1"#;

const DELETE_CELLS_QUERY: &str = r#"
    DELETE FROM cells_identification_service_areas
    WHERE identification_service_area_id = $1"#;

const INSERT_CELL_QUERY: &str = r#"
    INSERT INTO cells_identification_service_areas
        (cell_id, cell_level, identification_service_area_id, updated_at)
    VALUES
        ($1, $2, $3, transaction_timestamp())"#;

const CELLS_QUERY: &str = r#"
    SELECT cell_id
    FROM cells_identification_service_areas
    WHERE identification_service_area_id = $1"#;

fn scan_isa(row: &sqlx::postgres::PgRow) -> IdentificationServiceArea {
    IdentificationServiceArea {
        id: row.get("id"),
        owner: row.get("owner"),
        url: row.get("url"),
        cells: Vec::new(),
        starts_at: row.get("starts_at"),
        ends_at: row.get("ends_at"),
        updated_at: row.get("updated_at"),
        altitude_lo: 0.0,
        altitude_hi: 0.0,
    }
}

pub(super) async fn get(pool: &PgPool, id: Uuid) -> Result<IdentificationServiceArea> {
    let row = sqlx::query(GET_QUERY)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(StoreError::NotFound(id))?;
    Ok(scan_isa(&row))
}

async fn fetch(
    tx: &mut Transaction<'static, Postgres>,
    id: Uuid,
) -> Result<Option<IdentificationServiceArea>> {
    let row = sqlx::query(GET_QUERY)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.map(|r| scan_isa(&r)))
}

/// Read the cells an ISA currently occupies from the join table.
async fn fetch_cells(
    tx: &mut Transaction<'static, Postgres>,
    id: Uuid,
) -> Result<Vec<CellID>> {
    let rows = sqlx::query(CELLS_QUERY)
        .bind(id)
        .fetch_all(&mut **tx)
        .await?;
    Ok(rows
        .iter()
        .map(|row| CellID(row.get::<i64, _>("cell_id") as u64))
        .collect())
}

/// Replace the ISA's join rows with `cells`.
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

pub(super) async fn insert(
    tx: &mut Transaction<'static, Postgres>,
    isa: IdentificationServiceArea,
) -> Result<(IdentificationServiceArea, Vec<Subscription>)> {
    if fetch(tx, isa.id).await?.is_some() {
        // Mutating an existing id requires its stored version via update.
        return Err(StoreError::VersionMismatch(isa.id));
    }

    let row = sqlx::query(INSERT_QUERY)
        .bind(isa.id)
        .bind(&isa.owner)
        .bind(&isa.url)
        .bind(isa.starts_at)
        .bind(isa.ends_at)
        .fetch_one(&mut **tx)
        .await?;
    let mut stored = scan_isa(&row);
    stored.cells = isa.cells.clone();
    stored.altitude_lo = isa.altitude_lo;
    stored.altitude_hi = isa.altitude_hi;

    rewrite_cells(tx, stored.id, &stored.cells).await?;

    let affected = subscription::fetch_affected(tx, &stored.cells, &stored.owner).await?;

    Ok((stored, affected))
}

pub(super) async fn update(
    tx: &mut Transaction<'static, Postgres>,
    id: Uuid,
    owner: &str,
    submitted_version: &str,
    patch: IsaPatch,
) -> Result<(IdentificationServiceArea, Vec<Subscription>)> {
    let mut old = fetch(tx, id).await?.ok_or(StoreError::NotFound(id))?;
    if old.owner != owner {
        return Err(StoreError::PermissionDenied {
            id,
            owner: owner.to_string(),
        });
    }
    if !version::matches(submitted_version, old.updated_at) {
        return Err(StoreError::VersionMismatch(id));
    }

    old.cells = fetch_cells(tx, id).await?;
    let merged = old.apply(&patch);
    merged.validate()?;

    let row = sqlx::query(UPDATE_QUERY)
        .bind(merged.id)
        .bind(&merged.url)
        .bind(merged.starts_at)
        .bind(merged.ends_at)
        .fetch_one(&mut **tx)
        .await?;
    let mut stored = scan_isa(&row);
    stored.cells = merged.cells.clone();
    stored.altitude_lo = merged.altitude_lo;
    stored.altitude_hi = merged.altitude_hi;

    if patch.cells.is_some() {
        rewrite_cells(tx, stored.id, &stored.cells).await?;
    }

    let affected = subscription::fetch_affected(tx, &stored.cells, &stored.owner).await?;

    Ok((stored, affected))
}

pub(super) async fn delete(
    tx: &mut Transaction<'static, Postgres>,
    id: Uuid,
    owner: &str,
    submitted_version: &str,
) -> Result<(IdentificationServiceArea, Vec<Subscription>)> {
    let mut old = fetch(tx, id).await?.ok_or(StoreError::NotFound(id))?;
    if old.owner != owner {
        return Err(StoreError::PermissionDenied {
            id,
            owner: owner.to_string(),
        });
    }
    if !version::matches(submitted_version, old.updated_at) {
        return Err(StoreError::VersionMismatch(id));
    }

    // The affected set must be computed before the delete: the cascade
    // removes the cell rows that are the evidence.
    old.cells = fetch_cells(tx, id).await?;
    let affected = subscription::fetch_affected(tx, &old.cells, owner).await?;

    sqlx::query(DELETE_QUERY).bind(id).execute(&mut **tx).await?;

    Ok((old, affected))
}

pub(super) async fn search(
    pool: &PgPool,
    cells: &[CellID],
    earliest: Option<DateTime<Utc>>,
    latest: Option<DateTime<Utc>>,
) -> Result<Vec<IdentificationServiceArea>> {
    let sql = {
        let mut query = Query::select();
        query
            .distinct()
            .columns([
                (Isas::Table, Isas::Id),
                (Isas::Table, Isas::Owner),
                (Isas::Table, Isas::Url),
                (Isas::Table, Isas::StartsAt),
                (Isas::Table, Isas::EndsAt),
                (Isas::Table, Isas::UpdatedAt),
            ])
            .from(Isas::Table)
            .inner_join(
                CellsIsas::Table,
                Expr::col((CellsIsas::Table, CellsIsas::IsaId)).equals((Isas::Table, Isas::Id)),
            )
            .and_where(
                Expr::col((CellsIsas::Table, CellsIsas::CellId)).is_in(cell_ids_as_i64(cells)),
            );

        // Window overlap: missing bounds widen to infinity.
        if let Some(latest) = latest {
            query.and_where(Expr::col((Isas::Table, Isas::StartsAt)).lte(latest));
        }
        if let Some(earliest) = earliest {
            query.and_where(Expr::col((Isas::Table, Isas::EndsAt)).gte(earliest));
        }

        query.to_string(PostgresQueryBuilder)
    };
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    Ok(rows.iter().map(scan_isa).collect())
}
