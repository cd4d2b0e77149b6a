//! Database schema definitions.
//!
//! Table and column identifiers for type-safe query building, plus the
//! bootstrap DDL. The DDL is idempotent; the backend runs it at startup.

use sea_query::Iden;

/// Identification service areas table schema.
#[derive(Iden)]
pub enum Isas {
    #[iden = "identification_service_areas"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "owner"]
    Owner,
    #[iden = "url"]
    Url,
    #[iden = "starts_at"]
    StartsAt,
    #[iden = "ends_at"]
    EndsAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// ISA cell-join table schema.
///
/// One row per (cell, ISA) pair; the primary lookup is "which ISAs touch
/// cell C".
#[derive(Iden)]
pub enum CellsIsas {
    #[iden = "cells_identification_service_areas"]
    Table,
    #[iden = "cell_id"]
    CellId,
    #[iden = "cell_level"]
    CellLevel,
    #[iden = "identification_service_area_id"]
    IsaId,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Subscriptions table schema.
#[derive(Iden)]
pub enum Subscriptions {
    #[iden = "subscriptions"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "owner"]
    Owner,
    #[iden = "url"]
    Url,
    #[iden = "notification_index"]
    NotificationIndex,
    #[iden = "begins_at"]
    BeginsAt,
    #[iden = "expires_at"]
    ExpiresAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Subscription cell-join table schema.
#[derive(Iden)]
pub enum CellsSubscriptions {
    #[iden = "cells_subscriptions"]
    Table,
    #[iden = "cell_id"]
    CellId,
    #[iden = "cell_level"]
    CellLevel,
    #[iden = "subscription_id"]
    SubscriptionId,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Bootstrap DDL, safe to run repeatedly.
pub const BOOTSTRAP_DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS subscriptions (
        id UUID PRIMARY KEY,
        owner TEXT NOT NULL,
        url TEXT NOT NULL,
        notification_index INT4 NOT NULL DEFAULT 0,
        begins_at TIMESTAMPTZ,
        expires_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ NOT NULL,
        CHECK (begins_at IS NULL OR expires_at IS NULL OR begins_at < expires_at)
    )"#,
    r#"
    CREATE INDEX IF NOT EXISTS subscriptions_begins_at_idx
        ON subscriptions (begins_at)"#,
    r#"
    CREATE INDEX IF NOT EXISTS subscriptions_expires_at_idx
        ON subscriptions (expires_at)"#,
    r#"
    CREATE TABLE IF NOT EXISTS cells_subscriptions (
        cell_id INT8 NOT NULL,
        cell_level INT4 CHECK (cell_level BETWEEN 0 AND 30),
        subscription_id UUID NOT NULL REFERENCES subscriptions (id) ON DELETE CASCADE,
        updated_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (cell_id, subscription_id)
    )"#,
    r#"
    CREATE INDEX IF NOT EXISTS cells_subscriptions_cell_id_idx
        ON cells_subscriptions (cell_id)"#,
    r#"
    CREATE INDEX IF NOT EXISTS cells_subscriptions_subscription_id_idx
        ON cells_subscriptions (subscription_id)"#,
    r#"
    CREATE TABLE IF NOT EXISTS identification_service_areas (
        id UUID PRIMARY KEY,
        owner TEXT NOT NULL,
        url TEXT NOT NULL,
        starts_at TIMESTAMPTZ NOT NULL,
        ends_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        CHECK (starts_at < ends_at)
    )"#,
    r#"
    CREATE INDEX IF NOT EXISTS identification_service_areas_starts_at_idx
        ON identification_service_areas (starts_at)"#,
    r#"
    CREATE INDEX IF NOT EXISTS identification_service_areas_ends_at_idx
        ON identification_service_areas (ends_at)"#,
    r#"
    CREATE TABLE IF NOT EXISTS cells_identification_service_areas (
        cell_id INT8 NOT NULL,
        cell_level INT4 CHECK (cell_level BETWEEN 0 AND 30),
        identification_service_area_id UUID NOT NULL
            REFERENCES identification_service_areas (id) ON DELETE CASCADE,
        updated_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (cell_id, identification_service_area_id)
    )"#,
    r#"
    CREATE INDEX IF NOT EXISTS cells_identification_service_areas_cell_id_idx
        ON cells_identification_service_areas (cell_id)"#,
    r#"
    CREATE INDEX IF NOT EXISTS cells_identification_service_areas_isa_id_idx
        ON cells_identification_service_areas (identification_service_area_id)"#,
];
