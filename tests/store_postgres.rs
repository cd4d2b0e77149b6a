//! Store integration tests against a live database.
//!
//! Run with a Postgres-wire database (CockroachDB or PostgreSQL):
//!
//! ```text
//! DSS_STORE_URI=postgres://root@localhost:26257/dss_test?sslmode=disable \
//!     cargo test --test store_postgres
//! ```
//!
//! Tests are skipped when `DSS_STORE_URI` is not set. Each test works with
//! its own ids and cells, so the suite is safe to run concurrently against a
//! shared database.

use chrono::{DateTime, Duration, Utc};
use s2::cellid::CellID;
use sqlx::Row;
use uuid::Uuid;

use dss::models::{IdentificationServiceArea, IsaPatch, Subscription, SubscriptionPatch};
use dss::{PgStore, Store, StoreError};

async fn setup() -> Option<(PgStore, sqlx::PgPool)> {
    let uri = match std::env::var("DSS_STORE_URI") {
        Ok(uri) => uri,
        Err(_) => {
            eprintln!("skipping: DSS_STORE_URI not set");
            return None;
        }
    };

    let pool = sqlx::PgPool::connect(&uri)
        .await
        .expect("failed to connect to store");
    let store = PgStore::new(pool.clone());
    store.bootstrap().await.expect("failed to bootstrap store");
    Some((store, pool))
}

/// A cell id unique to this test run. The low bit is set so the derived
/// level is always in range.
fn unique_cell() -> CellID {
    CellID(Uuid::new_v4().as_u64_pair().0 | 1)
}

fn make_isa(owner: &str, cells: Vec<CellID>) -> IdentificationServiceArea {
    IdentificationServiceArea {
        id: Uuid::new_v4(),
        owner: owner.to_string(),
        url: format!("https://{owner}.example/flights"),
        cells,
        starts_at: Utc::now() - Duration::hours(1),
        ends_at: Utc::now() + Duration::hours(1),
        updated_at: Utc::now(),
        altitude_lo: 0.0,
        altitude_hi: 0.0,
    }
}

fn make_subscription(
    owner: &str,
    cells: Vec<CellID>,
    begins_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
) -> Subscription {
    Subscription {
        id: Uuid::new_v4(),
        owner: owner.to_string(),
        url: format!("https://{owner}.example/notify"),
        notification_index: 0,
        cells,
        begins_at,
        expires_at,
        updated_at: Utc::now(),
        altitude_lo: 0.0,
        altitude_hi: 0.0,
    }
}

async fn isa_cell_rows(pool: &sqlx::PgPool, id: Uuid) -> Vec<i64> {
    let rows = sqlx::query(
        "SELECT cell_id FROM cells_identification_service_areas \
         WHERE identification_service_area_id = $1",
    )
    .bind(id)
    .fetch_all(pool)
    .await
    .expect("failed to query join table");
    let mut cells: Vec<i64> = rows.iter().map(|r| r.get("cell_id")).collect();
    cells.sort();
    cells
}

#[tokio::test]
async fn test_subscriber_sees_new_isa() {
    let Some((store, _pool)) = setup().await else {
        return;
    };

    let shared = unique_cell();
    let extra = unique_cell();

    let sub = store
        .insert_subscription(make_subscription("alice", vec![shared], None, None))
        .await
        .unwrap();

    let (_, affected) = store
        .insert_isa(make_isa("bob", vec![shared, extra]))
        .await
        .unwrap();

    assert_eq!(affected.len(), 1);
    assert_eq!(affected[0].id, sub.id);
    assert_eq!(affected[0].url, sub.url);
    assert_eq!(affected[0].notification_index, 0);
}

#[tokio::test]
async fn test_writer_is_not_notified_of_own_write() {
    let Some((store, _pool)) = setup().await else {
        return;
    };

    let cell = unique_cell();
    store
        .insert_subscription(make_subscription("bob", vec![cell], None, None))
        .await
        .unwrap();

    let (_, affected) = store.insert_isa(make_isa("bob", vec![cell])).await.unwrap();
    assert!(affected.is_empty());
}

#[tokio::test]
async fn test_inactive_subscription_is_skipped() {
    let Some((store, _pool)) = setup().await else {
        return;
    };

    let cell = unique_cell();
    store
        .insert_subscription(make_subscription(
            "alice",
            vec![cell],
            Some(Utc::now() - Duration::hours(2)),
            Some(Utc::now() - Duration::seconds(1)),
        ))
        .await
        .unwrap();

    let (_, affected) = store.insert_isa(make_isa("bob", vec![cell])).await.unwrap();
    assert!(affected.is_empty());
}

#[tokio::test]
async fn test_not_yet_active_subscription_is_skipped() {
    let Some((store, _pool)) = setup().await else {
        return;
    };

    let cell = unique_cell();
    store
        .insert_subscription(make_subscription(
            "alice",
            vec![cell],
            Some(Utc::now() + Duration::hours(1)),
            Some(Utc::now() + Duration::hours(2)),
        ))
        .await
        .unwrap();

    let (_, affected) = store.insert_isa(make_isa("bob", vec![cell])).await.unwrap();
    assert!(affected.is_empty());
}

#[tokio::test]
async fn test_spatial_search() {
    let Some((store, _pool)) = setup().await else {
        return;
    };

    let a = unique_cell();
    let b = unique_cell();
    let elsewhere = unique_cell();

    let (isa, _) = store.insert_isa(make_isa("bob", vec![a, b])).await.unwrap();

    let hits = store.search_isas(&[b], None, None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, isa.id);

    let misses = store.search_isas(&[elsewhere], None, None).await.unwrap();
    assert!(misses.is_empty());

    // Matching both cells must not duplicate the ISA.
    let both = store.search_isas(&[a, b], None, None).await.unwrap();
    assert_eq!(both.len(), 1);
}

#[tokio::test]
async fn test_search_time_window_overlap() {
    let Some((store, _pool)) = setup().await else {
        return;
    };

    let cell = unique_cell();
    let (isa, _) = store.insert_isa(make_isa("bob", vec![cell])).await.unwrap();

    // Overlapping window finds it.
    let hits = store
        .search_isas(&[cell], Some(Utc::now()), Some(Utc::now()))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);

    // Window entirely after the ISA ends.
    let later = store
        .search_isas(&[cell], Some(isa.ends_at + Duration::hours(1)), None)
        .await
        .unwrap();
    assert!(later.is_empty());

    // Window entirely before the ISA starts.
    let earlier = store
        .search_isas(&[cell], None, Some(isa.starts_at - Duration::hours(1)))
        .await
        .unwrap();
    assert!(earlier.is_empty());
}

#[tokio::test]
async fn test_search_with_no_cells_is_invalid() {
    let Some((store, _pool)) = setup().await else {
        return;
    };

    let err = store.search_isas(&[], None, None).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidInput(_)));

    let err = store.search_subscriptions(&[], "alice").await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidInput(_)));
}

#[tokio::test]
async fn test_optimistic_concurrency() {
    let Some((store, _pool)) = setup().await else {
        return;
    };

    let (isa, _) = store
        .insert_isa(make_isa("bob", vec![unique_cell()]))
        .await
        .unwrap();
    let v1 = isa.version();

    let patch = IsaPatch {
        url: Some("https://bob.example/v2/flights".to_string()),
        ..Default::default()
    };

    let err = store
        .update_isa(isa.id, "bob", "garbage", patch.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::VersionMismatch(_)));

    let (updated, _) = store.update_isa(isa.id, "bob", &v1, patch).await.unwrap();
    assert_eq!(updated.url, "https://bob.example/v2/flights");
    assert_ne!(updated.version(), v1);

    // The first version is now stale.
    let err = store
        .update_isa(isa.id, "bob", &v1, IsaPatch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::VersionMismatch(_)));
}

#[tokio::test]
async fn test_insert_on_existing_id_is_rejected() {
    let Some((store, _pool)) = setup().await else {
        return;
    };

    let isa = make_isa("bob", vec![unique_cell()]);
    store.insert_isa(isa.clone()).await.unwrap();

    let err = store.insert_isa(isa).await.unwrap_err();
    assert!(matches!(err, StoreError::VersionMismatch(_)));
}

#[tokio::test]
async fn test_insert_with_collapsed_window_is_rejected() {
    let Some((store, _pool)) = setup().await else {
        return;
    };

    let mut isa = make_isa("bob", vec![unique_cell()]);
    isa.ends_at = isa.starts_at;

    let err = store.insert_isa(isa).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[tokio::test]
async fn test_delete_cascades_cell_rows() {
    let Some((store, pool)) = setup().await else {
        return;
    };

    let cells = vec![unique_cell(), unique_cell()];
    let (isa, _) = store.insert_isa(make_isa("bob", cells)).await.unwrap();
    assert_eq!(isa_cell_rows(&pool, isa.id).await.len(), 2);

    let (deleted, _) = store.delete_isa(isa.id, "bob", "").await.unwrap();
    assert_eq!(deleted.id, isa.id);
    assert!(isa_cell_rows(&pool, isa.id).await.is_empty());

    // A second identical delete finds nothing.
    let err = store.delete_isa(isa.id, "bob", "").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn test_delete_computes_affected_before_cascade() {
    let Some((store, _pool)) = setup().await else {
        return;
    };

    let cell = unique_cell();
    let sub = store
        .insert_subscription(make_subscription("alice", vec![cell], None, None))
        .await
        .unwrap();
    let (isa, _) = store.insert_isa(make_isa("bob", vec![cell])).await.unwrap();

    let (_, affected) = store.delete_isa(isa.id, "bob", "").await.unwrap();
    assert_eq!(affected.len(), 1);
    assert_eq!(affected[0].id, sub.id);
}

#[tokio::test]
async fn test_delete_checks_owner_and_version() {
    let Some((store, _pool)) = setup().await else {
        return;
    };

    let (isa, _) = store
        .insert_isa(make_isa("bob", vec![unique_cell()]))
        .await
        .unwrap();

    let err = store.delete_isa(isa.id, "mallory", "").await.unwrap_err();
    assert!(matches!(err, StoreError::PermissionDenied { .. }));

    let err = store.delete_isa(isa.id, "bob", "stale").await.unwrap_err();
    assert!(matches!(err, StoreError::VersionMismatch(_)));

    // Correct version deletes.
    store.delete_isa(isa.id, "bob", &isa.version()).await.unwrap();
}

#[tokio::test]
async fn test_join_table_matches_cells() {
    let Some((store, pool)) = setup().await else {
        return;
    };

    let initial = vec![unique_cell(), unique_cell(), unique_cell()];
    let (isa, _) = store
        .insert_isa(make_isa("bob", initial.clone()))
        .await
        .unwrap();

    let mut expected: Vec<i64> = initial.iter().map(|c| c.0 as i64).collect();
    expected.sort();
    assert_eq!(isa_cell_rows(&pool, isa.id).await, expected);

    // Updating the cells replaces the join rows, leaving no leftovers.
    let replacement = vec![unique_cell()];
    store
        .update_isa(
            isa.id,
            "bob",
            &isa.version(),
            IsaPatch {
                cells: Some(replacement.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let expected: Vec<i64> = replacement.iter().map(|c| c.0 as i64).collect();
    assert_eq!(isa_cell_rows(&pool, isa.id).await, expected);
}

#[tokio::test]
async fn test_get_isa_round_trip() {
    let Some((store, _pool)) = setup().await else {
        return;
    };

    let (inserted, _) = store
        .insert_isa(make_isa("bob", vec![unique_cell()]))
        .await
        .unwrap();

    let fetched = store.get_isa(inserted.id).await.unwrap();
    assert_eq!(fetched.id, inserted.id);
    assert_eq!(fetched.owner, inserted.owner);
    assert_eq!(fetched.url, inserted.url);
    assert_eq!(fetched.version(), inserted.version());

    let err = store.get_isa(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn test_subscription_lifecycle() {
    let Some((store, _pool)) = setup().await else {
        return;
    };

    let cell = unique_cell();
    let created = store
        .insert_subscription(make_subscription("alice", vec![cell], None, None))
        .await
        .unwrap();
    assert_eq!(created.notification_index, 0);
    let v1 = created.version();

    let fetched = store.get_subscription(created.id).await.unwrap();
    assert_eq!(fetched.id, created.id);

    // Search is scoped to the owner.
    let own = store.search_subscriptions(&[cell], "alice").await.unwrap();
    assert_eq!(own.len(), 1);
    let others = store.search_subscriptions(&[cell], "bob").await.unwrap();
    assert!(others.is_empty());

    let updated = store
        .update_subscription(
            created.id,
            "alice",
            &v1,
            SubscriptionPatch {
                url: Some("https://alice.example/v2/notify".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.url, "https://alice.example/v2/notify");
    assert_eq!(updated.notification_index, 0);
    assert_ne!(updated.version(), v1);

    // Only the owner may mutate or delete.
    let err = store
        .update_subscription(created.id, "bob", "", SubscriptionPatch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::PermissionDenied { .. }));

    let deleted = store
        .delete_subscription(created.id, "alice", &updated.version())
        .await
        .unwrap();
    assert_eq!(deleted.id, created.id);

    let err = store.get_subscription(created.id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn test_update_on_missing_id_is_not_found() {
    let Some((store, _pool)) = setup().await else {
        return;
    };

    let err = store
        .update_isa(Uuid::new_v4(), "bob", "", IsaPatch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));

    let err = store
        .update_subscription(Uuid::new_v4(), "alice", "", SubscriptionPatch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}
