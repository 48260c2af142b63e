//! SQLite implementation of the lead record store
//!
//! Upserts are read-modify-write inside a transaction: the stored record is
//! loaded, the patch merged over it, and the merged row written back with
//! INSERT OR REPLACE. A patch therefore never erases a field it did not
//! supply, which is what keeps page replays idempotent. Writers for one
//! account are already serialized by the single-flight rule upstream.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::account::AccountRef;
use crate::domain::errors::{ApiError, SyncError};
use crate::domain::filter::{DateField, FilterSpec};
use crate::domain::lead::{LeadPatch, LeadRecord};
use crate::domain::repositories::RecordStore;
use crate::domain::stats::{AggregateStats, PipelineCatalog};

/// Lead record store over a SQLite pool.
#[derive(Clone)]
pub struct SqliteLeadRepository {
    pool: Arc<SqlitePool>,
}

impl SqliteLeadRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<LeadRecord, SyncError> {
    let tags_json: String = row.get("tags");
    let custom_fields_json: String = row.get("custom_fields");
    Ok(LeadRecord {
        id: row.get("lead_id"),
        name: row.get("name"),
        price: row.get("price"),
        responsible_user_id: row.get("responsible_user_id"),
        pipeline_id: row.get("pipeline_id"),
        status_id: row.get("status_id"),
        created_at: row.get("created_at"),
        closed_at: row.get("closed_at"),
        tags: serde_json::from_str(&tags_json)?,
        custom_fields: serde_json::from_str(&custom_fields_json)?,
        is_deleted: row.get::<i64, _>("is_deleted") != 0,
    })
}

#[async_trait]
impl RecordStore for SqliteLeadRepository {
    async fn upsert(&self, account_ref: AccountRef, patch: &LeadPatch) -> Result<(), SyncError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            r#"
            SELECT lead_id, name, price, responsible_user_id, pipeline_id, status_id,
                   created_at, closed_at, tags, custom_fields, is_deleted
            FROM leads
            WHERE customer_id = ? AND account_index = ? AND lead_id = ?
            "#,
        )
        .bind(account_ref.customer_id)
        .bind(account_ref.account_index)
        .bind(patch.id)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| row_to_record(&row))
        .transpose()?;

        let merged = patch
            .apply_to(existing)
            .map_err(|e| SyncError::Api(ApiError::malformed(0, e.reason)))?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO leads
            (customer_id, account_index, lead_id, name, price, responsible_user_id,
             pipeline_id, status_id, created_at, closed_at, tags, custom_fields,
             is_deleted, synced_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            "#,
        )
        .bind(account_ref.customer_id)
        .bind(account_ref.account_index)
        .bind(merged.id)
        .bind(&merged.name)
        .bind(merged.price)
        .bind(merged.responsible_user_id)
        .bind(merged.pipeline_id)
        .bind(merged.status_id)
        .bind(merged.created_at)
        .bind(merged.closed_at)
        .bind(serde_json::to_string(&merged.tags)?)
        .bind(serde_json::to_string(&merged.custom_fields)?)
        .bind(i64::from(merged.is_deleted))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn bulk_read(
        &self,
        account_ref: AccountRef,
        filter: Option<&FilterSpec>,
    ) -> Result<Vec<LeadRecord>, SyncError> {
        // Push the cheap equality/range predicates into SQL; the tag
        // intersection (and everything else, idempotently) is re-applied in
        // memory through FilterSpec::matches below.
        let mut sql = String::from(
            r#"
            SELECT lead_id, name, price, responsible_user_id, pipeline_id, status_id,
                   created_at, closed_at, tags, custom_fields, is_deleted
            FROM leads
            WHERE customer_id = ? AND account_index = ?
            "#,
        );
        let mut int_binds: Vec<i64> = Vec::new();
        if let Some(filter) = filter {
            if let Some(pipeline_id) = filter.pipeline_id {
                sql.push_str(" AND pipeline_id = ?");
                int_binds.push(pipeline_id);
            }
            if let Some(user) = filter.responsible_user_id {
                sql.push_str(" AND responsible_user_id = ?");
                int_binds.push(user);
            }
            let date_column = match filter.date_field {
                DateField::Created => "created_at",
                DateField::Closed => "closed_at",
            };
            if let Some(from) = filter.date_from {
                sql.push_str(&format!(" AND {date_column} >= ?"));
                int_binds.push(from);
            }
            if let Some(to) = filter.date_to {
                sql.push_str(&format!(" AND {date_column} <= ?"));
                int_binds.push(to);
            }
        }
        sql.push_str(" ORDER BY lead_id ASC");

        let mut query = sqlx::query(&sql)
            .bind(account_ref.customer_id)
            .bind(account_ref.account_index);
        for value in int_binds {
            query = query.bind(value);
        }

        let rows = query.fetch_all(&*self.pool).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let record = row_to_record(row)?;
            if filter.is_none_or(|f| f.matches(&record)) {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn count(
        &self,
        account_ref: AccountRef,
        filter: &FilterSpec,
        catalog: &PipelineCatalog,
    ) -> Result<AggregateStats, SyncError> {
        let records = self.bulk_read(account_ref, Some(filter)).await?;
        Ok(AggregateStats::compute(&records, filter, catalog))
    }

    async fn record_count(&self, account_ref: AccountRef) -> Result<u64, SyncError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM leads WHERE customer_id = ? AND account_index = ?",
        )
        .bind(account_ref.customer_id)
        .bind(account_ref.account_index)
        .fetch_one(&*self.pool)
        .await?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use serde_json::json;

    async fn store() -> SqliteLeadRepository {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        SqliteLeadRepository::new(db.pool().clone())
    }

    fn acc() -> AccountRef {
        AccountRef::new(1, 0)
    }

    fn patch(value: serde_json::Value) -> LeadPatch {
        LeadPatch::from_raw(&value).unwrap()
    }

    fn full_lead(id: i64) -> LeadPatch {
        patch(json!({
            "id": id,
            "name": format!("lead-{id}"),
            "price": 100,
            "responsible_user_id": 4,
            "pipeline_id": 7,
            "status_id": 10,
            "created_at": 1_704_067_200,
            "tags": [{"id": 5, "name": "VIP"}]
        }))
    }

    #[tokio::test]
    async fn upsert_then_read_roundtrips() {
        let store = store().await;
        store.upsert(acc(), &full_lead(1)).await.unwrap();

        let records = store.bulk_read(acc(), None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "lead-1");
        assert_eq!(records[0].tags[0].name, "VIP");
    }

    #[tokio::test]
    async fn replayed_upsert_creates_no_duplicate() {
        let store = store().await;
        for _ in 0..3 {
            store.upsert(acc(), &full_lead(1)).await.unwrap();
        }
        assert_eq!(store.record_count(acc()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn partial_payload_keeps_stored_tags() {
        let store = store().await;
        store.upsert(acc(), &full_lead(1)).await.unwrap();

        // Re-pull without a tags key must not clear the stored tags.
        store
            .upsert(acc(), &patch(json!({"id": 1, "price": 2500})))
            .await
            .unwrap();

        let records = store.bulk_read(acc(), None).await.unwrap();
        assert_eq!(records[0].price, 2500);
        assert_eq!(records[0].tags.len(), 1);
        assert_eq!(records[0].tags[0].name, "VIP");
    }

    #[tokio::test]
    async fn accounts_are_isolated() {
        let store = store().await;
        store.upsert(AccountRef::new(1, 0), &full_lead(1)).await.unwrap();
        store.upsert(AccountRef::new(1, 1), &full_lead(2)).await.unwrap();

        assert_eq!(store.record_count(AccountRef::new(1, 0)).await.unwrap(), 1);
        let other = store.bulk_read(AccountRef::new(1, 1), None).await.unwrap();
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].id, 2);
    }

    #[tokio::test]
    async fn new_record_from_partial_payload_is_rejected() {
        let store = store().await;
        let err = store
            .upsert(acc(), &patch(json!({"id": 9, "price": 10})))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Api(ApiError::MalformedResponse { .. })));
    }

    #[tokio::test]
    async fn pushdown_count_matches_in_memory_aggregation() {
        let store = store().await;
        for i in 1..=6 {
            let mut p = full_lead(i);
            p.pipeline_id = Some(if i % 2 == 0 { 7 } else { 8 });
            p.status_id = Some(if i == 2 { 142 } else { 10 });
            store.upsert(acc(), &p).await.unwrap();
        }

        let filter = FilterSpec { pipeline_id: Some(7), ..FilterSpec::default() };
        let catalog = PipelineCatalog::default();

        let pushed = store.count(acc(), &filter, &catalog).await.unwrap();
        let all = store.bulk_read(acc(), None).await.unwrap();
        let local = AggregateStats::compute(&all, &filter, &catalog);
        assert_eq!(pushed, local);
        assert_eq!(pushed.total, 3);
        assert_eq!(pushed.won, 1);
    }

    #[tokio::test]
    async fn closed_date_pushdown_excludes_open_leads() {
        let store = store().await;
        let mut open = full_lead(1);
        open.closed_at = None;
        store.upsert(acc(), &open).await.unwrap();

        let mut closed = full_lead(2);
        closed.status_id = Some(142);
        closed.closed_at = Some(Some(1_705_000_000));
        store.upsert(acc(), &closed).await.unwrap();

        let filter = FilterSpec {
            date_field: DateField::Closed,
            date_from: Some(1_704_000_000),
            date_to: Some(1_706_000_000),
            ..FilterSpec::default()
        };
        let records = store.bulk_read(acc(), Some(&filter)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 2);
    }
}
