//! SQLite connection and schema management
//!
//! Handles pool creation and the leads schema. Tags and custom fields are
//! stored as JSON columns; the primary key mirrors the engine's record
//! identity `(customer, account index, remote lead id)`.

use std::path::Path;

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Create the database file (and parent directory) if necessary;
        // sqlite::memory: needs neither.
        let in_memory = database_url.contains(":memory:");
        if !in_memory {
            let db_path = database_url
                .trim_start_matches("sqlite://")
                .trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if !Path::new(db_path).exists() {
                std::fs::File::create(db_path)?;
            }
        }

        // An in-memory database lives and dies with its connection, so the
        // pool must hold exactly one and never let it go idle.
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(10)
        };
        let pool = options.connect(database_url).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_leads_sql = r#"
            CREATE TABLE IF NOT EXISTS leads (
                customer_id INTEGER NOT NULL,
                account_index INTEGER NOT NULL,
                lead_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                price INTEGER NOT NULL DEFAULT 0,
                responsible_user_id INTEGER,
                pipeline_id INTEGER NOT NULL,
                status_id INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                closed_at INTEGER,
                tags TEXT NOT NULL DEFAULT '[]',
                custom_fields TEXT NOT NULL DEFAULT '[]',
                is_deleted INTEGER NOT NULL DEFAULT 0,
                synced_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (customer_id, account_index, lead_id)
            )
        "#;

        let create_pipeline_index_sql = r#"
            CREATE INDEX IF NOT EXISTS idx_leads_account_pipeline
            ON leads (customer_id, account_index, pipeline_id)
        "#;

        sqlx::query(create_leads_sql).execute(&self.pool).await?;
        sqlx::query(create_pipeline_index_sql).execute(&self.pool).await?;

        tracing::debug!("lead schema ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db.migrate().await.unwrap();
    }
}
