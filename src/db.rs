use crate::config::Config;
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Builder, Connection, Database as LibsqlDatabase};
use std::path::Path;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

const SYSTEM_MIGRATIONS: &[(&str, &str)] =
    &[("system/000_migrations_table.sql", include_str!("migrations/system/000_migrations_table.sql"))];

const MIGRATIONS: &[(&str, &str)] = &[
    ("001_schema.sql", include_str!("migrations/001_schema.sql")),
    ("002_auth.sql", include_str!("migrations/002_auth.sql")),
    ("003_book_suggestions.sql", include_str!("migrations/003_book_suggestions.sql")),
];

pub struct Database {
    db: LibsqlDatabase,
    conn: Connection,
    tx_lock: Mutex<()>,
    turso_url: Option<String>,
    turso_auth_token: Option<String>,
}

impl Database {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Held for every write on the shared connection. A `BEGIN` opened under it
    /// covers only the holder's statements.
    pub async fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.tx_lock.lock().await
    }

    pub fn is_replica(turso_url: &Option<String>, turso_auth_token: &Option<String>) -> bool {
        turso_url.is_some() && turso_auth_token.is_some()
    }

    pub async fn sync(&self) -> Result<()> {
        if Self::is_replica(&self.turso_url, &self.turso_auth_token) {
            self.db
                .sync()
                .await
                .map_err(|e| anyhow::anyhow!("sync failed: {}", e))?;
        }
        Ok(())
    }

    async fn is_migration_applied(conn: &Connection, name: &str) -> Result<bool> {
        let query = "SELECT 1 FROM _migrations WHERE name = ?";
        match conn.query(query, libsql::params![name]).await {
            Ok(mut rows) => Ok(rows.next().await?.is_some()),
            Err(e) => {
                if e.to_string().contains("no such table") {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn record_migration(conn: &Connection, name: &str) -> Result<()> {
        let query = r#"
            INSERT INTO _migrations (name, applied_at)
            VALUES (?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        "#;
        conn.execute(query, libsql::params![name]).await?;
        Ok(())
    }

    async fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
        if Self::is_migration_applied(conn, name).await? {
            tracing::debug!("migration {} already applied, skipping", name);
            return Ok(());
        }

        tracing::info!("applying migration: {}", name);
        conn.execute_batch(sql)
            .await
            .map_err(|e| anyhow::anyhow!("failed to execute migration {name}: {e}"))?;

        Self::record_migration(conn, name).await?;
        Ok(())
    }

    /// Opens the configured database. Relative database paths resolve against `data_dir`.
    pub async fn new(cfg: &Config, data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(cfg.app.get_db());
        let turso_url = cfg.app.turso_url.clone().filter(|u| !u.is_empty());
        let turso_auth_token = cfg.app.turso_auth_token.clone().filter(|t| !t.is_empty());

        let db = match (&turso_url, &turso_auth_token) {
            (Some(url), Some(token)) => {
                tracing::info!("[db] running in synced database mode (offline writes)");
                let sync_interval = Duration::from_secs(cfg.app.sync_interval_seconds);
                Builder::new_synced_database(&path, url.clone(), token.clone())
                    .sync_interval(sync_interval)
                    .build()
                    .await?
            }
            _ => Builder::new_local(&path).build().await?,
        };

        Self::setup(db, turso_url, turso_auth_token).await
    }

    /// Opens a plain local database; `":memory:"` gives a throwaway one.
    pub async fn open_local(path: &str) -> Result<Self> {
        let db = Builder::new_local(path).build().await?;
        Self::setup(db, None, None).await
    }

    async fn setup(db: LibsqlDatabase, turso_url: Option<String>, turso_auth_token: Option<String>) -> Result<Self> {
        let conn = db.connect()?;
        conn.query("SELECT 1", ()).await?;
        conn.execute_batch("PRAGMA foreign_keys = ON;").await?;

        for (filename, sql) in SYSTEM_MIGRATIONS {
            Self::run_migration(&conn, filename, sql).await?;
        }

        for (filename, sql) in MIGRATIONS {
            Self::run_migration(&conn, filename, sql).await?;
        }

        Ok(Database {
            db,
            conn,
            tx_lock: Mutex::new(()),
            turso_url,
            turso_auth_token,
        })
    }

    pub async fn begin(&self) -> Result<()> {
        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        Ok(())
    }

    pub async fn commit(&self) -> Result<()> {
        self.conn.execute("COMMIT", ()).await?;
        Ok(())
    }

    pub async fn rollback(&self) {
        if let Err(e) = self.conn.execute("ROLLBACK", ()).await {
            tracing::warn!(error = %e, "rollback failed");
        }
    }
}

/// Timestamps are stored as RFC 3339 text with millisecond precision, UTC.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| anyhow::anyhow!("invalid timestamp {raw:?}: {e}"))?;
    Ok(parsed.with_timezone(&Utc))
}

pub fn parse_optional_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_timestamp).transpose()
}
