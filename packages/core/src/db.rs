//! SQLite pool creation and embedded schema.
//!
//! [`create_pool`] opens (or creates) the database and applies the schema
//! idempotently, so a fresh deployment starts from empty tables the same way
//! tests start from `sqlite::memory:`.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Column order in each table is the on-disk contract shared with the
/// reporting tools that read the database directly; do not reorder.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS medicine_stock (
        product_name TEXT NOT NULL,
        hsn          TEXT NOT NULL DEFAULT '',
        mrp          TEXT NOT NULL DEFAULT '',
        batch        TEXT NOT NULL,
        exp          TEXT NOT NULL DEFAULT '',
        qty          INTEGER NOT NULL,
        manufacturer TEXT NOT NULL DEFAULT '',
        rate         TEXT NOT NULL DEFAULT '',
        gtin         TEXT NOT NULL DEFAULT '',
        last_update  TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS alerts (
        alert_id       TEXT PRIMARY KEY,
        product_name   TEXT NOT NULL,
        batch          TEXT NOT NULL,
        exp            TEXT NOT NULL DEFAULT '',
        days_to_expiry INTEGER,
        alert_type     TEXT NOT NULL,
        created_at     TEXT NOT NULL,
        last_sent_at   TEXT,
        resolved       INTEGER NOT NULL DEFAULT 0,
        resolved_by    TEXT,
        resolved_at    TEXT
    )",
    "CREATE TABLE IF NOT EXISTS prescriptions (
        prescription_id  TEXT PRIMARY KEY,
        patient_id       TEXT NOT NULL,
        doctor_name      TEXT NOT NULL DEFAULT '',
        pharmacy_id      TEXT NOT NULL DEFAULT '',
        medications_json TEXT NOT NULL DEFAULT '[]',
        created_at       TEXT NOT NULL,
        qr_path          TEXT NOT NULL DEFAULT '',
        status           TEXT NOT NULL DEFAULT 'created'
    )",
    "CREATE TABLE IF NOT EXISTS patients (
        patient_id    TEXT PRIMARY KEY,
        name          TEXT NOT NULL,
        age           TEXT NOT NULL DEFAULT '',
        gender        TEXT NOT NULL DEFAULT '',
        contact       TEXT NOT NULL DEFAULT '',
        email         TEXT NOT NULL DEFAULT '',
        notes         TEXT NOT NULL DEFAULT '',
        registered_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS sales (
        sale_id         TEXT PRIMARY KEY,
        prescription_id TEXT NOT NULL,
        product_name    TEXT NOT NULL,
        batch           TEXT NOT NULL,
        qty             INTEGER NOT NULL,
        sold_at         TEXT NOT NULL,
        pharmacy_id     TEXT NOT NULL DEFAULT ''
    )",
];

/// Open a SQLite pool for `url` and apply the schema.
///
/// `sqlite::memory:` yields an isolated in-memory database (used by tests);
/// file-backed URLs are created on first open.
pub async fn create_pool(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        // A single persistent connection keeps in-memory databases coherent
        // and gives file-backed databases a serialized writer.
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    for statement in SCHEMA {
        sqlx::query(statement).execute(&pool).await?;
    }

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_pool_applies_schema() {
        let pool = create_pool("sqlite::memory:").await.unwrap();

        // All five tables must exist and be queryable.
        for table in ["medicine_stock", "alerts", "prescriptions", "patients", "sales"] {
            let sql = format!("SELECT COUNT(*) as cnt FROM {}", table);
            let row = sqlx::query(&sql).fetch_one(&pool).await.unwrap();
            use sqlx::Row;
            let count: i64 = row.try_get("cnt").unwrap();
            assert_eq!(count, 0);
        }
    }

    #[tokio::test]
    async fn schema_application_is_idempotent() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await.unwrap();
        }
    }
}
