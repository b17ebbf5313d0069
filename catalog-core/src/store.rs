/**
 * CATALOG STORE - Durable (broker, topic) → latest sample catalog
 *
 * ROLE:
 * Keeps one row per (broker_id, topic). The first observation inserts the row,
 * every later one replaces payload_type / sample_payload / last_seen in place.
 * `id` and `created_at` never change once written.
 *
 * HOW IT WORKS:
 * - One table `topics`, UNIQUE(broker_id, topic), indexes on broker_id,
 *   last_seen DESC and topic.
 * - Upsert is a single INSERT ... ON CONFLICT DO UPDATE statement, so a key is
 *   never left half-updated.
 * - The SQL dialect (SQLite or PostgreSQL) is picked once from the database URL
 *   and every statement is rendered at construction time.
 * - Timestamps are stored as unix milliseconds (BIGINT) on both engines.
 */

use crate::models::{CatalogEntry, PayloadType, Sample};
use async_trait::async_trait;
use sqlx::any::{install_default_drivers, AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use time::OffsetDateTime;
use tracing::debug;

const MAX_CONNECTIONS: u32 = 25;
const ENTRY_COLUMNS: &str = "id, broker_id, topic, payload_type, sample_payload, last_seen, created_at";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt catalog row: {0}")]
    Corrupt(String),
}

/// Filter + pagination for [`CatalogStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub broker_id: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            broker_id: None,
            limit: 100,
            offset: 0,
        }
    }
}

/// One page of rows plus the number of rows matching the filter.
#[derive(Debug, Clone)]
pub struct Page {
    pub rows: Vec<CatalogEntry>,
    pub total: u64,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert the (broker, topic) row or overwrite its payload fields and last_seen.
    async fn upsert(&self, sample: &Sample) -> Result<(), StoreError>;

    /// Rows ordered by last_seen, most recent first.
    async fn list(&self, query: &ListQuery) -> Result<Page, StoreError>;

    async fn get(&self, broker_id: &str, topic: &str) -> Result<Option<CatalogEntry>, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Dialect::Postgres
        } else {
            Dialect::Sqlite
        }
    }

    fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Sqlite => "?".to_string(),
            Dialect::Postgres => format!("${n}"),
        }
    }
}

/// Every statement the store runs, rendered once for one dialect.
#[derive(Debug, Clone)]
struct Statements {
    schema: Vec<String>,
    upsert: String,
    count_all: String,
    count_by_broker: String,
    page_all: String,
    page_by_broker: String,
    get_one: String,
}

impl Statements {
    fn render(dialect: Dialect) -> Self {
        let p = |n| dialect.placeholder(n);

        let table = match dialect {
            Dialect::Sqlite => {
                "CREATE TABLE IF NOT EXISTS topics (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    broker_id TEXT NOT NULL,
                    topic TEXT NOT NULL,
                    payload_type TEXT NOT NULL,
                    sample_payload BLOB NOT NULL,
                    last_seen BIGINT NOT NULL,
                    created_at BIGINT NOT NULL,
                    UNIQUE(broker_id, topic)
                )"
            }
            Dialect::Postgres => {
                "CREATE TABLE IF NOT EXISTS topics (
                    id BIGSERIAL PRIMARY KEY,
                    broker_id TEXT NOT NULL,
                    topic TEXT NOT NULL,
                    payload_type TEXT NOT NULL,
                    sample_payload BYTEA NOT NULL,
                    last_seen BIGINT NOT NULL,
                    created_at BIGINT NOT NULL,
                    UNIQUE(broker_id, topic)
                )"
            }
        };

        Self {
            schema: vec![
                table.to_string(),
                "CREATE INDEX IF NOT EXISTS idx_topics_broker_id ON topics(broker_id)".to_string(),
                "CREATE INDEX IF NOT EXISTS idx_topics_last_seen ON topics(last_seen DESC)".to_string(),
                "CREATE INDEX IF NOT EXISTS idx_topics_topic ON topics(topic)".to_string(),
            ],
            upsert: format!(
                "INSERT INTO topics (broker_id, topic, payload_type, sample_payload, last_seen, created_at)
                 VALUES ({}, {}, {}, {}, {}, {})
                 ON CONFLICT(broker_id, topic) DO UPDATE SET
                    payload_type = excluded.payload_type,
                    sample_payload = excluded.sample_payload,
                    last_seen = excluded.last_seen",
                p(1), p(2), p(3), p(4), p(5), p(6)
            ),
            count_all: "SELECT COUNT(*) FROM topics".to_string(),
            count_by_broker: format!("SELECT COUNT(*) FROM topics WHERE broker_id = {}", p(1)),
            page_all: format!(
                "SELECT {ENTRY_COLUMNS} FROM topics ORDER BY last_seen DESC, id DESC LIMIT {} OFFSET {}",
                p(1), p(2)
            ),
            page_by_broker: format!(
                "SELECT {ENTRY_COLUMNS} FROM topics WHERE broker_id = {}
                 ORDER BY last_seen DESC, id DESC LIMIT {} OFFSET {}",
                p(1), p(2), p(3)
            ),
            get_one: format!(
                "SELECT {ENTRY_COLUMNS} FROM topics WHERE broker_id = {} AND topic = {}",
                p(1), p(2)
            ),
        }
    }
}

/// [`CatalogStore`] over an sqlx `Any` pool (SQLite or PostgreSQL).
pub struct SqlCatalogStore {
    pool: AnyPool,
    dialect: Dialect,
    sql: Statements,
}

impl SqlCatalogStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        install_default_drivers();

        let dialect = Dialect::from_url(database_url);
        let in_memory = dialect == Dialect::Sqlite
            && (database_url.contains(":memory:") || database_url.contains("mode=memory"));

        // An in-memory SQLite database lives and dies with its connection.
        let options = if in_memory {
            AnyPoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            AnyPoolOptions::new().max_connections(MAX_CONNECTIONS)
        };

        let pool = options.connect(database_url).await?;
        debug!(?dialect, in_memory, "catalog store connected");

        Ok(Self {
            pool,
            dialect,
            sql: Statements::render(dialect),
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Create the table and indexes if missing.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in &self.sql.schema {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for SqlCatalogStore {
    async fn upsert(&self, sample: &Sample) -> Result<(), StoreError> {
        sqlx::query(&self.sql.upsert)
            .bind(sample.broker_id.as_str())
            .bind(sample.topic.as_str())
            .bind(sample.payload_type.as_str())
            .bind(sample.payload.as_slice())
            .bind(to_millis(sample.timestamp))
            .bind(to_millis(OffsetDateTime::now_utc()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self, query: &ListQuery) -> Result<Page, StoreError> {
        let limit = i64::from(query.limit);
        let offset = i64::from(query.offset);

        let (total, rows): (i64, Vec<AnyRow>) = match query.broker_id.as_deref() {
            Some(broker_id) => {
                let total: i64 = sqlx::query_scalar(&self.sql.count_by_broker)
                    .bind(broker_id)
                    .fetch_one(&self.pool)
                    .await?;
                let rows = sqlx::query(&self.sql.page_by_broker)
                    .bind(broker_id)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?;
                (total, rows)
            }
            None => {
                let total: i64 = sqlx::query_scalar(&self.sql.count_all)
                    .fetch_one(&self.pool)
                    .await?;
                let rows = sqlx::query(&self.sql.page_all)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?;
                (total, rows)
            }
        };

        let rows = rows.iter().map(entry_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            rows,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }

    async fn get(&self, broker_id: &str, topic: &str) -> Result<Option<CatalogEntry>, StoreError> {
        let row = sqlx::query(&self.sql.get_one)
            .bind(broker_id)
            .bind(topic)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(entry_from_row).transpose()
    }
}

fn entry_from_row(row: &AnyRow) -> Result<CatalogEntry, StoreError> {
    let payload_type: String = row.try_get("payload_type")?;
    let payload_type = payload_type
        .parse::<PayloadType>()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;

    Ok(CatalogEntry {
        id: row.try_get("id")?,
        broker_id: row.try_get("broker_id")?,
        topic: row.try_get("topic")?,
        payload_type,
        sample_payload: row.try_get("sample_payload")?,
        last_seen: from_millis(row.try_get("last_seen")?)?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

fn to_millis(t: OffsetDateTime) -> i64 {
    (t.unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_millis(ms: i64) -> Result<OffsetDateTime, StoreError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .map_err(|e| StoreError::Corrupt(format!("timestamp {ms}: {e}")))
}
