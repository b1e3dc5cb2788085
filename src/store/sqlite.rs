use std::path::Path;

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;

use super::query::{validate_identifier, Direction, Filter, Query, Row};
use super::{StoreError, TableStore};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Schema steps in order. A database at `user_version = n` has the first
/// `n` applied.
const SCHEMA: &[(&str, &str)] = &[(
    "users, emotions and reactions",
    include_str!("../../migrations/001_initial.sql"),
)];

const POOL_SIZE: u32 = 8;

fn configure(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
}

/// Local SQLite-backed table store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// Open (or create) a database file and bring its schema up to date.
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(db_path).with_init(configure);
        let pool = Pool::builder().max_size(POOL_SIZE).build(manager)?;
        let mode: String = pool.get()?.pragma_update_and_check(
            None,
            "journal_mode",
            "WAL",
            |row| row.get(0),
        )?;
        tracing::debug!("SQLite journal mode: {}", mode);

        let store = Self { pool };
        store.upgrade_schema()?;
        tracing::info!("Opened SQLite store at {}", db_path.display());
        Ok(store)
    }

    /// A private in-memory database. The pool holds a single connection so
    /// every call sees the same data.
    pub fn in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(configure);
        let store = Self {
            pool: Pool::builder().max_size(1).build(manager)?,
        };
        store.upgrade_schema()?;
        Ok(store)
    }

    /// Apply every schema step past the database's `user_version`, each in
    /// its own transaction. Returns the resulting version.
    pub fn upgrade_schema(&self) -> anyhow::Result<usize> {
        let mut conn = self.pool.get()?;
        let current: usize = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        for (version, (label, sql)) in SCHEMA.iter().enumerate().skip(current) {
            let tx = conn.transaction()?;
            tx.execute_batch(sql)?;
            tx.pragma_update(None, "user_version", version + 1)?;
            tx.commit()?;
            tracing::info!(version = version + 1, "Applied schema step: {}", label);
        }
        Ok(SCHEMA.len().max(current))
    }

    /// Run `work` with a pooled connection on the blocking thread pool.
    async fn blocking<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            work(&conn)
        })
        .await?
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn where_clause(filters: &[Filter], params: &mut Vec<SqlValue>) -> String {
    if filters.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = filters
        .iter()
        .map(|filter| match filter {
            Filter::Eq(column, Value::Null) => format!("{column} IS NULL"),
            Filter::Eq(column, value) => {
                params.push(to_sql(value));
                format!("{column} = ?")
            }
            Filter::Gte(column, value) => {
                params.push(to_sql(value));
                format!("{column} >= ?")
            }
            Filter::In(column, values) => {
                params.extend(values.iter().map(to_sql));
                let marks = vec!["?"; values.len()].join(", ");
                format!("{column} IN ({marks})")
            }
        })
        .collect();
    format!(" WHERE {}", parts.join(" AND "))
}

fn signed(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Range(value))
}

fn check_query(query: &Query) -> Result<(), StoreError> {
    for ident in query.identifiers() {
        validate_identifier(ident)?;
    }
    Ok(())
}

fn query_rows(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        let mut map = Row::new();
        for (i, name) in names.iter().enumerate() {
            map.insert(name.clone(), to_json(row.get_ref(i)?));
        }
        Ok(map)
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[async_trait]
impl TableStore for SqliteStore {
    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        check_query(query)?;
        let mut params = Vec::new();
        let projection = if query.columns.is_empty() {
            "*".to_string()
        } else {
            query.columns.join(", ")
        };
        let mut sql = format!(
            "SELECT {projection} FROM {}{}",
            query.table,
            where_clause(&query.filters, &mut params)
        );
        if let Some(order) = &query.order {
            let dir = match order.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            // id breaks ties so pagination is stable
            sql.push_str(&format!(" ORDER BY {} {dir}, id {dir}", order.column));
        }
        if let Some(range) = query.range {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(SqlValue::Integer(signed(range.limit)?));
            params.push(SqlValue::Integer(signed(range.offset)?));
        }

        self.blocking(move |conn| query_rows(conn, &sql, &params)).await
    }

    async fn count(&self, query: &Query) -> Result<u64, StoreError> {
        check_query(query)?;
        let mut params = Vec::new();
        let sql = format!(
            "SELECT COUNT(*) FROM {}{}",
            query.table,
            where_clause(&query.filters, &mut params)
        );
        let count: i64 = self
            .blocking(move |conn| {
                Ok(conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?)
            })
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError> {
        validate_identifier(table)?;
        let sql = if row.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES RETURNING *")
        } else {
            let mut columns = Vec::with_capacity(row.len());
            for column in row.keys() {
                columns.push(validate_identifier(column)?);
            }
            let marks = vec!["?"; columns.len()].join(", ");
            format!(
                "INSERT INTO {table} ({}) VALUES ({marks}) RETURNING *",
                columns.join(", ")
            )
        };
        let params: Vec<SqlValue> = row.values().map(to_sql).collect();

        let inserted = self.blocking(move |conn| query_rows(conn, &sql, &params)).await?;
        inserted
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::EmptyResult(format!("insert into {table}")))
    }

    async fn update(&self, query: &Query, changes: Row) -> Result<Vec<Row>, StoreError> {
        check_query(query)?;
        if changes.is_empty() {
            return self.select(query).await;
        }
        let mut params = Vec::new();
        let mut assignments = Vec::with_capacity(changes.len());
        for (column, value) in &changes {
            assignments.push(format!("{} = ?", validate_identifier(column)?));
            params.push(to_sql(value));
        }
        let sql = format!(
            "UPDATE {} SET {}{} RETURNING *",
            query.table,
            assignments.join(", "),
            where_clause(&query.filters, &mut params)
        );

        self.blocking(move |conn| query_rows(conn, &sql, &params)).await
    }

    async fn delete(&self, query: &Query) -> Result<u64, StoreError> {
        check_query(query)?;
        let mut params = Vec::new();
        let sql = format!(
            "DELETE FROM {}{}",
            query.table,
            where_clause(&query.filters, &mut params)
        );
        let removed = self
            .blocking(move |conn| Ok(conn.execute(&sql, params_from_iter(params.iter()))?))
            .await?;
        Ok(removed as u64)
    }
}
