//! SQLite-backed [`SourceStore`].
//!
//! Reads an export of the legacy user table. Every column of a row is carried
//! into the record; the field mapper decides which ones reach the payload.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, Row};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{RejectedRow, SourceRow, SourceStats, SourceStore};
use crate::config::SourceConfig;
use crate::errors::SourceError;
use crate::models::SourceUserRecord;

/// Source store over a SQLite user table.
///
/// The connection sits behind a `Mutex` so the store is `Send + Sync`.
pub struct SqliteSourceStore {
    conn: Mutex<Connection>,
    table: String,
    id_column: String,
    email_column: String,
}

impl SqliteSourceStore {
    /// Open an existing database read-only.
    ///
    /// `table`, `id_column` and `email_column` are interpolated into SQL and
    /// must already be validated identifiers.
    pub fn open<P: AsRef<Path>>(
        path: P,
        config: &SourceConfig,
        email_column: &str,
    ) -> Result<Self, SourceError> {
        let path = path.as_ref();
        info!(path = %path.display(), table = %config.table, "opening source database");

        if !path.exists() {
            return Err(SourceError::NotFound(path.display().to_string()));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;

        Ok(Self::from_connection(conn, config, email_column))
    }

    /// Wrap an already-open connection (used with in-memory databases).
    pub fn from_connection(conn: Connection, config: &SourceConfig, email_column: &str) -> Self {
        Self {
            conn: Mutex::new(conn),
            table: config.table.clone(),
            id_column: config.id_column.clone(),
            email_column: email_column.to_string(),
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("source connection mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Aggregate figures for the `check` command.
    pub fn stats(&self, confirmed_column: &str, level_column: &str) -> Result<SourceStats, SourceError> {
        let mut stats = SourceStats {
            total_users: self.count()?,
            ..Default::default()
        };

        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {confirmed}, COUNT(*) FROM {table} GROUP BY {confirmed}",
            confirmed = confirmed_column,
            table = self.table,
        ))?;
        let rows = stmt.query_map([], |row| {
            let flag = value_from_ref(row.get_ref(0)?);
            let count: i64 = row.get(1)?;
            Ok((flag, count))
        })?;
        for row in rows {
            let (flag, count) = row?;
            if crate::mapping::fields::truthy(&flag) {
                stats.confirmed_users += count as u64;
            } else {
                stats.unconfirmed_users += count as u64;
            }
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT {level}, COUNT(*) FROM {table} GROUP BY {level} ORDER BY {level}",
            level = level_column,
            table = self.table,
        ))?;
        let rows = stmt.query_map([], |row| {
            let level: Option<i64> = row.get(0).ok().flatten();
            let count: i64 = row.get(1)?;
            Ok((level, count))
        })?;
        for row in rows {
            let (level, count) = row?;
            *stats.users_by_level.entry(level).or_default() += count as u64;
        }

        Ok(stats)
    }

    /// Run a `SELECT *` query. `first_position` is the absolute position of
    /// the first returned row, used to locate rejected rows.
    fn query_records<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
        first_position: u64,
    ) -> Result<Vec<SourceRow>, SourceError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let id_index = columns
            .iter()
            .position(|c| *c == self.id_column)
            .ok_or_else(|| SourceError::MissingColumn(self.id_column.clone()))?;

        let mut rows = stmt.query(params)?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let position = first_position + records.len() as u64;
            records.push(row_to_record(row, &columns, id_index, &self.email_column, position)?);
        }
        Ok(records)
    }
}

impl SourceStore for SqliteSourceStore {
    fn count(&self) -> Result<u64, SourceError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn page(&self, offset: u64, limit: u32) -> Result<Vec<SourceRow>, SourceError> {
        let sql = format!(
            "SELECT * FROM {} ORDER BY {} LIMIT ?1 OFFSET ?2",
            self.table, self.id_column
        );
        let rows = self.query_records(&sql, params![i64::from(limit), offset as i64], offset)?;
        let rejected = rows.iter().filter(|r| r.is_err()).count();
        debug!(offset, limit, count = rows.len(), rejected, "read source page");
        Ok(rows)
    }

    fn find_by_id(&self, id: i64) -> Result<Option<SourceUserRecord>, SourceError> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?1 LIMIT 1",
            self.table, self.id_column
        );
        Ok(self
            .query_records(&sql, params![id], 0)?
            .into_iter()
            .find_map(Result::ok))
    }

    fn find_by_email(&self, email: &str) -> Result<Option<SourceUserRecord>, SourceError> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?1 ORDER BY {} LIMIT 1",
            self.table, self.email_column, self.id_column
        );
        Ok(self
            .query_records(&sql, params![email], 0)?
            .into_iter()
            .find_map(Result::ok))
    }
}

/// Convert one row. Only a failure to read a column is an `Err`; a row
/// without an integer key comes back as a [`RejectedRow`].
fn row_to_record(
    row: &Row<'_>,
    columns: &[String],
    id_index: usize,
    email_column: &str,
    position: u64,
) -> Result<SourceRow, SourceError> {
    let mut fields = BTreeMap::new();
    for (i, name) in columns.iter().enumerate() {
        fields.insert(name.clone(), value_from_ref(row.get_ref(i)?));
    }

    let raw_id = fields.get(&columns[id_index]).cloned().unwrap_or(Value::Null);
    let id = match &raw_id {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    let Some(id) = id else {
        let email = match fields.get(email_column) {
            Some(Value::String(s)) => s.trim().to_string(),
            _ => String::new(),
        };
        warn!(position, id = %raw_id, "source row has no integer key");
        return Ok(Err(RejectedRow {
            position,
            email,
            reason: format!("no integer '{}' (found {})", columns[id_index], raw_id),
        }));
    };
    Ok(Ok(SourceUserRecord::new(id, fields)))
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::RecordCursor;

    fn config() -> SourceConfig {
        SourceConfig {
            path: "unused.db".into(),
            table: "users".into(),
            id_column: "id".into(),
            batch_size: 2,
        }
    }

    fn seeded() -> SqliteSourceStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE users (
                id INTEGER PRIMARY KEY,
                email TEXT,
                username TEXT,
                level INTEGER,
                confirmed INTEGER,
                score REAL,
                birthdate TEXT
            );
            INSERT INTO users VALUES (3, 'c@example.com', 'c', 5, 1, 1.5, NULL);
            INSERT INTO users VALUES (1, 'a@example.com', 'a', 1, 0, NULL, '1990-05-17');
            INSERT INTO users VALUES (2, 'b@example.com', 'b', NULL, 1, NULL, NULL);
            "#,
        )
        .unwrap();
        SqliteSourceStore::from_connection(conn, &config(), "email")
    }

    #[test]
    fn test_count_and_page_order() {
        let store = seeded();
        assert_eq!(store.count().unwrap(), 3);

        let ids = |rows: Vec<SourceRow>| rows.into_iter().map(|r| r.unwrap().id).collect::<Vec<_>>();
        assert_eq!(ids(store.page(0, 2).unwrap()), vec![1, 2]);
        assert_eq!(ids(store.page(2, 2).unwrap()), vec![3]);
        assert!(store.page(4, 2).unwrap().is_empty());
    }

    #[test]
    fn test_row_values() {
        let store = seeded();
        let record = store.find_by_id(3).unwrap().unwrap();
        assert_eq!(record.text("email").as_deref(), Some("c@example.com"));
        assert_eq!(record.integer("level"), Some(5));
        assert_eq!(record.get("score"), Some(&serde_json::json!(1.5)));
        assert_eq!(record.get("birthdate"), None);
    }

    #[test]
    fn test_find_by_email() {
        let store = seeded();
        let record = store.find_by_email("b@example.com").unwrap().unwrap();
        assert_eq!(record.id, 2);
        assert!(store.find_by_email("nobody@example.com").unwrap().is_none());
        assert!(store.find_by_id(99).unwrap().is_none());
    }

    #[test]
    fn test_cursor_over_sqlite() {
        let store = seeded();
        let mut cursor = RecordCursor::new(&store, 2);
        let mut ids = Vec::new();
        while let Some(batch) = cursor.next_batch().unwrap() {
            ids.extend(batch.into_iter().map(|r| r.unwrap().id));
        }
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_row_without_integer_id_is_rejected_in_place() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id TEXT, email TEXT);
             INSERT INTO users VALUES ('1', 'a@example.com');
             INSERT INTO users VALUES (NULL, ' lost@example.com ');
             INSERT INTO users VALUES ('3', 'c@example.com');",
        )
        .unwrap();
        let store = SqliteSourceStore::from_connection(conn, &config(), "email");

        // NULL sorts first in SQLite.
        let rows = store.page(0, 10).unwrap();
        assert_eq!(rows.len(), 3);
        let rejected = rows[0].as_ref().unwrap_err();
        assert_eq!(rejected.position, 0);
        assert_eq!(rejected.email, "lost@example.com");
        assert!(rejected.reason.contains("'id'"));
        let ids: Vec<i64> = rows.iter().filter_map(|r| r.as_ref().ok()).map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3]);

        assert_eq!(store.find_by_id(3).unwrap().map(|r| r.id), Some(3));
    }

    #[test]
    fn test_stats() {
        let store = seeded();
        let stats = store.stats("confirmed", "level").unwrap();
        assert_eq!(stats.total_users, 3);
        assert_eq!(stats.confirmed_users, 2);
        assert_eq!(stats.unconfirmed_users, 1);
        assert_eq!(stats.users_by_level.get(&Some(1)), Some(&1));
        assert_eq!(stats.users_by_level.get(&None), Some(&1));
    }

    #[test]
    fn test_open_missing_file() {
        let result = SqliteSourceStore::open("/nonexistent/legacy.db", &config(), "email");
        assert!(matches!(result, Err(SourceError::NotFound(_))));
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT);
                 INSERT INTO users VALUES (1, 'a@example.com');",
            )
            .unwrap();
        }
        let store = SqliteSourceStore::open(&path, &config(), "email").unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }
}
