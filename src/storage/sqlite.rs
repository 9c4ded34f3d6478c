//! SQLite-backed city store shared by every service instance.
//!
//! Each instance opens its own connection to the same database file. Every
//! statement is committed on its own and binds caller values as parameters.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use super::error::StoreError;
use crate::cities::{CityRecord, RangeField, RangeQuery};

/// Number of rows sampled by the existence probe
const PROBE_LIMIT: i64 = 5;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS citydata (
    cityid     INTEGER PRIMARY KEY,
    cityname   TEXT    NOT NULL,
    region     TEXT    NOT NULL,
    district   TEXT    NOT NULL,
    population INTEGER NOT NULL,
    foundation INTEGER NOT NULL
)";

const SELECT_COLUMNS: &str =
    "SELECT cityid, cityname, region, district, population, foundation FROM citydata";

/// Handle to the shared city table
#[derive(Debug, Clone)]
pub struct CityStore {
    conn: Arc<Mutex<Connection>>,
}

impl CityStore {
    /// Open the database file, creating the table when it is missing
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        let open_err = |source: rusqlite::Error| StoreError::Open {
            path: path.to_path_buf(),
            source,
        };

        let conn = Connection::open(path).map_err(open_err)?;
        conn.busy_timeout(busy_timeout).map_err(open_err)?;
        let mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(open_err)?;
        conn.execute(SCHEMA, []).map_err(open_err)?;

        debug!("Opened city store at {:?} (journal mode {})", path, mode);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StoreError::Poisoned(operation))?;
            f(&guard)
        })
        .await
        .map_err(|source| StoreError::Task { operation, source })?
    }

    /// Existence probe: `true` when a bounded sample of the table has no rows
    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        self.with_conn("probe", |conn| {
            let mut stmt = conn
                .prepare("SELECT cityid FROM citydata LIMIT ?1")
                .map_err(query_err("probe"))?;
            let mut rows = stmt.query(params![PROBE_LIMIT]).map_err(query_err("probe"))?;
            let first = rows.next().map_err(query_err("probe"))?;
            Ok(first.is_none())
        })
        .await
    }

    pub async fn insert(&self, city: CityRecord) -> Result<(), StoreError> {
        self.with_conn("insert", move |conn| {
            conn.execute(
                "INSERT INTO citydata (cityid, cityname, region, district, population, foundation)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    city.id,
                    city.name,
                    city.region,
                    city.district,
                    city.population,
                    city.foundation
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(ref failure, _)
                    if failure.code == ErrorCode::ConstraintViolation =>
                {
                    StoreError::Duplicate(city.id)
                }
                source => StoreError::Query {
                    operation: "insert",
                    source,
                },
            })?;
            Ok(())
        })
        .await
    }

    pub async fn get(&self, id: i64) -> Result<Option<CityRecord>, StoreError> {
        self.with_conn("get", move |conn| {
            conn.query_row(
                &format!("{} WHERE cityid = ?1", SELECT_COLUMNS),
                params![id],
                map_city,
            )
            .optional()
            .map_err(query_err("get"))
        })
        .await
    }

    /// Delete by id, returning the number of rows removed
    pub async fn delete(&self, id: i64) -> Result<usize, StoreError> {
        self.with_conn("delete", move |conn| {
            conn.execute("DELETE FROM citydata WHERE cityid = ?1", params![id])
                .map_err(query_err("delete"))
        })
        .await
    }

    /// Overwrite the population of one city, returning the number of rows changed
    pub async fn update_population(&self, id: i64, population: i64) -> Result<usize, StoreError> {
        self.with_conn("update_population", move |conn| {
            conn.execute(
                "UPDATE citydata SET population = ?1 WHERE cityid = ?2",
                params![population, id],
            )
            .map_err(query_err("update_population"))
        })
        .await
    }

    pub async fn list_by_region(&self, region: String) -> Result<Vec<CityRecord>, StoreError> {
        self.with_conn("list_by_region", move |conn| {
            collect_cities(
                conn,
                "list_by_region",
                &format!("{} WHERE region = ?1 ORDER BY cityid", SELECT_COLUMNS),
                params![region],
            )
        })
        .await
    }

    pub async fn list_by_district(&self, district: String) -> Result<Vec<CityRecord>, StoreError> {
        self.with_conn("list_by_district", move |conn| {
            collect_cities(
                conn,
                "list_by_district",
                &format!("{} WHERE district = ?1 ORDER BY cityid", SELECT_COLUMNS),
                params![district],
            )
        })
        .await
    }

    /// List cities whose `field` lies inside `range` (both ends inclusive)
    pub async fn list_by_range(
        &self,
        field: RangeField,
        range: RangeQuery,
    ) -> Result<Vec<CityRecord>, StoreError> {
        self.with_conn("list_by_range", move |conn| {
            let column = field.column();
            match range.max {
                Some(max) => collect_cities(
                    conn,
                    "list_by_range",
                    &format!(
                        "{} WHERE {col} >= ?1 AND {col} <= ?2 ORDER BY cityid",
                        SELECT_COLUMNS,
                        col = column
                    ),
                    params![range.min, max],
                ),
                None => collect_cities(
                    conn,
                    "list_by_range",
                    &format!("{} WHERE {} >= ?1 ORDER BY cityid", SELECT_COLUMNS, column),
                    params![range.min],
                ),
            }
        })
        .await
    }

    /// Snapshot of the whole table, read by a single statement
    pub async fn all(&self) -> Result<Vec<CityRecord>, StoreError> {
        self.with_conn("snapshot", |conn| {
            collect_cities(
                conn,
                "snapshot",
                &format!("{} ORDER BY cityid", SELECT_COLUMNS),
                params![],
            )
        })
        .await
    }
}

fn query_err(operation: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |source| StoreError::Query { operation, source }
}

fn map_city(row: &Row<'_>) -> rusqlite::Result<CityRecord> {
    Ok(CityRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        region: row.get(2)?,
        district: row.get(3)?,
        population: row.get(4)?,
        foundation: row.get(5)?,
    })
}

fn collect_cities<P: rusqlite::Params>(
    conn: &Connection,
    operation: &'static str,
    sql: &str,
    params: P,
) -> Result<Vec<CityRecord>, StoreError> {
    let mut stmt = conn.prepare(sql).map_err(query_err(operation))?;
    let rows = stmt
        .query_map(params, map_city)
        .map_err(query_err(operation))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(query_err(operation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn city(id: i64, name: &str, region: &str, population: i64) -> CityRecord {
        CityRecord {
            id,
            name: name.to_string(),
            region: region.to_string(),
            district: "Central".to_string(),
            population,
            foundation: 1000 + id,
        }
    }

    fn open_store() -> (TempDir, CityStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CityStore::open(&dir.path().join("cities.db"), Duration::from_secs(5)).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_probe_and_insert_get() {
        let (_dir, store) = open_store();
        assert!(store.is_empty().await.unwrap());

        let tula = city(7, "Tula", "Tula", 475_000);
        store.insert(tula.clone()).await.unwrap();

        assert!(!store.is_empty().await.unwrap());
        assert_eq!(store.get(7).await.unwrap(), Some(tula));
        assert_eq!(store.get(8).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let (_dir, store) = open_store();
        store.insert(city(1, "Tver", "Tver", 1)).await.unwrap();
        let err = store.insert(city(1, "Other", "Tver", 2)).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(1)));
    }

    #[tokio::test]
    async fn test_values_are_bound_not_interpolated() {
        let (_dir, store) = open_store();
        let hostile = city(1, "O'Brien'); DROP TABLE citydata; --", "Kursk", 10);
        store.insert(hostile.clone()).await.unwrap();
        store.insert(city(2, "Kursk", "Kursk", 20)).await.unwrap();

        assert_eq!(store.get(1).await.unwrap(), Some(hostile));
        let listed = store.list_by_region("x' OR '1'='1".to_string()).await.unwrap();
        assert!(listed.is_empty());
        assert_eq!(store.all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_and_update_report_affected_rows() {
        let (_dir, store) = open_store();
        store.insert(city(3, "Orel", "Orel", 300)).await.unwrap();

        assert_eq!(store.update_population(3, 310).await.unwrap(), 1);
        assert_eq!(store.get(3).await.unwrap().unwrap().population, 310);
        assert_eq!(store.update_population(99, 1).await.unwrap(), 0);

        assert_eq!(store.delete(3).await.unwrap(), 1);
        assert_eq!(store.delete(3).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_range_listing() {
        let (_dir, store) = open_store();
        store.insert(city(1, "A", "R", 0)).await.unwrap();
        store.insert(city(2, "B", "R", 50)).await.unwrap();
        store.insert(city(3, "C", "R", 150)).await.unwrap();
        store.insert(city(4, "D", "R", -10)).await.unwrap();

        let bounded = RangeQuery {
            min: 0,
            max: Some(100),
        };
        let ids: Vec<i64> = store
            .list_by_range(RangeField::Population, bounded)
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![1, 2]);

        let open = RangeQuery { min: 0, max: None };
        let ids: Vec<i64> = store
            .list_by_range(RangeField::Population, open)
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let founded = RangeQuery {
            min: 1002,
            max: Some(1003),
        };
        let ids: Vec<i64> = store
            .list_by_range(RangeField::Foundation, founded)
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_instances_share_one_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let first = CityStore::open(&path, Duration::from_secs(5)).unwrap();
        let second = CityStore::open(&path, Duration::from_secs(5)).unwrap();

        first.insert(city(1, "Vologda", "Vologda", 300_000)).await.unwrap();
        assert_eq!(second.get(1).await.unwrap().unwrap().name, "Vologda");
    }

    #[test]
    fn test_open_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("cities.db");
        let err = CityStore::open(&path, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, StoreError::Open { .. }));
    }
}
