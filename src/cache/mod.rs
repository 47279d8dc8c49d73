//! The on-disk store: a SQLite database holding canonical equity records
//! plus a generic TTL-bounded object cache used by every fetcher that
//! sits in front of an upstream vendor.
//!
//! Grounded in the original source's `data_store.py`: one file, two
//! tables, short-lived scoped connections, and a flat JSON payload
//! rather than the original's pickle (JSON keeps the store
//! introspectable and gives us `serde` round-tripping for free).

use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::error::{Error, Result};
use crate::schemas::CanonicalEquity;

/// Opens a connection to the store, creating the database file and
/// tables on first use.
#[derive(Clone)]
pub struct CacheStore {
    db_path: PathBuf,
    /// 0 disables TTL-based eviction.
    ttl_seconds: i64,
}

impl CacheStore {
    pub fn open(db_path: impl Into<PathBuf>, ttl_minutes: i64) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::Data(e.to_string()))?;
        }
        let store = Self {
            db_path,
            ttl_seconds: ttl_minutes * 60,
        };
        store.with_connection(|conn| {
            init_equity_table(conn)?;
            init_cache_table(conn)?;
            Ok(())
        })?;
        Ok(store)
    }

    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        f(&conn)
    }

    /// Upserts a batch of canonical equities, keyed by share-class FIGI.
    /// Runs on a blocking thread, matching the teacher's treatment of its
    /// own heavier batch-commit paths (`store_dome_orders_batch`).
    pub async fn save_canonical_equities(&self, equities: &[CanonicalEquity]) -> Result<()> {
        let store = self.clone();
        let equities = equities.to_vec();
        tokio::task::spawn_blocking(move || store.save_canonical_equities_sync(&equities))
            .await
            .map_err(|e| Error::Data(e.to_string()))?
    }

    fn save_canonical_equities_sync(&self, equities: &[CanonicalEquity]) -> Result<()> {
        self.with_connection(|conn| {
            for equity in equities {
                let payload = serde_json::to_string(equity).map_err(|e| Error::Data(e.to_string()))?;
                conn.execute(
                    "INSERT OR REPLACE INTO canonical_equities (share_class_figi, payload) VALUES (?1, ?2)",
                    params![equity.share_class_figi().as_str(), payload],
                )?;
            }
            Ok(())
        })
    }

    /// Loads every canonical equity currently in the store, ordered by
    /// share-class FIGI ascending.
    pub fn load_canonical_equities(&self) -> Result<Vec<CanonicalEquity>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT payload FROM canonical_equities ORDER BY share_class_figi ASC",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut equities = Vec::new();
            for row in rows {
                let payload = row?;
                let equity: CanonicalEquity =
                    serde_json::from_str(&payload).map_err(|e| Error::Data(e.to_string()))?;
                equities.push(equity);
            }
            Ok(equities)
        })
    }

    pub fn load_canonical_equity(&self, figi: &str) -> Result<Option<CanonicalEquity>> {
        self.with_connection(|conn| {
            let payload: Option<String> = conn
                .query_row(
                    "SELECT payload FROM canonical_equities WHERE share_class_figi = ?1",
                    params![figi],
                    |row| row.get(0),
                )
                .optional()?;
            payload
                .map(|p| serde_json::from_str(&p).map_err(|e| Error::Data(e.to_string())))
                .transpose()
        })
    }

    /// Stores an arbitrary JSON payload under `(cache_name, key)`,
    /// stamped with the current unix time for later TTL eviction.
    pub fn save_cache_entry(&self, cache_name: &str, key: &str, payload: &serde_json::Value) -> Result<()> {
        let created_at = unix_now();
        let serialised = serde_json::to_string(payload).map_err(|e| Error::Data(e.to_string()))?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO object_cache (cache_name, key, created_at, payload) VALUES (?1, ?2, ?3, ?4)",
                params![cache_name, key, created_at, serialised],
            )?;
            Ok(())
        })
    }

    pub fn save_cache(&self, cache_name: &str, payload: &serde_json::Value) -> Result<()> {
        self.save_cache_entry(cache_name, "_", payload)
    }

    /// Loads a cache entry, purging it first if it has outlived the
    /// configured TTL. A TTL of zero disables eviction entirely.
    pub fn load_cache_entry(&self, cache_name: &str, key: &str) -> Result<Option<serde_json::Value>> {
        self.with_connection(|conn| {
            if self.ttl_seconds > 0 {
                purge_expired(conn, cache_name, key, self.ttl_seconds)?;
            }
            let payload: Option<String> = conn
                .query_row(
                    "SELECT payload FROM object_cache WHERE cache_name = ?1 AND key = ?2",
                    params![cache_name, key],
                    |row| row.get(0),
                )
                .optional()?;
            payload
                .map(|p| serde_json::from_str(&p).map_err(|e| Error::Data(e.to_string())))
                .transpose()
        })
    }

    pub fn load_cache(&self, cache_name: &str) -> Result<Option<serde_json::Value>> {
        self.load_cache_entry(cache_name, "_")
    }

    /// Writes every canonical equity to a gzip-compressed NDJSON file,
    /// ordered by share-class FIGI ascending. Runs on a blocking thread:
    /// a full table scan plus gzip encoding is long enough to matter,
    /// same call as the teacher makes for its own full-table export paths.
    pub async fn export(&self, path: impl AsRef<Path>) -> Result<usize> {
        let store = self.clone();
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || store.export_sync(&path))
            .await
            .map_err(|e| Error::Data(e.to_string()))?
    }

    fn export_sync(&self, path: impl AsRef<Path>) -> Result<usize> {
        let equities = self.load_canonical_equities()?;
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::Data(e.to_string()))?;
        }
        let file = fs::File::create(path).map_err(|e| Error::Data(e.to_string()))?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::best());
        for equity in &equities {
            let line = serde_json::to_string(equity).map_err(|e| Error::Data(e.to_string()))?;
            writeln!(encoder, "{line}").map_err(|e| Error::Data(e.to_string()))?;
        }
        encoder.finish().map_err(|e| Error::Data(e.to_string()))?;
        info!(count = equities.len(), path = %path.display(), "exported canonical equities");
        Ok(equities.len())
    }

    /// Replaces the store's canonical equities with the contents of a
    /// gzip NDJSON artifact inside a single transaction, then compacts
    /// the database file. Runs on a blocking thread: the transaction
    /// plus the trailing `VACUUM` hold the connection for long enough
    /// to block the async runtime otherwise.
    pub async fn rebuild_from_export(&self, path: impl AsRef<Path>) -> Result<usize> {
        let store = self.clone();
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || store.rebuild_from_export_sync(&path))
            .await
            .map_err(|e| Error::Data(e.to_string()))?
    }

    fn rebuild_from_export_sync(&self, path: impl AsRef<Path>) -> Result<usize> {
        let file = fs::File::open(path.as_ref()).map_err(|e| Error::Data(e.to_string()))?;
        let mut decoder = GzDecoder::new(BufReader::new(file));
        let mut contents = String::new();
        decoder
            .read_to_string(&mut contents)
            .map_err(|e| Error::Data(e.to_string()))?;

        let mut equities = Vec::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            let equity: CanonicalEquity =
                serde_json::from_str(line).map_err(|e| Error::Data(e.to_string()))?;
            equities.push(equity);
        }

        self.with_connection(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM canonical_equities", [])?;
            for equity in &equities {
                let payload = serde_json::to_string(equity).map_err(|e| Error::Data(e.to_string()))?;
                tx.execute(
                    "INSERT OR REPLACE INTO canonical_equities (share_class_figi, payload) VALUES (?1, ?2)",
                    params![equity.share_class_figi().as_str(), payload],
                )?;
            }
            tx.commit()?;
            Ok(())
        })?;
        self.with_connection(|conn| {
            conn.execute_batch("VACUUM;")?;
            Ok(())
        })?;
        info!(count = equities.len(), "rebuilt canonical equities from export");
        Ok(equities.len())
    }
}

fn init_equity_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS canonical_equities (
            share_class_figi TEXT PRIMARY KEY,
            payload TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn init_cache_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS object_cache (
            cache_name TEXT NOT NULL,
            key TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            payload BLOB NOT NULL,
            PRIMARY KEY (cache_name, key)
        );",
    )?;
    Ok(())
}

fn purge_expired(conn: &Connection, cache_name: &str, key: &str, ttl_seconds: i64) -> Result<()> {
    let cutoff = unix_now() - ttl_seconds;
    conn.execute(
        "DELETE FROM object_cache WHERE cache_name = ?1 AND key = ?2 AND created_at < ?3",
        params![cache_name, key, cutoff],
    )?;
    Ok(())
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{EquityFinancials, EquityIdentity};

    fn sample_equity(figi: &str) -> CanonicalEquity {
        CanonicalEquity {
            identity: EquityIdentity {
                name: "Example Corp".to_string(),
                symbol: "EXC".to_string(),
                share_class_figi: crate::schemas::Figi::parse(figi).unwrap(),
                isin: None,
                cusip: None,
            },
            financials: EquityFinancials {
                mics: None,
                currency: None,
                last_price: None,
                market_cap: None,
            },
        }
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path().join("store.db"), 1440).unwrap();
        let equity = sample_equity("BBG000000001");
        store.save_canonical_equities(&[equity.clone()]).await.unwrap();

        let loaded = store.load_canonical_equity("BBG000000001").unwrap().unwrap();
        assert_eq!(loaded, equity);
    }

    #[test]
    fn zero_ttl_never_expires() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path().join("store.db"), 0).unwrap();
        store
            .save_cache_entry("test_cache", "k", &serde_json::json!({"a": 1}))
            .unwrap();

        store
            .with_connection(|conn| {
                conn.execute(
                    "UPDATE object_cache SET created_at = created_at - 999999999 WHERE cache_name = 'test_cache'",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        let loaded = store.load_cache_entry("test_cache", "k").unwrap();
        assert!(loaded.is_some());
    }

    #[test]
    fn entry_older_than_ttl_is_purged_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path().join("store.db"), 5).unwrap();
        store
            .save_cache_entry("test_cache", "k", &serde_json::json!({"a": 1}))
            .unwrap();

        // back-date the row past TTL (5 minutes = 300 seconds)
        store
            .with_connection(|conn| {
                conn.execute(
                    "UPDATE object_cache SET created_at = created_at - 301 WHERE cache_name = 'test_cache'",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        let loaded = store.load_cache_entry("test_cache", "k").unwrap();
        assert!(loaded.is_none());

        let remaining: i64 = store
            .with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM object_cache WHERE cache_name = 'test_cache'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn export_then_rebuild_round_trips_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path().join("store.db"), 1440).unwrap();
        store
            .save_canonical_equities(&[sample_equity("BBG000000002"), sample_equity("BBG000000001")])
            .await
            .unwrap();

        let export_path = dir.path().join("export.jsonl.gz");
        store.export(&export_path).await.unwrap();

        let rebuilt = CacheStore::open(dir.path().join("store2.db"), 1440).unwrap();
        rebuilt.rebuild_from_export(&export_path).await.unwrap();

        let equities = rebuilt.load_canonical_equities().unwrap();
        assert_eq!(equities.len(), 2);
        assert_eq!(equities[0].share_class_figi().as_str(), "BBG000000001");
        assert_eq!(equities[1].share_class_figi().as_str(), "BBG000000002");
    }
}
