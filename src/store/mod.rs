//! Persistence (§4.3): schema, migrations, write path and paginated ranked search.
//!
//! There is exactly one backend (`SQLite` via `r2d2_sqlite`), so unlike the teacher's
//! `databases::Database` trait (which exists to support both `SQLite` and `MySQL`),
//! this module exposes a single concrete [`Store`] type. The trait indirection the
//! teacher needs for its two-driver world has no remaining justification here.
mod migrations;
pub mod query;

use std::panic::Location;

use r2d2::Pool;
use r2d2_sqlite::rusqlite::OptionalExtension;
use r2d2_sqlite::SqliteConnectionManager;

use crate::id::InfoHash;
use query::{build_count, build_select, OrderBy, PAGE_SIZE};

/// A file entry belonging to a persisted torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub path: String,
    pub size: i64,
}

/// The persisted projection of a metadata record (§3, "Torrent row").
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentRow {
    pub id: i64,
    pub info_hash: InfoHash,
    pub name: String,
    pub total_size: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub n_files: i64,
    pub relevance: f64,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("the query was malformed, {location}: {source}")]
    InvalidQuery {
        #[source]
        source: r2d2_sqlite::rusqlite::Error,
        location: &'static Location<'static>,
    },

    #[error("failed to create r2d2 connection pool: {source}")]
    ConnectionPool {
        #[source]
        source: r2d2::Error,
    },

    #[error("cannot order by relevance when the search phrase is empty")]
    RelevanceWithoutQuery,

    #[error("database integrity check failed: {detail}")]
    IntegrityCheckFailed { detail: String },

    #[error("insert returned a non-positive row id ({0}); this should never happen")]
    NonPositiveRowId(i64),
}

impl From<r2d2_sqlite::rusqlite::Error> for Error {
    #[track_caller]
    fn from(source: r2d2_sqlite::rusqlite::Error) -> Self {
        Error::InvalidQuery { source, location: Location::caller() }
    }
}

impl From<r2d2::Error> for Error {
    fn from(source: r2d2::Error) -> Self {
        Error::ConnectionPool { source }
    }
}

/// The embedded relational store.
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    /// Opens (creating if absent) the `SQLite` database at `path`, applies any
    /// pending migrations, and runs an integrity check.
    ///
    /// # Errors
    ///
    /// Returns [`Error`] if the connection pool cannot be built, a migration fails,
    /// or the post-migration integrity check does not pass. All of these are
    /// store-integrity failures and are fatal at startup per §7.
    pub fn open(path: &str) -> Result<Self, Error> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL; \
                 PRAGMA foreign_keys = ON; \
                 PRAGMA temp_store = 1;",
            )
        });
        let pool = Pool::builder().build(manager)?;

        let mut conn = pool.get()?;
        migrations::run(&mut conn)?;

        Ok(Self { pool })
    }

    /// §4.3 dedup gate: true if a torrent with this info-hash is already stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error`] on a connection or query failure.
    pub fn does_torrent_exist(&self, info_hash: &InfoHash) -> Result<bool, Error> {
        let conn = self.pool.get()?;
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM torrents WHERE info_hash = ?1;", [info_hash.as_bytes().as_slice()], |row| row.get(0))
            .optional()?;
        Ok(exists.is_some())
    }

    /// §4.3 write path. Rejects silently (returns `Ok(())`, writes nothing) when
    /// `total_size` would be zero or `files` is empty — this is the "semantic
    /// reject" class from §7, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error`] if the insert fails for a store-integrity reason (unique
    /// constraint violation outside of the expected dedup race, foreign-key
    /// violation, connection failure). The whole operation is one transaction: a
    /// torrent row is never observable without its file rows.
    pub fn add_new_torrent(&self, info_hash: &InfoHash, name: &str, files: &[File]) -> Result<(), Error> {
        let total_size: i64 = files.iter().map(|f| f.size).sum();
        if total_size == 0 || files.is_empty() {
            return Ok(());
        }

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        // Re-check inside the transaction: closes the race between the coordinator's
        // dedup check and this insert (§4.3 step 3).
        let exists: Option<i64> =
            tx.query_row("SELECT 1 FROM torrents WHERE info_hash = ?1;", [info_hash.as_bytes().as_slice()], |row| row.get(0)).optional()?;
        if exists.is_some() {
            return Ok(());
        }

        let now = unix_now();

        tx.execute(
            "INSERT INTO torrents (info_hash, name, total_size, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4);",
            r2d2_sqlite::rusqlite::params![info_hash.as_bytes().as_slice(), name, total_size, now],
        )?;

        let torrent_id = tx.last_insert_rowid();
        if torrent_id <= 0 {
            return Err(Error::NonPositiveRowId(torrent_id));
        }

        for file in files {
            tx.execute(
                "INSERT INTO files (torrent_id, size, path) VALUES (?1, ?2, ?3);",
                r2d2_sqlite::rusqlite::params![torrent_id, file.size, file.path],
            )?;
        }

        tx.commit()?;

        Ok(())
    }

    /// Approximate count of stored torrents (`MAX(ROWID)`, cheaper than `COUNT(*)`
    /// on a large append-only table).
    ///
    /// # Errors
    ///
    /// Returns [`Error`] on a connection or query failure.
    pub fn get_number_of_torrents(&self) -> Result<u64, Error> {
        let conn = self.pool.get()?;
        let n: Option<i64> = conn.query_row("SELECT MAX(ROWID) FROM torrents;", [], |row| row.get(0))?;
        Ok(n.unwrap_or(0).max(0) as u64)
    }

    /// Total number of results `query_torrents` would return across all pages for
    /// the same `query`, ignoring pagination.
    ///
    /// # Errors
    ///
    /// Returns [`Error`] on a connection or query failure.
    pub fn query_torrents_count(&self, query: &str) -> Result<u64, Error> {
        let has_query = !query.is_empty();
        let conn = self.pool.get()?;
        let sql = build_count(has_query);

        let count: i64 = if has_query {
            let phrase = query::escape_fts_phrase(query);
            conn.query_row(&sql, [phrase], |row| row.get(0))?
        } else {
            conn.query_row(&sql, [], |row| row.get(0))?
        };

        Ok(count.max(0) as u64)
    }

    /// §4.3 read path: one 1-indexed page (constant size 15) of torrents matching
    /// `query`, ordered by `order_by`/`ascending`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RelevanceWithoutQuery`] if `order_by` is [`OrderBy::Relevance`]
    /// and `query` is empty, or [`Error`] on a connection or query failure.
    pub fn query_torrents(&self, query: &str, order_by: OrderBy, ascending: bool, page: i64) -> Result<Vec<TorrentRow>, Error> {
        let has_query = !query.is_empty();
        if order_by == OrderBy::Relevance && !has_query {
            return Err(Error::RelevanceWithoutQuery);
        }

        let conn = self.pool.get()?;
        let sql = build_select(order_by, ascending, has_query);
        let offset = query::offset_for_page(page);

        let mut stmt = conn.prepare(&sql)?;

        let map_row = |row: &r2d2_sqlite::rusqlite::Row| -> r2d2_sqlite::rusqlite::Result<TorrentRow> {
            let info_hash_bytes: Vec<u8> = row.get(1)?;
            let info_hash = InfoHash::try_from(info_hash_bytes.as_slice())
                .map_err(|_| r2d2_sqlite::rusqlite::Error::InvalidColumnType(1, "info_hash".to_string(), r2d2_sqlite::rusqlite::types::Type::Blob))?;
            Ok(TorrentRow {
                id: row.get(0)?,
                info_hash,
                name: row.get(2)?,
                total_size: row.get(3)?,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
                n_files: row.get(6)?,
                relevance: row.get(7)?,
            })
        };

        let rows = if has_query {
            let phrase = query::escape_fts_phrase(query);
            stmt.query_map(r2d2_sqlite::rusqlite::params![phrase, PAGE_SIZE, offset], map_row)?
                .collect::<Result<Vec<_>, _>>()?
        } else {
            stmt.query_map(r2d2_sqlite::rusqlite::params![PAGE_SIZE, offset], map_row)?.collect::<Result<Vec<_>, _>>()?
        };

        Ok(rows)
    }

    /// Looks up a single torrent by info-hash.
    ///
    /// # Errors
    ///
    /// Returns [`Error`] on a connection or query failure.
    pub fn get_torrent(&self, info_hash: &InfoHash) -> Result<Option<TorrentRow>, Error> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT id, info_hash, name, total_size, created_at, updated_at, \
                 (SELECT COUNT(*) FROM files WHERE torrent_id = torrents.id) AS n_files \
                 FROM torrents WHERE info_hash = ?1;",
                [info_hash.as_bytes().as_slice()],
                |row| {
                    let info_hash_bytes: Vec<u8> = row.get(1)?;
                    Ok((
                        row.get::<_, i64>(0)?,
                        info_hash_bytes,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(id, hash_bytes, name, total_size, created_at, updated_at, n_files)| TorrentRow {
            id,
            info_hash: InfoHash::try_from(hash_bytes.as_slice()).expect("info_hash column is always 20 bytes"),
            name,
            total_size,
            created_at,
            updated_at,
            n_files,
            relevance: 0.0,
        }))
    }

    /// Lists the files belonging to a torrent by info-hash.
    ///
    /// # Errors
    ///
    /// Returns [`Error`] on a connection or query failure.
    pub fn get_files(&self, info_hash: &InfoHash) -> Result<Vec<File>, Error> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT size, path FROM files, torrents \
             WHERE files.torrent_id = torrents.id AND torrents.info_hash = ?1;",
        )?;
        let files = stmt
            .query_map([info_hash.as_bytes().as_slice()], |row| Ok(File { size: row.get(0)?, path: row.get(1)? }))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(files)
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).expect("system clock before 1970").as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("magnetico.db");
        let store = Store::open(path.to_str().unwrap()).unwrap();
        (store, dir)
    }

    #[test]
    fn add_new_torrent_then_get_torrent_round_trips() {
        let (store, _dir) = test_store();
        let info_hash = InfoHash::random();
        let files = vec![File { path: "hello".to_string(), size: 12 }];

        store.add_new_torrent(&info_hash, "hello", &files).unwrap();

        let row = store.get_torrent(&info_hash).unwrap().unwrap();
        assert_eq!(row.name, "hello");
        assert_eq!(row.total_size, 12);
        assert_eq!(row.n_files, 1);
    }

    #[test]
    fn add_new_torrent_is_idempotent() {
        let (store, _dir) = test_store();
        let info_hash = InfoHash::random();
        let files = vec![File { path: "a".to_string(), size: 1 }];

        store.add_new_torrent(&info_hash, "a", &files).unwrap();
        store.add_new_torrent(&info_hash, "a", &files).unwrap();

        assert_eq!(store.get_number_of_torrents().unwrap(), 1);
    }

    #[test]
    fn add_new_torrent_rejects_zero_total_size_without_error() {
        let (store, _dir) = test_store();
        let info_hash = InfoHash::random();
        let files = vec![File { path: "a".to_string(), size: 0 }];

        store.add_new_torrent(&info_hash, "x", &files).unwrap();

        assert!(store.get_torrent(&info_hash).unwrap().is_none());
        assert_eq!(store.get_number_of_torrents().unwrap(), 0);
    }

    #[test]
    fn atomicity_no_torrent_row_without_files() {
        let (store, _dir) = test_store();
        let info_hash = InfoHash::random();

        // Empty file list: nothing should be written.
        store.add_new_torrent(&info_hash, "x", &[]).unwrap();

        assert!(store.get_torrent(&info_hash).unwrap().is_none());
        assert_eq!(store.get_files(&info_hash).unwrap().len(), 0);
    }

    #[test]
    fn fts_search_matches_literal_substring_case_insensitively() {
        let (store, _dir) = test_store();
        let info_hash = InfoHash::random();
        store.add_new_torrent(&info_hash, "ubuntu \"22.04\" iso", &[File { path: "a".to_string(), size: 1 }]).unwrap();

        let results = store.query_torrents("22.04", OrderBy::Relevance, false, 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "ubuntu \"22.04\" iso");
    }

    #[test]
    fn fts_search_with_bare_quote_does_not_error() {
        let (store, _dir) = test_store();
        let info_hash = InfoHash::random();
        store.add_new_torrent(&info_hash, "plain name", &[File { path: "a".to_string(), size: 1 }]).unwrap();

        let results = store.query_torrents("\"", OrderBy::Relevance, false, 1).unwrap();
        assert_eq!(results.len(), 0);
    }

    #[test]
    fn relevance_ordering_requires_non_empty_query() {
        let (store, _dir) = test_store();
        let err = store.query_torrents("", OrderBy::Relevance, false, 1).unwrap_err();
        assert!(matches!(err, Error::RelevanceWithoutQuery));
    }

    #[test]
    fn pagination_covers_every_row_exactly_once() {
        let (store, _dir) = test_store();
        for i in 0..40 {
            let info_hash = InfoHash::random();
            store.add_new_torrent(&info_hash, &format!("torrent-{i:03}"), &[File { path: "a".to_string(), size: 1 }]).unwrap();
        }

        let total = store.query_torrents_count("").unwrap();
        assert_eq!(total, 40);

        let mut seen = std::collections::HashSet::new();
        let mut page = 1;
        loop {
            let rows = store.query_torrents("", OrderBy::Name, true, page).unwrap();
            if rows.is_empty() {
                break;
            }
            for row in &rows {
                assert!(seen.insert(row.id), "row {} duplicated across pages", row.id);
            }
            page += 1;
        }
        assert_eq!(seen.len(), 40);
    }
}
