use std::collections::HashSet;

use rusqlite::params;

use crate::{
    config,
    domain::fingerprint::Fingerprint,
    storage::{
        db,
        error::StorageError,
        schema::{VIDEO_HASH, WATCHED_VIDEOS},
    },
};

/// The durable set of fingerprints already presented to the user.
///
/// Backed by the single `watched_videos` table; every operation is one
/// short statement on the owned connection, so concurrent readers never
/// observe a half-written entry.
pub struct WatchedStore {
    pub(crate) db: rusqlite::Connection,
}

impl WatchedStore {
    /// Opens the configured database (creating the schema if needed).
    pub fn new(config: &config::Database) -> Result<Self, StorageError> {
        Ok(Self {
            db: db::open(config)?,
        })
    }

    pub fn from_existing_conn(db: rusqlite::Connection) -> Self {
        Self { db }
    }

    pub fn is_watched(&self, fingerprint: &Fingerprint) -> Result<bool, StorageError> {
        let count: i64 = self.db.query_row(
            &format!("SELECT COUNT(*) FROM {WATCHED_VIDEOS} WHERE {VIDEO_HASH} = ?1"),
            params![fingerprint.to_hex()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Idempotent insert: marking an already-watched fingerprint is a
    /// silent success.
    pub fn mark_watched(&self, fingerprint: &Fingerprint) -> Result<(), StorageError> {
        self.db.execute(
            &format!("INSERT OR IGNORE INTO {WATCHED_VIDEOS} ({VIDEO_HASH}) VALUES (?1)"),
            params![fingerprint.to_hex()],
        )?;
        Ok(())
    }

    /// Removes the entry if present; absence is not an error.
    pub fn unmark(&self, fingerprint: &Fingerprint) -> Result<(), StorageError> {
        self.db.execute(
            &format!("DELETE FROM {WATCHED_VIDEOS} WHERE {VIDEO_HASH} = ?1"),
            params![fingerprint.to_hex()],
        )?;
        Ok(())
    }

    /// Snapshot of every watched fingerprint, for the scanner's filter
    /// pass. Rows that do not parse as fingerprints are logged and
    /// skipped rather than failing the whole listing.
    pub fn list_all(&self) -> Result<HashSet<Fingerprint>, StorageError> {
        let mut stmt = self
            .db
            .prepare(&format!("SELECT {VIDEO_HASH} FROM {WATCHED_VIDEOS}"))?;

        let hashes = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut all = HashSet::with_capacity(hashes.len());
        for hash in hashes {
            match Fingerprint::from_hex(hash.trim()) {
                Ok(fingerprint) => {
                    all.insert(fingerprint);
                }
                Err(_) => {
                    log::warn!("table {WATCHED_VIDEOS} contains invalid fingerprint {hash:?}");
                }
            }
        }
        Ok(all)
    }

    pub fn watched_count(&self) -> Result<usize, StorageError> {
        let count: i64 = self.db.query_row(
            &format!("SELECT COUNT(*) FROM {WATCHED_VIDEOS}"),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
