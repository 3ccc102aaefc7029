use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::{
    config::Database,
    storage::{error::StorageError, schema},
};

/// Database file used when the config names none, next to the working
/// directory like the rest of the server's state.
pub const DEFAULT_DB_FILE: &str = "watched_videos.db";

fn open_in_memory() -> Result<Connection, rusqlite::Error> {
    Connection::open_in_memory()
}

fn open_from_file(path: &Path) -> Result<Connection, rusqlite::Error> {
    Connection::open(path)
}

pub fn open(config: &Database) -> Result<Connection, StorageError> {
    let db = if config.in_memory {
        open_in_memory()?
    } else {
        let path = config
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE));
        // SQLite will not create missing directories itself.
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        open_from_file(&path)?
    };
    schema::init(&db)?;
    Ok(db)
}
