use rusqlite::Connection;

pub mod tables {
    pub const WATCHED_VIDEOS: &str = "watched_videos";

    pub const ALL_TABLES: &[&str] = &[WATCHED_VIDEOS];
}

pub mod columns {
    pub const VIDEO_HASH: &str = "video_hash";
}

pub use columns::*;
pub use tables::*;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS watched_videos (
    video_hash TEXT PRIMARY KEY
);
"#;

pub fn init(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA)
}
