use rusqlite::Connection;

pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- One row per corpus. Records of a collection are only comparable
        -- when embedded by the same model.
        CREATE TABLE IF NOT EXISTS collections (
            name       TEXT PRIMARY KEY,
            model      TEXT NOT NULL,
            dimensions INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );

        -- Append-only. Rows are never updated by the pipeline.
        CREATE TABLE IF NOT EXISTS records (
            id          INTEGER PRIMARY KEY,
            collection  TEXT NOT NULL REFERENCES collections(name),
            source      TEXT NOT NULL,
            metadata    TEXT NOT NULL,  -- JSON object, includes source
            text        TEXT NOT NULL,
            embedding   BLOB NOT NULL,  -- little-endian f32s
            indexed_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection);
        CREATE INDEX IF NOT EXISTS idx_records_source ON records(collection, source);
    ")?;

    conn.execute(
        "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
