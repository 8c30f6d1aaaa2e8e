//! Shared SQLite connection tuning

use rusqlite::Connection;

/// Apply the PRAGMAs every writer connection uses.
///
/// - WAL journal so readers never block the poller's writes
/// - NORMAL sync (durable at checkpoint, fine for cursor state)
/// - temp tables in memory, 64MB mmap, ~8MB page cache
/// - autocheckpoint every 1000 pages
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "mmap_size", 67_108_864i64)?;
    conn.pragma_update(None, "cache_size", -8_000i64)?;
    conn.pragma_update(None, "wal_autocheckpoint", 1000i64)?;
    conn.pragma_update(None, "busy_timeout", 5_000i64)?;
    Ok(())
}
