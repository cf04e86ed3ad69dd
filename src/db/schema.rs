// Database schema: table creation and migrations.
//
// We use a simple version-based migration approach: a `schema_version` table
// tracks which migrations have run, and each migration is a function that
// executes SQL statements.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet.
///
/// This is idempotent and safe to call on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Tracks schema version for future migrations
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS profiles (
            id TEXT PRIMARY KEY,
            name TEXT,
            interests TEXT NOT NULL DEFAULT '[]',  -- JSON array of strings
            auto_accept_connections INTEGER NOT NULL DEFAULT 0,
            is_visible INTEGER NOT NULL DEFAULT 1,
            emoji_signature TEXT,
            activity_fingerprint TEXT,             -- JSON, rebuilt after every visit
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Append-only log of raw visits
        CREATE TABLE IF NOT EXISTS location_visits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
            lat REAL NOT NULL,
            lng REAL NOT NULL,
            place_type TEXT NOT NULL,
            place_name TEXT,
            time_of_day TEXT NOT NULL,
            day_type TEXT NOT NULL,
            visited_at TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- One row per (user, bucket)
        CREATE TABLE IF NOT EXISTS activity_patterns (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
            place_type TEXT NOT NULL,
            time_of_day TEXT NOT NULL,
            day_type TEXT NOT NULL,
            visit_count INTEGER NOT NULL DEFAULT 0 CHECK (visit_count >= 0),
            frequency_score REAL NOT NULL DEFAULT 0 CHECK (frequency_score >= 0),
            last_visit_at TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (user_id, place_type, time_of_day, day_type)
        );

        CREATE TABLE IF NOT EXISTS compatibility_weights (
            user_id TEXT PRIMARY KEY REFERENCES profiles(id) ON DELETE CASCADE,
            interest_weight REAL NOT NULL,
            behavior_weight REAL NOT NULL,
            feedback_weight REAL NOT NULL,
            data_points_count INTEGER NOT NULL DEFAULT 0,
            version INTEGER NOT NULL DEFAULT 0,   -- bumped on every write (compare-and-swap)
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS presence (
            user_id TEXT PRIMARY KEY REFERENCES profiles(id) ON DELETE CASCADE,
            lat REAL NOT NULL,
            lng REAL NOT NULL,
            geohash TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS connection_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
            receiver_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (sender_id, receiver_id)
        );

        -- Exactly one row per unordered pair, keyed by pair_id
        CREATE TABLE IF NOT EXISTS matches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pair_id TEXT NOT NULL UNIQUE,
            uid_a TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
            uid_b TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
            status TEXT NOT NULL,
            shared_interests TEXT NOT NULL DEFAULT '[]',
            shared_emoji_code TEXT,
            meet_code TEXT,
            venue_lat REAL,
            venue_lng REAL,
            venue_name TEXT,
            landmark TEXT,
            last_seen_together_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            CHECK (uid_a < uid_b)
        );

        CREATE TABLE IF NOT EXISTS meetup_feedback (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            match_id INTEGER NOT NULL REFERENCES matches(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
            rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
            feedback_text TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_visits_user
            ON location_visits(user_id, visited_at);

        -- Prefix scans for nearby search
        CREATE INDEX IF NOT EXISTS idx_presence_geohash
            ON presence(geohash);

        CREATE INDEX IF NOT EXISTS idx_matches_uid_a ON matches(uid_a);
        CREATE INDEX IF NOT EXISTS idx_matches_uid_b ON matches(uid_b);

        CREATE INDEX IF NOT EXISTS idx_feedback_match
            ON meetup_feedback(match_id);
        ",
    )
    .context("Failed to create database tables")?;

    // Record initial schema version if not already set
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [1],
    )?;

    // Migration v2: track when the fingerprint snapshot was last rebuilt,
    // so readers can tell how stale their copy is.
    run_migration(conn, 2, |c| {
        c.execute_batch("ALTER TABLE profiles ADD COLUMN fingerprint_updated_at TEXT;")
    })?;

    // Migration v3: one rating per participant per match. Older files may
    // hold repeats; the first rating wins.
    run_migration(conn, 3, |c| {
        c.execute_batch(
            "DELETE FROM meetup_feedback WHERE id NOT IN (
                SELECT MIN(id) FROM meetup_feedback GROUP BY match_id, user_id
             );
             CREATE UNIQUE INDEX IF NOT EXISTS idx_feedback_one_per_user
                ON meetup_feedback(match_id, user_id);",
        )
    })?;

    Ok(())
}

/// Run a migration if it hasn't been applied yet.
/// The migration function receives the connection and should execute its SQL.
fn run_migration<F>(conn: &Connection, version: i64, migrate: F) -> Result<()>
where
    F: FnOnce(&Connection) -> rusqlite::Result<()>,
{
    let already_applied: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM schema_version WHERE version = ?1",
        [version],
        |row| row.get(0),
    )?;

    if !already_applied {
        migrate(conn).with_context(|| format!("Migration v{version} failed"))?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
    }

    Ok(())
}

/// Count the number of tables in the database (useful for init confirmation).
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tables_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
    }

    #[test]
    fn test_table_count() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        // schema_version, profiles, location_visits, activity_patterns,
        // compatibility_weights, presence, connection_requests, matches,
        // meetup_feedback = 9 tables
        assert_eq!(table_count(&conn).unwrap(), 9i64);
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();

        let versions: Vec<i64> = conn
            .prepare("SELECT version FROM schema_version ORDER BY version")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[test]
    fn test_feedback_is_unique_per_participant() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO profiles (id) VALUES ('a'), ('b');
             INSERT INTO matches (pair_id, uid_a, uid_b, status) VALUES ('p', 'a', 'b', 'connected');
             INSERT INTO meetup_feedback (match_id, user_id, rating) VALUES (1, 'a', 4);",
        )
        .unwrap();
        let repeat = conn.execute(
            "INSERT INTO meetup_feedback (match_id, user_id, rating) VALUES (1, 'a', 2)",
            [],
        );
        assert!(repeat.is_err());
    }

    #[test]
    fn test_matches_enforce_canonical_order() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn.execute_batch("INSERT INTO profiles (id) VALUES ('a'), ('b');")
            .unwrap();
        let result = conn.execute(
            "INSERT INTO matches (pair_id, uid_a, uid_b, status) VALUES ('p', 'b', 'a', 'connected')",
            [],
        );
        assert!(result.is_err());
    }
}
