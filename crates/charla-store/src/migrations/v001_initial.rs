//! v001 -- Initial schema creation.
//!
//! Creates the single-row `session_marker` table.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Session marker (local only, never synced)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS session_marker (
    id       INTEGER PRIMARY KEY CHECK (id = 1),
    login_at INTEGER NOT NULL                 -- epoch millis
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
