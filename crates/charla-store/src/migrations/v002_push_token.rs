use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Push token cached on this device
CREATE TABLE IF NOT EXISTS push_token (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    token       TEXT NOT NULL,
    updated_at  INTEGER NOT NULL,             -- epoch millis
    device_info TEXT NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
