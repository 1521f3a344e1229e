use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Overwrite the login marker with `login_at` (epoch millis).
    pub fn set_login_at(&self, login_at: i64) -> Result<()> {
        self.conn().execute(
            "INSERT INTO session_marker (id, login_at) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET login_at = excluded.login_at",
            params![login_at],
        )?;
        Ok(())
    }

    pub fn login_at(&self) -> Result<Option<i64>> {
        let login_at = self
            .conn()
            .query_row("SELECT login_at FROM session_marker WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(login_at)
    }

    pub fn clear_login(&self) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM session_marker WHERE id = 1", [])?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_overwrites_and_clears() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.login_at().unwrap(), None);

        db.set_login_at(1_000).unwrap();
        db.set_login_at(2_000).unwrap();
        assert_eq!(db.login_at().unwrap(), Some(2_000));

        assert!(db.clear_login().unwrap());
        assert_eq!(db.login_at().unwrap(), None);
        assert!(!db.clear_login().unwrap());
    }
}
