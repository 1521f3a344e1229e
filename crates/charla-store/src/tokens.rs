use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;
use crate::models::LocalPushToken;

impl Database {
    pub fn save_push_token(&self, token: &LocalPushToken) -> Result<()> {
        self.conn().execute(
            "INSERT INTO push_token (id, token, updated_at, device_info) VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                token = excluded.token,
                updated_at = excluded.updated_at,
                device_info = excluded.device_info",
            params![token.token, token.updated_at, token.device_info],
        )?;
        Ok(())
    }

    pub fn push_token(&self) -> Result<Option<LocalPushToken>> {
        let token = self
            .conn()
            .query_row(
                "SELECT token, updated_at, device_info FROM push_token WHERE id = 1",
                [],
                |row| {
                    Ok(LocalPushToken {
                        token: row.get(0)?,
                        updated_at: row.get(1)?,
                        device_info: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(token)
    }

    /// Refresh the timestamp of the stored token without changing it.
    pub fn touch_push_token(&self, updated_at: i64) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE push_token SET updated_at = ?1 WHERE id = 1",
            params![updated_at],
        )?;
        Ok(affected > 0)
    }

    pub fn clear_push_token(&self) -> Result<bool> {
        let affected = self.conn().execute("DELETE FROM push_token WHERE id = 1", [])?;
        Ok(affected > 0)
    }
}
