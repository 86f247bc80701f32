use rusqlite::OptionalExtension;

use crate::error::Result;
use crate::logging::time::to_storage_string;
use crate::logging::types::SystemSettings;

use super::database::DatabaseLogger;

impl DatabaseLogger {
    pub async fn load_system_settings(&self) -> Result<Option<SystemSettings>> {
        let conn = self.connection.lock().await;
        let raw: Option<String> = conn
            .query_row("SELECT data FROM system_settings WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn save_system_settings(&self, settings: &SystemSettings) -> Result<()> {
        let data = serde_json::to_string(settings)?;
        let conn = self.connection.lock().await;
        conn.execute(
            "INSERT INTO system_settings (id, data, updated_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            (data, to_storage_string(&settings.updated_at)),
        )?;
        Ok(())
    }
}
