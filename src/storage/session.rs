//! Session storage: the record of which strategy is active.

use std::{fs, io};

use crate::model::SessionInfo;

use super::{Result, Storage};

impl Storage {
    /// Writes the session record, replacing any previous one.
    pub fn save_session(&self, info: &SessionInfo) -> Result<()> {
        let json = serde_json::to_string_pretty(info)?;
        fs::write(self.session_path(), json)?;
        Ok(())
    }

    /// Loads the session record. `None` when no session is active.
    pub fn load_session(&self) -> Result<Option<SessionInfo>> {
        let json = match fs::read_to_string(self.session_path()) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Removes the session record.
    ///
    /// Idempotent: does nothing if there is no session.
    pub fn clear_session(&self) -> Result<()> {
        match fs::remove_file(self.session_path()) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
