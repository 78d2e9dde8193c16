//! Deployment log storage: append-only, one JSON line per session.

use std::{fs, io};

// Traits must be in scope for `.lines()` on `BufReader` and `.write_all()` on `File`.
use io::{BufRead, Write};

use crate::model::DeploymentLogEntry;

use super::{Result, Storage};

impl Storage {
    /// Appends one entry to the deployment log.
    pub fn append_deployment(&self, entry: &DeploymentLogEntry) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.deployments_path())?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Loads every deployment log entry, oldest first.
    pub fn load_deployments(&self) -> Result<Vec<DeploymentLogEntry>> {
        let file = match fs::File::open(self.deployments_path()) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let reader = io::BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if !line.is_empty() {
                entries.push(serde_json::from_str(&line)?);
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use jiff::Timestamp;

    use crate::model::DeploymentOutcome;
    use crate::storage::test_storage;

    use super::*;

    fn entry(session_id: &str, outcome: DeploymentOutcome) -> DeploymentLogEntry {
        DeploymentLogEntry {
            timestamp: Timestamp::now(),
            session_id: session_id.into(),
            file_count: 3,
            outcome,
            files: vec![],
            errors: vec![],
        }
    }

    #[test]
    fn append_and_load_in_order() {
        let (_dir, storage) = test_storage();
        storage
            .append_deployment(&entry("a", DeploymentOutcome::Completed))
            .unwrap();
        storage
            .append_deployment(&entry("b", DeploymentOutcome::RolledBack))
            .unwrap();

        let entries = storage.load_deployments().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].session_id, "a");
        assert_eq!(entries[1].outcome, DeploymentOutcome::RolledBack);
    }

    #[test]
    fn load_empty_log() {
        let (_dir, storage) = test_storage();
        assert!(storage.load_deployments().unwrap().is_empty());
    }
}
