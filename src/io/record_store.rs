//! Journey record store - writes completed journeys to file
//!
//! Records are written in JSONL format (one JSON object per line) to the
//! file specified in config. A write failure is logged and reported to the
//! caller, but never affects the engine's committed state.

use crate::domain::journey::JourneyRecord;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

/// Append-only JSONL store for journey records
pub struct RecordStore {
    file_path: String,
}

impl RecordStore {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "record_store_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Write a record to the store file.
    /// Returns true if successful, false otherwise.
    pub fn write_record(&self, record: &JourneyRecord) -> bool {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                error!(id = %record.id, error = %e, "record_serialize_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => {
                info!(
                    id = %record.id,
                    user = %record.user,
                    mode = %record.mode,
                    distance_km = %format!("{:.3}", record.distance_km),
                    elapsed = %record.elapsed_hms,
                    points = %record.route.len(),
                    "record_stored"
                );
                true
            }
            Err(e) => {
                error!(
                    id = %record.id,
                    error = %e,
                    "record_store_failed"
                );
                false
            }
        }
    }

    /// Append a line to the store file
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "record_written");

        Ok(())
    }
}
