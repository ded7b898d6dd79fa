//! Status sink that logs transitions and mirrors them into a file.

use std::fs;
use std::path::PathBuf;

use iambroker_reconciler::{Status, StatusSink};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Serialize)]
struct StatusRecord<'a> {
    status: Status,
    message: &'a str,
}

pub struct LogStatusSink {
    file: Option<PathBuf>,
    last: Option<(Status, String)>,
}

impl LogStatusSink {
    pub fn new(file: Option<PathBuf>) -> Self {
        Self { file, last: None }
    }

    fn write_file(&self, status: Status, message: &str) {
        let Some(path) = &self.file else {
            return;
        };
        let record = StatusRecord { status, message };
        let result = serde_json::to_vec(&record)
            .map_err(std::io::Error::other)
            .and_then(|bytes| fs::write(path, bytes));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to write status file");
        }
    }
}

impl StatusSink for LogStatusSink {
    fn set(&mut self, status: Status, message: &str) {
        if self
            .last
            .as_ref()
            .is_some_and(|(s, m)| *s == status && m == message)
        {
            return;
        }

        match status {
            Status::Blocked => warn!(status = ?status, detail = message, "status changed"),
            Status::Maintenance | Status::Active => info!(status = ?status, detail = message, "status changed"),
        }
        self.write_file(status, message);
        self.last = Some((status, message.to_string()));
    }
}
