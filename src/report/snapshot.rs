use std::io;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use util::Timer;

use super::tail::{read_status_record, tail_with_line_numbers, TailLine};

/// Number of stdout lines carried by a snapshot.
const DEFAULT_LINES: usize = 10;

/// What a running model looks like at one instant.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    /// Seconds since the status source was created.
    pub elapsed: f64,
    /// The most recent lines of the model's stdout.
    pub lines: Vec<TailLine>,
    /// The last structured record the model wrote, if any.
    pub fields: Mapping,
}

impl StatusSnapshot {
    /// Human-readable stdout summary.
    pub fn stdout_text(&self) -> String {
        if self.lines.is_empty() {
            let dots = (self.elapsed / 10.0) as usize % 10;
            return format!("Waiting for stdout{}", ".".repeat(dots));
        }
        let mut text = format!("Last {} lines from stdout:\n", self.lines.len());
        for line in &self.lines {
            text.push_str(&format!("\n[{}] {}", line.number, line.text));
        }
        text
    }

    /// True if the model has flagged itself as finished with `done: true`.
    pub fn is_completed(&self) -> bool {
        matches!(self.fields.get("done"), Some(Value::Bool(true)))
    }

    /// Render as the YAML document sent with a "running" report.
    pub fn render(&self) -> Result<String, serde_yaml::Error> {
        let mut doc = Mapping::new();
        doc.insert("stdout".into(), self.stdout_text().into());
        doc.insert("time_elapsed".into(), self.elapsed.into());
        for (key, value) in &self.fields {
            doc.insert(key.clone(), value.clone());
        }
        serde_yaml::to_string(&doc)
    }
}

/// The pair of files a model writes while it runs.
#[derive(Debug, Clone)]
pub struct StatusSource {
    stdout_file: PathBuf,
    record_file: PathBuf,
    timer: Timer,
}

impl StatusSource {
    pub fn new(stdout_file: &Path, record_file: &Path) -> Self {
        Self {
            stdout_file: stdout_file.to_path_buf(),
            record_file: record_file.to_path_buf(),
            timer: Timer::now(),
        }
    }

    /// Take a snapshot. A stdout file that does not exist yet counts as empty.
    pub fn snapshot(&self) -> io::Result<StatusSnapshot> {
        let lines = match tail_with_line_numbers(&self.stdout_file, DEFAULT_LINES) {
            Ok(lines) => lines,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        Ok(StatusSnapshot {
            elapsed: self.timer.elapsed_secs(),
            lines,
            fields: read_status_record(&self.record_file)?,
        })
    }
}
