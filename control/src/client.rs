use std::io::Write;
use std::path::Path;

use serde_json::{Map, Value};

use crate::{Error, Status};

/// What the control plane sent back after accepting an uploaded archive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadReceipt {
    /// Arbitrary key/value metadata (e.g. where results can be picked up).
    pub result: Map<String, Value>,
}

impl UploadReceipt {
    /// Interpret a response body: a JSON object is used as-is,
    /// anything else is kept verbatim under the `resp` key.
    pub fn from_body(body: &str) -> Self {
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(result)) => Self { result },
            _ => {
                let mut result = Map::new();
                result.insert("resp".to_owned(), Value::String(body.to_owned()));
                Self { result }
            }
        }
    }
}

/// Operations the execution agent needs from the control plane.
///
/// Implementations must be shareable with the background status reporter.
pub trait ControlPlane: Send + Sync {
    /// Stream the input bundle for `run_id` into `dest`, returning the number of bytes written.
    fn download(&self, run_id: &str, dest: &mut dyn Write) -> Result<u64, Error>;

    /// Upload a packed results archive.
    fn upload(&self, archive: &Path) -> Result<UploadReceipt, Error>;

    /// Report a status transition for `run_id`.
    fn report(&self, run_id: &str, status: Status, message: &str) -> Result<(), Error>;
}
