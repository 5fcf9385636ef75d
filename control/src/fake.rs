//! Fake control plane for tests only.
//!
//! Uploads are read fully into memory under a lock, so this is not a
//! substitute for a real server in dry runs.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{ControlPlane, Error, Status, UploadReceipt};

/// Recorded call to a `ControlPlane` method
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Download { run_id: String },
    Upload { archive: PathBuf },
    Report { run_id: String, status: Status, message: String },
}

#[derive(Default)]
struct FakeState {
    calls: Vec<Call>,
    bundle: Option<Vec<u8>>,
    download_code: Option<u16>,
    upload_code: Option<u16>,
    upload_body: String,
    uploaded: Vec<Vec<u8>>,
}

/// `ControlPlane` that serves a canned bundle and records every call.
///
/// Clones share state, so a test can keep one handle while the code
/// under test owns another.
#[derive(Clone, Default)]
pub struct RecordingClient {
    state: Arc<Mutex<FakeState>>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serve `bytes` as the input bundle for any run.
    pub fn with_bundle(self, bytes: Vec<u8>) -> Self {
        self.state().bundle = Some(bytes);
        self
    }

    /// Make every download fail with the given status code.
    pub fn fail_download(self, code: u16) -> Self {
        self.state().download_code = Some(code);
        self
    }

    /// Make every upload fail with the given status code.
    pub fn fail_upload(self, code: u16) -> Self {
        self.state().upload_code = Some(code);
        self
    }

    /// Body returned by a successful upload.
    pub fn with_upload_body(self, body: &str) -> Self {
        self.state().upload_body = body.to_owned();
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// `(status, message)` of every report, in order.
    pub fn reports(&self) -> Vec<(Status, String)> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Report {
                    status, message, ..
                } => Some((*status, message.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.reports().into_iter().map(|(status, _)| status).collect()
    }

    /// Contents of every archive that was uploaded, read at upload time.
    pub fn uploaded(&self) -> Vec<Vec<u8>> {
        self.state().uploaded.clone()
    }
}

impl ControlPlane for RecordingClient {
    fn download(&self, run_id: &str, dest: &mut dyn Write) -> Result<u64, Error> {
        let mut state = self.state();
        state.calls.push(Call::Download {
            run_id: run_id.to_owned(),
        });

        if let Some(code) = state.download_code {
            return Err(Error::Download {
                code,
                resource: format!("{run_id}.tar.gz"),
            });
        }
        match &state.bundle {
            Some(bytes) => {
                dest.write_all(bytes)?;
                Ok(bytes.len() as u64)
            }
            None => Err(Error::Download {
                code: 404,
                resource: format!("{run_id}.tar.gz"),
            }),
        }
    }

    fn upload(&self, archive: &Path) -> Result<UploadReceipt, Error> {
        let mut state = self.state();
        state.calls.push(Call::Upload {
            archive: archive.to_path_buf(),
        });

        if let Some(code) = state.upload_code {
            return Err(Error::Upload {
                code,
                path: archive.to_path_buf(),
            });
        }
        let contents = std::fs::read(archive)?;
        state.uploaded.push(contents);
        Ok(UploadReceipt::from_body(&state.upload_body))
    }

    fn report(&self, run_id: &str, status: Status, message: &str) -> Result<(), Error> {
        self.state().calls.push(Call::Report {
            run_id: run_id.to_owned(),
            status,
            message: message.to_owned(),
        });
        Ok(())
    }
}
