use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use control::{ControlPlane, UploadReceipt};

use crate::fs::Fs;

/// Packing and unpacking of run archives
mod archive;
pub use archive::{pack, unpack};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Attempted path traversal in archive: \"{member}\" would extract outside {dest}")]
    PathTraversal { member: String, dest: String },
    #[error("Archive member \"{member}\" links outside {dest} (to \"{target}\")")]
    LinkTraversal {
        member: String,
        target: String,
        dest: String,
    },
    #[error("Archive member \"{member}\" would be written through a symlink in the archive (into {dest})")]
    ThroughSymlink { member: String, dest: String },
    #[error("Malformed archive {archive}")]
    Malformed {
        archive: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Extracting {archive}")]
    Extract {
        archive: String,
        #[source]
        source: std::io::Error,
    },
}

/// Moves run bundles between the control plane and the execution directory.
pub struct TransferManager {
    client: Arc<dyn ControlPlane>,
    fs: Fs,
}

impl TransferManager {
    pub fn new(client: Arc<dyn ControlPlane>, fs: Fs) -> Self {
        Self { client, fs }
    }

    /// Stream the input bundle for `run_id` into `dest_dir/run_id.tar.gz`.
    /// A partially written archive is removed if the transfer fails.
    pub fn download(&self, run_id: &str, dest_dir: &Path) -> Result<PathBuf> {
        let path = dest_dir.join(format!("{run_id}.tar.gz"));
        let file = self.fs.create_file(&path)?;
        let mut writer = BufWriter::new(file);

        let downloaded = self
            .client
            .download(run_id, &mut writer)
            .map_err(anyhow::Error::from)
            .and_then(|n_bytes| {
                writer.flush()?;
                Ok(n_bytes)
            });
        drop(writer);

        match downloaded {
            Ok(n_bytes) => {
                log::debug!("wrote {n_bytes} bytes to {path:?}");
                Ok(path)
            }
            Err(e) => {
                if let Err(rm) = self.fs.delete_file(&path) {
                    log::warn!("unable to remove partial download {path:?}: {rm:#}");
                }
                Err(e)
            }
        }
    }

    /// Extract `archive` into `dest_dir`; see [`unpack`].
    pub fn unpack(&self, archive: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
        self.fs.check_whitelist(dest_dir)?;
        let roots = unpack(archive, dest_dir)?;
        Ok(roots)
    }

    /// Create `base_dir/run_id.tar.gz` from the tree at `base_dir/run_id`.
    pub fn pack(&self, run_id: &str, base_dir: &Path) -> Result<PathBuf> {
        self.fs.check_whitelist(base_dir)?;
        pack(run_id, base_dir).with_context(|| format!("packing {:?}", base_dir.join(run_id)))
    }

    /// Hand a packed archive to the control plane. Failures are returned as-is;
    /// whether they are fatal is up to the caller.
    pub fn upload(&self, archive: &Path) -> Result<UploadReceipt, control::Error> {
        self.client.upload(archive)
    }
}

/// Open a `.tar.gz` for reading.
fn open_archive(path: &Path) -> std::io::Result<tar::Archive<flate2::read::GzDecoder<File>>> {
    let file = File::open(path)?;
    Ok(tar::Archive::new(flate2::read::GzDecoder::new(file)))
}
