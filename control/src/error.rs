use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{resource}: unable to download (error {code})")]
    Download { code: u16, resource: String },
    #[error("{}: unable to upload (error {code})", path.display())]
    Upload { code: u16, path: PathBuf },
    #[error("status report '{status}' rejected (error {code})")]
    Report { code: u16, status: String },
    #[error("invalid package description from control plane: {0}")]
    Package(#[source] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Numeric status code for errors that carry one.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Download { code, .. } | Self::Upload { code, .. } | Self::Report { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }
}
