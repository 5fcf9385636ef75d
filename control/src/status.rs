use std::fmt;

/// Status strings understood by the control plane.
///
/// The `-ing` values mark the start of a phase, the `-ed` values mark its end.
/// `Success` and `Error` are terminal: exactly one of them is sent per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Downloading,
    Downloaded,
    Unpacking,
    Unpacked,
    Running,
    Packing,
    Packed,
    Uploading,
    Uploaded,
    Success,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
            Self::Unpacking => "unpacking",
            Self::Unpacked => "unpacked",
            Self::Running => "running",
            Self::Packing => "packing",
            Self::Packed => "packed",
            Self::Uploading => "uploading",
            Self::Uploaded => "uploaded",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
