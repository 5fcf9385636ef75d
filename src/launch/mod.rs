/// Writes launch scripts
mod script_builder;

/// Execution backends and their settings
mod backend;
pub use backend::{Backend, BackendKind, QsubOptions, SbatchOptions};

/// Generates and submits launch scripts
mod launcher;
pub use launcher::Launcher;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unable to start launch command {command}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Launch command {command} failed ({status})\n{stderr}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}
