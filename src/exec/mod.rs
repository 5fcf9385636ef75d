use std::collections::BTreeMap;
use std::process::ExitStatus;

/// Environment variables given to child processes
pub type Env = BTreeMap<String, String>;

/// Run a subprocess
mod run_cmd;

/// Component discovery and execution
mod component;
pub use component::{components_to_run, dir_contains_run_script, Component, ComponentRunner, RUN_SCRIPT};

/// Coupled runs under an external model runner
mod coupled;
pub use coupled::{
    CoupledRun, Manifest, ModelContext, ModelDescriptor, ModelRunner, ProcessModelRunner, RunInfo,
    INFO_FILE, MANIFEST_FILE, MODEL_FILE, RECORD_FILE, STATUS_FILE,
};

/// The per-run pipeline
mod lifecycle;
pub use lifecycle::{Outcome, Phase, RunMode, TaskLifecycle, TaskSpec};

/// Terminal reporting around a lifecycle
mod slave;
pub use slave::Slave;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Run id must not be empty")]
    EmptyRunId,
    #[error("Run manifest {0} must be a mapping or a sequence")]
    BadManifest(String),
    #[error("Model runner {program} failed ({status})")]
    ModelExited { program: String, status: ExitStatus },
}

/// A component's `run.sh` exited unsuccessfully.
#[derive(Debug, thiserror::Error)]
#[error("component {name} failed ({status})\n{stderr}")]
pub struct ComponentRunError {
    pub name: String,
    pub status: ExitStatus,
    /// Tail of the component's stderr log
    pub stderr: String,
}

/// Context attached to a failed coupled run.
#[derive(Debug, thiserror::Error)]
#[error("model run failed; last lines of output:\n{tail}")]
pub struct ModelRunError {
    pub tail: String,
}
