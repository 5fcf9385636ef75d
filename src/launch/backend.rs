use std::path::PathBuf;

use serde::Deserialize;

/// Which kind of backend runs the launch script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Execute the script directly with bash
    #[default]
    #[value(alias = "bash")]
    #[serde(alias = "bash")]
    Direct,
    /// Submit to a PBS/Torque queue
    Qsub,
    /// Submit to a Slurm queue
    Sbatch,
}

/// PBS/Torque submission settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QsubOptions {
    /// The queue-submit program
    pub command: PathBuf,
    pub queue: String,
    pub memory: String,
}

impl Default for QsubOptions {
    fn default() -> Self {
        Self {
            command: PathBuf::from("/opt/torque/bin/qsub"),
            queue: String::from("debug"),
            memory: String::from("10gb"),
        }
    }
}

/// Slurm submission settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SbatchOptions {
    /// The batch-submit program
    pub command: String,
    pub qos: String,
    pub job_name: String,
    pub memory: String,
    /// Environment module loaded before submitting
    pub module: String,
    /// Sourced before loading the module
    pub bashrc: PathBuf,
}

impl Default for SbatchOptions {
    fn default() -> Self {
        Self {
            command: String::from("sbatch"),
            qos: String::from("blanca-csdms"),
            job_name: String::from("wmt"),
            memory: String::from("8000MB"),
            module: String::from("slurm/blanca"),
            bashrc: PathBuf::from("/etc/bashrc"),
        }
    }
}

/// A backend with its settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Direct,
    Qsub(QsubOptions),
    Sbatch(SbatchOptions),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Direct => BackendKind::Direct,
            Self::Qsub(_) => BackendKind::Qsub,
            Self::Sbatch(_) => BackendKind::Sbatch,
        }
    }
}

impl From<BackendKind> for Backend {
    fn from(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Direct => Self::Direct,
            BackendKind::Qsub => Self::Qsub(QsubOptions::default()),
            BackendKind::Sbatch => Self::Sbatch(SbatchOptions::default()),
        }
    }
}
