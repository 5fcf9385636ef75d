use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use control::{ControlPlane, Status};

use crate::fs::Fs;
use crate::transfer::TransferManager;

use super::{components_to_run, ComponentRunner, CoupledRun, Env, Error};

/// Where a [`TaskLifecycle`] is in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Downloading,
    Unpacking,
    Running,
    Packing,
    Uploading,
    Done,
    Error,
}

/// How the components of a run are executed.
pub enum RunMode {
    /// One after the other, each with its own `run.sh`
    Separate,
    /// All together, under an external model runner
    Coupled(CoupledRun),
}

/// Everything needed to execute one run.
pub struct TaskSpec {
    pub run_id: String,
    /// Control-plane URL, recorded in the run's metadata
    pub server_url: String,
    /// Directory that holds run directories and archives
    pub exec_dir: PathBuf,
    /// Environment for component processes; inherited if `None`
    pub env: Option<Env>,
    pub mode: RunMode,
    /// Copy component output to our own stdout/stderr
    pub echo: bool,
}

/// Result of [`TaskLifecycle::teardown`].
#[derive(Debug)]
pub enum Outcome {
    /// Results were uploaded and the local copy removed.
    Uploaded,
    /// Results could not be delivered; the run directory is left in place.
    Undelivered(anyhow::Error),
}

/// Owns one run's working directory and drives it through
/// download, unpack, run, pack and upload.
///
/// Intermediate phases are reported to the control plane on a best-effort
/// basis. The terminal "success"/"error" report is left to the caller
/// (see [`Slave`](super::Slave)), so that it is always the last one sent.
pub struct TaskLifecycle {
    run_id: String,
    server_url: String,
    env: Option<Env>,
    mode: RunMode,
    echo: bool,
    client: Arc<dyn ControlPlane>,
    transfer: TransferManager,
    fs: Fs,
    sim_dir: PathBuf,
    phase: Phase,
    result: Map<String, Value>,
}

impl TaskLifecycle {
    /// Prepare a run: the execution dir and the run's own directory
    /// are created if they don't exist yet.
    pub fn new(spec: TaskSpec, client: Arc<dyn ControlPlane>) -> Result<Self> {
        if spec.run_id.trim().is_empty() {
            return Err(Error::EmptyRunId.into());
        }
        let mut fs = Fs::new(&spec.exec_dir);
        fs.ensure_prefix_exists()?;
        let sim_dir = fs.create_run_dir(&spec.run_id)?;
        log::debug!("run {} in {sim_dir:?}", spec.run_id);

        Ok(Self {
            run_id: spec.run_id,
            server_url: spec.server_url,
            env: spec.env,
            mode: spec.mode,
            echo: spec.echo,
            transfer: TransferManager::new(Arc::clone(&client), fs.clone()),
            client,
            fs,
            sim_dir,
            phase: Phase::Created,
            result: Map::new(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The run's working directory.
    pub fn sim_dir(&self) -> &Path {
        &self.sim_dir
    }

    /// Metadata returned by the control plane for the uploaded results.
    pub fn result(&self) -> &Map<String, Value> {
        &self.result
    }

    /// Fetch and extract the input bundle.
    pub fn setup(&mut self) -> Result<()> {
        let outcome = self.download_and_unpack();
        self.fail_on_err(outcome)
    }

    /// Run the components.
    pub fn run(&mut self) -> Result<()> {
        self.phase = Phase::Running;
        let outcome = match &self.mode {
            RunMode::Separate => self.run_separately(),
            RunMode::Coupled(coupled) => coupled.run(
                &self.client,
                &self.server_url,
                &self.fs,
                &self.run_id,
                &self.sim_dir,
                self.env.as_ref(),
            ),
        };
        self.fail_on_err(outcome)
    }

    /// Pack and upload the results, then remove the local copy.
    /// Failures here are reported and returned, never raised.
    pub fn teardown(&mut self) -> Outcome {
        self.phase = Phase::Packing;
        self.report(Status::Packing, "packing simulation output");
        let archive = match self.transfer.pack(&self.run_id, self.fs.prefix()) {
            Ok(archive) => archive,
            Err(e) => {
                self.report(Status::Packing, &format!("{e:#}"));
                self.phase = Phase::Error;
                return Outcome::Undelivered(e);
            }
        };
        self.report(Status::Packed, "packed simulation output");

        self.phase = Phase::Uploading;
        self.report(Status::Uploading, "uploading simulation output");
        match self.transfer.upload(&archive) {
            Ok(receipt) => {
                self.result = receipt.result;
                self.report(Status::Uploaded, "uploaded simulation output");
                if let Err(e) = self.cleanup() {
                    log::warn!("{}: unable to clean up: {e:#}", self.run_id);
                }
                self.phase = Phase::Done;
                Outcome::Uploaded
            }
            Err(e) => {
                let e = anyhow::Error::from(e)
                    .context(format!("uploading {archive:?}; run left in {:?}", self.sim_dir));
                self.report(Status::Uploading, &format!("{e:#}"));
                self.phase = Phase::Error;
                Outcome::Undelivered(e)
            }
        }
    }

    /// setup, run, then teardown. Errors from setup or run stop the pipeline.
    pub fn execute(&mut self) -> Result<Outcome> {
        self.setup()?;
        self.run()?;
        Ok(self.teardown())
    }

    /// Remove the run directory and its archive.
    pub fn cleanup(&self) -> Result<()> {
        self.fs.delete_dir(&self.sim_dir)?;
        let archive = self.fs.archive(&self.run_id);
        if self.fs.exists(&archive) {
            self.fs.delete_file(&archive)?;
        }
        Ok(())
    }

    fn download_and_unpack(&mut self) -> Result<()> {
        let dest = self.fs.prefix().to_path_buf();

        self.phase = Phase::Downloading;
        self.report(Status::Downloading, "downloading simulation data");
        let archive = self
            .transfer
            .download(&self.run_id, &dest)
            .context("downloading simulation data")?;
        self.report(Status::Downloaded, "downloaded simulation data");

        self.phase = Phase::Unpacking;
        self.report(Status::Unpacking, "unpacking simulation data");
        self.transfer
            .unpack(&archive, &dest)
            .context("unpacking simulation data")?;
        self.report(Status::Unpacked, "unpacked simulation data");
        Ok(())
    }

    fn run_separately(&self) -> Result<()> {
        let runner = ComponentRunner::new(self.env.clone()).with_echo(self.echo);
        let components = components_to_run(&self.sim_dir)
            .with_context(|| format!("looking for components in {:?}", self.sim_dir))?;
        if components.is_empty() {
            log::warn!("{}: no components to run in {:?}", self.run_id, self.sim_dir);
        }
        for component in &components {
            self.report(Status::Running, &format!("running component: {}", component.name));
            runner.run(&self.fs, component)?;
        }
        Ok(())
    }

    fn fail_on_err<T>(&mut self, outcome: Result<T>) -> Result<T> {
        if outcome.is_err() {
            self.phase = Phase::Error;
        }
        outcome
    }

    /// Best-effort progress report.
    fn report(&self, status: Status, message: &str) {
        log::info!("{status}: {message}");
        if let Err(e) = self.client.report(&self.run_id, status, message) {
            log::warn!("{}: unable to report {status}: {e}", self.run_id);
        }
    }
}
