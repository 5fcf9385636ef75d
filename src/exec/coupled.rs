use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use control::{ControlPlane, Status};

use crate::fs::Fs;
use crate::report::{tail_with_line_numbers, StatusReporter, StatusSource, DEFAULT_INTERVAL};

use super::{Env, Error, ModelRunError};

/// Model descriptor written by the control plane into every coupled run.
pub const MODEL_FILE: &str = "model.yaml";
/// Component graph of a coupled run.
pub const MANIFEST_FILE: &str = "components.yaml";
/// Metadata sidecar written before the model starts.
pub const INFO_FILE: &str = "info.yaml";
/// Combined stdout/stderr of the model runner, tailed for status reports.
pub const STATUS_FILE: &str = "stdout";
/// Structured status records appended by the model's driver.
pub const RECORD_FILE: &str = "_time.txt";

/// Lines of model output attached to a model-run failure.
const TAIL_LINES: usize = 40;

/// Contents of `model.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelDescriptor {
    /// Name of the component that drives the coupled model
    pub driver: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ModelDescriptor {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {path:?}"))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing model descriptor {path:?}"))
    }
}

/// Contents of `components.yaml`: either a mapping of component name to
/// its configuration, or a sequence of component entries.
#[derive(Debug, Clone)]
pub struct Manifest(Value);

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {path:?}"))?;
        let value: Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing manifest {path:?}"))?;
        match value {
            Value::Mapping(_) | Value::Sequence(_) => Ok(Self(value)),
            _ => Err(Error::BadManifest(path.display().to_string()).into()),
        }
    }

    /// Names of the components in the graph, in file order.
    pub fn component_names(&self) -> Vec<String> {
        match &self.0 {
            Value::Mapping(map) => map.keys().filter_map(|k| k.as_str().map(str::to_owned)).collect(),
            Value::Sequence(seq) => seq
                .iter()
                .filter_map(|entry| match entry {
                    Value::String(name) => Some(name.clone()),
                    other => other.get("name").and_then(Value::as_str).map(str::to_owned),
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Contents of `info.yaml`.
#[derive(Debug, Clone, Serialize)]
pub struct RunInfo {
    pub start_time: String,
    pub server: String,
    pub host: String,
    pub id: String,
    pub prefix: PathBuf,
    pub stdout: String,
    pub driver: String,
}

impl RunInfo {
    pub fn new(run_id: &str, server: &str, run_dir: &Path, driver: &str) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| String::from("localhost"));
        Self {
            start_time: chrono::Local::now().to_rfc3339(),
            server: server.to_owned(),
            host,
            id: run_id.to_owned(),
            prefix: run_dir.to_path_buf(),
            stdout: STATUS_FILE.to_owned(),
            driver: driver.to_owned(),
        }
    }
}

/// Everything a model runner gets to know about the run it drives.
pub struct ModelContext<'a> {
    pub run_id: &'a str,
    pub run_dir: &'a Path,
    pub model_file: &'a Path,
    pub model: &'a ModelDescriptor,
    pub manifest: &'a Manifest,
    pub env: Option<&'a Env>,
}

/// The component framework that actually executes a coupled model.
pub trait ModelRunner: Send + Sync {
    /// Run the model to completion, writing all of its output to `output`.
    fn go(&self, ctx: &ModelContext<'_>, output: File) -> Result<()>;
}

/// Runs an external program with `model.yaml` as its last argument.
#[derive(Debug, Clone)]
pub struct ProcessModelRunner {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessModelRunner {
    pub fn new<T: AsRef<Path>>(program: T) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

impl ModelRunner for ProcessModelRunner {
    fn go(&self, ctx: &ModelContext<'_>, output: File) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(ctx.model_file)
            .current_dir(ctx.run_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(output.try_clone()?))
            .stderr(Stdio::from(output));
        if let Some(env) = ctx.env {
            cmd.env_clear().envs(env);
        }

        log::info!("starting model runner {:?} for {}", self.program, ctx.run_id);
        let status = cmd
            .status()
            .with_context(|| format!("starting model runner {:?}", self.program))?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::ModelExited {
                program: self.program.display().to_string(),
                status,
            }
            .into())
        }
    }
}

/// Drives a coupled run: all components at once, under one model runner,
/// with a status reporter active for as long as the model runs.
pub struct CoupledRun {
    runner: Box<dyn ModelRunner>,
    poll_interval: Duration,
}

impl CoupledRun {
    pub fn new(runner: Box<dyn ModelRunner>) -> Self {
        Self {
            runner,
            poll_interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub(crate) fn run(
        &self,
        client: &Arc<dyn ControlPlane>,
        server: &str,
        fs: &Fs,
        run_id: &str,
        run_dir: &Path,
        env: Option<&Env>,
    ) -> Result<()> {
        let model_file = run_dir.join(MODEL_FILE);
        let model = ModelDescriptor::load(&model_file)?;

        let info = RunInfo::new(run_id, server, run_dir, &model.driver);
        fs.write_file(run_dir.join(INFO_FILE), &serde_yaml::to_string(&info)?)
            .context("writing run info")?;

        let manifest = Manifest::load(&run_dir.join(MANIFEST_FILE))?;
        log::info!(
            "coupled run of [{}] driven by {}",
            manifest.component_names().join(", "),
            model.driver
        );

        let status_file = run_dir.join(STATUS_FILE);
        let output = fs.create_file(&status_file)?;
        let ctx = ModelContext {
            run_id,
            run_dir,
            model_file: &model_file,
            model: &model,
            manifest: &manifest,
            env,
        };

        let source = StatusSource::new(&status_file, &run_dir.join(RECORD_FILE));
        let reporter = StatusReporter::start(Arc::clone(client), run_id, source, self.poll_interval)
            .context("starting status reporter")?;
        report(client, run_id, "running model");
        let result = self.runner.go(&ctx, output);
        reporter.finish();

        match result {
            Ok(()) => {
                report(client, run_id, "finished");
                Ok(())
            }
            Err(e) => Err(e.context(ModelRunError {
                tail: output_tail(&status_file),
            })),
        }
    }
}

fn report(client: &Arc<dyn ControlPlane>, run_id: &str, message: &str) {
    log::info!("{}: {message}", Status::Running);
    if let Err(e) = client.report(run_id, Status::Running, message) {
        log::warn!("{run_id}: unable to report status: {e}");
    }
}

/// The last lines of model output, numbered, for an error message.
fn output_tail(status_file: &Path) -> String {
    match tail_with_line_numbers(status_file, TAIL_LINES) {
        Ok(lines) => lines
            .iter()
            .map(|line| format!("[{}] {}", line.number, line.text))
            .collect::<Vec<_>>()
            .join("\n"),
        Err(e) => format!("(model output could not be read: {e})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use control::fake::RecordingClient;
    use tempfile::tempdir;

    #[test]
    fn test_manifest_mapping_and_sequence() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(MANIFEST_FILE);

        std::fs::write(&path, "hydro:\n  port: 1\nriver:\n  port: 2\n")?;
        assert_eq!(Manifest::load(&path)?.component_names(), ["hydro", "river"]);

        std::fs::write(&path, "- name: hydro\n- river\n")?;
        assert_eq!(Manifest::load(&path)?.component_names(), ["hydro", "river"]);

        std::fs::write(&path, "just a string\n")?;
        let err = Manifest::load(&path).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::BadManifest(_))));
        Ok(())
    }

    #[test]
    fn test_model_descriptor_requires_driver() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(MODEL_FILE);

        std::fs::write(&path, "driver: hydro\nstart: 0\n")?;
        let model = ModelDescriptor::load(&path)?;
        assert_eq!(model.driver, "hydro");
        assert!(model.extra.contains_key("start"));

        std::fs::write(&path, "start: 0\n")?;
        assert!(ModelDescriptor::load(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_run_info_fields() -> Result<()> {
        let info = RunInfo::new("deadbeef", "http://csdms", Path::new("/exec/deadbeef"), "hydro");
        let doc: Value = serde_yaml::from_str(&serde_yaml::to_string(&info)?)?;
        assert_eq!(doc["id"], Value::from("deadbeef"));
        assert_eq!(doc["server"], Value::from("http://csdms"));
        assert_eq!(doc["stdout"], Value::from("stdout"));
        assert_eq!(doc["driver"], Value::from("hydro"));
        assert_eq!(doc["prefix"], Value::from("/exec/deadbeef"));
        assert!(chrono::DateTime::parse_from_rfc3339(doc["start_time"].as_str().unwrap_or("")).is_ok());
        Ok(())
    }

    #[test]
    fn test_process_runner_joins_output() -> Result<()> {
        let dir = tempdir()?;
        let mut exec_fs = Fs::new(dir.path());
        exec_fs.ensure_prefix_exists()?;
        let run_dir = exec_fs.create_run_dir("deadbeef")?;
        std::fs::write(run_dir.join(MODEL_FILE), "driver: hydro\n")?;
        std::fs::write(run_dir.join(MANIFEST_FILE), "hydro: {}\n")?;
        std::fs::write(run_dir.join("drive.sh"), "echo \"model $1\"\necho oops >&2\n")?;

        let runner = ProcessModelRunner::new("/bin/sh").with_args(vec!["drive.sh".to_owned()]);
        let coupled = CoupledRun::new(Box::new(runner)).with_poll_interval(Duration::from_millis(10));
        let client = RecordingClient::new();
        let shared: Arc<dyn ControlPlane> = Arc::new(client.clone());

        coupled.run(&shared, "http://csdms", &exec_fs, "deadbeef", &run_dir, None)?;

        let output = std::fs::read_to_string(run_dir.join(STATUS_FILE))?;
        assert!(output.contains("oops"));
        assert!(output.contains("model.yaml"));
        assert!(run_dir.join(INFO_FILE).is_file());

        let reports = client.reports();
        assert_eq!(reports.last().map(|r| r.1.as_str()), Some("finished"));
        assert!(reports.iter().all(|(status, _)| *status == Status::Running));
        Ok(())
    }

    #[test]
    fn test_failed_model_carries_output_tail() -> Result<()> {
        let dir = tempdir()?;
        let mut exec_fs = Fs::new(dir.path());
        exec_fs.ensure_prefix_exists()?;
        let run_dir = exec_fs.create_run_dir("deadbeef")?;
        std::fs::write(run_dir.join(MODEL_FILE), "driver: hydro\n")?;
        std::fs::write(run_dir.join(MANIFEST_FILE), "hydro: {}\n")?;
        std::fs::write(run_dir.join("drive.sh"), "echo step one\necho 'diverged at t=3' >&2\nexit 1\n")?;

        let runner = ProcessModelRunner::new("/bin/sh").with_args(vec!["drive.sh".to_owned()]);
        let coupled = CoupledRun::new(Box::new(runner)).with_poll_interval(Duration::from_millis(10));
        let client: Arc<dyn ControlPlane> = Arc::new(RecordingClient::new());

        let err = coupled
            .run(&client, "http://csdms", &exec_fs, "deadbeef", &run_dir, None)
            .unwrap_err();
        let tail = &err.downcast_ref::<ModelRunError>().expect("model run error").tail;
        assert!(tail.contains("[1] step one"), "{tail}");
        assert!(tail.contains("[2] diverged at t=3"), "{tail}");
        assert!(err.downcast_ref::<Error>().is_some());
        Ok(())
    }
}
