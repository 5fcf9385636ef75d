use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};

use crate::env;
use crate::fs::Fs;

use super::script_builder::{quote, quote_expandable, ScriptBuilder};
use super::{Backend, Error};

/// Permission bits for generated scripts
const SCRIPT_MODE: u32 = 0o755;

/// Generates the script that runs `simexec slave` for one run
/// on a given backend, and hands it to that backend.
///
/// Scripts are written to the launch directory as `<run_id>.sh`
/// (plus `<run_id>.run.sh` for Slurm, which submits the former).
#[derive(Debug)]
pub struct Launcher {
    backend: Backend,
    run_id: String,
    server_url: Option<String>,
    /// Launch dir interface
    fs: Fs,
    /// Passed to the slave unquoted-expandable, e.g. `--exec-dir=$TMPDIR`
    extra_args: Vec<String>,
    slave_program: PathBuf,
    /// Value of PATH exported by direct and qsub scripts
    path: String,
}

impl Launcher {
    pub fn new(backend: Backend, run_id: &str, launch_dir: &Path) -> Self {
        Self {
            backend,
            run_id: run_id.to_owned(),
            server_url: None,
            fs: Fs::new(launch_dir),
            extra_args: Vec::new(),
            slave_program: env::own_program(),
            path: env::prepend_own_bin_dir(std::env::var("PATH").ok().as_deref()),
        }
    }

    pub fn with_server_url(mut self, server_url: &str) -> Self {
        if !server_url.is_empty() {
            self.server_url = Some(server_url.to_owned());
        }
        self
    }

    pub fn with_extra_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }

    pub fn with_slave_program<T: AsRef<Path>>(mut self, program: T) -> Self {
        self.slave_program = program.as_ref().to_path_buf();
        self
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.to_owned();
        self
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// `<launch_dir>/<run_id>.sh`
    pub fn script_path(&self) -> PathBuf {
        self.fs.launch_script(&self.run_id)
    }

    /// `<launch_dir>/<run_id>.run.sh`, for backends that need a submit wrapper.
    pub fn run_script_path(&self) -> Option<PathBuf> {
        match self.backend {
            Backend::Sbatch(_) => Some(self.fs.submit_script(&self.run_id)),
            _ => None,
        }
    }

    /// Full command line of the slave for this run. `extra` args are quoted literally.
    pub fn slave_command(&self, extra: &[String]) -> String {
        let mut words = vec![
            quote(&self.slave_program.to_string_lossy()),
            String::from("slave"),
            quote(&self.run_id),
        ];
        words.extend(self.extra_args.iter().map(|arg| quote_expandable(arg)));
        if let Some(server_url) = &self.server_url {
            words.push(quote(&format!("--server-url={server_url}")));
        }
        words.extend(extra.iter().map(|arg| quote(arg)));
        words.join(" ")
    }

    /// Text of the launch script.
    pub fn script(&self, extra: &[String]) -> String {
        let mut text = String::with_capacity(512);
        let mut builder = ScriptBuilder::new(&mut text);
        match &self.backend {
            Backend::Direct => {
                builder.write_shebang("/bin/bash");
                builder.write_export("PATH", &self.path);
            }
            Backend::Qsub(qsub) => {
                builder.write_shebang("/bin/bash");
                builder.write_directive("#PBS", &format!("-q {}", qsub.queue));
                builder.write_directive("#PBS", &format!("-l mem={}", qsub.memory));
                builder.write_directive("#PBS", "-j oe");
                builder.write_directive("#PBS", "-k oe");
                builder.write_export("PATH", &self.path);
                builder.write_line("cd $TMPDIR");
            }
            Backend::Sbatch(sbatch) => {
                builder.write_shebang("/usr/bin/env bash");
                builder.write_directive("#SBATCH", &format!("--qos={}", sbatch.qos));
                builder.write_directive("#SBATCH", &format!("--job-name={}", sbatch.job_name));
                builder.write_directive("#SBATCH", &format!("--mem={}", sbatch.memory));
                builder.write_export("MPLBACKEND", "Agg");
            }
        }
        builder.write_line(&self.slave_command(extra));
        text
    }

    /// Text of the submit wrapper, for backends that need one.
    pub fn run_script(&self) -> Option<String> {
        let Backend::Sbatch(sbatch) = &self.backend else {
            return None;
        };
        let output = self.fs.batch_output(&self.run_id);

        let mut text = String::with_capacity(256);
        let mut builder = ScriptBuilder::new(&mut text);
        builder.write_shebang("/usr/bin/env bash");
        builder.write_line(&format!("source {}", quote(&sbatch.bashrc.to_string_lossy())));
        builder.write_line(&format!("module load {}", quote(&sbatch.module)));
        builder.write_line(&format!(
            "{} --output={} {}",
            sbatch.command,
            quote(&output.to_string_lossy()),
            quote(&self.script_path().to_string_lossy()),
        ));
        Some(text)
    }

    /// Write the launch script (and submit wrapper) into the launch dir
    /// and make them executable.
    pub fn before_launch(&mut self, extra: &[String]) -> Result<()> {
        self.fs.ensure_prefix_exists().context("creating launch directory")?;

        let script_path = self.script_path();
        self.fs
            .write_executable(&script_path, &self.script(extra), SCRIPT_MODE)
            .context("writing launch script")?;
        log::debug!("wrote launch script {script_path:?}");

        if let (Some(path), Some(text)) = (self.run_script_path(), self.run_script()) {
            self.fs
                .write_executable(&path, &text, SCRIPT_MODE)
                .context("writing submit script")?;
            log::debug!("wrote submit script {path:?}");
        }
        Ok(())
    }

    /// The command that hands the launch script to the backend.
    ///
    /// Direct and qsub launches start from an empty environment; the Slurm
    /// submit wrapper inherits ours, since it needs the module system.
    pub fn launch_command(&self) -> Command {
        match &self.backend {
            Backend::Direct => {
                let mut cmd = Command::new(self.script_path());
                cmd.env_clear();
                cmd
            }
            Backend::Qsub(qsub) => {
                let mut cmd = Command::new(&qsub.command);
                cmd.arg("-o").arg(self.fs.prefix()).arg(self.script_path());
                cmd.env_clear();
                cmd
            }
            Backend::Sbatch(_) => {
                let script = self.fs.submit_script(&self.run_id);
                Command::new(script)
            }
        }
    }

    /// Run the launch command to completion, returning what it printed
    /// (e.g. the job id from a queue).
    pub fn launch(&self) -> Result<String, Error> {
        let mut cmd = self.launch_command();
        let command = format!("{cmd:?}");
        log::info!("launching {} with {command}", self.run_id);

        let output = cmd.output().map_err(|source| Error::Spawn {
            command: command.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(Error::Failed {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn after_success(&self, output: &str) {
        log::info!("launched {}: {}", self.run_id, output.trim());
    }

    fn after_launch(&self) {
        log::debug!("launch of {} finished", self.run_id);
    }

    /// before_launch, then launch. A failed launch is returned unchanged.
    pub fn run(&mut self, extra: &[String]) -> Result<String> {
        self.before_launch(extra)?;
        let launched = self.launch();
        if let Ok(output) = &launched {
            self.after_success(output);
        }
        self.after_launch();
        Ok(launched?)
    }
}
