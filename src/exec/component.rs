use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};

use crate::fs::Fs;

use super::{run_cmd::run_cmd, ComponentRunError, Env};

/// A subdirectory holding a file with this name is a runnable component.
pub const RUN_SCRIPT: &str = "run.sh";

/// Number of stderr lines kept in a `ComponentRunError`.
const ERROR_LOG_LINES: usize = 40;

const MISSING_ERROR_LOG: &str = "(There should be an error log here but it could not be read.)";

/// One runnable unit inside a run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    /// Name of the subdirectory
    pub name: String,
    /// Absolute path of the subdirectory; the run script's working dir
    pub run_dir: PathBuf,
}

/// True if `path` contains a component run script.
pub fn dir_contains_run_script(path: &Path) -> bool {
    path.join(RUN_SCRIPT).is_file()
}

/// Discover the components of the run in `sim_dir`, ordered by name.
pub fn components_to_run(sim_dir: &Path) -> io::Result<Vec<Component>> {
    let mut components = Vec::new();
    for entry in fs::read_dir(sim_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() || !dir_contains_run_script(&path) {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => components.push(Component {
                name,
                run_dir: path,
            }),
            Err(name) => log::warn!("skipping component with non-UTF-8 name {name:?}"),
        }
    }
    components.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(components)
}

/// Runs a component's `run.sh` with a shell, logging its output
/// to `_<name>.out` and `_<name>.err` inside the component directory.
#[derive(Debug, Clone)]
pub struct ComponentRunner {
    shell: PathBuf,
    /// Replaces the inherited environment if set
    env: Option<Env>,
    /// Also copy component output to our own stdout/stderr
    echo: bool,
}

impl ComponentRunner {
    pub fn new(env: Option<Env>) -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
            env,
            echo: false,
        }
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Run `component` to completion. A non-zero exit is a [`ComponentRunError`]
    /// carrying the tail of the component's stderr log.
    pub fn run(&self, fs: &Fs, component: &Component) -> Result<()> {
        let out_log = fs.component_stdout(&component.run_dir, &component.name);
        let err_log = fs.component_stderr(&component.run_dir, &component.name);

        let status = {
            let out_file = fs.create_file(&out_log)?;
            let err_file = fs.create_file(&err_log)?;

            let mut cmd = Command::new(&self.shell);
            cmd.arg(RUN_SCRIPT).current_dir(&component.run_dir);
            if let Some(env) = &self.env {
                cmd.env_clear().envs(env);
            }
            log::info!("running component {} in {:?}", component.name, component.run_dir);
            run_cmd(&mut cmd, out_file, err_file, self.echo)
                .with_context(|| format!("running {:?} for component {}", self.shell, component.name))?
        };

        if status.success() {
            log::debug!("component {} finished", component.name);
            Ok(())
        } else {
            Err(ComponentRunError {
                name: component.name.clone(),
                status,
                stderr: read_error_log(&err_log),
            }
            .into())
        }
    }
}

/// The last lines of a component's stderr log, or a placeholder if it can't be read.
fn read_error_log(path: &Path) -> String {
    match fs::read(path) {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            let lines: Vec<&str> = text.lines().collect();
            let start = lines.len().saturating_sub(ERROR_LOG_LINES);
            lines[start..].join("\n")
        }
        Err(e) => {
            log::warn!("unable to read error log {path:?}: {e}");
            MISSING_ERROR_LOG.to_owned()
        }
    }
}
