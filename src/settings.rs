use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use util::expand_path;

use crate::args::{Args, Command};
use crate::config::SiteConfig;
use crate::launch::{Backend, BackendKind};
use crate::report::DEFAULT_INTERVAL;

const DEFAULT_EXEC_DIR: &str = "~/.simexec";
const DEFAULT_LAUNCH_DIR: &str = "~/.simexec";
const DEFAULT_MODEL_RUNNER: &str = "model-runner";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid poll interval {0} (should be a positive number of seconds)")]
    InvalidPollInterval(f64),
}

/// Settings are like Args, except all the logic has been applied,
/// so the site config and defaults are merged in.
#[derive(Debug)]
pub struct Settings {
    pub verbose: u8,
    pub config: Option<PathBuf>,
    pub action: Action,
}

/// What the command line asked for, fully resolved.
#[derive(Debug)]
pub enum Action {
    Slave(SlaveSettings),
    Script(ScriptSettings),
    Exe(ExeSettings),
}

#[derive(Debug)]
pub struct SlaveSettings {
    pub run_id: String,
    pub server_url: String,
    pub exec_dir: PathBuf,
    pub show_env: bool,
    pub separate: bool,
    pub poll_interval: Duration,
    pub model_runner: PathBuf,
}

#[derive(Debug)]
pub struct ScriptSettings {
    pub run_id: String,
    pub server_url: String,
    pub backend: Backend,
    /// Passed through to the slave command line, `--exec-dir=...` first
    pub extra_args: Vec<String>,
    pub launch_dir: PathBuf,
    pub run: bool,
}

#[derive(Debug)]
pub struct ExeSettings {
    pub run_id: String,
    pub server_url: String,
    pub exec_dir: PathBuf,
    pub show_env: bool,
    pub daemon: bool,
    pub slave: PathBuf,
}

impl Settings {
    /// Merge `args` with an already loaded site config.
    pub fn resolve(args: Args, site: SiteConfig) -> Result<Self> {
        let config = args.config.as_deref().map(expand_path);
        let paths = site.paths;
        let exec_dir_of = |arg: Option<String>| {
            let dir = arg.or_else(|| paths.exec_dir.clone());
            expand_path(dir.as_deref().unwrap_or(DEFAULT_EXEC_DIR))
        };

        let action = match args.command {
            Command::Slave {
                run_id,
                server_url,
                exec_dir,
                show_env,
                separate,
                poll_interval,
            } => {
                let poll_interval = match poll_interval {
                    None => DEFAULT_INTERVAL,
                    Some(secs) => Duration::try_from_secs_f64(secs)
                        .ok()
                        .filter(|d| !d.is_zero())
                        .ok_or(Error::InvalidPollInterval(secs))?,
                };
                let model_runner = paths.model_runner.as_deref().unwrap_or(DEFAULT_MODEL_RUNNER);
                Action::Slave(SlaveSettings {
                    run_id,
                    server_url,
                    exec_dir: exec_dir_of(exec_dir),
                    show_env,
                    separate,
                    poll_interval,
                    model_runner: expand_path(model_runner),
                })
            }
            Command::Script {
                run_id,
                server_url,
                backend,
                extra_args,
                launch_dir,
                run,
            } => {
                let kind = backend.or(site.launcher.backend).unwrap_or_default();
                let backend = match kind {
                    BackendKind::Direct => Backend::Direct,
                    BackendKind::Qsub => Backend::Qsub(site.launcher.qsub),
                    BackendKind::Sbatch => Backend::Sbatch(site.launcher.sbatch),
                };
                // resolved here where possible; anything left (e.g. $TMPDIR) is up to the backend
                let exec_dir = expand_path(paths.exec_dir.as_deref().unwrap_or(DEFAULT_EXEC_DIR));
                let mut all_args = vec![format!("--exec-dir={}", exec_dir.display())];
                all_args.extend(extra_args);

                let launch_dir = launch_dir.or(paths.launch_dir.clone());
                Action::Script(ScriptSettings {
                    run_id,
                    server_url,
                    backend,
                    extra_args: all_args,
                    launch_dir: expand_path(launch_dir.as_deref().unwrap_or(DEFAULT_LAUNCH_DIR)),
                    run,
                })
            }
            Command::Exe {
                run_id,
                server_url,
                exec_dir,
                show_env,
                daemon,
                with_slave,
            } => Action::Exe(ExeSettings {
                run_id,
                server_url,
                exec_dir: exec_dir_of(exec_dir),
                show_env,
                daemon,
                slave: with_slave.map(PathBuf::from).unwrap_or_else(crate::env::own_program),
            }),
        };

        Ok(Self {
            verbose: args.verbose,
            config,
            action,
        })
    }
}

impl TryFrom<Args> for Settings {
    type Error = anyhow::Error;
    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let site = match &args.config {
            Some(path) => SiteConfig::load(&expand_path(path))?,
            None => SiteConfig::default(),
        };
        Self::resolve(args, site)
    }
}
