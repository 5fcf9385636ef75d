use std::fs::File;
use std::process::{Command, ExitStatus};
use std::sync::Arc;

use anyhow::{Context, Result};

use control::{ControlPlane, HttpClient, Status};

use crate::env;
use crate::exec::{CoupledRun, ProcessModelRunner, RunMode, Slave, TaskSpec};
use crate::launch::Launcher;
use crate::settings::{Action, ExeSettings, ScriptSettings, Settings, SlaveSettings};
use crate::ui::Ui;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Slave process exited with {0}")]
    SlaveFailed(ExitStatus),
}

/// This struct actually runs the command-line app.
pub struct App {
    /// Interpreted command line settings
    settings: Settings,
    /// User interface
    ui: Ui,
}

impl App {
    /// Create a new `App`.
    pub fn new(settings: Settings) -> Self {
        let ui = Ui::new(&settings);
        Self { settings, ui }
    }

    /// Run the app, using settings to determine which command to run.
    pub fn run(self) -> Result<()> {
        let Self { settings, mut ui } = self;
        if let Some(config) = &settings.config {
            log::info!("using site configuration {config:?}");
        }
        match settings.action {
            Action::Slave(slave) => run_slave(&mut ui, slave),
            Action::Script(script) => run_script(&ui, script),
            Action::Exe(exe) => run_exe(&ui, exe),
        }
    }
}

/// Execute a run in this process.
fn run_slave(ui: &mut Ui, settings: SlaveSettings) -> Result<()> {
    let exec_env = env::execution_env();
    if settings.show_env {
        ui.output(env::format_env(&exec_env).trim_end());
        return Ok(());
    }

    let client = HttpClient::new(&settings.server_url).context("creating control-plane client")?;
    let mode = if settings.separate {
        RunMode::Separate
    } else {
        let runner = ProcessModelRunner::new(&settings.model_runner);
        RunMode::Coupled(CoupledRun::new(Box::new(runner)).with_poll_interval(settings.poll_interval))
    };
    let spec = TaskSpec {
        run_id: settings.run_id.clone(),
        server_url: settings.server_url,
        exec_dir: settings.exec_dir,
        env: Some(exec_env),
        mode,
        echo: ui.verbose,
    };

    ui.start_timer();
    let result = Slave::new(Arc::new(client)).start_task(spec);
    ui.print_elapsed(&format!("Run {}", settings.run_id));
    match result {
        Ok(result) => {
            ui.success(&format!("run {} complete", settings.run_id));
            if !result.is_empty() {
                ui.output(&serde_json::to_string_pretty(&result)?);
            }
            Ok(())
        }
        Err(e) => {
            ui.failure(&format!("run {}", settings.run_id));
            Err(e)
        }
    }
}

/// Best-effort terminal report for a slave that failed before its run started.
/// Nothing can be sent if a client cannot be built for the server url.
pub(crate) fn report_startup_failure(settings: &SlaveSettings, err: &anyhow::Error) {
    match HttpClient::new(&settings.server_url) {
        Ok(client) => report_failure(&client, &settings.run_id, err),
        Err(e) => log::error!("{}: unable to report startup failure: {e}", settings.run_id),
    }
}

fn report_failure(client: &dyn ControlPlane, run_id: &str, err: &anyhow::Error) {
    if let Err(e) = client.report(run_id, Status::Error, &format!("{err:?}")) {
        log::error!("{run_id}: unable to send final {} report: {e}", Status::Error);
    }
}

/// Print or submit a launch script.
fn run_script(ui: &Ui, settings: ScriptSettings) -> Result<()> {
    let mut launcher = Launcher::new(settings.backend, &settings.run_id, &settings.launch_dir)
        .with_server_url(&settings.server_url)
        .with_extra_args(settings.extra_args);

    if settings.run {
        ui.verbose_progress("Launching");
        let output = launcher.run(&[])?;
        ui.done();
        ui.success(&format!("launched {}", settings.run_id));
        if !output.trim().is_empty() {
            ui.output(output.trim());
        }
    } else {
        ui.output(launcher.script(&[]).trim());
    }
    Ok(())
}

/// Start a slave with a minimal environment, optionally detached.
fn run_exe(ui: &Ui, settings: ExeSettings) -> Result<()> {
    let mut cmd = Command::new(&settings.slave);
    cmd.arg("slave")
        .arg(&settings.run_id)
        .arg(format!("--server-url={}", settings.server_url))
        .arg(format!("--exec-dir={}", settings.exec_dir.display()));
    if settings.show_env {
        cmd.arg("--show-env");
    }
    cmd.env_clear().envs(env::minimal_env());

    if settings.daemon {
        let stdout = File::create(format!("{}.o.txt", settings.run_id)).context("creating stdout log")?;
        let stderr = File::create(format!("{}.e.txt", settings.run_id)).context("creating stderr log")?;
        let child = cmd
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .with_context(|| format!("starting {:?}", settings.slave))?;
        ui.output(&child.id().to_string());
        Ok(())
    } else {
        let status = cmd
            .status()
            .with_context(|| format!("running {:?}", settings.slave))?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::SlaveFailed(status).into())
        }
    }
}
