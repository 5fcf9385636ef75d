/// High-level command line app
mod app;
/// Definition of command-line args
mod args;
/// Site configuration file
pub mod config;
/// Process environments for slaves and components
pub mod env;
/// Run execution: components, coupled models, the task lifecycle
pub mod exec;
/// Filesystem operations
pub mod fs;
/// Launch scripts for the supported backends
pub mod launch;
/// Status snapshots and the background status reporter
pub mod report;
/// Combined command-line and config file run settings
mod settings;
/// Moving run archives to and from the control plane
pub mod transfer;
/// Text UI
mod ui;

// exported for tests:
pub use app::App;
pub use args::{Args, Command};
pub use settings::{Action, Settings};

/// Run the command-line app.
pub fn run() -> Result<(), anyhow::Error> {
    use clap::Parser;
    let args = Args::parse();

    // INTERPRET SETTINGS ///////////////
    let settings: Settings = args.try_into()?;

    let log_level = match settings.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    if let Err(e) = init_logging(&settings, log_level) {
        simple_logging::log_to_stderr(log_level);
        if let Action::Slave(slave) = &settings.action {
            app::report_startup_failure(slave, &e);
        }
        return Err(e);
    }

    // RUN THE THING /////////////////
    let app = App::new(settings);
    app.run()?;

    Ok(())
}

/// A slave keeps its log next to its run directory; everything else logs to stderr.
fn init_logging(settings: &Settings, level: log::LevelFilter) -> anyhow::Result<()> {
    use anyhow::Context;
    match &settings.action {
        Action::Slave(slave) if !slave.show_env => {
            let mut exec_fs = fs::Fs::new(&slave.exec_dir);
            exec_fs.ensure_prefix_exists()?;
            let log_file = exec_fs.log_file(&slave.run_id);
            simple_logging::log_to_file(&log_file, level)
                .with_context(|| format!("opening log file {log_file:?}"))?;
        }
        _ => simple_logging::log_to_stderr(level),
    }
    Ok(())
}
