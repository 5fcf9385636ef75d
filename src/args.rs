use clap::{ArgAction, Parser, Subcommand};

use crate::launch::BackendKind;

const CMD_NAME: &str = "simexec";

/// Stores our command-line args format.
#[derive(Parser, Debug)]
#[command(name = CMD_NAME, version, about = "Execute remotely submitted simulation runs", long_about = None)]
pub struct Args {
    /// Print additional debugging info (repeat for more)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Site configuration file
    #[arg(long, value_name = "FILE", global = true)]
    #[arg(env = "SIMEXEC_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a run: download, run components, upload, report
    Slave {
        /// Run id
        run_id: String,

        /// Control-plane URL
        #[arg(long, value_name = "URL", env = "SIMEXEC_SERVER_URL")]
        server_url: String,

        /// Execution directory
        #[arg(long, value_name = "DIR", env = "SIMEXEC_EXEC_DIR")]
        exec_dir: Option<String>,

        /// Print the execution environment and exit
        #[arg(long)]
        show_env: bool,

        /// Run components one at a time instead of as a coupled model
        #[arg(long)]
        separate: bool,

        /// Seconds between status reports during a coupled run
        #[arg(long, value_name = "SECS")]
        poll_interval: Option<f64>,
    },

    /// Print (or with --run, submit) the launch script for a run
    Script {
        /// Run id
        run_id: String,

        /// Control-plane URL
        #[arg(long, value_name = "URL", env = "SIMEXEC_SERVER_URL", default_value = "")]
        server_url: String,

        /// Launch backend
        #[arg(long, value_enum)]
        backend: Option<BackendKind>,

        /// Extra argument for the slave command
        #[arg(long = "extra-args", value_name = "ARG", allow_hyphen_values = true)]
        extra_args: Vec<String>,

        /// Launch directory
        #[arg(long, value_name = "DIR", env = "SIMEXEC_LAUNCH_DIR")]
        launch_dir: Option<String>,

        /// Launch the run instead of printing the script
        #[arg(long)]
        run: bool,
    },

    /// Start a slave for a run with a minimal environment
    Exe {
        /// Run id
        run_id: String,

        /// Control-plane URL
        #[arg(long, value_name = "URL", env = "SIMEXEC_SERVER_URL")]
        server_url: String,

        /// Execution directory
        #[arg(long, value_name = "DIR", env = "SIMEXEC_EXEC_DIR")]
        exec_dir: Option<String>,

        /// Have the slave print its environment and exit
        #[arg(long)]
        show_env: bool,

        /// Detach the slave and print its pid
        #[arg(long)]
        daemon: bool,

        /// Slave executable
        #[arg(long, value_name = "PATH")]
        with_slave: Option<String>,
    },
}
