use colored::Colorize;

use util::Timer;

use crate::settings::Settings;

/// All interactions with the text UI should go through this struct.
pub struct Ui {
    /// -v setting, displays extra text info to user
    pub verbose: bool,
    /// keeps track of time for each run
    timer: Timer,
}

impl Ui {
    pub fn new(settings: &Settings) -> Self {
        Self {
            verbose: settings.verbose > 0,
            timer: Timer::now(),
        }
    }

    pub fn start_timer(&mut self) {
        if self.verbose {
            self.timer.reset();
        }
    }

    pub fn print_elapsed(&self, task: &str) {
        if self.verbose {
            self.timer.print_elapsed(task)
        }
    }

    /// Plain output on stdout, e.g. a script or a pid.
    pub fn output(&self, text: &str) {
        println!("{text}");
    }

    pub fn verbose_progress(&self, msg: &str) {
        if self.verbose {
            eprint!("{}... ", msg.magenta());
        }
    }

    pub fn done(&self) {
        if self.verbose {
            eprintln!("{}.", "done".green());
        }
    }

    pub fn success(&self, msg: &str) {
        eprintln!("{} {msg}", "SUCCESS".green());
    }

    pub fn failure(&self, msg: &str) {
        eprintln!("{} {msg}", "FAILED".red());
    }
}
