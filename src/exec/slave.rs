use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::{Map, Value};

use control::{ControlPlane, Status};

use super::{Outcome, TaskLifecycle, TaskSpec};

const SUCCESS_MESSAGE: &str = "simulation is complete and available for pickup";

/// Top-level owner of a run: executes its lifecycle and sends the
/// one terminal report, whatever happened along the way.
pub struct Slave {
    client: Arc<dyn ControlPlane>,
}

impl Slave {
    pub fn new(client: Arc<dyn ControlPlane>) -> Self {
        Self { client }
    }

    /// Execute a run, returning the control plane's result metadata on success.
    ///
    /// Exactly one of "success" or "error" is reported, as the last report for
    /// the run. A panic inside the lifecycle is caught and reported as an error.
    pub fn start_task(&self, spec: TaskSpec) -> Result<Map<String, Value>> {
        let run_id = spec.run_id.clone();
        let client = Arc::clone(&self.client);

        let execute = move || -> Result<(Outcome, Map<String, Value>)> {
            let mut task = TaskLifecycle::new(spec, client)?;
            let outcome = task.execute()?;
            Ok((outcome, task.result().clone()))
        };
        let executed = panic::catch_unwind(AssertUnwindSafe(execute)).unwrap_or_else(|payload| {
            Err(anyhow!("task panicked: {}", panic_message(payload.as_ref())))
        });

        match executed {
            Ok((Outcome::Uploaded, result)) => {
                self.terminal_report(&run_id, Status::Success, SUCCESS_MESSAGE);
                Ok(result)
            }
            Ok((Outcome::Undelivered(e), _)) | Err(e) => {
                self.terminal_report(&run_id, Status::Error, &format!("{e:?}"));
                Err(e)
            }
        }
    }

    fn terminal_report(&self, run_id: &str, status: Status, message: &str) {
        log::info!("{status}: {message}");
        if let Err(e) = self.client.report(run_id, status, message) {
            log::error!("{run_id}: unable to send final {status} report: {e}");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}
