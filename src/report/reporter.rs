use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use control::{ControlPlane, Status};

use super::StatusSource;

/// How often a running model's status is pushed to the control plane.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// Periodically sends "running" reports built from a [`StatusSource`],
/// on a thread of its own.
///
/// The loop ends when the owner calls [`stop`](Self::stop), or early when the
/// model writes a `done: true` record. It never sends a terminal report; that
/// is left to the owner, after [`join`](Self::join) has returned.
/// Dropping the reporter stops and joins it.
pub struct StatusReporter {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl StatusReporter {
    /// Spawn the reporting thread. The first report is sent immediately.
    pub fn start(
        client: Arc<dyn ControlPlane>,
        run_id: &str,
        source: StatusSource,
        interval: Duration,
    ) -> io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel();
        let run_id = run_id.to_owned();

        let handle = thread::Builder::new()
            .name(format!("status-{run_id}"))
            .spawn(move || loop {
                match stop_rx.try_recv() {
                    Err(TryRecvError::Empty) => {}
                    _ => break,
                }
                if poll(client.as_ref(), &run_id, &source) {
                    log::debug!("{run_id}: model reported completion");
                    break;
                }
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
            })?;

        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    /// Ask the loop to exit. Returns at once; a poll already under way still completes.
    pub fn stop(&self) {
        // the thread may already be gone if the model said it was done
        let _ = self.stop_tx.send(());
    }

    /// Wait for the reporting thread to exit.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("status reporter thread panicked");
            }
        }
    }

    /// Stop, then join.
    pub fn finish(mut self) {
        self.stop();
        self.join();
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for StatusReporter {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

/// Send one "running" report; returns true if the model flagged itself done.
fn poll(client: &dyn ControlPlane, run_id: &str, source: &StatusSource) -> bool {
    let (message, done) = match status_message(source) {
        Ok(status) => status,
        Err(e) => (format!("Error getting status ({e})"), false),
    };
    if let Err(e) = client.report(run_id, Status::Running, &message) {
        log::warn!("{run_id}: dropped status report: {e}");
    }
    done
}

fn status_message(source: &StatusSource) -> anyhow::Result<(String, bool)> {
    let snapshot = source.snapshot()?;
    Ok((snapshot.render()?, snapshot.is_completed()))
}
