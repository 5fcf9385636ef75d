use std::path::{Path, PathBuf};

use anyhow::Result;

use super::Fs;

/// Utility fns for making common paths in the whitelisted directory.
impl Fs {
    /// $EXEC/run_id
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.prefix.join(run_id)
    }

    /// $EXEC/run_id.tar.gz
    pub fn archive(&self, run_id: &str) -> PathBuf {
        self.prefix.join(format!("{run_id}.tar.gz"))
    }

    /// $EXEC/run_id.log
    pub fn log_file(&self, run_id: &str) -> PathBuf {
        self.prefix.join(format!("{run_id}.log"))
    }

    /// $EXEC/run_id, created if it doesn't exist yet.
    pub fn create_run_dir(&self, run_id: &str) -> Result<PathBuf> {
        let path = self.run_dir(run_id);
        self.create_dir(&path)?;
        Ok(path)
    }

    /// $RUN_DIR/component/_component.out
    pub fn component_stdout(&self, run_dir: &Path, name: &str) -> PathBuf {
        run_dir.join(format!("_{name}.out"))
    }

    /// $RUN_DIR/component/_component.err
    pub fn component_stderr(&self, run_dir: &Path, name: &str) -> PathBuf {
        run_dir.join(format!("_{name}.err"))
    }

    /// $LAUNCH/run_id.sh
    pub fn launch_script(&self, run_id: &str) -> PathBuf {
        self.prefix.join(format!("{run_id}.sh"))
    }

    /// $LAUNCH/run_id.run.sh
    pub fn submit_script(&self, run_id: &str) -> PathBuf {
        self.prefix.join(format!("{run_id}.run.sh"))
    }

    /// $LAUNCH/run_id.out
    pub fn batch_output(&self, run_id: &str) -> PathBuf {
        self.prefix.join(format!("{run_id}.out"))
    }
}
