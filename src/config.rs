use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::launch::{BackendKind, QsubOptions, SbatchOptions};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Unable to read site configuration {0:?}")]
    Read(PathBuf, #[source] std::io::Error),
    #[error("Invalid site configuration {0:?}")]
    Parse(PathBuf, #[source] serde_yaml::Error),
}

/// Site configuration file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    pub paths: PathsConfig,
    pub launcher: LauncherConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Where run directories live
    pub exec_dir: Option<String>,
    /// Where launch scripts are written
    pub launch_dir: Option<String>,
    /// External coupled-run driver
    pub model_runner: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LauncherConfig {
    pub backend: Option<BackendKind>,
    pub qsub: QsubOptions,
    pub sbatch: SbatchOptions,
}

impl SiteConfig {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Read(path.to_path_buf(), e))?;
        Self::parse(&text).map_err(|e| Error::Parse(path.to_path_buf(), e))
    }

    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        // an empty file is an empty config
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_full_config() -> Result<()> {
        let text = r#"
paths:
  exec_dir: $TMPDIR/simexec
  launch_dir: ~/.simexec
  model_runner: /usr/bin/model-run
launcher:
  backend: qsub
  qsub:
    queue: long
  sbatch:
    qos: normal
"#;
        let config = SiteConfig::parse(text)?;
        assert_eq!(config.paths.exec_dir.as_deref(), Some("$TMPDIR/simexec"));
        assert_eq!(config.paths.model_runner.as_deref(), Some("/usr/bin/model-run"));
        assert_eq!(config.launcher.backend, Some(BackendKind::Qsub));
        assert_eq!(config.launcher.qsub.queue, "long");
        assert_eq!(config.launcher.qsub.memory, "10gb");
        assert_eq!(config.launcher.sbatch.qos, "normal");
        assert_eq!(config.launcher.sbatch.module, "slurm/blanca");
        Ok(())
    }

    #[test]
    fn test_empty_config() -> Result<()> {
        assert_eq!(SiteConfig::parse("")?, SiteConfig::default());
        assert_eq!(SiteConfig::parse("paths: {}\n")?, SiteConfig::default());
        Ok(())
    }

    #[test]
    fn test_bash_backend_alias() -> Result<()> {
        let config = SiteConfig::parse("launcher:\n  backend: bash\n")?;
        assert_eq!(config.launcher.backend, Some(BackendKind::Direct));
        Ok(())
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(SiteConfig::parse("pahts:\n  exec_dir: /tmp\n").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = SiteConfig::load(Path::new("/nonexistent/simexec.yaml")).unwrap_err();
        assert!(matches!(err, Error::Read(..)));
    }
}
