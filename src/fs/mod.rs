use std::path::{Component, Path, PathBuf};
use std::{fs, io};

use anyhow::{Context, Result};

use util::PathEncodingError;

/// Utility fns
pub(crate) mod ops;

/// Defines fns for creating common paths in the execution directory
mod paths;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("\"{0}\" exists but is not a directory")]
    NotDirectory(String),
    #[error("Can't perform IO operation: \"{0}\" is not whitelisted")]
    NotWhitelisted(String),
    #[error("Refusing to delete the whitelisted directory \"{0}\" itself")]
    DeletePrefix(String),
}

/// All file operations in the crate should go through this struct.
///
/// All destructive operations check that the path in question is a child of the
/// single whitelisted prefix (the execution or launch dir), otherwise they will not
/// be performed. Component run scripts and the model runner can break this rule;
/// nothing here polices what a child process does.
#[derive(Debug, Clone)]
pub struct Fs {
    /// The directory we are allowed to modify
    prefix: PathBuf,
}

impl Fs {
    /// Create a new `Fs` with the given whitelisted directory.
    pub fn new(prefix: &Path) -> Self {
        Self {
            prefix: prefix.to_path_buf(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Check whether the prefix dir exists, and create it if not.
    pub fn ensure_prefix_exists(&mut self) -> Result<()> {
        create_dir_idempotent(&self.prefix).context("creating execution directory")?;
        self.prefix = self.prefix.canonicalize()?;
        Ok(())
    }

    /// Create `path` (and any parents) unless it already exists as a directory.
    /// Fails if something other than a directory occupies `path`.
    pub fn create_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        create_dir_idempotent(path)
    }

    /// Check if path exists on disk.
    pub fn exists<T: AsRef<Path>>(&self, path: T) -> bool {
        let path = path.as_ref();
        path.exists() || path.is_symlink()
    }

    /// Create a file, and return a writable `File` handle.
    pub fn create_file<T: AsRef<Path>>(&self, path: T) -> Result<fs::File> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        let f = fs::File::create(path).with_context(|| format!("creating file {path:?}"))?;
        Ok(f)
    }

    /// Write entire str to a file.
    pub fn write_file<T: AsRef<Path>>(&self, path: T, text: &str) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::write(path, text).with_context(|| format!("writing file {path:?}"))?;
        Ok(())
    }

    /// Write entire str to a file and give it the unix permission bits in `mode`.
    pub fn write_executable<T: AsRef<Path>>(&self, path: T, text: &str, mode: u32) -> Result<()> {
        let path = path.as_ref();
        self.write_file(path, text)?;
        ops::set_mode(path, mode).with_context(|| format!("setting mode {mode:o} on {path:?}"))?;
        Ok(())
    }

    /// Delete a file.
    pub fn delete_file<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::remove_file(path).context("deleting file")?;
        Ok(())
    }

    /// Recursively delete a directory strictly inside the prefix.
    pub fn delete_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        if path.components().eq(self.prefix.components()) {
            return Err(
                Error::DeletePrefix(path.to_str().ok_or(PathEncodingError)?.to_owned()).into(),
            );
        }
        fs::remove_dir_all(path).context("deleting dir")?;
        Ok(())
    }

    /// True if `path` lies under the prefix without climbing back out of it.
    /// The check is lexical, so any `..` after the prefix is refused.
    fn is_whitelisted<T: AsRef<Path>>(&self, path: T) -> bool {
        match path.as_ref().strip_prefix(&self.prefix) {
            Ok(rest) => rest.components().all(|c| matches!(c, Component::Normal(_))),
            Err(_) => false,
        }
    }

    pub(crate) fn check_whitelist(&self, path: &Path) -> Result<()> {
        if !self.is_whitelisted(path) {
            Err(Error::NotWhitelisted(path.to_str().ok_or(PathEncodingError)?.to_owned()).into())
        } else {
            Ok(())
        }
    }
}

/// `mkdir -p` that tolerates an existing directory but not an existing file.
fn create_dir_idempotent(path: &Path) -> Result<()> {
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(_) if path.exists() && !path.is_dir() => Err(Error::NotDirectory(
            path.to_str().ok_or(PathEncodingError)?.to_owned(),
        )
        .into()),
        Err(e) => Err(e).with_context(|| format!("creating dir {path:?}")),
    }
}
