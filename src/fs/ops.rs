use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use walkdir::WalkDir;

/// Set the unix permission bits of `path` to exactly `mode`.
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

/// Permission bits the process umask lets through for a new directory.
///
/// There is no safe way to read the umask without changing it, so we create a
/// scratch directory inside `parent` and look at the mode it was given.
pub fn dir_mode_allowed_by_umask(parent: &Path) -> io::Result<u32> {
    let probe = parent.join(format!(".umask-probe-{}", std::process::id()));
    fs::create_dir(&probe)?;
    let mode = fs::metadata(&probe).map(|m| m.permissions().mode() & 0o777);
    fs::remove_dir(&probe)?;
    mode
}

/// Make every directory under `root` (inclusive) readable and searchable by
/// group and other, as far as `allowed` (see `dir_mode_allowed_by_umask`) permits.
pub fn open_up_dirs(root: &Path, allowed: u32) -> io::Result<()> {
    let wanted = 0o755 & allowed;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            let mode = entry.metadata()?.permissions().mode() & 0o7777;
            if mode & wanted != wanted {
                set_mode(entry.path(), mode | wanted)?;
            }
        }
    }
    Ok(())
}
