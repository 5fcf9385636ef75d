use std::collections::{BTreeSet, HashSet};
use std::error::Error as _;
use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::fs::ops;

use super::{open_archive, Error};

/// Create a gzip-compressed tar of `base_dir/run_id`, rooted at `run_id/`,
/// and return the absolute path of `base_dir/run_id.tar.gz`.
pub fn pack(run_id: &str, base_dir: &Path) -> io::Result<PathBuf> {
    let src = base_dir.join(run_id);
    let archive = base_dir.join(format!("{run_id}.tar.gz"));

    let file = File::create(&archive)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);
    builder.append_dir_all(run_id, &src)?;
    builder.into_inner()?.finish()?;

    archive.canonicalize()
}

/// Extract `archive` into `dest_dir`, returning the top-level paths it created.
///
/// Every member is checked before anything is written: if any member (or link
/// target) would land outside `dest_dir`, or a member would be written through
/// a symlink the archive itself creates, nothing is extracted at all.
/// Afterwards all extracted directories are made group/other readable, as far
/// as the process umask allows.
pub fn unpack(archive: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let archive_name = archive.display().to_string();
    let malformed = |source| Error::Malformed {
        archive: archive_name.clone(),
        source,
    };
    let extract = |source| Error::Extract {
        archive: archive_name.clone(),
        source,
    };

    let dest = dest_dir.canonicalize().map_err(extract)?;
    let roots = check_members(archive, &dest).map_err(|e| match e {
        CheckError::Io(source) => malformed(source),
        CheckError::Unsafe(e) => e,
    })?;

    let mut tar = open_archive(archive).map_err(malformed)?;
    tar.set_preserve_permissions(true);
    tar.set_overwrite(true);
    for entry in tar.entries().map_err(malformed)? {
        let mut entry = entry.map_err(malformed)?;
        let unpacked = entry.unpack_in(&dest).map_err(|source| {
            if escapes_destination(&source) {
                Error::PathTraversal {
                    member: entry
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                    dest: dest.display().to_string(),
                }
            } else {
                extract(source)
            }
        })?;
        if !unpacked {
            log::warn!("skipped archive member {:?}", entry.path().ok());
        }
    }

    let allowed = ops::dir_mode_allowed_by_umask(&dest).map_err(extract)?;
    let roots: Vec<PathBuf> = roots.into_iter().map(|root| dest.join(root)).collect();
    for root in &roots {
        if root.is_dir() {
            ops::open_up_dirs(root, allowed).map_err(extract)?;
        }
    }
    log::debug!("extracted {archive_name} into {dest:?}");

    Ok(roots)
}

enum CheckError {
    Io(io::Error),
    Unsafe(Error),
}

impl From<io::Error> for CheckError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// `tar`'s own guard against writing outside the destination, found anywhere
/// in the error chain.
fn escapes_destination(err: &io::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.to_string().contains("outside of destination") {
            return true;
        }
        source = e.source();
    }
    false
}

/// Validate every member of `archive` against `dest`,
/// collecting the distinct first path components.
fn check_members(archive: &Path, dest: &Path) -> Result<BTreeSet<OsString>, CheckError> {
    let mut roots = BTreeSet::new();
    // where the archive's own symlinks will be created
    let mut symlinks: HashSet<PathBuf> = HashSet::new();
    let mut tar = open_archive(archive)?;

    for entry in tar.entries()? {
        let entry = entry?;
        let member = entry.path()?.into_owned();

        let target = resolve_within(dest, dest, &member).ok_or_else(|| {
            CheckError::Unsafe(Error::PathTraversal {
                member: member.display().to_string(),
                dest: dest.display().to_string(),
            })
        })?;

        if target.ancestors().any(|p| symlinks.contains(p)) {
            return Err(CheckError::Unsafe(Error::ThroughSymlink {
                member: member.display().to_string(),
                dest: dest.display().to_string(),
            }));
        }

        if let Some(link) = entry.link_name()? {
            // symlinks resolve relative to their own directory, hard links relative to the root:
            let base = if entry.header().entry_type().is_symlink() {
                target.parent().unwrap_or(dest)
            } else {
                dest
            };
            if resolve_within(dest, base, &link).is_none() {
                return Err(CheckError::Unsafe(Error::LinkTraversal {
                    member: member.display().to_string(),
                    target: link.display().to_string(),
                    dest: dest.display().to_string(),
                }));
            }
        }
        if entry.header().entry_type().is_symlink() {
            symlinks.insert(target);
        }

        let first = member.components().find(|c| *c != Component::CurDir);
        if let Some(Component::Normal(first)) = first {
            roots.insert(first.to_os_string());
        }
    }
    Ok(roots)
}

/// Lexically join `rel` onto `base`, returning `None` if the result would
/// escape `root` or if `rel` is absolute.
fn resolve_within(root: &Path, base: &Path, rel: &Path) -> Option<PathBuf> {
    let mut out = base.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if out.starts_with(root) {
        Some(out)
    } else {
        None
    }
}
