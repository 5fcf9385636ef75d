use std::path::{Path, PathBuf};

use crate::exec::Env;

const SYSTEM_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Path to the running `simexec` binary.
pub fn own_program() -> PathBuf {
    std::env::current_exe().unwrap_or_else(|_| PathBuf::from(env!("CARGO_PKG_NAME")))
}

/// Directory holding the running binary, if it can be determined.
pub fn own_bin_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    exe.parent().map(Path::to_path_buf)
}

/// `path` with our own bin dir in front.
pub fn prepend_own_bin_dir(path: Option<&str>) -> String {
    prepend_dir(own_bin_dir().as_deref(), path)
}

fn prepend_dir(dir: Option<&Path>, path: Option<&str>) -> String {
    let parts: Vec<String> = dir
        .map(|d| d.to_string_lossy().into_owned())
        .into_iter()
        .chain(path.filter(|p| !p.is_empty()).map(str::to_owned))
        .collect();
    parts.join(":")
}

/// Environment for components: ours, with our own bin dir first on PATH.
pub fn execution_env() -> Env {
    let mut env: Env = std::env::vars().collect();
    let path = prepend_own_bin_dir(env.get("PATH").map(String::as_str));
    env.insert(String::from("PATH"), path);
    env
}

/// Environment for a slave started by `exe`: nothing but a PATH.
pub fn minimal_env() -> Env {
    Env::from([(String::from("PATH"), prepend_own_bin_dir(Some(SYSTEM_PATH)))])
}

/// `NAME=value` lines, sorted by name.
pub fn format_env(env: &Env) -> String {
    env.iter().map(|(k, v)| format!("{k}={v}\n")).collect()
}
