mod timer;
pub use timer::Timer;

mod expand;
pub use expand::{expand_path, expand_vars, expand_vars_with};

#[derive(thiserror::Error, Debug)]
#[error("Filesystem path is not valid UTF-8")]
pub struct PathEncodingError;
