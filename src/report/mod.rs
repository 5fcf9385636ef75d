/// Reading the tail of a growing text file
mod tail;
pub use tail::{last_record, read_status_record, tail_with_line_numbers, TailLine};

/// Point-in-time status of a running model
mod snapshot;
pub use snapshot::{StatusSnapshot, StatusSource};

/// Background thread that pushes snapshots to the control plane
mod reporter;
pub use reporter::{StatusReporter, DEFAULT_INTERVAL};
