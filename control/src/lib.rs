//! Boundary to the remote control plane that hands out run bundles
//! and receives status reports and results.

/// Status values reported for a run
mod status;
pub use status::Status;

/// Transport and protocol errors
mod error;
pub use error::Error;

/// The `ControlPlane` trait
mod client;
pub use client::{ControlPlane, UploadReceipt};

/// Blocking HTTP implementation of `ControlPlane`
mod http;
pub use http::HttpClient;

/// In-memory `ControlPlane` that records every call
pub mod fake;
