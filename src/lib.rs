//! Sandboxed job execution for air-gapped environments.
//!
//! A low side submits jobs into a folder queue, a high side pulls them over
//! rsync, runs them against private data in a sandbox and pushes the results
//! back. See [`core::coordinator`] for the pairing and [`core::runner`] for
//! the execution backends.

pub mod core;
pub mod util;

pub use crate::core::coordinator::{HighSide, LowSide};
pub use crate::core::error::{Error, Result};
pub use crate::core::job::{Job, JobErrorKind, JobStatus, JobUpdate};
pub use crate::core::job_config::JobConfig;
pub use crate::core::queue::{JobSubmission, RuntimeDirectory};
pub use crate::core::runtime::{Runtime, RuntimeConfig, RuntimeKind};
pub use crate::core::workspace::{Side, Workspace};
