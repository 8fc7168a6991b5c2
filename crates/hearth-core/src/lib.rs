//! Foundational primitives shared across Hearth crates.
//!
//! Provides the bootstrap error taxonomy, the committed decision model, the
//! typed launch context that carries phase markers across the preboot/runtime
//! process boundary, and the low-level file, time, and process helpers used by
//! the commit protocol and the runtime controller.

pub mod atomic_io;
pub mod config;
pub mod decision;
pub mod errors;
pub mod event_log;
pub mod launch_context;
pub mod process_liveness;
pub mod time_utils;

pub use atomic_io::{write_text_atomic, write_text_exclusive};
pub use config::HearthConfig;
pub use decision::*;
pub use errors::{BootstrapError, BootstrapResult};
pub use event_log::{append_line_with_rotation, EventLog, LogRotationPolicy};
pub use launch_context::{short_hex_id, ExecutionPhase, LaunchContext};
pub use process_liveness::is_pid_alive;
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, utc_timestamp_rfc3339};
