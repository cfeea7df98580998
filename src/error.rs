//! # Errors
//!
//! Recoverable failures reported to callers. Contract violations (blocking
//! in interrupt context, recursive lock acquisition, out-of-range priority,
//! ...) are not represented here: they halt the kernel with a panic.

use alloc::string::String;
use thiserror::Error;

/// Failures returned by kernel operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    /// No thread record or execution context could be allocated.
    #[error("thread allocation failed")]
    AllocationFailure,

    /// The boot configuration was rejected.
    #[error("invalid kernel configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Problems with a boot-time [`KernelConfig`](crate::config::KernelConfig).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown scheduler option `{0}`")]
    UnknownOption(String),

    #[error("option `{0}` requires a value")]
    MissingValue(&'static str),

    #[error("timer frequency {0} Hz outside 19..=1000")]
    TimerFrequency(u32),

    #[error("time slice must be at least one tick")]
    TimeSlice,

    #[error("thread table of {0} entries cannot hold the initial and idle threads")]
    ThreadLimit(usize),

    #[error("donation depth must be at least one")]
    DonationDepth,
}
