//! Upstream protection: per-video failure memory and global invocation pacing.

pub mod failure_memory;
pub mod rate;

pub use failure_memory::{FailureCheck, FailureMemory, FailureMemoryConfig, FailureSnapshot};
pub use rate::{RateConfig, RateController};
