//! Tracing macros for merge events.
//!
//! Every event uses the target `aggregating_merge` and carries `component` and
//! `event` fields. No subscriber is installed here, and rows are never logged
//! individually.

/// Target for all merge log events.
pub(crate) const MERGE_TARGET: &str = "aggregating_merge";

/// Info-level merge event.
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::MERGE_TARGET, $($field)*)
    };
}

/// Debug-level merge event.
macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::MERGE_TARGET, $($field)*)
    };
}

/// Warn-level merge event.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::MERGE_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_info;
pub(crate) use log_warn;
