//! Counters describing one merge run.

/// Snapshot of merge progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeMetrics {
    /// Non-empty batches pulled from inputs.
    pub input_batches: u64,
    /// Rows pulled from inputs.
    pub input_rows: u64,
    /// Batches returned to the caller.
    pub output_batches: u64,
    /// Rows (groups) returned to the caller.
    pub output_rows: u64,
    /// Input rows folded into an already open group.
    pub merged_rows: u64,
}
