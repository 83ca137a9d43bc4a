use std::sync::Arc;

use crate::aggregate::AggregateRegistry;

/// Default number of rows per output batch.
pub const DEFAULT_BATCH_SIZE: usize = 8192;

/// Options for one merge run.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub(crate) batch_size: usize,
    pub(crate) registry: Arc<AggregateRegistry>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        MergeOptions {
            batch_size: DEFAULT_BATCH_SIZE,
            registry: Arc::new(AggregateRegistry::with_builtins()),
        }
    }
}

impl MergeOptions {
    /// Options with the default batch size and the built-in aggregate functions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Target number of rows per output batch.
    pub fn batch_size(self, batch_size: usize) -> Self {
        MergeOptions { batch_size, ..self }
    }

    /// Registry resolving the aggregate functions named by state columns.
    pub fn registry(self, registry: Arc<AggregateRegistry>) -> Self {
        MergeOptions { registry, ..self }
    }
}
