#![deny(missing_docs)]
//! Aggregating N-way merge of sorted Arrow record batch streams.
//!
//! Every input yields `RecordBatch` values already ordered by a shared
//! [`SortDescription`]. [`AggregatingSortedStream`] merges them into one
//! sorted stream where consecutive rows with an equal sort key collapse into a
//! single row. Columns tagged as aggregate states (see
//! [`aggregate::aggregate_state_field`]) are merged through their
//! [`aggregate::AggregateFunction`]; every other column keeps the value of the
//! first row of the group.
//!
//! ```no_run
//! use aggregating_merge::{
//!     AggregatingSortedStream, MergeOptions, SortDescription, SortedStream,
//! };
//! # fn inputs() -> Vec<SortedStream<'static>> { unimplemented!() }
//!
//! let mut merge = AggregatingSortedStream::try_new(
//!     inputs(),
//!     SortDescription::ascending([0]),
//!     MergeOptions::new().batch_size(1024),
//! )?;
//! while let Some(batch) = merge.pull()? {
//!     println!("{} groups", batch.num_rows());
//! }
//! # Ok::<(), aggregating_merge::MergeError>(())
//! ```

/// Aggregate functions and their per-group state columns.
pub mod aggregate;
mod metrics;
mod observability;
mod option;
mod schema;
/// Sort key descriptions and collations.
pub mod sort;
mod stream;

pub use crate::{
    metrics::MergeMetrics,
    option::{MergeOptions, DEFAULT_BATCH_SIZE},
    schema::ConfigError,
    sort::{CaseInsensitive, Collator, SortColumn, SortDescription},
    stream::{AggregatingSortedStream, MergeError, SortedStream},
};
