//! Read side of the merge: sorted inputs, cursors, the aggregating merge
//! driver and output batch packaging.

pub(crate) mod cursor;
pub(crate) mod merge;
pub(crate) mod package;

use core::fmt;
use std::{
    pin::Pin,
    task::{Context, Poll},
};

use arrow::{datatypes::SchemaRef, error::ArrowError, record_batch::RecordBatch};
use futures_core::Stream;
use futures_util::stream::{self, BoxStream, StreamExt};
pub use merge::AggregatingSortedStream;
use thiserror::Error;

use crate::{aggregate::AggregateError, schema::ConfigError};

/// Errors surfaced while merging.
///
/// Any error terminates the merge; batches returned earlier remain valid.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Invalid configuration or a batch that violates the declared schema.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Merging aggregation states failed.
    #[error("aggregate state merge failed: {0}")]
    Aggregate(#[from] AggregateError),
    /// Failure raised by an input stream, passed through unchanged.
    #[error(transparent)]
    Upstream(ArrowError),
    /// Encoding sort keys or assembling an output batch failed.
    #[error("arrow error while merging: {0}")]
    Arrow(#[from] ArrowError),
}

/// One sorted input of a merge run.
///
/// Batches must already be ordered by the merge's sort description, within and
/// across batches. Empty batches are skipped.
pub struct SortedStream<'t> {
    id: String,
    schema: SchemaRef,
    inner: BoxStream<'t, Result<RecordBatch, ArrowError>>,
}

impl<'t> SortedStream<'t> {
    /// Wrap `stream`, which yields batches conforming to `schema`.
    pub fn new<S>(id: impl Into<String>, schema: SchemaRef, stream: S) -> Self
    where
        S: Stream<Item = Result<RecordBatch, ArrowError>> + Send + 't,
    {
        Self {
            id: id.into(),
            schema,
            inner: stream.boxed(),
        }
    }

    /// Input over batches already held in memory.
    pub fn from_batches(
        id: impl Into<String>,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> Self {
        Self::new(id, schema, stream::iter(batches.into_iter().map(Ok)))
    }

    /// Identifier used when composing the merge identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Declared schema of every batch.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }
}

impl Stream for SortedStream<'_> {
    type Item = Result<RecordBatch, ArrowError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for SortedStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortedStream")
            .field("id", &self.id)
            .field("schema", &self.schema)
            .finish()
    }
}
