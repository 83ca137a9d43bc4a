//! Aggregating N-way merge of sorted inputs.

use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use arrow::{datatypes::SchemaRef, record_batch::RecordBatch};
use futures_core::{ready, Stream};
use futures_util::stream::StreamExt;
use pin_project_lite::pin_project;

use crate::{
    metrics::MergeMetrics,
    observability::{log_debug, log_info, log_warn},
    option::MergeOptions,
    schema::{ConfigError, MergeSchema},
    sort::SortDescription,
    stream::{
        cursor::{CollatedKeys, Cursor, CursorValues, GroupKey, KeyEncoder, RowKeys},
        package::BatchAssembler,
        MergeError, SortedStream,
    },
};

/// Group currently being built, carried across polls.
///
/// `current_key` is `None` while idle: at the start of the merge and right
/// after a batch was emitted on a group boundary.
struct GroupState<V> {
    current_key: Option<GroupKey<V>>,
}

impl<V: CursorValues> GroupState<V> {
    fn idle() -> Self {
        Self { current_key: None }
    }

    /// Whether `next` extends the open group.
    fn continues(&self, next: &Cursor<V>) -> bool {
        self.current_key
            .as_ref()
            .is_some_and(|current_key| current_key.matches(next))
    }

    fn open(&mut self, cursor: &Cursor<V>) {
        self.current_key = Some(cursor.key());
    }

    fn close(&mut self) {
        self.current_key = None;
    }
}

/// Merge driver for one comparison strategy `E`.
pub(crate) struct AggregatingMerge<'t, E>
where
    E: KeyEncoder,
{
    streams: Vec<SortedStream<'t>>,
    layout: MergeSchema,
    encoder: E,
    peeked: BinaryHeap<Reverse<Cursor<E::Values>>>,
    refill: Vec<usize>,
    group: GroupState<E::Values>,
    assembler: BatchAssembler,
    batch_size: usize,
    next_batch_id: usize,
    metrics: MergeMetrics,
    terminated: bool,
}

impl<'t, E> AggregatingMerge<'t, E>
where
    E: KeyEncoder,
{
    fn new(
        streams: Vec<SortedStream<'t>>,
        layout: MergeSchema,
        encoder: E,
        batch_size: usize,
    ) -> Result<Self, MergeError> {
        let assembler = BatchAssembler::try_new(&layout, batch_size)?;
        // Every input needs a cursor before the first row can be ordered.
        let refill = (0..streams.len()).rev().collect();
        Ok(Self {
            peeked: BinaryHeap::with_capacity(streams.len()),
            streams,
            layout,
            encoder,
            refill,
            group: GroupState::idle(),
            assembler,
            batch_size,
            next_batch_id: 0,
            metrics: MergeMetrics::default(),
            terminated: false,
        })
    }

    /// Pull the next non-empty batch for every input whose cursor ran out.
    ///
    /// Returns `Pending` while any of them is not ready; the open group is
    /// left untouched in that case.
    fn poll_refill(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), MergeError>> {
        while let Some(&stream_idx) = self.refill.last() {
            match ready!(self.streams[stream_idx].poll_next_unpin(cx)) {
                Some(Ok(batch)) => {
                    if batch.num_rows() == 0 {
                        continue;
                    }
                    self.layout.check_batch(stream_idx, &batch)?;
                    let keys = self.encoder.encode(&batch)?;
                    self.metrics.input_batches += 1;
                    self.metrics.input_rows += batch.num_rows() as u64;
                    self.refill.pop();
                    self.peeked.push(Reverse(Cursor::new(
                        stream_idx,
                        self.next_batch_id,
                        batch,
                        keys,
                    )));
                    self.next_batch_id += 1;
                }
                Some(Err(err)) => return Poll::Ready(Err(MergeError::Upstream(err))),
                None => {
                    log_debug!(
                        component = "merge",
                        event = "input_exhausted",
                        input = stream_idx,
                        id = %self.streams[stream_idx].id(),
                    );
                    self.refill.pop();
                }
            }
        }
        Poll::Ready(Ok(()))
    }

    fn poll_merge(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<RecordBatch, MergeError>>> {
        loop {
            ready!(self.poll_refill(cx))?;

            let key_differs = match self.peeked.peek() {
                Some(Reverse(next)) => !self.group.continues(next),
                None => break,
            };
            // A full batch is only cut on a group boundary, so a group never
            // straddles two batches.
            if key_differs && self.assembler.len() >= self.batch_size {
                self.group.close();
                return Poll::Ready(Some(self.emit()));
            }

            let Some(Reverse(mut cursor)) = self.peeked.pop() else {
                break;
            };
            if key_differs {
                self.assembler
                    .start_group(cursor.batch_id(), cursor.batch(), cursor.row())?;
                self.group.open(&cursor);
            } else {
                self.assembler.extend_group(cursor.batch(), cursor.row())?;
                self.metrics.merged_rows += 1;
            }

            cursor.advance();
            if cursor.is_finished() {
                self.refill.push(cursor.stream_idx());
            } else {
                self.peeked.push(Reverse(cursor));
            }
        }

        // Every input is exhausted: the open group, if any, is complete.
        self.group.close();
        if self.assembler.is_empty() {
            return Poll::Ready(None);
        }
        Poll::Ready(Some(self.emit()))
    }

    fn emit(&mut self) -> Result<RecordBatch, MergeError> {
        let batch = self.assembler.finish()?;
        self.metrics.output_batches += 1;
        self.metrics.output_rows += batch.num_rows() as u64;
        log_debug!(
            component = "merge",
            event = "batch_emitted",
            rows = batch.num_rows(),
        );
        Ok(batch)
    }
}

impl<'t, E> Stream for AggregatingMerge<'t, E>
where
    E: KeyEncoder,
{
    type Item = Result<RecordBatch, MergeError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }
        match ready!(this.poll_merge(cx)) {
            Some(Ok(batch)) => Poll::Ready(Some(Ok(batch))),
            Some(Err(err)) => {
                this.terminated = true;
                log_warn!(
                    component = "merge",
                    event = "merge_failed",
                    error = %err,
                    output_batches = this.metrics.output_batches,
                );
                Poll::Ready(Some(Err(err)))
            }
            None => {
                this.terminated = true;
                log_info!(
                    component = "merge",
                    event = "merge_finished",
                    input_rows = this.metrics.input_rows,
                    output_rows = this.metrics.output_rows,
                    output_batches = this.metrics.output_batches,
                    merged_rows = this.metrics.merged_rows,
                );
                Poll::Ready(None)
            }
        }
    }
}

pin_project! {
    #[project = StrategyProject]
    enum Strategy<'t> {
        Plain {
            #[pin]
            inner: AggregatingMerge<'t, RowKeys>,
        },
        Collated {
            #[pin]
            inner: AggregatingMerge<'t, CollatedKeys>,
        },
    }
}

pin_project! {
    /// Stream that merges sorted inputs and collapses rows sharing a sort key
    /// into one row, merging aggregate-state columns across the group.
    ///
    /// Plain columns keep the value of the first row of each group in merge
    /// order (lowest input index first among equal keys). Every batch holds
    /// `batch_size` rows except the last one, which may be smaller.
    pub struct AggregatingSortedStream<'t> {
        #[pin]
        strategy: Strategy<'t>,
        id: String,
        schema: SchemaRef,
    }
}

impl<'t> AggregatingSortedStream<'t> {
    /// Validate the configuration and build the merge.
    ///
    /// # Errors
    /// Returns [`MergeError::Config`] when inputs disagree on their schema, the
    /// sort key cannot be ordered, or an aggregate-state column cannot be
    /// resolved.
    pub fn try_new(
        inputs: Vec<SortedStream<'t>>,
        description: SortDescription,
        options: MergeOptions,
    ) -> Result<Self, MergeError> {
        if options.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize.into());
        }
        let schemas: Vec<SchemaRef> = inputs
            .iter()
            .map(|input| Arc::clone(input.schema()))
            .collect();
        let layout = MergeSchema::try_new(&schemas, &description, &options.registry)?;
        let schema = Arc::clone(layout.schema());
        let id = identify(&inputs, &description);

        log_debug!(
            component = "merge",
            event = "merge_started",
            inputs = inputs.len(),
            key_columns = description.len(),
            aggregate_columns = layout.aggregates().len(),
            collated = description.has_collation(),
            batch_size = options.batch_size,
        );

        let strategy = if description.has_collation() {
            let encoder = CollatedKeys::try_new(&schema, &description)?;
            Strategy::Collated {
                inner: AggregatingMerge::new(inputs, layout, encoder, options.batch_size)?,
            }
        } else {
            let encoder = RowKeys::try_new(&schema, &description)?;
            Strategy::Plain {
                inner: AggregatingMerge::new(inputs, layout, encoder, options.batch_size)?,
            }
        };
        Ok(Self {
            strategy,
            id,
            schema,
        })
    }

    /// Identifier composed from the input identifiers and the sort key.
    pub fn identify(&self) -> String {
        self.id.clone()
    }

    /// Schema of every output batch.
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    /// Progress counters so far.
    pub fn metrics(&self) -> MergeMetrics {
        match &self.strategy {
            Strategy::Plain { inner } => inner.metrics,
            Strategy::Collated { inner } => inner.metrics,
        }
    }

    /// Block the current thread until the next batch is ready.
    ///
    /// Returns `Ok(None)` once every input is exhausted and no group is open.
    pub fn pull(&mut self) -> Result<Option<RecordBatch>, MergeError> {
        futures_executor::block_on(self.next()).transpose()
    }
}

impl Stream for AggregatingSortedStream<'_> {
    type Item = Result<RecordBatch, MergeError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.project().strategy.project() {
            StrategyProject::Plain { inner } => inner.poll_next(cx),
            StrategyProject::Collated { inner } => inner.poll_next(cx),
        }
    }
}

impl std::fmt::Debug for AggregatingSortedStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatingSortedStream")
            .field("id", &self.id)
            .field("metrics", &self.metrics())
            .finish()
    }
}

fn identify(inputs: &[SortedStream<'_>], description: &SortDescription) -> String {
    let mut id = String::from("AggregatingSorted(inputs");
    for input in inputs {
        id.push_str(", ");
        id.push_str(input.id());
    }
    id.push_str(", description");
    for column in description.columns() {
        id.push_str(", ");
        id.push_str(&column.id());
    }
    id.push(')');
    id
}
