//! Package merged groups into Arrow record batches.

use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
};

use arrow::{
    array::{Array, ArrayRef},
    compute::interleave,
    datatypes::SchemaRef,
    record_batch::RecordBatch,
};

use crate::{aggregate::group::GroupAggregator, schema::MergeSchema, stream::MergeError};

/// Accumulates one output row per group until the batch is finished.
///
/// Plain columns are not copied row by row: each group records the
/// `(source, row)` of its first row and the columns are gathered with a single
/// interleave when the batch is finished. Source batches stay referenced in
/// `sources` until then. Aggregate-state columns live in the
/// [`GroupAggregator`], whose last slot is the open group.
#[derive(Debug)]
pub(crate) struct BatchAssembler {
    schema: SchemaRef,
    plain_columns: Vec<usize>,
    sources: Vec<RecordBatch>,
    source_slots: HashMap<usize, usize>,
    indices: Vec<(usize, usize)>,
    aggregator: GroupAggregator,
}

impl BatchAssembler {
    pub(crate) fn try_new(layout: &MergeSchema, batch_size: usize) -> Result<Self, MergeError> {
        Ok(Self {
            schema: Arc::clone(layout.schema()),
            plain_columns: layout.plain_columns().to_vec(),
            sources: Vec::new(),
            source_slots: HashMap::new(),
            indices: Vec::with_capacity(batch_size),
            aggregator: GroupAggregator::new(layout.schema(), layout.aggregates())?,
        })
    }

    /// Open a new output row from `row` of `batch`.
    pub(crate) fn start_group(
        &mut self,
        batch_id: usize,
        batch: &RecordBatch,
        row: usize,
    ) -> Result<(), MergeError> {
        self.aggregator.start_group(batch, row)?;
        let source = match self.source_slots.entry(batch_id) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                self.sources.push(batch.clone());
                *entry.insert(self.sources.len() - 1)
            }
        };
        self.indices.push((source, row));
        Ok(())
    }

    /// Fold `row` of `batch` into the open output row.
    pub(crate) fn extend_group(
        &mut self,
        batch: &RecordBatch,
        row: usize,
    ) -> Result<(), MergeError> {
        self.aggregator.extend_group(batch, row)?;
        Ok(())
    }

    /// Rows (groups) accumulated so far.
    pub(crate) fn len(&self) -> usize {
        self.indices.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Build the output batch and reset for the next one.
    pub(crate) fn finish(&mut self) -> Result<RecordBatch, MergeError> {
        debug_assert_eq!(self.aggregator.groups(), self.indices.len());
        let mut columns: Vec<Option<ArrayRef>> = vec![None; self.schema.fields().len()];
        for &position in &self.plain_columns {
            let arrays: Vec<&dyn Array> = self
                .sources
                .iter()
                .map(|batch| batch.column(position).as_ref())
                .collect();
            columns[position] = Some(interleave(&arrays, &self.indices)?);
        }
        for (position, states) in self.aggregator.finish()? {
            columns[position] = Some(states);
        }

        self.sources.clear();
        self.source_slots.clear();
        self.indices.clear();

        let columns = columns.into_iter().flatten().collect();
        Ok(RecordBatch::try_new(Arc::clone(&self.schema), columns)?)
    }
}
