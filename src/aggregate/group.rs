//! Per-group merging of aggregate-state columns.

use std::sync::Arc;

use arrow::{array::ArrayRef, datatypes::Schema, record_batch::RecordBatch};

use super::{AggregateError, AggregateFunction, StateColumn};

#[derive(Debug)]
struct AggregateColumn {
    position: usize,
    states: Box<dyn StateColumn>,
}

/// Owns one [`StateColumn`] per aggregate-state column of the output.
///
/// Every opened group appends one slot to each state column; rows extending
/// the group merge into that last slot. Non-aggregate columns are never
/// touched here, so the first row of a group keeps its plain values.
#[derive(Debug)]
pub(crate) struct GroupAggregator {
    columns: Vec<AggregateColumn>,
    groups: usize,
}

impl GroupAggregator {
    pub(crate) fn new(
        schema: &Schema,
        aggregates: &[(usize, Arc<dyn AggregateFunction>)],
    ) -> Result<Self, AggregateError> {
        let columns = aggregates
            .iter()
            .map(|(position, function)| {
                let data_type = schema.field(*position).data_type();
                Ok(AggregateColumn {
                    position: *position,
                    states: function.state_column(data_type)?,
                })
            })
            .collect::<Result<Vec<_>, AggregateError>>()?;
        Ok(Self { columns, groups: 0 })
    }

    /// Open a group: copy the state cells of `row` as its initial states.
    pub(crate) fn start_group(
        &mut self,
        batch: &RecordBatch,
        row: usize,
    ) -> Result<(), AggregateError> {
        for column in &mut self.columns {
            column
                .states
                .push_state(batch.column(column.position).as_ref(), row)?;
        }
        self.groups += 1;
        Ok(())
    }

    /// Merge the state cells of `row` into the open group.
    pub(crate) fn extend_group(
        &mut self,
        batch: &RecordBatch,
        row: usize,
    ) -> Result<(), AggregateError> {
        let slot = self
            .groups
            .checked_sub(1)
            .ok_or(AggregateError::SlotOutOfBounds { slot: 0, len: 0 })?;
        for column in &mut self.columns {
            column
                .states
                .merge_state(slot, batch.column(column.position).as_ref(), row)?;
        }
        Ok(())
    }

    /// Number of groups opened since the last [`GroupAggregator::finish`].
    pub(crate) fn groups(&self) -> usize {
        self.groups
    }

    /// Drain merged states as `(position, array)` pairs.
    pub(crate) fn finish(&mut self) -> Result<Vec<(usize, ArrayRef)>, AggregateError> {
        self.groups = 0;
        self.columns
            .iter_mut()
            .map(|column| Ok((column.position, column.states.finish()?)))
            .collect()
    }
}
