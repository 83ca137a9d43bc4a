//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use aggregating_merge::{aggregate::aggregate_state_field, AggregatingSortedStream, SortedStream};
use arrow::{
    array::{AsArray, Int64Array, StringArray},
    datatypes::{DataType, Field, Int64Type, Schema, SchemaRef},
    error::ArrowError,
    record_batch::RecordBatch,
};
use futures::{Stream, StreamExt};

/// Row of the shared test layout: key, first-seen label, `sum` state.
pub type Row = (i64, String, i64);

/// `k: Int64` key, `label: Utf8` plain column, `total: Int64` sum state.
pub fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("k", DataType::Int64, false),
        Field::new("label", DataType::Utf8, true),
        aggregate_state_field("total", DataType::Int64, "sum"),
    ]))
}

pub fn batch(rows: &[(i64, &str, i64)]) -> RecordBatch {
    RecordBatch::try_new(
        schema(),
        vec![
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|row| row.0))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|row| row.1))),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|row| row.2))),
        ],
    )
    .expect("test batch should match the schema")
}

pub fn input(id: &str, batches: Vec<RecordBatch>) -> SortedStream<'static> {
    SortedStream::from_batches(id, schema(), batches)
}

/// Drain `merge`, panicking on the first error.
pub async fn collect(merge: &mut AggregatingSortedStream<'_>) -> Vec<RecordBatch> {
    let mut batches = Vec::new();
    while let Some(batch) = merge.next().await {
        batches.push(batch.expect("merge should not fail"));
    }
    batches
}

/// Flatten batches of the shared layout into rows.
pub fn rows(batches: &[RecordBatch]) -> Vec<Row> {
    let mut rows = Vec::new();
    for batch in batches {
        let keys = batch.column(0).as_primitive::<Int64Type>();
        let labels = batch.column(1).as_string::<i32>();
        let totals = batch.column(2).as_primitive::<Int64Type>();
        for row in 0..batch.num_rows() {
            rows.push((
                keys.value(row),
                labels.value(row).to_string(),
                totals.value(row),
            ));
        }
    }
    rows
}

/// Input that reports `Poll::Pending` once before every item.
pub struct PendingOnce {
    items: VecDeque<Result<RecordBatch, ArrowError>>,
    ready: bool,
}

impl PendingOnce {
    pub fn new(items: Vec<Result<RecordBatch, ArrowError>>) -> Self {
        Self {
            items: items.into(),
            ready: false,
        }
    }
}

impl Stream for PendingOnce {
    type Item = Result<RecordBatch, ArrowError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if !self.ready {
            self.ready = true;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        self.ready = false;
        Poll::Ready(self.items.pop_front())
    }
}
