//! Row cursors over input batches and the two sort-key encodings they compare.
//!
//! The encoding is a type parameter of the merge driver, so the comparison
//! strategy is fixed for a whole merge run and comparisons are statically
//! dispatched.

use std::{cmp::Ordering, sync::Arc};

use arrow::{
    array::{Array, ArrayRef, AsArray, LargeStringArray, StringArray},
    compute::SortOptions,
    datatypes::{DataType, Schema},
    error::ArrowError,
    record_batch::RecordBatch,
    row::{RowConverter, Rows, SortField},
};

use crate::sort::{Collator, SortDescription};

/// Encoded sort keys of one batch, comparable with keys of any other batch
/// produced by the same [`KeyEncoder`].
pub(crate) trait CursorValues: Send + Sync + 'static {
    fn len(&self) -> usize;

    fn compare(left: &Self, left_idx: usize, right: &Self, right_idx: usize) -> Ordering;
}

/// Turns the sort-key columns of a batch into [`CursorValues`].
pub(crate) trait KeyEncoder: Send + Unpin {
    type Values: CursorValues;

    fn encode(&mut self, batch: &RecordBatch) -> Result<Self::Values, ArrowError>;
}

/// Byte-comparable row encoding of every key column.
#[derive(Debug)]
pub(crate) struct RowKeys {
    converter: RowConverter,
    positions: Vec<usize>,
}

impl RowKeys {
    pub(crate) fn try_new(
        schema: &Schema,
        description: &SortDescription,
    ) -> Result<Self, ArrowError> {
        let fields = description
            .columns()
            .iter()
            .map(|column| {
                SortField::new_with_options(
                    schema.field(column.position).data_type().clone(),
                    column.options,
                )
            })
            .collect();
        Ok(Self {
            converter: RowConverter::new(fields)?,
            positions: description.positions().collect(),
        })
    }
}

impl KeyEncoder for RowKeys {
    type Values = Rows;

    fn encode(&mut self, batch: &RecordBatch) -> Result<Rows, ArrowError> {
        let columns: Vec<ArrayRef> = self
            .positions
            .iter()
            .map(|position| Arc::clone(batch.column(*position)))
            .collect();
        self.converter.convert_columns(&columns)
    }
}

impl CursorValues for Rows {
    fn len(&self) -> usize {
        self.num_rows()
    }

    fn compare(left: &Self, left_idx: usize, right: &Self, right_idx: usize) -> Ordering {
        left.row(left_idx).cmp(&right.row(right_idx))
    }
}

#[derive(Debug)]
enum ColumnEncoder {
    Collated {
        position: usize,
        options: SortOptions,
        collator: Arc<dyn Collator>,
    },
    Plain {
        position: usize,
        converter: RowConverter,
    },
}

/// Per-column keys where collated text columns compare through their collator.
#[derive(Debug)]
pub(crate) struct CollatedKeys {
    columns: Vec<ColumnEncoder>,
}

impl CollatedKeys {
    pub(crate) fn try_new(
        schema: &Schema,
        description: &SortDescription,
    ) -> Result<Self, ArrowError> {
        let columns = description
            .columns()
            .iter()
            .map(|column| match &column.collation {
                Some(collator) => Ok(ColumnEncoder::Collated {
                    position: column.position,
                    options: column.options,
                    collator: Arc::clone(collator),
                }),
                None => {
                    let field = SortField::new_with_options(
                        schema.field(column.position).data_type().clone(),
                        column.options,
                    );
                    Ok(ColumnEncoder::Plain {
                        position: column.position,
                        converter: RowConverter::new(vec![field])?,
                    })
                }
            })
            .collect::<Result<_, ArrowError>>()?;
        Ok(Self { columns })
    }
}

impl KeyEncoder for CollatedKeys {
    type Values = CollatedValues;

    fn encode(&mut self, batch: &RecordBatch) -> Result<CollatedValues, ArrowError> {
        let columns = self
            .columns
            .iter_mut()
            .map(|column| match column {
                ColumnEncoder::Collated {
                    position,
                    options,
                    collator,
                } => Ok(KeyColumn::Collated {
                    text: TextColumn::try_from_array(batch.column(*position))?,
                    options: *options,
                    collator: Arc::clone(collator),
                }),
                ColumnEncoder::Plain {
                    position,
                    converter,
                } => Ok(KeyColumn::Plain(
                    converter.convert_columns(&[Arc::clone(batch.column(*position))])?,
                )),
            })
            .collect::<Result<_, ArrowError>>()?;
        Ok(CollatedValues {
            columns,
            len: batch.num_rows(),
        })
    }
}

#[derive(Debug)]
enum TextColumn {
    Utf8(StringArray),
    LargeUtf8(LargeStringArray),
}

impl TextColumn {
    fn try_from_array(array: &ArrayRef) -> Result<Self, ArrowError> {
        match array.data_type() {
            DataType::Utf8 => Ok(Self::Utf8(array.as_string::<i32>().clone())),
            DataType::LargeUtf8 => Ok(Self::LargeUtf8(array.as_string::<i64>().clone())),
            other => Err(ArrowError::InvalidArgumentError(format!(
                "collated sort column must be text, found {other}"
            ))),
        }
    }

    fn value(&self, idx: usize) -> Option<&str> {
        match self {
            Self::Utf8(array) => array.is_valid(idx).then(|| array.value(idx)),
            Self::LargeUtf8(array) => array.is_valid(idx).then(|| array.value(idx)),
        }
    }
}

#[derive(Debug)]
enum KeyColumn {
    Collated {
        text: TextColumn,
        options: SortOptions,
        collator: Arc<dyn Collator>,
    },
    Plain(Rows),
}

/// Sort keys of one batch for the collated strategy.
#[derive(Debug)]
pub(crate) struct CollatedValues {
    columns: Vec<KeyColumn>,
    len: usize,
}

impl CursorValues for CollatedValues {
    fn len(&self) -> usize {
        self.len
    }

    fn compare(left: &Self, left_idx: usize, right: &Self, right_idx: usize) -> Ordering {
        for (l, r) in left.columns.iter().zip(right.columns.iter()) {
            let ordering = match (l, r) {
                (
                    KeyColumn::Collated {
                        text: l_text,
                        options,
                        collator,
                    },
                    KeyColumn::Collated { text: r_text, .. },
                ) => compare_collated(
                    l_text.value(left_idx),
                    r_text.value(right_idx),
                    *options,
                    collator.as_ref(),
                ),
                (KeyColumn::Plain(l_rows), KeyColumn::Plain(r_rows)) => {
                    l_rows.row(left_idx).cmp(&r_rows.row(right_idx))
                }
                // Both sides come from the same encoder, so column kinds line up.
                _ => Ordering::Equal,
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// The strategy is fixed per run; only the collator call is dispatched
/// dynamically, once per compared pair.
fn compare_collated(
    left: Option<&str>,
    right: Option<&str>,
    options: SortOptions,
    collator: &dyn Collator,
) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) if options.nulls_first => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) if options.nulls_first => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(left), Some(right)) => {
            let ordering = collator.compare(left, right);
            if options.descending {
                ordering.reverse()
            } else {
                ordering
            }
        }
    }
}

/// Position inside the current batch of one input.
///
/// Ordered by sort key, then by input index so equal keys are consumed in a
/// deterministic order.
#[derive(Debug)]
pub(crate) struct Cursor<V> {
    stream_idx: usize,
    batch_id: usize,
    batch: RecordBatch,
    keys: Arc<V>,
    offset: usize,
}

impl<V: CursorValues> Cursor<V> {
    pub(crate) fn new(stream_idx: usize, batch_id: usize, batch: RecordBatch, keys: V) -> Self {
        debug_assert_eq!(batch.num_rows(), keys.len());
        Self {
            stream_idx,
            batch_id,
            batch,
            keys: Arc::new(keys),
            offset: 0,
        }
    }

    pub(crate) fn stream_idx(&self) -> usize {
        self.stream_idx
    }

    /// Unique id of the batch under this cursor within a merge run.
    pub(crate) fn batch_id(&self) -> usize {
        self.batch_id
    }

    pub(crate) fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Row offset of the current row.
    pub(crate) fn row(&self) -> usize {
        self.offset
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.offset >= self.keys.len()
    }

    pub(crate) fn advance(&mut self) {
        debug_assert!(!self.is_finished());
        self.offset += 1;
    }

    /// Key of the current row, detached from the cursor.
    pub(crate) fn key(&self) -> GroupKey<V> {
        GroupKey {
            keys: Arc::clone(&self.keys),
            row: self.offset,
        }
    }
}

impl<V: CursorValues> Ord for Cursor<V> {
    fn cmp(&self, other: &Self) -> Ordering {
        V::compare(&self.keys, self.offset, &other.keys, other.offset)
            .then(self.stream_idx.cmp(&other.stream_idx))
    }
}

impl<V: CursorValues> PartialOrd for Cursor<V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<V: CursorValues> PartialEq for Cursor<V> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<V: CursorValues> Eq for Cursor<V> {}

/// Sort key of a row that outlives the cursor it was taken from.
///
/// Holds the encoded keys of the source batch, so the key of an open group
/// stays comparable after its cursor moved to another batch.
#[derive(Debug)]
pub(crate) struct GroupKey<V> {
    keys: Arc<V>,
    row: usize,
}

impl<V: CursorValues> GroupKey<V> {
    /// Whether the current row of `cursor` belongs to the group keyed by `self`.
    pub(crate) fn matches(&self, cursor: &Cursor<V>) -> bool {
        V::compare(&self.keys, self.row, &cursor.keys, cursor.offset) == Ordering::Equal
    }
}
