//! Setup-time validation of input schemas against the sort key and the
//! aggregate-state column layout.

use std::sync::Arc;

use arrow::{
    array::Array,
    datatypes::{DataType, SchemaRef},
    record_batch::RecordBatch,
    row::{RowConverter, SortField},
};
use thiserror::Error;

use crate::{
    aggregate::{aggregate_function_name, AggregateError, AggregateFunction, AggregateRegistry},
    sort::SortDescription,
};

/// Configuration problems detected once, before any row is merged.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No input stream was supplied.
    #[error("merge requires at least one input")]
    NoInputs,
    /// The sort description names no column.
    #[error("sort description names no column")]
    EmptySortKey,
    /// Target batch size of zero.
    #[error("batch size must be greater than zero")]
    ZeroBatchSize,
    /// Input disagrees with the first input on column count.
    #[error("input {input} has {actual} columns, expected {expected}")]
    ColumnCount {
        /// Offending input.
        input: usize,
        /// Column count of the first input.
        expected: usize,
        /// Column count of the offending input.
        actual: usize,
    },
    /// Input disagrees with the first input on a column type.
    #[error("input {input} column {column} has type {actual}, expected {expected}")]
    ColumnType {
        /// Offending input.
        input: usize,
        /// Column position.
        column: usize,
        /// Type in the first input.
        expected: DataType,
        /// Type in the offending input.
        actual: DataType,
    },
    /// Input disagrees with the first input on whether a column is nullable.
    #[error("input {input} column {column} has nullable = {actual}, expected {expected}")]
    ColumnNullability {
        /// Offending input.
        input: usize,
        /// Column position.
        column: usize,
        /// Nullability in the first input.
        expected: bool,
        /// Nullability in the offending input.
        actual: bool,
    },
    /// Inputs disagree on which function, if any, a column aggregates.
    #[error(
        "input {input} column {column} aggregates {actual:?}, first input aggregates {expected:?}"
    )]
    AggregateMismatch {
        /// Offending input.
        input: usize,
        /// Column position.
        column: usize,
        /// Function named by the first input.
        expected: Option<String>,
        /// Function named by the offending input.
        actual: Option<String>,
    },
    /// Field metadata names a function missing from the registry.
    #[error("column {column} names unknown aggregate function {function}")]
    UnknownAggregate {
        /// Column position.
        column: usize,
        /// Unresolved function name.
        function: String,
    },
    /// The aggregate function rejected the column type.
    #[error("column {column}: {source}")]
    Aggregate {
        /// Column position.
        column: usize,
        /// Rejection reported by the function.
        #[source]
        source: AggregateError,
    },
    /// Sort column position past the end of the schema.
    #[error("sort column {position} out of range ({columns} columns)")]
    SortColumnOutOfRange {
        /// Requested position.
        position: usize,
        /// Number of columns.
        columns: usize,
    },
    /// Sort column holds aggregate states.
    #[error("sort column {position} holds aggregate states")]
    AggregateSortColumn {
        /// Column position.
        position: usize,
    },
    /// Sort column type has no total order.
    #[error("sort column {position} of type {data_type} cannot be ordered")]
    UnorderableSortColumn {
        /// Column position.
        position: usize,
        /// Column type.
        data_type: DataType,
    },
    /// Collation attached to a non-text column.
    #[error("collation on sort column {position} requires text, found {data_type}")]
    CollationOnNonText {
        /// Column position.
        position: usize,
        /// Column type.
        data_type: DataType,
    },
    /// A batch arrived that does not match the declared schema.
    #[error("input {input} produced a batch that does not match its declared schema")]
    BatchSchema {
        /// Offending input.
        input: usize,
    },
}

/// Validated column layout shared by every input of one merge run.
#[derive(Clone, Debug)]
pub(crate) struct MergeSchema {
    schema: SchemaRef,
    aggregates: Vec<(usize, Arc<dyn AggregateFunction>)>,
    plain_columns: Vec<usize>,
}

impl MergeSchema {
    pub(crate) fn try_new(
        inputs: &[SchemaRef],
        description: &SortDescription,
        registry: &AggregateRegistry,
    ) -> Result<Self, ConfigError> {
        let schema = inputs.first().ok_or(ConfigError::NoInputs)?;
        if description.is_empty() {
            return Err(ConfigError::EmptySortKey);
        }

        for (input, other) in inputs.iter().enumerate().skip(1) {
            check_compatible(input, schema, other)?;
        }

        let mut aggregates = Vec::new();
        let mut plain_columns = Vec::new();
        for (column, field) in schema.fields().iter().enumerate() {
            let Some(name) = aggregate_function_name(field) else {
                plain_columns.push(column);
                continue;
            };
            let function = registry
                .get(name)
                .ok_or_else(|| ConfigError::UnknownAggregate {
                    column,
                    function: name.to_string(),
                })?;
            function
                .state_column(field.data_type())
                .map_err(|source| ConfigError::Aggregate { column, source })?;
            aggregates.push((column, Arc::clone(function)));
        }

        let columns = schema.fields().len();
        for sort_column in description.columns() {
            let position = sort_column.position;
            if position >= columns {
                return Err(ConfigError::SortColumnOutOfRange { position, columns });
            }
            if aggregates.iter().any(|(column, _)| *column == position) {
                return Err(ConfigError::AggregateSortColumn { position });
            }
            let data_type = schema.field(position).data_type();
            if sort_column.collation.is_some() {
                if !matches!(data_type, DataType::Utf8 | DataType::LargeUtf8) {
                    return Err(ConfigError::CollationOnNonText {
                        position,
                        data_type: data_type.clone(),
                    });
                }
                continue;
            }
            let field = SortField::new_with_options(data_type.clone(), sort_column.options);
            if !RowConverter::supports_fields(std::slice::from_ref(&field)) {
                return Err(ConfigError::UnorderableSortColumn {
                    position,
                    data_type: data_type.clone(),
                });
            }
        }

        Ok(Self {
            schema: Arc::clone(schema),
            aggregates,
            plain_columns,
        })
    }

    pub(crate) fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Aggregate-state columns and the functions merging them.
    pub(crate) fn aggregates(&self) -> &[(usize, Arc<dyn AggregateFunction>)] {
        &self.aggregates
    }

    /// Columns that keep the first-seen value of a group.
    pub(crate) fn plain_columns(&self) -> &[usize] {
        &self.plain_columns
    }

    /// Cheap per-batch check that column count, types and nullability match
    /// the layout.
    pub(crate) fn check_batch(&self, input: usize, batch: &RecordBatch) -> Result<(), ConfigError> {
        let fields = self.schema.fields();
        let matches = batch.num_columns() == fields.len()
            && batch
                .columns()
                .iter()
                .zip(fields.iter())
                .all(|(column, field)| {
                    column.data_type() == field.data_type()
                        && (field.is_nullable() || column.null_count() == 0)
                });
        if matches {
            Ok(())
        } else {
            Err(ConfigError::BatchSchema { input })
        }
    }
}

fn check_compatible(input: usize, first: &SchemaRef, other: &SchemaRef) -> Result<(), ConfigError> {
    if first.fields().len() != other.fields().len() {
        return Err(ConfigError::ColumnCount {
            input,
            expected: first.fields().len(),
            actual: other.fields().len(),
        });
    }
    for (column, (expected, actual)) in first.fields().iter().zip(other.fields().iter()).enumerate()
    {
        if expected.data_type() != actual.data_type() {
            return Err(ConfigError::ColumnType {
                input,
                column,
                expected: expected.data_type().clone(),
                actual: actual.data_type().clone(),
            });
        }
        if expected.is_nullable() != actual.is_nullable() {
            return Err(ConfigError::ColumnNullability {
                input,
                column,
                expected: expected.is_nullable(),
                actual: actual.is_nullable(),
            });
        }
        let expected_function = aggregate_function_name(expected);
        let actual_function = aggregate_function_name(actual);
        if expected_function != actual_function {
            return Err(ConfigError::AggregateMismatch {
                input,
                column,
                expected: expected_function.map(str::to_string),
                actual: actual_function.map(str::to_string),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use arrow::{
        array::{Int64Array, StringArray},
        datatypes::{Field, Schema},
    };

    use super::*;
    use crate::{
        aggregate::aggregate_state_field,
        sort::{CaseInsensitive, SortColumn},
    };

    fn schema(fields: Vec<Field>) -> SchemaRef {
        Arc::new(Schema::new(fields))
    }

    fn base() -> SchemaRef {
        schema(vec![
            Field::new("k", DataType::Int64, false),
            Field::new("v", DataType::Utf8, true),
            aggregate_state_field("total", DataType::Int64, "sum"),
        ])
    }

    fn layout(
        inputs: &[SchemaRef],
        description: SortDescription,
    ) -> Result<MergeSchema, ConfigError> {
        MergeSchema::try_new(inputs, &description, &AggregateRegistry::with_builtins())
    }

    #[test]
    fn identifies_aggregate_and_plain_columns() {
        let layout = layout(&[base(), base()], SortDescription::ascending([0])).expect("layout");
        assert_eq!(layout.plain_columns(), &[0, 1]);
        let aggregates: Vec<_> = layout
            .aggregates()
            .iter()
            .map(|(column, function)| (*column, function.name().to_string()))
            .collect();
        assert_eq!(aggregates, vec![(2, "sum".to_string())]);
    }

    #[test]
    fn rejects_disagreeing_inputs() {
        let fewer = schema(vec![Field::new("k", DataType::Int64, false)]);
        assert!(matches!(
            layout(&[base(), fewer], SortDescription::ascending([0])),
            Err(ConfigError::ColumnCount {
                input: 1,
                expected: 3,
                actual: 1
            })
        ));

        let retyped = schema(vec![
            Field::new("k", DataType::Int32, false),
            Field::new("v", DataType::Utf8, true),
            aggregate_state_field("total", DataType::Int64, "sum"),
        ]);
        assert!(matches!(
            layout(&[base(), retyped], SortDescription::ascending([0])),
            Err(ConfigError::ColumnType { column: 0, .. })
        ));

        let nullable_key = schema(vec![
            Field::new("k", DataType::Int64, true),
            Field::new("v", DataType::Utf8, true),
            aggregate_state_field("total", DataType::Int64, "sum"),
        ]);
        assert!(matches!(
            layout(&[base(), nullable_key], SortDescription::ascending([0])),
            Err(ConfigError::ColumnNullability {
                input: 1,
                column: 0,
                expected: false,
                actual: true
            })
        ));

        let plain_total = schema(vec![
            Field::new("k", DataType::Int64, false),
            Field::new("v", DataType::Utf8, true),
            Field::new("total", DataType::Int64, true),
        ]);
        assert!(matches!(
            layout(&[base(), plain_total], SortDescription::ascending([0])),
            Err(ConfigError::AggregateMismatch { column: 2, .. })
        ));
    }

    #[test]
    fn rejects_bad_sort_keys() {
        assert!(matches!(
            layout(&[base()], SortDescription::default()),
            Err(ConfigError::EmptySortKey)
        ));
        assert!(matches!(
            layout(&[base()], SortDescription::ascending([7])),
            Err(ConfigError::SortColumnOutOfRange { position: 7, .. })
        ));
        assert!(matches!(
            layout(&[base()], SortDescription::ascending([2])),
            Err(ConfigError::AggregateSortColumn { position: 2 })
        ));
        let collated_int = SortDescription::new(vec![
            SortColumn::asc(0).with_collation(Arc::new(CaseInsensitive))
        ]);
        assert!(matches!(
            layout(&[base()], collated_int),
            Err(ConfigError::CollationOnNonText { position: 0, .. })
        ));
        assert!(matches!(
            layout(&[], SortDescription::ascending([0])),
            Err(ConfigError::NoInputs)
        ));
    }

    #[test]
    fn rejects_unknown_or_unsupported_aggregates() {
        let unknown = schema(vec![
            Field::new("k", DataType::Int64, false),
            aggregate_state_field("u", DataType::Binary, "uniq"),
        ]);
        assert!(matches!(
            layout(&[unknown], SortDescription::ascending([0])),
            Err(ConfigError::UnknownAggregate { column: 1, .. })
        ));

        let unsupported = schema(vec![
            Field::new("k", DataType::Int64, false),
            aggregate_state_field("c", DataType::Utf8, "count"),
        ]);
        assert!(matches!(
            layout(&[unsupported], SortDescription::ascending([0])),
            Err(ConfigError::Aggregate { column: 1, .. })
        ));
    }

    #[test]
    fn batch_check_catches_retyped_columns() {
        let layout = layout(&[base()], SortDescription::ascending([0])).expect("layout");
        let good = RecordBatch::try_new(
            base(),
            vec![
                Arc::new(Int64Array::from(vec![1])),
                Arc::new(StringArray::from(vec!["x"])),
                Arc::new(Int64Array::from(vec![5])),
            ],
        )
        .expect("batch");
        layout.check_batch(0, &good).expect("matching batch");

        let other = schema(vec![Field::new("k", DataType::Utf8, false)]);
        let bad = RecordBatch::try_new(other, vec![Arc::new(StringArray::from(vec!["x"]))])
            .expect("batch");
        assert!(matches!(
            layout.check_batch(3, &bad),
            Err(ConfigError::BatchSchema { input: 3 })
        ));
    }

    #[test]
    fn batch_check_catches_nulls_in_required_columns() {
        let strict = schema(vec![
            Field::new("k", DataType::Int64, false),
            Field::new("v", DataType::Utf8, false),
            aggregate_state_field("total", DataType::Int64, "sum"),
        ]);
        let layout = layout(&[strict], SortDescription::ascending([0])).expect("layout");
        let with_null = RecordBatch::try_new(
            base(),
            vec![
                Arc::new(Int64Array::from(vec![1])),
                Arc::new(StringArray::from(vec![None::<&str>])),
                Arc::new(Int64Array::from(vec![5])),
            ],
        )
        .expect("batch");
        assert!(matches!(
            layout.check_batch(1, &with_null),
            Err(ConfigError::BatchSchema { input: 1 })
        ));
    }
}
