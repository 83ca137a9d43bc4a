//! Aggregate-state columns and the functions that merge them.
//!
//! A column holds partial aggregation states rather than plain values when its
//! field metadata names an aggregate function under
//! [`AGGREGATE_FUNCTION_KEY`]. The named function is resolved through an
//! [`AggregateRegistry`] once per merge run and supplies a [`StateColumn`]
//! that owns the merged states of the output rows.

mod builtin;
pub(crate) mod group;

use std::{collections::HashMap, fmt, sync::Arc};

use arrow::{
    array::{Array, ArrayRef},
    datatypes::{DataType, Field},
    error::ArrowError,
};
pub use builtin::{avg_state_type, Avg, Count, Max, Min, Sum};
use thiserror::Error;

/// Field metadata key naming the aggregate function of a state column.
pub const AGGREGATE_FUNCTION_KEY: &str = "aggregate_function";

/// Aggregate function whose partial states can be merged associatively.
pub trait AggregateFunction: Send + Sync + fmt::Debug {
    /// Name referenced by field metadata.
    fn name(&self) -> &str;

    /// Create an empty state column for states of `data_type`.
    ///
    /// # Errors
    /// Returns [`AggregateError::UnsupportedStateType`] when the function cannot
    /// hold states of that type.
    fn state_column(&self, data_type: &DataType) -> Result<Box<dyn StateColumn>, AggregateError>;
}

/// Owned, growable column of aggregation states addressed by slot.
///
/// Slots are appended by [`StateColumn::push_state`] and merged into in place
/// by [`StateColumn::merge_state`]; [`StateColumn::finish`] drains every slot
/// into an Arrow array of the state type.
pub trait StateColumn: Send + fmt::Debug {
    /// Append the state at `row` of `states` as a new slot (first contribution).
    fn push_state(&mut self, states: &dyn Array, row: usize) -> Result<(), AggregateError>;

    /// Merge the state at `row` of `states` into the existing `slot`.
    fn merge_state(
        &mut self,
        slot: usize,
        states: &dyn Array,
        row: usize,
    ) -> Result<(), AggregateError>;

    /// Number of slots.
    fn len(&self) -> usize;

    /// Whether no slot has been pushed.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain all slots into an array.
    fn finish(&mut self) -> Result<ArrayRef, AggregateError>;
}

/// Errors raised while creating or merging aggregation states.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// The function cannot hold states of the given type.
    #[error("aggregate function {function} does not support state type {data_type}")]
    UnsupportedStateType {
        /// Function name.
        function: String,
        /// Rejected state type.
        data_type: DataType,
    },
    /// A state cell does not have the type the column was created for.
    #[error("aggregate function {function} expected state type {expected}, got {actual}")]
    StateTypeMismatch {
        /// Function name.
        function: String,
        /// Type the state column was created for.
        expected: DataType,
        /// Type of the offending array.
        actual: DataType,
    },
    /// Merge targeted a slot that does not exist.
    #[error("state slot {slot} out of bounds (len {len})")]
    SlotOutOfBounds {
        /// Requested slot.
        slot: usize,
        /// Number of slots.
        len: usize,
    },
    /// Source row does not exist in the state array.
    #[error("state row {row} out of bounds (len {len})")]
    RowOutOfBounds {
        /// Requested row.
        row: usize,
        /// Array length.
        len: usize,
    },
    /// Building the state array failed.
    #[error(transparent)]
    Arrow(#[from] ArrowError),
}

/// Lookup table from function name to implementation.
#[derive(Clone, Debug, Default)]
pub struct AggregateRegistry {
    functions: HashMap<String, Arc<dyn AggregateFunction>>,
}

impl AggregateRegistry {
    /// Registry without any function.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `sum`, `count`, `min`, `max` and `avg`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Sum));
        registry.register(Arc::new(Count));
        registry.register(Arc::new(Min));
        registry.register(Arc::new(Max));
        registry.register(Arc::new(Avg));
        registry
    }

    /// Register `function`, returning the previous entry with the same name.
    pub fn register(
        &mut self,
        function: Arc<dyn AggregateFunction>,
    ) -> Option<Arc<dyn AggregateFunction>> {
        self.functions
            .insert(function.name().to_string(), function)
    }

    /// Look a function up by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn AggregateFunction>> {
        self.functions.get(name)
    }
}

/// Whether `field` holds aggregation states instead of plain values.
pub fn is_aggregate_state_column(field: &Field) -> bool {
    aggregate_function_name(field).is_some()
}

/// Aggregate function named by the metadata of `field`, if any.
pub fn aggregate_function_name(field: &Field) -> Option<&str> {
    field
        .metadata()
        .get(AGGREGATE_FUNCTION_KEY)
        .map(String::as_str)
}

/// Build a field holding states of `function`.
pub fn aggregate_state_field(
    name: impl Into<String>,
    data_type: DataType,
    function: &str,
) -> Field {
    Field::new(name, data_type, true).with_metadata(HashMap::from([(
        AGGREGATE_FUNCTION_KEY.to_string(),
        function.to_string(),
    )]))
}
