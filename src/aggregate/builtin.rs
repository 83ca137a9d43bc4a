use std::{fmt, sync::Arc};

use arrow::{
    array::{
        Array, ArrayRef, AsArray, Float64Array, PrimitiveArray, StringArray, StructArray,
        UInt64Array,
    },
    buffer::NullBuffer,
    datatypes::{
        ArrowNativeTypeOp, ArrowPrimitiveType, DataType, Field, Fields, Float32Type, Float64Type,
        Int16Type, Int32Type, Int64Type, Int8Type, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
    },
};

use super::{AggregateError, AggregateFunction, StateColumn};

/// Sum of numeric states. Integer sums wrap on overflow.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sum;

/// Row count states, merged by addition.
#[derive(Clone, Copy, Debug, Default)]
pub struct Count;

/// Minimum of numeric or text states.
#[derive(Clone, Copy, Debug, Default)]
pub struct Min;

/// Maximum of numeric or text states.
#[derive(Clone, Copy, Debug, Default)]
pub struct Max;

/// Average carried as a `{sum, count}` struct state.
#[derive(Clone, Copy, Debug, Default)]
pub struct Avg;

/// State type used by [`Avg`].
pub fn avg_state_type() -> DataType {
    DataType::Struct(avg_fields())
}

fn avg_fields() -> Fields {
    Fields::from(vec![
        Field::new("sum", DataType::Float64, false),
        Field::new("count", DataType::UInt64, false),
    ])
}

impl AggregateFunction for Sum {
    fn name(&self) -> &str {
        "sum"
    }

    fn state_column(&self, data_type: &DataType) -> Result<Box<dyn StateColumn>, AggregateError> {
        numeric_states(self.name(), Fold::Add, data_type)
            .ok_or_else(|| unsupported(self.name(), data_type))
    }
}

impl AggregateFunction for Count {
    fn name(&self) -> &str {
        "count"
    }

    fn state_column(&self, data_type: &DataType) -> Result<Box<dyn StateColumn>, AggregateError> {
        match data_type {
            DataType::Int64 | DataType::UInt64 => numeric_states(self.name(), Fold::Add, data_type)
                .ok_or_else(|| unsupported(self.name(), data_type)),
            _ => Err(unsupported(self.name(), data_type)),
        }
    }
}

impl AggregateFunction for Min {
    fn name(&self) -> &str {
        "min"
    }

    fn state_column(&self, data_type: &DataType) -> Result<Box<dyn StateColumn>, AggregateError> {
        ordered_states(self.name(), Fold::Min, data_type)
    }
}

impl AggregateFunction for Max {
    fn name(&self) -> &str {
        "max"
    }

    fn state_column(&self, data_type: &DataType) -> Result<Box<dyn StateColumn>, AggregateError> {
        ordered_states(self.name(), Fold::Max, data_type)
    }
}

impl AggregateFunction for Avg {
    fn name(&self) -> &str {
        "avg"
    }

    fn state_column(&self, data_type: &DataType) -> Result<Box<dyn StateColumn>, AggregateError> {
        if *data_type != avg_state_type() {
            return Err(unsupported(self.name(), data_type));
        }
        Ok(Box::new(AvgStates::default()))
    }
}

fn unsupported(function: &str, data_type: &DataType) -> AggregateError {
    AggregateError::UnsupportedStateType {
        function: function.to_string(),
        data_type: data_type.clone(),
    }
}

fn mismatch(function: &str, expected: &DataType, actual: &DataType) -> AggregateError {
    AggregateError::StateTypeMismatch {
        function: function.to_string(),
        expected: expected.clone(),
        actual: actual.clone(),
    }
}

fn check_row(states: &dyn Array, row: usize) -> Result<(), AggregateError> {
    if row >= states.len() {
        return Err(AggregateError::RowOutOfBounds {
            row,
            len: states.len(),
        });
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fold {
    Add,
    Min,
    Max,
}

impl Fold {
    fn apply<N: ArrowNativeTypeOp>(self, acc: N, value: N) -> N {
        match self {
            Fold::Add => acc.add_wrapping(value),
            Fold::Min => {
                if value.is_lt(acc) {
                    value
                } else {
                    acc
                }
            }
            Fold::Max => {
                if value.is_gt(acc) {
                    value
                } else {
                    acc
                }
            }
        }
    }

    fn apply_str(self, acc: &mut String, value: &str) {
        let replace = match self {
            Fold::Min => value < acc.as_str(),
            Fold::Max => value > acc.as_str(),
            Fold::Add => false,
        };
        if replace {
            value.clone_into(acc);
        }
    }
}

macro_rules! primitive_states {
    ($function:expr, $fold:expr, $data_type:expr, { $($pat:pat => $ty:ty),* $(,)? }) => {
        match $data_type {
            $(
                $pat => Some(Box::new(PrimitiveStates::<$ty>::new(
                    $function,
                    $fold,
                    $data_type.clone(),
                )) as Box<dyn StateColumn>),
            )*
            _ => None,
        }
    };
}

fn numeric_states(
    function: &str,
    fold: Fold,
    data_type: &DataType,
) -> Option<Box<dyn StateColumn>> {
    primitive_states!(function, fold, data_type, {
        DataType::Int8 => Int8Type,
        DataType::Int16 => Int16Type,
        DataType::Int32 => Int32Type,
        DataType::Int64 => Int64Type,
        DataType::UInt8 => UInt8Type,
        DataType::UInt16 => UInt16Type,
        DataType::UInt32 => UInt32Type,
        DataType::UInt64 => UInt64Type,
        DataType::Float32 => Float32Type,
        DataType::Float64 => Float64Type,
    })
}

fn ordered_states(
    function: &str,
    fold: Fold,
    data_type: &DataType,
) -> Result<Box<dyn StateColumn>, AggregateError> {
    if *data_type == DataType::Utf8 {
        return Ok(Box::new(StringStates::new(function, fold)));
    }
    numeric_states(function, fold, data_type).ok_or_else(|| unsupported(function, data_type))
}

struct PrimitiveStates<T: ArrowPrimitiveType> {
    function: String,
    fold: Fold,
    data_type: DataType,
    slots: Vec<Option<T::Native>>,
}

impl<T: ArrowPrimitiveType> PrimitiveStates<T> {
    fn new(function: &str, fold: Fold, data_type: DataType) -> Self {
        Self {
            function: function.to_string(),
            fold,
            data_type,
            slots: Vec::new(),
        }
    }

    fn read(&self, states: &dyn Array, row: usize) -> Result<Option<T::Native>, AggregateError> {
        let array = states
            .as_primitive_opt::<T>()
            .ok_or_else(|| mismatch(&self.function, &self.data_type, states.data_type()))?;
        check_row(states, row)?;
        Ok(array.is_valid(row).then(|| array.value(row)))
    }
}

impl<T: ArrowPrimitiveType> fmt::Debug for PrimitiveStates<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimitiveStates")
            .field("function", &self.function)
            .field("data_type", &self.data_type)
            .field("slots", &self.slots.len())
            .finish()
    }
}

impl<T: ArrowPrimitiveType> StateColumn for PrimitiveStates<T> {
    fn push_state(&mut self, states: &dyn Array, row: usize) -> Result<(), AggregateError> {
        let value = self.read(states, row)?;
        self.slots.push(value);
        Ok(())
    }

    fn merge_state(
        &mut self,
        slot: usize,
        states: &dyn Array,
        row: usize,
    ) -> Result<(), AggregateError> {
        let value = self.read(states, row)?;
        let len = self.slots.len();
        let acc = self
            .slots
            .get_mut(slot)
            .ok_or(AggregateError::SlotOutOfBounds { slot, len })?;
        if let Some(value) = value {
            *acc = Some(match *acc {
                Some(current) => self.fold.apply(current, value),
                None => value,
            });
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn finish(&mut self) -> Result<ArrayRef, AggregateError> {
        let array = self
            .slots
            .drain(..)
            .collect::<PrimitiveArray<T>>()
            .with_data_type(self.data_type.clone());
        Ok(Arc::new(array))
    }
}

#[derive(Debug)]
struct StringStates {
    function: String,
    fold: Fold,
    slots: Vec<Option<String>>,
}

impl StringStates {
    fn new(function: &str, fold: Fold) -> Self {
        Self {
            function: function.to_string(),
            fold,
            slots: Vec::new(),
        }
    }

    fn read<'a>(
        &self,
        states: &'a dyn Array,
        row: usize,
    ) -> Result<Option<&'a str>, AggregateError> {
        let array = states
            .as_string_opt::<i32>()
            .ok_or_else(|| mismatch(&self.function, &DataType::Utf8, states.data_type()))?;
        check_row(states, row)?;
        Ok(array.is_valid(row).then(|| array.value(row)))
    }
}

impl StateColumn for StringStates {
    fn push_state(&mut self, states: &dyn Array, row: usize) -> Result<(), AggregateError> {
        let value = self.read(states, row)?.map(str::to_string);
        self.slots.push(value);
        Ok(())
    }

    fn merge_state(
        &mut self,
        slot: usize,
        states: &dyn Array,
        row: usize,
    ) -> Result<(), AggregateError> {
        let value = self.read(states, row)?;
        let len = self.slots.len();
        let acc = self
            .slots
            .get_mut(slot)
            .ok_or(AggregateError::SlotOutOfBounds { slot, len })?;
        match (acc.as_mut(), value) {
            (Some(current), Some(value)) => self.fold.apply_str(current, value),
            (None, Some(value)) => *acc = Some(value.to_string()),
            (_, None) => {}
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn finish(&mut self) -> Result<ArrayRef, AggregateError> {
        let slots = std::mem::take(&mut self.slots);
        Ok(Arc::new(StringArray::from(slots)))
    }
}

/// `None` is an empty slot: every contributing state was null.
#[derive(Debug, Default)]
struct AvgStates {
    slots: Vec<Option<(f64, u64)>>,
}

impl AvgStates {
    fn read(states: &dyn Array, row: usize) -> Result<Option<(f64, u64)>, AggregateError> {
        let expected = avg_state_type();
        let array = states
            .as_struct_opt()
            .ok_or_else(|| mismatch("avg", &expected, states.data_type()))?;
        let sums = array
            .column_by_name("sum")
            .and_then(|column| column.as_primitive_opt::<Float64Type>())
            .ok_or_else(|| mismatch("avg", &expected, states.data_type()))?;
        let counts = array
            .column_by_name("count")
            .and_then(|column| column.as_primitive_opt::<UInt64Type>())
            .ok_or_else(|| mismatch("avg", &expected, states.data_type()))?;
        check_row(states, row)?;
        if array.is_null(row) {
            return Ok(None);
        }
        let sum = if sums.is_valid(row) { sums.value(row) } else { 0.0 };
        let count = if counts.is_valid(row) {
            counts.value(row)
        } else {
            0
        };
        Ok(Some((sum, count)))
    }
}

impl StateColumn for AvgStates {
    fn push_state(&mut self, states: &dyn Array, row: usize) -> Result<(), AggregateError> {
        let state = Self::read(states, row)?;
        self.slots.push(state);
        Ok(())
    }

    fn merge_state(
        &mut self,
        slot: usize,
        states: &dyn Array,
        row: usize,
    ) -> Result<(), AggregateError> {
        let state = Self::read(states, row)?;
        let len = self.slots.len();
        let acc = self
            .slots
            .get_mut(slot)
            .ok_or(AggregateError::SlotOutOfBounds { slot, len })?;
        match (acc.as_mut(), state) {
            (Some((sum, count)), Some((other_sum, other_count))) => {
                *sum += other_sum;
                *count = count.wrapping_add(other_count);
            }
            (None, Some(state)) => *acc = Some(state),
            (_, None) => {}
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn finish(&mut self) -> Result<ArrayRef, AggregateError> {
        let slots = std::mem::take(&mut self.slots);
        let nulls = NullBuffer::from_iter(slots.iter().map(Option::is_some));
        let (sums, counts): (Vec<f64>, Vec<u64>) =
            slots.into_iter().map(Option::unwrap_or_default).unzip();
        let array = StructArray::try_new(
            avg_fields(),
            vec![
                Arc::new(Float64Array::from(sums)) as ArrayRef,
                Arc::new(UInt64Array::from(counts)) as ArrayRef,
            ],
            Some(nulls),
        )?;
        Ok(Arc::new(array))
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::{Int32Array, Int64Array};

    use super::*;

    #[test]
    fn sum_merges_in_place_and_skips_nulls() {
        let mut states = Sum.state_column(&DataType::Int64).expect("int64 sum");
        let input = Int64Array::from(vec![Some(3), None, Some(4), Some(i64::MAX)]);

        states.push_state(&input, 0).expect("push");
        states.merge_state(0, &input, 1).expect("null merge");
        states.merge_state(0, &input, 2).expect("merge");
        states.push_state(&input, 1).expect("push null");
        states.merge_state(1, &input, 2).expect("merge into empty");
        assert_eq!(states.len(), 2);

        let finished = states.finish().expect("finish");
        let finished = finished.as_primitive::<Int64Type>();
        assert_eq!(finished.values().to_vec(), vec![7, 4]);
        assert!(states.is_empty(), "finish drains every slot");
    }

    #[test]
    fn sum_wraps_on_overflow() {
        let mut states = Sum.state_column(&DataType::Int32).expect("int32 sum");
        let input = Int32Array::from(vec![i32::MAX, 1]);
        states.push_state(&input, 0).expect("push");
        states.merge_state(0, &input, 1).expect("merge");
        let finished = states.finish().expect("finish");
        assert_eq!(finished.as_primitive::<Int32Type>().value(0), i32::MIN);
    }

    #[test]
    fn min_and_max_fold_numbers_and_strings() {
        let numbers = Float64Array::from(vec![2.5, -1.0, 9.0]);
        let mut min = Min.state_column(&DataType::Float64).expect("min");
        let mut max = Max.state_column(&DataType::Float64).expect("max");
        min.push_state(&numbers, 0).expect("push");
        max.push_state(&numbers, 0).expect("push");
        for row in 1..3 {
            min.merge_state(0, &numbers, row).expect("merge");
            max.merge_state(0, &numbers, row).expect("merge");
        }
        assert_eq!(
            min.finish().expect("finish").as_primitive::<Float64Type>().value(0),
            -1.0
        );
        assert_eq!(
            max.finish().expect("finish").as_primitive::<Float64Type>().value(0),
            9.0
        );

        let words = StringArray::from(vec![Some("pear"), None, Some("apple")]);
        let mut min = Min.state_column(&DataType::Utf8).expect("min utf8");
        min.push_state(&words, 1).expect("push null");
        min.merge_state(0, &words, 0).expect("merge");
        min.merge_state(0, &words, 2).expect("merge");
        let finished = min.finish().expect("finish");
        assert_eq!(finished.as_string::<i32>().value(0), "apple");
    }

    #[test]
    fn avg_merges_sum_and_count() {
        let states = StructArray::try_new(
            avg_fields(),
            vec![
                Arc::new(Float64Array::from(vec![10.0, 5.0])) as ArrayRef,
                Arc::new(UInt64Array::from(vec![4, 1])) as ArrayRef,
            ],
            None,
        )
        .expect("struct");
        let mut avg = Avg.state_column(&avg_state_type()).expect("avg");
        avg.push_state(&states, 0).expect("push");
        avg.merge_state(0, &states, 1).expect("merge");

        let finished = avg.finish().expect("finish");
        let finished = finished.as_struct();
        let sums = finished.column(0).as_primitive::<Float64Type>();
        let counts = finished.column(1).as_primitive::<UInt64Type>();
        assert_eq!(sums.value(0), 15.0);
        assert_eq!(counts.value(0), 5);
    }

    fn avg_input(states: Vec<Option<(f64, u64)>>) -> StructArray {
        let nulls = NullBuffer::from_iter(states.iter().map(Option::is_some));
        let (sums, counts): (Vec<f64>, Vec<u64>) =
            states.into_iter().map(Option::unwrap_or_default).unzip();
        StructArray::try_new(
            avg_fields(),
            vec![
                Arc::new(Float64Array::from(sums)) as ArrayRef,
                Arc::new(UInt64Array::from(counts)) as ArrayRef,
            ],
            Some(nulls),
        )
        .expect("struct")
    }

    #[test]
    fn avg_count_wraps_on_overflow() {
        let states = avg_input(vec![Some((1.0, u64::MAX)), Some((2.0, 1))]);
        let mut avg = Avg.state_column(&avg_state_type()).expect("avg");
        avg.push_state(&states, 0).expect("push");
        avg.merge_state(0, &states, 1).expect("merge");

        let finished = avg.finish().expect("finish");
        let finished = finished.as_struct();
        assert_eq!(finished.column(0).as_primitive::<Float64Type>().value(0), 3.0);
        assert_eq!(finished.column(1).as_primitive::<UInt64Type>().value(0), 0);
    }

    #[test]
    fn avg_null_states_stay_null() {
        let states = avg_input(vec![None, None, Some((6.0, 2))]);
        let mut avg = Avg.state_column(&avg_state_type()).expect("avg");
        avg.push_state(&states, 0).expect("push null");
        avg.merge_state(0, &states, 1).expect("merge null");
        avg.push_state(&states, 1).expect("push null");
        avg.merge_state(1, &states, 2).expect("merge into empty");

        let finished = avg.finish().expect("finish");
        let finished = finished.as_struct();
        assert!(finished.is_null(0));
        assert!(finished.is_valid(1));
        assert_eq!(finished.column(0).as_primitive::<Float64Type>().value(1), 6.0);
        assert_eq!(finished.column(1).as_primitive::<UInt64Type>().value(1), 2);
    }

    #[test]
    fn unsupported_and_mismatched_types_are_errors() {
        assert!(matches!(
            Count.state_column(&DataType::Float64),
            Err(AggregateError::UnsupportedStateType { .. })
        ));
        assert!(matches!(
            Avg.state_column(&DataType::Float64),
            Err(AggregateError::UnsupportedStateType { .. })
        ));

        let mut states = Sum.state_column(&DataType::Int64).expect("sum");
        let wrong = StringArray::from(vec!["x"]);
        assert!(matches!(
            states.push_state(&wrong, 0),
            Err(AggregateError::StateTypeMismatch { .. })
        ));

        let input = Int64Array::from(vec![1]);
        assert!(matches!(
            states.merge_state(0, &input, 0),
            Err(AggregateError::SlotOutOfBounds { slot: 0, len: 0 })
        ));
        assert!(matches!(
            states.push_state(&input, 5),
            Err(AggregateError::RowOutOfBounds { row: 5, len: 1 })
        ));
    }
}
